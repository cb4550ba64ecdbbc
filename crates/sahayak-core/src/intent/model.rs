//! Intent domain model.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// The fixed set of request intents the classifier can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IntentType {
    WorksheetGeneration,
    LessonPlanning,
    ConceptExplanation,
    QuizGeneration,
    GradeAdaptation,
    Translation,
    ResourceCreation,
    BehaviorManagement,
    ParentCommunication,
    GeneralQuery,
}

impl IntentType {
    /// Stable string key matching the serialized form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WorksheetGeneration => "worksheetGeneration",
            Self::LessonPlanning => "lessonPlanning",
            Self::ConceptExplanation => "conceptExplanation",
            Self::QuizGeneration => "quizGeneration",
            Self::GradeAdaptation => "gradeAdaptation",
            Self::Translation => "translation",
            Self::ResourceCreation => "resourceCreation",
            Self::BehaviorManagement => "behaviorManagement",
            Self::ParentCommunication => "parentCommunication",
            Self::GeneralQuery => "generalQuery",
        }
    }

    /// True for intents whose runs produce a distributable artifact
    /// (worksheets, quizzes, plans, materials). Distribution stages are
    /// moot for the others.
    pub fn produces_deliverable(&self) -> bool {
        matches!(
            self,
            Self::WorksheetGeneration
                | Self::QuizGeneration
                | Self::LessonPlanning
                | Self::ResourceCreation
        )
    }
}

impl fmt::Display for IntentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifier output: the best-scoring intent with its evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    /// The classified intent type
    #[serde(rename = "type")]
    pub kind: IntentType,
    /// Heuristic confidence, 0-95. Capped below 100 because the scoring is
    /// lexical, never certain.
    pub confidence: u8,
    /// Keywords from the winning pattern found in the message
    #[serde(default)]
    pub matched_keywords: Vec<String>,
    /// Intent-specific extracted parameters; keys are absent when the
    /// corresponding signal was not found in the message.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub parameters: Map<String, Value>,
}

impl Intent {
    /// True when classification fell back without any supporting evidence.
    ///
    /// The orchestrator halts a run on an ambiguous intent instead of
    /// proceeding blindly.
    pub fn is_ambiguous(&self) -> bool {
        self.kind == IntentType::GeneralQuery
            && self.matched_keywords.is_empty()
            && self.confidence <= 10
    }
}
