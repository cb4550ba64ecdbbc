//! Pipeline configuration.
//!
//! The stage order and composition are configuration, not hard-coded logic:
//! executors dispatch on stage id with a generic fallback, so a deployment
//! can reshape the pipeline in TOML as long as the automated/checkpoint
//! distinction holds.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use sahayak_core::error::Result;
use sahayak_core::stage::{Stage, StageKind};

pub const ORCHESTRATOR_STAGE_ID: &str = "orchestrator";
pub const INTENT_CLASSIFIER_STAGE_ID: &str = "intent-classifier";
pub const GENERATOR_STAGE_ID: &str = "worksheet-generator";
pub const PERSONALISER_STAGE_ID: &str = "personaliser";
pub const JUDGE_STAGE_ID: &str = "judge";
pub const FEEDBACK_STAGE_ID: &str = "feedback";
pub const MEMORY_STAGE_ID: &str = "memory";
pub const SCHEDULER_STAGE_ID: &str = "scheduler";
pub const NOTIFIER_STAGE_ID: &str = "notifier";

/// Declarative description of one pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSpec {
    pub id: String,
    pub name: String,
    pub kind: StageKind,
    /// Reasoning recorded when the stage starts
    #[serde(default)]
    pub description: String,
    /// Sub-step labels, logged in order for progress display
    #[serde(default)]
    pub sub_steps: Vec<String>,
}

impl StageSpec {
    pub fn automated(id: &str, name: &str, description: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            kind: StageKind::Automated,
            description: description.to_string(),
            sub_steps: Vec::new(),
        }
    }

    pub fn checkpoint(id: &str, name: &str, description: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            kind: StageKind::Checkpoint,
            description: description.to_string(),
            sub_steps: Vec::new(),
        }
    }

    pub fn with_sub_steps(mut self, labels: &[&str]) -> Self {
        self.sub_steps = labels.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Instantiates a pending stage for a new run.
    pub fn to_stage(&self) -> Stage {
        Stage::new(&self.id, &self.name, self.kind).with_sub_steps(self.sub_steps.clone())
    }
}

/// Orchestrator configuration: the stage set plus timing policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_stage_specs")]
    pub stages: Vec<StageSpec>,
    /// How long a checkpoint waits for a decision before failing the run
    #[serde(default = "default_checkpoint_timeout_secs")]
    pub checkpoint_timeout_secs: u64,
    /// Budget wrapped around every external generation call; the
    /// collaborators define no timeout of their own
    #[serde(default = "default_generation_timeout_secs")]
    pub generation_timeout_secs: u64,
    /// How many times a reviewer may regenerate at one checkpoint
    #[serde(default = "default_max_regenerations")]
    pub max_regenerations: u32,
    /// How many memory items the generator recalls for context
    #[serde(default = "default_memory_recall_limit")]
    pub memory_recall_limit: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stages: default_stage_specs(),
            checkpoint_timeout_secs: default_checkpoint_timeout_secs(),
            generation_timeout_secs: default_generation_timeout_secs(),
            max_regenerations: default_max_regenerations(),
            memory_recall_limit: default_memory_recall_limit(),
        }
    }
}

impl PipelineConfig {
    /// Parses a configuration from TOML, filling defaults for absent keys.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn checkpoint_timeout(&self) -> Duration {
        Duration::from_secs(self.checkpoint_timeout_secs)
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }
}

fn default_checkpoint_timeout_secs() -> u64 {
    30
}

fn default_generation_timeout_secs() -> u64 {
    60
}

fn default_max_regenerations() -> u32 {
    3
}

fn default_memory_recall_limit() -> usize {
    5
}

fn default_stage_specs() -> Vec<StageSpec> {
    vec![
        StageSpec::automated(
            ORCHESTRATOR_STAGE_ID,
            "Orchestrator",
            "Analyzing request and coordinating workflow sequence",
        )
        .with_sub_steps(&[
            "Parsing input",
            "Identifying workflow",
            "Setting up coordination",
            "Initializing agents",
        ]),
        StageSpec::automated(
            INTENT_CLASSIFIER_STAGE_ID,
            "Intent Classifier",
            "Detecting request intent from teacher input",
        )
        .with_sub_steps(&[
            "Text analysis",
            "Pattern matching",
            "Intent confidence scoring",
            "Context extraction",
        ]),
        StageSpec::automated(
            GENERATOR_STAGE_ID,
            "Worksheet Generator",
            "Generating candidate content for review",
        )
        .with_sub_steps(&[
            "Rubric creation",
            "Guardrails setup",
            "Content framework",
            "Quality checks",
            "Template generation",
        ]),
        StageSpec::automated(
            PERSONALISER_STAGE_ID,
            "Personaliser",
            "Adapting content for grade level and student context",
        )
        .with_sub_steps(&[
            "Grade analysis",
            "Language adaptation",
            "Difficulty adjustment",
            "Cultural context",
            "Learning objectives",
        ]),
        StageSpec::automated(
            JUDGE_STAGE_ID,
            "Judge",
            "Evaluating appropriateness and educational value",
        )
        .with_sub_steps(&[
            "Content review",
            "Age appropriateness",
            "Learning objectives",
            "Quality assurance",
            "Educational standards check",
        ]),
        StageSpec::checkpoint(
            FEEDBACK_STAGE_ID,
            "Feedback Collector",
            "Presenting draft content for teacher approval",
        ),
        StageSpec::automated(
            MEMORY_STAGE_ID,
            "Memory Agent",
            "Storing successful patterns and preferences",
        )
        .with_sub_steps(&[
            "Pattern extraction",
            "Preference learning",
            "Context storage",
            "Knowledge base update",
        ]),
        StageSpec::checkpoint(
            SCHEDULER_STAGE_ID,
            "Scheduler Agent",
            "Awaiting distribution date selection",
        ),
        StageSpec::automated(
            NOTIFIER_STAGE_ID,
            "Notifier Agent",
            "Sending notifications to students",
        )
        .with_sub_steps(&[
            "Student list compilation",
            "Notification dispatch",
            "Delivery confirmation",
        ]),
    ]
}
