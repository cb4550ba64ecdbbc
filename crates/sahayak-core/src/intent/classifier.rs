//! Rule-based intent classifier.
//!
//! Scores free-text input against a fixed table of weighted keyword/pattern
//! records with contextual adjustments from the teacher profile (subjects,
//! grades). Deterministic for identical inputs and total: every string,
//! including the empty one, yields a usable `Intent`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value, json};

use super::model::{Intent, IntentType};

/// Per-keyword score contribution, scaled by the pattern weight.
const KEYWORD_WEIGHT: f64 = 0.3;
/// Per-regex score contribution, scaled by the pattern weight.
const PATTERN_WEIGHT: f64 = 0.5;
/// Scale applied to the subject/grade context score.
const CONTEXT_WEIGHT: f64 = 0.2;
/// Scores at or below this floor fall back to the default intent.
const SCORE_FLOOR: f64 = 0.1;
/// Confidence is capped below 100: the scoring is heuristic, never certain.
const CONFIDENCE_CAP: u8 = 95;
/// Maximum number of suggestions returned for a partial input.
const MAX_SUGGESTIONS: usize = 5;

struct IntentPattern {
    kind: IntentType,
    keywords: &'static [&'static str],
    patterns: Vec<Regex>,
    weight: f64,
}

fn regexes(sources: &[&str]) -> Vec<Regex> {
    // Pattern sources are fixed literals; a failure here is a programming
    // error caught by the table test below.
    sources.iter().filter_map(|s| Regex::new(s).ok()).collect()
}

static PATTERNS: Lazy<Vec<IntentPattern>> = Lazy::new(|| {
    vec![
        IntentPattern {
            kind: IntentType::WorksheetGeneration,
            keywords: &[
                "worksheet",
                "activity sheet",
                "exercise",
                "practice",
                "homework",
                "assignment",
            ],
            patterns: regexes(&[
                r"create.*worksheet",
                r"generate.*activity",
                r"make.*exercise",
                r"design.*practice",
            ]),
            weight: 1.0,
        },
        IntentPattern {
            kind: IntentType::LessonPlanning,
            keywords: &[
                "lesson plan",
                "teaching plan",
                "curriculum",
                "schedule",
                "syllabus",
                "plan",
            ],
            patterns: regexes(&[
                r"lesson\s+plan",
                r"teaching\s+plan",
                r"plan.*lesson",
                r"curriculum.*design",
            ]),
            weight: 1.0,
        },
        IntentPattern {
            kind: IntentType::ConceptExplanation,
            keywords: &[
                "explain",
                "what is",
                "how does",
                "definition",
                "meaning",
                "understand",
            ],
            patterns: regexes(&[
                r"explain.*concept",
                r"what\s+is",
                r"how\s+does",
                r"help.*understand",
            ]),
            weight: 0.9,
        },
        IntentPattern {
            kind: IntentType::QuizGeneration,
            keywords: &["quiz", "test", "questions", "assessment", "exam", "evaluation"],
            patterns: regexes(&[
                r"create.*quiz",
                r"generate.*questions",
                r"make.*test",
                r"assessment.*questions",
            ]),
            weight: 1.0,
        },
        IntentPattern {
            kind: IntentType::GradeAdaptation,
            keywords: &[
                "grade",
                "level",
                "age appropriate",
                "simplify",
                "adapt",
                "modify",
            ],
            patterns: regexes(&[
                r"for\s+grade",
                r"age\s+appropriate",
                r"simplify.*for",
                r"adapt.*level",
            ]),
            weight: 0.8,
        },
        IntentPattern {
            kind: IntentType::Translation,
            keywords: &["translate", "hindi", "english", "language", "convert"],
            patterns: regexes(&[
                r"translate.*to",
                r"in\s+hindi",
                r"in\s+english",
                r"convert.*language",
            ]),
            weight: 0.9,
        },
        IntentPattern {
            kind: IntentType::ResourceCreation,
            keywords: &["resource", "material", "handout", "visual", "diagram", "chart"],
            patterns: regexes(&[
                r"create.*resource",
                r"make.*material",
                r"design.*visual",
                r"generate.*diagram",
            ]),
            weight: 0.8,
        },
        IntentPattern {
            kind: IntentType::BehaviorManagement,
            keywords: &[
                "behavior",
                "discipline",
                "manage",
                "classroom management",
                "student behavior",
            ],
            patterns: regexes(&[
                r"manage.*behavior",
                r"classroom\s+management",
                r"student\s+discipline",
                r"behavior\s+problems",
            ]),
            weight: 0.7,
        },
        IntentPattern {
            kind: IntentType::ParentCommunication,
            keywords: &["parent", "communication", "family", "guardian", "meeting"],
            patterns: regexes(&[
                r"parent.*communication",
                r"talk.*parents",
                r"family.*meeting",
                r"guardian.*discuss",
            ]),
            weight: 0.7,
        },
        IntentPattern {
            kind: IntentType::GeneralQuery,
            keywords: &["help", "advice", "suggestion", "guidance", "support"],
            patterns: regexes(&[
                r"help.*me",
                r"need.*advice",
                r"suggest.*me",
                r"guidance.*on",
            ]),
            weight: 0.5,
        },
    ]
});

static COUNT_RE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(\d+)\s*(question|exercise|problem)").ok());
static TARGET_GRADE_RE: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"grade\s*(\d+)").ok());
static DURATION_RE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(\d+)\s*(minute|hour|day)").ok());

/// Rule-based intent classifier over a fixed weighted pattern table.
#[derive(Debug, Default, Clone, Copy)]
pub struct IntentClassifier;

impl IntentClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classifies a message against the pattern table.
    ///
    /// Scoring per pattern: `weight * 0.3` per distinct keyword found in the
    /// normalized message, `weight * 0.5` per matching regex, plus a
    /// subject/grade context score scaled by 0.2. The highest total wins;
    /// totals at or below 0.1 fall back to the default general query intent.
    ///
    /// # Arguments
    ///
    /// * `message` - Raw user input; any string is accepted
    /// * `subjects` - Subjects from the teacher profile
    /// * `grades` - Grades taught, used for contextual boosts
    pub fn classify(&self, message: &str, subjects: &[String], grades: &[i32]) -> Intent {
        let normalized = message.to_lowercase().trim().to_string();

        let mut best_kind = IntentType::GeneralQuery;
        let mut best_score = SCORE_FLOOR;
        let mut best_keywords: Vec<String> = Vec::new();

        for pattern in PATTERNS.iter() {
            let mut score = 0.0;
            let mut keywords = Vec::new();

            for keyword in pattern.keywords {
                if normalized.contains(keyword) {
                    score += pattern.weight * KEYWORD_WEIGHT;
                    keywords.push((*keyword).to_string());
                }
            }

            for regex in &pattern.patterns {
                if regex.is_match(&normalized) {
                    score += pattern.weight * PATTERN_WEIGHT;
                }
            }

            score += context_score(pattern.kind, subjects, grades) * CONTEXT_WEIGHT;

            if score > best_score {
                best_score = score;
                best_kind = pattern.kind;
                best_keywords = keywords;
            }
        }

        let confidence = ((best_score * 100.0).round() as u64).min(CONFIDENCE_CAP as u64) as u8;
        let parameters = extract_parameters(best_kind, &normalized, subjects, grades);

        Intent {
            kind: best_kind,
            confidence,
            matched_keywords: best_keywords,
            parameters,
        }
    }

    /// Returns up to five `"intentType: keyword"` suggestions for a partial
    /// input, in pattern table order then keyword order.
    pub fn suggestions(&self, partial: &str, _subjects: &[String]) -> Vec<String> {
        let normalized = partial.to_lowercase();
        let mut suggestions = Vec::new();

        for pattern in PATTERNS.iter() {
            for keyword in pattern.keywords {
                if keyword.starts_with(&normalized) || normalized.contains(keyword) {
                    suggestions.push(format!("{}: {}", pattern.kind, keyword));
                    if suggestions.len() == MAX_SUGGESTIONS {
                        return suggestions;
                    }
                }
            }
        }

        suggestions
    }

    /// Lists the intent types the pattern table covers.
    pub fn available_intents(&self) -> Vec<IntentType> {
        PATTERNS.iter().map(|p| p.kind).collect()
    }
}

/// Context score from the teacher profile. Returned unscaled; the caller
/// applies the 0.2 context weight.
fn context_score(kind: IntentType, subjects: &[String], grades: &[i32]) -> f64 {
    let mut score = 0.0;
    let has_subject = |name: &str| subjects.iter().any(|s| s == name);

    if !subjects.is_empty() {
        match kind {
            // Common across all subjects
            IntentType::WorksheetGeneration | IntentType::QuizGeneration => score += 0.3,
            IntentType::ConceptExplanation
                if has_subject("Science") || has_subject("Mathematics") =>
            {
                score += 0.4
            }
            IntentType::ResourceCreation if has_subject("Art") || has_subject("Science") => {
                score += 0.3
            }
            _ => {}
        }
    }

    if !grades.is_empty() {
        let avg = grades.iter().sum::<i32>() as f64 / grades.len() as f64;
        match kind {
            // More common for lower grades
            IntentType::BehaviorManagement if avg <= 3.0 => score += 0.2,
            IntentType::ConceptExplanation => score += 0.1,
            // Multi-grade classrooms adapt material constantly
            IntentType::GradeAdaptation if grades.len() > 1 => score += 0.4,
            _ => {}
        }
    }

    score
}

/// Intent-specific parameter extraction. Missing matches leave the
/// corresponding key absent rather than null or zero.
fn extract_parameters(
    kind: IntentType,
    message: &str,
    subjects: &[String],
    grades: &[i32],
) -> Map<String, Value> {
    let mut parameters = Map::new();

    if !subjects.is_empty() {
        parameters.insert("subjects".to_string(), json!(subjects));
    }
    if !grades.is_empty() {
        parameters.insert("grades".to_string(), json!(grades));
    }

    match kind {
        IntentType::WorksheetGeneration | IntentType::QuizGeneration => {
            if let Some(caps) = COUNT_RE.as_ref().and_then(|re| re.captures(message)) {
                if let Ok(count) = caps[1].parse::<u64>() {
                    parameters.insert("count".to_string(), json!(count));
                }
            }

            let difficulty = if message.contains("easy") || message.contains("simple") {
                "easy"
            } else if message.contains("hard") || message.contains("difficult") {
                "hard"
            } else {
                "medium"
            };
            parameters.insert("difficulty".to_string(), json!(difficulty));
        }
        IntentType::Translation => {
            if message.contains("hindi") {
                parameters.insert("targetLanguage".to_string(), json!("hi"));
            } else if message.contains("english") {
                parameters.insert("targetLanguage".to_string(), json!("en"));
            }
        }
        IntentType::GradeAdaptation => {
            if let Some(caps) = TARGET_GRADE_RE.as_ref().and_then(|re| re.captures(message)) {
                if let Ok(grade) = caps[1].parse::<u64>() {
                    parameters.insert("targetGrade".to_string(), json!(grade));
                }
            }
        }
        IntentType::LessonPlanning => {
            if let Some(caps) = DURATION_RE.as_ref().and_then(|re| re.captures(message)) {
                if let Ok(value) = caps[1].parse::<u64>() {
                    parameters.insert(
                        "duration".to_string(),
                        json!({ "value": value, "unit": &caps[2] }),
                    );
                }
            }
        }
        _ => {}
    }

    parameters
}
