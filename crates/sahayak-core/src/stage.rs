//! Stage domain model.
//!
//! A workflow run is a fixed ordered list of stages. Automated stages execute
//! orchestrator logic; checkpoint stages suspend the run until an external
//! actor supplies a decision. Stages are created when a run starts, mutated
//! only by the orchestrator, and retained for audit until the session itself
//! is discarded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Whether a stage runs on its own or waits for external input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Executes orchestrator logic without external involvement.
    Automated,
    /// Suspends the run until an external actor resolves it.
    Checkpoint,
}

/// The lifecycle status of a single stage.
///
/// Transitions: `Pending → Running → {Completed | Error | Suspended}`,
/// `Suspended → Running`, and `Pending → Skipped` when an upstream decision
/// makes the stage moot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Suspended,
    Skipped,
    Completed,
    Error,
}

impl StageStatus {
    /// True for statuses a stage can never leave.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Skipped)
    }
}

/// One recorded orchestration event. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Unique log entry identifier
    pub id: String,
    /// Timestamp the entry was recorded (ISO 8601)
    pub timestamp: DateTime<Utc>,
    /// Human-readable summary of the event
    pub message: String,
    /// Explanation of why the orchestrator did what it did
    pub reasoning: String,
    /// Free-form key/value bag: processing time, model identifier,
    /// confidence, parameters. Insertion order is preserved.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl LogEntry {
    /// Creates a log entry with a fresh id and the current timestamp.
    pub fn new(message: impl Into<String>, reasoning: impl Into<String>) -> Self {
        Self {
            id: format!("log-{}", Uuid::new_v4()),
            timestamp: Utc::now(),
            message: message.into(),
            reasoning: reasoning.into(),
            metadata: Map::new(),
        }
    }

    /// Attaches one metadata key, preserving insertion order.
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// One step of the workflow pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    /// Stable string key (e.g. "intent-classifier")
    pub id: String,
    /// Display name
    pub name: String,
    /// Automated or Checkpoint
    pub kind: StageKind,
    /// Current lifecycle status
    pub status: StageStatus,
    /// Set on the `Pending → Running` transition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Set on a terminal transition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Ordered, append-only orchestration log
    #[serde(default)]
    pub log_entries: Vec<LogEntry>,
    /// Ordered checkpoints used purely for progress display;
    /// not separately scheduled.
    #[serde(default)]
    pub sub_step_labels: Vec<String>,
}

impl Stage {
    /// Creates a new pending stage.
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: StageKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            status: StageStatus::Pending,
            started_at: None,
            ended_at: None,
            log_entries: Vec::new(),
            sub_step_labels: Vec::new(),
        }
    }

    /// Sets the sub-step labels used for progress display.
    pub fn with_sub_steps(mut self, labels: Vec<String>) -> Self {
        self.sub_step_labels = labels;
        self
    }

    /// Transitions `Pending → Running` and stamps the start time.
    pub fn begin(&mut self) {
        self.status = StageStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Transitions to `Completed` and stamps the end time.
    pub fn complete(&mut self) {
        self.status = StageStatus::Completed;
        self.ended_at = Some(Utc::now());
    }

    /// Transitions to `Error` and stamps the end time.
    pub fn fail(&mut self) {
        self.status = StageStatus::Error;
        self.ended_at = Some(Utc::now());
    }

    /// Transitions a checkpoint stage to `Suspended`.
    pub fn suspend(&mut self) {
        self.status = StageStatus::Suspended;
    }

    /// Transitions a suspended checkpoint back to `Running`.
    pub fn resume(&mut self) {
        self.status = StageStatus::Running;
    }

    /// Transitions `Pending → Skipped` without ever running.
    pub fn skip(&mut self) {
        self.status = StageStatus::Skipped;
        self.ended_at = Some(Utc::now());
    }

    /// Appends a log entry. Entries are never removed or rewritten.
    pub fn push_log(&mut self, entry: LogEntry) {
        self.log_entries.push(entry);
    }

    /// Wall-clock duration of the stage, when both timestamps are set.
    pub fn elapsed(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_lifecycle() {
        let mut stage = Stage::new("judge", "Judge", StageKind::Automated);
        assert_eq!(stage.status, StageStatus::Pending);
        assert!(stage.started_at.is_none());

        stage.begin();
        assert_eq!(stage.status, StageStatus::Running);
        assert!(stage.started_at.is_some());

        stage.complete();
        assert_eq!(stage.status, StageStatus::Completed);
        assert!(stage.status.is_terminal());
        assert!(stage.elapsed().is_some());
    }

    #[test]
    fn test_checkpoint_suspend_resume() {
        let mut stage = Stage::new("feedback", "Feedback Collector", StageKind::Checkpoint);
        stage.begin();
        stage.suspend();
        assert_eq!(stage.status, StageStatus::Suspended);
        assert!(!stage.status.is_terminal());

        stage.resume();
        assert_eq!(stage.status, StageStatus::Running);
    }

    #[test]
    fn test_skip_from_pending() {
        let mut stage = Stage::new("notifier", "Notifier", StageKind::Automated);
        stage.skip();
        assert_eq!(stage.status, StageStatus::Skipped);
        assert!(stage.started_at.is_none());
        assert!(stage.ended_at.is_some());
    }

    #[test]
    fn test_log_entries_append_in_order() {
        let mut stage = Stage::new("orchestrator", "Orchestrator", StageKind::Automated);
        stage.push_log(LogEntry::new("first", "reason one"));
        stage.push_log(
            LogEntry::new("second", "reason two")
                .with_metadata("confidence", serde_json::json!(86)),
        );

        assert_eq!(stage.log_entries.len(), 2);
        assert_eq!(stage.log_entries[0].message, "first");
        assert_eq!(stage.log_entries[1].metadata["confidence"], 86);
        assert_ne!(stage.log_entries[0].id, stage.log_entries[1].id);
    }

    #[test]
    fn test_serialization_round_trip() {
        let mut stage = Stage::new("memory", "Memory Agent", StageKind::Automated)
            .with_sub_steps(vec!["Pattern extraction".to_string()]);
        stage.begin();
        stage.push_log(LogEntry::new("stored facts", "classification succeeded"));
        stage.complete();

        let json = serde_json::to_string(&stage).unwrap();
        let back: Stage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, stage);
    }
}
