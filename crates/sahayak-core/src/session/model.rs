//! Session domain model.
//!
//! This module contains the core Session entity that represents one unit of
//! conversation and workflow state in the application's domain layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::message::ConversationMessage;
use crate::memory::MemoryItem;
use crate::stage::Stage;

/// The unit of conversation and workflow state.
///
/// A session contains:
/// - The ordered message history (owned by the caller)
/// - The current stage list, present only while a workflow run exists
///   (owned exclusively by the orchestrator)
/// - The memory item collection for this session
/// - Timestamps for creation and last activity
///
/// Because the caller and the orchestrator share this record, all mutations
/// must be serialized per session; the application layer guarantees one
/// active run per session at a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Unique session identifier
    pub id: String,
    /// Human-readable session title
    pub title: String,
    /// Timestamp when the session was created (ISO 8601)
    pub created_at: DateTime<Utc>,
    /// Timestamp of the last activity (ISO 8601)
    pub last_active_at: DateTime<Utc>,
    /// Ordered message history
    #[serde(default)]
    pub messages: Vec<ConversationMessage>,
    /// Stage list of the most recent workflow run, absent if none ran
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stages: Option<Vec<Stage>>,
    /// Memory items scoped to this session
    #[serde(default)]
    pub memory: Vec<MemoryItem>,
}

impl Session {
    /// Creates a new empty session with a fresh id.
    pub fn new(title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: format!("session-{}", Uuid::new_v4()),
            title: title.into(),
            created_at: now,
            last_active_at: now,
            messages: Vec::new(),
            stages: None,
            memory: Vec::new(),
        }
    }

    /// Updates the last-activity timestamp.
    pub fn touch(&mut self) {
        self.last_active_at = Utc::now();
    }

    /// Appends a message and marks the session active.
    pub fn push_message(&mut self, message: ConversationMessage) {
        self.messages.push(message);
        self.touch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session() {
        let session = Session::new("Grade 3 maths");
        assert!(session.id.starts_with("session-"));
        assert_eq!(session.title, "Grade 3 maths");
        assert!(session.messages.is_empty());
        assert!(session.stages.is_none());
        assert!(session.memory.is_empty());
    }

    #[test]
    fn test_push_message_touches_session() {
        let mut session = Session::new("test");
        let before = session.last_active_at;
        session.push_message(ConversationMessage::user("hello"));
        assert_eq!(session.messages.len(), 1);
        assert!(session.last_active_at >= before);
    }

    #[test]
    fn test_json_round_trip() {
        let mut session = Session::new("round trip");
        session.push_message(ConversationMessage::user("Create a quiz"));

        let json = serde_json::to_string_pretty(&session).unwrap();
        let back: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(back, session);
        // stages is omitted entirely while no run exists
        assert!(!json.contains("\"stages\""));
    }
}
