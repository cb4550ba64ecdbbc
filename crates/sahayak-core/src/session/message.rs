//! Conversation message model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who authored a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

/// Reviewer reaction to an assistant message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feedback {
    Positive,
    Negative,
}

/// One exchanged message within a session.
///
/// Messages are created by the caller (UI/API layer); the orchestrator only
/// reads them as classifier input and appends the final artifact as an
/// assistant message through the session use case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Optional reviewer reaction recorded after delivery
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<Feedback>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback_reason: Option<String>,
    /// Follow-up suggestions surfaced alongside the message
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

impl ConversationMessage {
    fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: format!("msg-{}", Uuid::new_v4()),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            feedback: None,
            feedback_reason: None,
            suggestions: Vec::new(),
        }
    }

    /// Creates a user-authored message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// Creates an assistant-authored message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    /// Creates a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors() {
        let msg = ConversationMessage::user("Create a worksheet");
        assert_eq!(msg.role, MessageRole::User);
        assert_eq!(msg.content, "Create a worksheet");
        assert!(msg.feedback.is_none());
        assert!(msg.id.starts_with("msg-"));
    }

    #[test]
    fn test_optional_fields_omitted_in_json() {
        let msg = ConversationMessage::assistant("Done");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("feedback"));
        assert!(!json.contains("suggestions"));
    }
}
