//! Error types for the Sahayak workflow core.

use serde::Serialize;
use thiserror::Error;

/// A shared error type for the entire Sahayak core.
///
/// This provides typed, structured error variants with automatic conversion
/// from common error types via the `From` trait. Component-local recoverable
/// conditions (no keyword match, no memory hits) are handled with documented
/// fallbacks and never surface here; these variants cover cross-component
/// failures that terminate a run or reject a request.
#[derive(Error, Debug, Clone, Serialize)]
pub enum SahayakError {
    /// Entity not found error with type information
    #[error("Entity not found: {entity_type} '{id}'")]
    NotFound {
        entity_type: &'static str,
        id: String,
    },

    /// IO error (file system operations)
    #[error("IO error: {message}")]
    Io { message: String },

    /// Serialization/deserialization error
    #[error("Serialization error: {format} - {message}")]
    Serialization {
        format: String, // "TOML", "JSON", etc.
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A second `start_run` was issued while a run is still in flight.
    #[error("A workflow run is already active for session '{0}'")]
    RunAlreadyActive(String),

    /// An automated stage failed; fatal to the run, no automatic retry.
    #[error("Stage '{stage_id}' failed: {message}")]
    StageExecution { stage_id: String, message: String },

    /// A checkpoint stage was never resolved before its timeout.
    #[error("Checkpoint '{stage_id}' timed out after {seconds}s")]
    CheckpointTimeout { stage_id: String, seconds: u64 },

    /// A checkpoint decision arrived for a stage that is not suspended.
    #[error("Stage '{stage_id}' is not awaiting a decision")]
    CheckpointNotPending { stage_id: String },

    /// The external generation collaborator is unavailable or unresponsive.
    #[error("Generation service unavailable: {0}")]
    GenerationUnavailable(String),

    /// The external speech collaborator is unavailable or unresponsive.
    #[error("Speech service unavailable: {0}")]
    SpeechUnavailable(String),

    /// Caller-supplied input was rejected before reaching a collaborator.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SahayakError {
    /// Creates a NotFound error
    pub fn not_found(entity_type: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type,
            id: id.into(),
        }
    }

    /// Creates an IO error
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Creates a Config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Creates a StageExecution error
    pub fn stage(stage_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StageExecution {
            stage_id: stage_id.into(),
            message: message.into(),
        }
    }

    /// Creates an Internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Check if this is a NotFound error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this error is fatal to a workflow run.
    ///
    /// Fatal errors mark the failing stage `Error` and halt the run;
    /// the caller is responsible for starting a fresh run.
    pub fn is_fatal_to_run(&self) -> bool {
        matches!(
            self,
            Self::StageExecution { .. }
                | Self::CheckpointTimeout { .. }
                | Self::GenerationUnavailable(_)
        )
    }

    /// Returns the failing stage id for run-terminating errors, if any.
    pub fn stage_id(&self) -> Option<&str> {
        match self {
            Self::StageExecution { stage_id, .. }
            | Self::CheckpointTimeout { stage_id, .. }
            | Self::CheckpointNotPending { stage_id } => Some(stage_id),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SahayakError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: format!("{} (kind: {:?})", err, err.kind()),
        }
    }
}

impl From<serde_json::Error> for SahayakError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            format: "JSON".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<toml::de::Error> for SahayakError {
    fn from(err: toml::de::Error) -> Self {
        Self::Serialization {
            format: "TOML".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<toml::ser::Error> for SahayakError {
    fn from(err: toml::ser::Error) -> Self {
        Self::Serialization {
            format: "TOML".to_string(),
            message: err.to_string(),
        }
    }
}

/// Conversion from anyhow::Error (transitional, for application edges)
impl From<anyhow::Error> for SahayakError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

/// A type alias for `Result<T, SahayakError>`.
pub type Result<T> = std::result::Result<T, SahayakError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_id_extraction() {
        let err = SahayakError::stage("judge", "empty candidate");
        assert_eq!(err.stage_id(), Some("judge"));
        assert!(err.is_fatal_to_run());

        let err = SahayakError::CheckpointTimeout {
            stage_id: "feedback".to_string(),
            seconds: 30,
        };
        assert_eq!(err.stage_id(), Some("feedback"));
        assert!(err.is_fatal_to_run());

        assert_eq!(SahayakError::config("bad").stage_id(), None);
    }

    #[test]
    fn test_run_already_active_is_not_fatal() {
        let err = SahayakError::RunAlreadyActive("session-1".to_string());
        assert!(!err.is_fatal_to_run());
        assert!(err.to_string().contains("session-1"));
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: SahayakError = io.into();
        assert!(matches!(err, SahayakError::Io { .. }));
    }
}
