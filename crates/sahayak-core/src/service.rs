//! External collaborator traits.
//!
//! The core never performs network IO itself. Generation and speech are
//! opaque collaborators behind these traits; HTTP-backed implementations
//! live in the interaction crate, and the orchestrator wraps calls in its
//! own timeout since the collaborators define none.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A generative text model invoked as an opaque function.
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Produces text for a prompt.
    ///
    /// # Errors
    ///
    /// Returns `SahayakError::GenerationUnavailable` when the provider
    /// cannot serve the request; the orchestrator surfaces this to the
    /// caller instead of substituting placeholder content.
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Identifier recorded in stage log metadata.
    fn model_name(&self) -> &str {
        "unknown"
    }
}

/// Voice parameters for speech synthesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceParams {
    pub voice_id: String,
    pub model_id: String,
    pub stability: f32,
    pub similarity_boost: f32,
    pub style: f32,
    pub use_speaker_boost: bool,
}

impl Default for VoiceParams {
    fn default() -> Self {
        Self {
            voice_id: "21m00Tcm4TlvDq8ikWAM".to_string(),
            model_id: "eleven_multilingual_v2".to_string(),
            stability: 0.5,
            similarity_boost: 0.75,
            style: 0.5,
            use_speaker_boost: true,
        }
    }
}

/// A text-to-speech / speech-to-text provider.
#[async_trait]
pub trait SpeechService: Send + Sync {
    /// Synthesizes speech audio for the given text.
    async fn synthesize(&self, text: &str, voice: &VoiceParams) -> Result<Vec<u8>>;

    /// Transcribes recorded audio to text.
    async fn transcribe(&self, audio: &[u8]) -> Result<String>;
}

/// A canned generation service for tests and offline use.
///
/// Returns the configured text for every prompt, recording nothing.
pub struct StaticGenerationService {
    response: String,
}

impl StaticGenerationService {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
        }
    }
}

#[async_trait]
impl GenerationService for StaticGenerationService {
    async fn generate(&self, _prompt: &str) -> Result<String> {
        Ok(self.response.clone())
    }

    fn model_name(&self) -> &str {
        "static"
    }
}
