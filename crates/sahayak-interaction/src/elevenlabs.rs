//! ElevenLabsSpeechService - REST implementation of the speech collaborator.
//!
//! Synthesis posts to `text-to-speech/{voice_id}` and returns mpeg bytes;
//! transcription uploads audio to the scribe speech-to-text endpoint.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use sahayak_core::SahayakError;
use sahayak_core::error::Result;
use sahayak_core::service::{SpeechService, VoiceParams};

const API_BASE: &str = "https://api.elevenlabs.io/v1";
const TRANSCRIPTION_MODEL: &str = "scribe_v1";
/// Synthesis requests beyond this length are rejected before leaving the
/// process.
const MAX_TEXT_LENGTH: usize = 5000;

/// Speech service backed by the ElevenLabs HTTP API.
#[derive(Clone)]
pub struct ElevenLabsSpeechService {
    client: Client,
    api_key: String,
}

impl ElevenLabsSpeechService {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
        }
    }

    /// Builds a service from the `ELEVENLABS_API_KEY` environment variable.
    pub fn try_from_env() -> Result<Self> {
        let api_key = std::env::var("ELEVENLABS_API_KEY")
            .map_err(|_| SahayakError::config("ELEVENLABS_API_KEY is not set"))?;
        Ok(Self::new(api_key))
    }

    /// Lists the voices available to this account.
    pub async fn voices(&self) -> Result<Vec<VoiceInfo>> {
        let response = self
            .client
            .get(format!("{API_BASE}/voices"))
            .header("Accept", "application/json")
            .header("xi-api-key", &self.api_key)
            .send()
            .await
            .map_err(|err| SahayakError::SpeechUnavailable(format!("voice listing failed: {err}")))?;

        if !response.status().is_success() {
            return Err(SahayakError::SpeechUnavailable(format!(
                "voice listing failed: HTTP {}",
                response.status().as_u16()
            )));
        }

        let parsed: VoicesResponse = response.json().await.map_err(|err| {
            SahayakError::SpeechUnavailable(format!("failed to parse voice listing: {err}"))
        })?;
        Ok(parsed.voices)
    }
}

#[async_trait]
impl SpeechService for ElevenLabsSpeechService {
    async fn synthesize(&self, text: &str, voice: &VoiceParams) -> Result<Vec<u8>> {
        if text.is_empty() {
            return Err(SahayakError::InvalidInput(
                "synthesis text must not be empty".to_string(),
            ));
        }
        if text.len() > MAX_TEXT_LENGTH {
            return Err(SahayakError::InvalidInput(format!(
                "synthesis text too long: {} > {MAX_TEXT_LENGTH} characters",
                text.len()
            )));
        }

        let body = SynthesizeRequest {
            text,
            model_id: &voice.model_id,
            voice_settings: VoiceSettings {
                stability: voice.stability,
                similarity_boost: voice.similarity_boost,
                style: voice.style,
                use_speaker_boost: voice.use_speaker_boost,
            },
        };

        let response = self
            .client
            .post(format!("{API_BASE}/text-to-speech/{}", voice.voice_id))
            .header("Accept", "audio/mpeg")
            .header("xi-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| SahayakError::SpeechUnavailable(format!("synthesis failed: {err}")))?;

        if !response.status().is_success() {
            return Err(SahayakError::SpeechUnavailable(format!(
                "synthesis failed: HTTP {}",
                response.status().as_u16()
            )));
        }

        let bytes = response.bytes().await.map_err(|err| {
            SahayakError::SpeechUnavailable(format!("failed to read audio body: {err}"))
        })?;
        Ok(bytes.to_vec())
    }

    async fn transcribe(&self, audio: &[u8]) -> Result<String> {
        if audio.is_empty() {
            return Err(SahayakError::InvalidInput(
                "transcription audio must not be empty".to_string(),
            ));
        }

        let file_part = reqwest::multipart::Part::bytes(audio.to_vec())
            .file_name("recording.webm")
            .mime_str("application/octet-stream")
            .map_err(|err| SahayakError::SpeechUnavailable(err.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .text("model_id", TRANSCRIPTION_MODEL)
            .part("file", file_part);

        let response = self
            .client
            .post(format!("{API_BASE}/speech-to-text"))
            .header("xi-api-key", &self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|err| SahayakError::SpeechUnavailable(format!("transcription failed: {err}")))?;

        if !response.status().is_success() {
            return Err(SahayakError::SpeechUnavailable(format!(
                "transcription failed: HTTP {}",
                response.status().as_u16()
            )));
        }

        let parsed: TranscriptionResponse = response.json().await.map_err(|err| {
            SahayakError::SpeechUnavailable(format!("failed to parse transcription: {err}"))
        })?;
        Ok(parsed.text)
    }
}

/// Decodes a base64 audio payload as returned by providers that wrap audio
/// in JSON instead of raw bytes.
pub fn decode_audio_payload(encoded: &str) -> Result<Vec<u8>> {
    BASE64_STANDARD
        .decode(encoded)
        .map_err(|err| SahayakError::SpeechUnavailable(format!("invalid audio payload: {err}")))
}

#[derive(Serialize)]
struct SynthesizeRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettings,
}

#[derive(Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
    style: f32,
    use_speaker_boost: bool,
}

#[derive(Deserialize)]
struct VoicesResponse {
    #[serde(default)]
    voices: Vec<VoiceInfo>,
}

/// One available synthesis voice.
#[derive(Debug, Clone, Deserialize)]
pub struct VoiceInfo {
    pub voice_id: String,
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}
