//! External collaborator implementations.
//!
//! HTTP-backed providers for the core's `GenerationService` and
//! `SpeechService` traits, plus the prompt builders workflow stages use.

pub mod elevenlabs;
pub mod gemini;
pub mod prompts;

pub use elevenlabs::ElevenLabsSpeechService;
pub use gemini::GeminiGenerationService;
