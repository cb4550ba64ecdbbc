//! Application layer for Sahayak.
//!
//! This crate provides the workflow orchestrator and the use cases that
//! coordinate between the domain and infrastructure layers.

pub mod orchestrator;
pub mod pipeline;
pub mod session_usecase;
pub mod telemetry;

pub use orchestrator::{
    CheckpointDecision, RunArtifact, RunHandle, RunOutcome, RunState, RunStatusReport, StageEvent,
    WorkflowOrchestrator,
};
pub use pipeline::{PipelineConfig, StageSpec};
pub use session_usecase::SessionUseCase;
