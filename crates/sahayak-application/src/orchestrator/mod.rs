//! Workflow orchestrator.
//!
//! Drives a session's stage pipeline from start to terminal status: one run
//! per session at a time, executed on its own tokio task, with status reads
//! served from immutable snapshots so checkpoint waits never block other
//! sessions or status polling.

mod runner;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use sahayak_core::SahayakError;
use sahayak_core::error::Result;
use sahayak_core::intent::{Intent, IntentClassifier};
use sahayak_core::memory::MemoryStore;
use sahayak_core::service::GenerationService;
use sahayak_core::stage::{Stage, StageStatus};

use crate::pipeline::PipelineConfig;
use runner::PipelineRunner;

/// Overall status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Stages are executing
    Running,
    /// A checkpoint stage is suspended awaiting external input
    AwaitingInput,
    Completed,
    Failed,
    Cancelled,
}

impl RunState {
    /// True while the run still owns its session's stage list.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::AwaitingInput)
    }
}

/// Decision supplied by the external actor at a checkpoint stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckpointDecision {
    /// Continue the run; the payload carries checkpoint-specific data
    /// (e.g. the selected delivery date for the scheduler).
    Approve {
        #[serde(default)]
        payload: Option<Value>,
    },
    /// Re-run the stage's generation; bounded by the configured counter.
    Regenerate {
        #[serde(default)]
        note: Option<String>,
    },
    /// Abort the whole run; downstream stages never run.
    Reject {
        #[serde(default)]
        reason: Option<String>,
    },
}

/// Stage status transition published to subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct StageEvent {
    pub session_id: String,
    pub stage_id: String,
    pub status: StageStatus,
    pub timestamp: DateTime<Utc>,
}

/// Status snapshot served to pollers.
#[derive(Debug, Clone, Serialize)]
pub struct RunStatusReport {
    pub session_id: String,
    pub stages: Vec<Stage>,
    /// `completed_stages / total_stages`, skipped stages counted as done
    pub progress: f64,
    pub overall: RunState,
}

/// The finished artifact of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct RunArtifact {
    /// Final generated content
    pub content: String,
    /// The classified intent the run served
    pub intent: Intent,
    /// Delivery date selected at the scheduler checkpoint, if any
    pub scheduled_for: Option<String>,
    /// Full per-stage execution log
    pub stages: Vec<Stage>,
}

/// Terminal result of a run that was not aborted by an error.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed(RunArtifact),
    Cancelled,
}

/// Handle to an in-flight run.
#[derive(Debug)]
pub struct RunHandle {
    pub session_id: String,
    handle: JoinHandle<Result<RunOutcome>>,
}

impl RunHandle {
    /// Waits for the run to reach a terminal status.
    ///
    /// # Errors
    ///
    /// Propagates the run's terminal error: `StageExecution`,
    /// `CheckpointTimeout`, or `GenerationUnavailable`. The full stage list
    /// with the failing stage flagged remains available via
    /// [`WorkflowOrchestrator::status`].
    pub async fn wait(self) -> Result<RunOutcome> {
        self.handle
            .await
            .map_err(|err| SahayakError::internal(format!("run task failed: {err}")))?
    }
}

pub(crate) struct CheckpointResolution {
    pub(crate) stage_id: String,
    pub(crate) decision: CheckpointDecision,
}

pub(crate) struct RunShared {
    pub(crate) session_id: String,
    pub(crate) stages: RwLock<Vec<Stage>>,
    pub(crate) state: RwLock<RunState>,
    pub(crate) cancel: CancellationToken,
}

struct RunSlot {
    shared: Arc<RunShared>,
    decisions: mpsc::UnboundedSender<CheckpointResolution>,
}

/// Coordinates workflow runs across sessions.
///
/// Sessions are independent and run fully in parallel; within one session
/// the orchestrator exclusively owns stage mutation and rejects a second
/// `start_run` while one is in flight.
pub struct WorkflowOrchestrator {
    config: PipelineConfig,
    classifier: IntentClassifier,
    memory: Arc<MemoryStore>,
    generation: Arc<dyn GenerationService>,
    runs: Arc<RwLock<HashMap<String, RunSlot>>>,
    events: broadcast::Sender<StageEvent>,
}

impl WorkflowOrchestrator {
    /// Creates an orchestrator over the given collaborators.
    ///
    /// # Arguments
    ///
    /// * `config` - Stage set and timing policy
    /// * `generation` - The external generative text collaborator
    /// * `memory` - Shared session memory store
    pub fn new(
        config: PipelineConfig,
        generation: Arc<dyn GenerationService>,
        memory: Arc<MemoryStore>,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            config,
            classifier: IntentClassifier::new(),
            memory,
            generation,
            runs: Arc::new(RwLock::new(HashMap::new())),
            events,
        }
    }

    /// Starts a workflow run for a session.
    ///
    /// The run executes on its own task; the returned handle can be awaited
    /// for the final artifact while status stays observable via
    /// [`status`](Self::status).
    ///
    /// # Errors
    ///
    /// Returns `RunAlreadyActive` while a previous run on the same session
    /// is still running or awaiting input.
    pub async fn start_run(
        &self,
        session_id: &str,
        trigger: &str,
        subjects: Vec<String>,
        grades: Vec<i32>,
    ) -> Result<RunHandle> {
        let shared = Arc::new(RunShared {
            session_id: session_id.to_string(),
            stages: RwLock::new(self.config.stages.iter().map(|s| s.to_stage()).collect()),
            state: RwLock::new(RunState::Running),
            cancel: CancellationToken::new(),
        });
        let (decisions_tx, decisions_rx) = mpsc::unbounded_channel();

        {
            let mut runs = self.runs.write().await;
            if let Some(existing) = runs.get(session_id) {
                if existing.shared.state.read().await.is_active() {
                    return Err(SahayakError::RunAlreadyActive(session_id.to_string()));
                }
            }
            runs.insert(
                session_id.to_string(),
                RunSlot {
                    shared: shared.clone(),
                    decisions: decisions_tx,
                },
            );
        }

        tracing::info!(
            target: "orchestrator",
            session_id,
            trigger_chars = trigger.len(),
            "starting workflow run"
        );

        let runner = PipelineRunner {
            config: self.config.clone(),
            classifier: self.classifier,
            memory: self.memory.clone(),
            generation: self.generation.clone(),
            shared,
            events: self.events.clone(),
            trigger: trigger.to_string(),
            subjects,
            grades,
        };
        let handle = tokio::spawn(runner.run(decisions_rx));

        Ok(RunHandle {
            session_id: session_id.to_string(),
            handle,
        })
    }

    /// Returns the current status snapshot for a session's run.
    ///
    /// Safe to call from any task at any time; reads never block the run.
    pub async fn status(&self, session_id: &str) -> Result<RunStatusReport> {
        let runs = self.runs.read().await;
        let slot = runs
            .get(session_id)
            .ok_or_else(|| SahayakError::not_found("run", session_id))?;

        let stages = slot.shared.stages.read().await.clone();
        let overall = *slot.shared.state.read().await;
        Ok(RunStatusReport {
            session_id: session_id.to_string(),
            progress: compute_progress(&stages),
            stages,
            overall,
        })
    }

    /// Supplies a decision for a suspended checkpoint stage.
    ///
    /// # Errors
    ///
    /// Returns `CheckpointNotPending` when the named stage is not currently
    /// suspended, and `NotFound` when the session has no run.
    pub async fn resolve_checkpoint(
        &self,
        session_id: &str,
        stage_id: &str,
        decision: CheckpointDecision,
    ) -> Result<()> {
        let runs = self.runs.read().await;
        let slot = runs
            .get(session_id)
            .ok_or_else(|| SahayakError::not_found("run", session_id))?;

        let suspended = slot
            .shared
            .stages
            .read()
            .await
            .iter()
            .any(|s| s.id == stage_id && s.status == StageStatus::Suspended);
        if !suspended {
            return Err(SahayakError::CheckpointNotPending {
                stage_id: stage_id.to_string(),
            });
        }

        slot.decisions
            .send(CheckpointResolution {
                stage_id: stage_id.to_string(),
                decision,
            })
            .map_err(|_| SahayakError::internal("run is no longer accepting decisions"))
    }

    /// Requests cancellation of a session's run.
    ///
    /// The run halts after the currently-running stage finishes its current
    /// unit of work; no partial stage state is rolled back.
    pub async fn cancel_run(&self, session_id: &str) -> Result<()> {
        let runs = self.runs.read().await;
        let slot = runs
            .get(session_id)
            .ok_or_else(|| SahayakError::not_found("run", session_id))?;

        tracing::info!(target: "orchestrator", session_id, "cancellation requested");
        slot.shared.cancel.cancel();
        Ok(())
    }

    /// Subscribes to stage status transitions across all sessions.
    pub fn subscribe(&self) -> broadcast::Receiver<StageEvent> {
        self.events.subscribe()
    }

    /// Classifier suggestions for a partial input (top 5).
    pub fn suggestions(&self, partial: &str, subjects: &[String]) -> Vec<String> {
        self.classifier.suggestions(partial, subjects)
    }

    /// The classifier used for the initial classification phase.
    pub fn classifier(&self) -> &IntentClassifier {
        &self.classifier
    }
}

/// Progress of a run: terminal-successful stages over the total.
pub(crate) fn compute_progress(stages: &[Stage]) -> f64 {
    if stages.is_empty() {
        return 0.0;
    }
    let done = stages
        .iter()
        .filter(|s| matches!(s.status, StageStatus::Completed | StageStatus::Skipped))
        .count();
    done as f64 / stages.len() as f64
}
