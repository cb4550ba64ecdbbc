//! Session use case implementation.
//!
//! `SessionUseCase` coordinates the session repository, the workflow
//! orchestrator, and the memory store so that callers get one coherent
//! surface: create/open sessions, submit requests, and persist the outcome
//! of a finished run back into the session record.

use std::sync::Arc;

use sahayak_core::SahayakError;
use sahayak_core::error::Result;
use sahayak_core::memory::MemoryStore;
use sahayak_core::session::{ConversationMessage, Session, SessionRepository};

use crate::orchestrator::{RunHandle, RunOutcome, WorkflowOrchestrator};

/// Coordinates session state across the repository, orchestrator, and
/// memory store.
///
/// # Responsibilities
///
/// - Creating and loading sessions, hydrating the memory store on open
/// - Appending caller-owned messages and starting workflow runs
/// - Persisting the stage list, assistant artifact message, and memory
///   snapshot once a run reaches a terminal status
pub struct SessionUseCase {
    repository: Arc<dyn SessionRepository>,
    orchestrator: Arc<WorkflowOrchestrator>,
    memory: Arc<MemoryStore>,
}

impl SessionUseCase {
    pub fn new(
        repository: Arc<dyn SessionRepository>,
        orchestrator: Arc<WorkflowOrchestrator>,
        memory: Arc<MemoryStore>,
    ) -> Self {
        Self {
            repository,
            orchestrator,
            memory,
        }
    }

    /// Creates and persists a new session.
    pub async fn create_session(&self, title: impl Into<String>) -> Result<Session> {
        let session = Session::new(title);
        self.repository.save(&session).await?;
        tracing::info!(target: "session", session_id = %session.id, "session created");
        Ok(session)
    }

    /// Loads a session and hydrates its memory into the store.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the session does not exist.
    pub async fn open_session(&self, session_id: &str) -> Result<Session> {
        let session = self
            .repository
            .find_by_id(session_id)
            .await?
            .ok_or_else(|| SahayakError::not_found("session", session_id))?;

        self.memory
            .restore(session_id, session.memory.clone())
            .await;
        Ok(session)
    }

    /// Appends the user's message and starts a workflow run for it.
    ///
    /// The caller owns message creation; the orchestrator owns everything
    /// that follows. A second submission while a run is active is rejected
    /// with `RunAlreadyActive`.
    pub async fn submit_request(
        &self,
        session_id: &str,
        text: &str,
        subjects: Vec<String>,
        grades: Vec<i32>,
    ) -> Result<RunHandle> {
        let mut session = self
            .repository
            .find_by_id(session_id)
            .await?
            .ok_or_else(|| SahayakError::not_found("session", session_id))?;

        session.push_message(ConversationMessage::user(text));
        self.repository.save(&session).await?;

        self.orchestrator
            .start_run(session_id, text, subjects, grades)
            .await
    }

    /// Waits for a run to finish and persists its outcome into the session:
    /// the full stage list, the memory snapshot, and on success the final
    /// artifact as an assistant message.
    ///
    /// The run's terminal error, if any, is returned after persistence so
    /// the caller still sees the failure.
    pub async fn complete_run(
        &self,
        session_id: &str,
        handle: RunHandle,
    ) -> Result<RunOutcome> {
        let outcome = handle.wait().await;

        let report = self.orchestrator.status(session_id).await?;
        let mut session = self
            .repository
            .find_by_id(session_id)
            .await?
            .ok_or_else(|| SahayakError::not_found("session", session_id))?;

        session.stages = Some(report.stages);
        session.memory = self.memory.snapshot(session_id).await;
        if let Ok(RunOutcome::Completed(artifact)) = &outcome {
            session.push_message(ConversationMessage::assistant(artifact.content.clone()));
        }
        session.touch();
        self.repository.save(&session).await?;

        outcome
    }

    /// Lists all sessions, most recently active first.
    pub async fn list_sessions(&self) -> Result<Vec<Session>> {
        self.repository.list_all().await
    }

    /// Deletes a session and drops its in-memory state.
    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        self.repository.delete(session_id).await?;
        self.memory.restore(session_id, Vec::new()).await;
        Ok(())
    }
}
