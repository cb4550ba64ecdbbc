//! Per-run pipeline driver.
//!
//! One runner instance owns one run from start to terminal status. Stage
//! mutation goes through the shared stage list so status polling always sees
//! a consistent snapshot; checkpoint waits race the decision channel against
//! the configured timeout and the cancellation token.

use chrono::Utc;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc};

use sahayak_core::SahayakError;
use sahayak_core::error::Result;
use sahayak_core::intent::{Intent, IntentClassifier};
use sahayak_core::memory::{MemoryItem, MemoryKind, MemoryMetadata, MemoryStore};
use sahayak_core::service::GenerationService;
use sahayak_core::stage::{LogEntry, StageKind};

use sahayak_interaction::prompts;

use super::{
    CheckpointDecision, CheckpointResolution, RunArtifact, RunOutcome, RunShared, RunState,
    StageEvent, compute_progress,
};
use crate::pipeline::{
    FEEDBACK_STAGE_ID, GENERATOR_STAGE_ID, INTENT_CLASSIFIER_STAGE_ID, JUDGE_STAGE_ID,
    MEMORY_STAGE_ID, NOTIFIER_STAGE_ID, ORCHESTRATOR_STAGE_ID, PERSONALISER_STAGE_ID,
    PipelineConfig, SCHEDULER_STAGE_ID,
};

/// Mutable state accumulated across stages within one run.
struct RunContext {
    intent: Intent,
    recalled: Vec<MemoryItem>,
    candidate: Option<String>,
    approved: Option<String>,
    scheduled_for: Option<String>,
    difficulty: String,
    regenerations: u32,
}

impl RunContext {
    fn new(intent: Intent) -> Self {
        Self {
            intent,
            recalled: Vec::new(),
            candidate: None,
            approved: None,
            scheduled_for: None,
            difficulty: "medium".to_string(),
            regenerations: 0,
        }
    }

    fn question_count(&self) -> u64 {
        self.intent
            .parameters
            .get("count")
            .and_then(Value::as_u64)
            .unwrap_or(2)
    }
}

/// What a stage asks the run loop to do next.
enum StageFlow {
    Continue,
    Cancelled,
}

enum WaitResult {
    Decision(CheckpointDecision),
    Cancelled,
}

pub(crate) struct PipelineRunner {
    pub(crate) config: PipelineConfig,
    pub(crate) classifier: IntentClassifier,
    pub(crate) memory: Arc<MemoryStore>,
    pub(crate) generation: Arc<dyn GenerationService>,
    pub(crate) shared: Arc<RunShared>,
    pub(crate) events: broadcast::Sender<StageEvent>,
    pub(crate) trigger: String,
    pub(crate) subjects: Vec<String>,
    pub(crate) grades: Vec<i32>,
}

impl PipelineRunner {
    pub(crate) async fn run(
        self,
        mut decisions: mpsc::UnboundedReceiver<CheckpointResolution>,
    ) -> Result<RunOutcome> {
        let result = self.drive(&mut decisions).await;

        let final_state = match &result {
            Ok(RunOutcome::Completed(_)) => RunState::Completed,
            Ok(RunOutcome::Cancelled) => RunState::Cancelled,
            Err(_) => RunState::Failed,
        };
        *self.shared.state.write().await = final_state;

        match &result {
            Ok(RunOutcome::Completed(_)) => {
                tracing::info!(target: "orchestrator", session_id = %self.shared.session_id, "run completed")
            }
            Ok(RunOutcome::Cancelled) => {
                tracing::info!(target: "orchestrator", session_id = %self.shared.session_id, "run cancelled")
            }
            Err(err) => {
                tracing::warn!(target: "orchestrator", session_id = %self.shared.session_id, %err, "run failed")
            }
        }

        result
    }

    async fn drive(
        &self,
        decisions: &mut mpsc::UnboundedReceiver<CheckpointResolution>,
    ) -> Result<RunOutcome> {
        // Initial classification phase. An ambiguous result halts the run
        // instead of proceeding blindly.
        let intent = self
            .classifier
            .classify(&self.trigger, &self.subjects, &self.grades);
        if intent.is_ambiguous() {
            return Err(self.fail_classification(&intent).await);
        }

        let mut ctx = RunContext::new(intent);
        let total = self.shared.stages.read().await.len();
        let skip_distribution = !ctx.intent.kind.produces_deliverable();

        for index in 0..total {
            if self.shared.cancel.is_cancelled() {
                return Ok(RunOutcome::Cancelled);
            }

            let (stage_id, kind) = {
                let stages = self.shared.stages.read().await;
                (stages[index].id.clone(), stages[index].kind)
            };

            if skip_distribution
                && matches!(stage_id.as_str(), SCHEDULER_STAGE_ID | NOTIFIER_STAGE_ID)
            {
                self.skip_stage(index, &ctx).await;
                continue;
            }

            self.begin_stage(index).await;

            let flow = match kind {
                StageKind::Automated => self
                    .execute_automated(index, &stage_id, &mut ctx)
                    .await
                    .map(|_| StageFlow::Continue),
                StageKind::Checkpoint => {
                    self.execute_checkpoint(index, &stage_id, &mut ctx, decisions)
                        .await
                }
            };

            match flow {
                Ok(StageFlow::Continue) => self.complete_stage(index).await,
                Ok(StageFlow::Cancelled) => return Ok(RunOutcome::Cancelled),
                Err(err) => {
                    self.fail_stage(index, &err).await;
                    return Err(err);
                }
            }
        }

        // Materialize the final artifact from accumulated stage outputs.
        let prompt = prompts::worksheet(
            &self.trigger,
            &self.subject(),
            &self.grade_label(&ctx),
            &ctx.difficulty,
            ctx.approved.as_deref(),
        );
        let content = self.generate_with_timeout(&prompt).await?;

        let stages = self.shared.stages.read().await.clone();
        Ok(RunOutcome::Completed(RunArtifact {
            content,
            intent: ctx.intent.clone(),
            scheduled_for: ctx.scheduled_for.clone(),
            stages,
        }))
    }

    // ------------------------------------------------------------------
    // Automated stage executors, dispatched by stage id
    // ------------------------------------------------------------------

    async fn execute_automated(
        &self,
        index: usize,
        stage_id: &str,
        ctx: &mut RunContext,
    ) -> Result<()> {
        match stage_id {
            ORCHESTRATOR_STAGE_ID => self.run_intake(index, ctx).await,
            INTENT_CLASSIFIER_STAGE_ID => self.run_classifier_stage(index, ctx).await,
            GENERATOR_STAGE_ID => self.run_generator(index, ctx).await,
            PERSONALISER_STAGE_ID => self.run_personaliser(index, ctx).await,
            JUDGE_STAGE_ID => self.run_judge(index, stage_id, ctx).await,
            MEMORY_STAGE_ID => self.run_memory(index, ctx).await,
            NOTIFIER_STAGE_ID => self.run_notifier(index, ctx).await,
            other => self.run_generic(index, other).await,
        }
    }

    async fn run_intake(&self, index: usize, ctx: &mut RunContext) -> Result<()> {
        self.log_sub_steps(index, "Coordinating the workflow for this request")
            .await;
        self.push_log(
            index,
            LogEntry::new(
                "Workflow coordinated",
                format!(
                    "Request routed through the {} pipeline",
                    ctx.intent.kind
                ),
            )
            .with_metadata("subjects", json!(self.subjects))
            .with_metadata("grades", json!(self.grades)),
        )
        .await;
        Ok(())
    }

    async fn run_classifier_stage(&self, index: usize, ctx: &mut RunContext) -> Result<()> {
        self.log_sub_steps(index, "Scoring the message against the intent pattern table")
            .await;
        self.push_log(
            index,
            LogEntry::new(
                format!("Intent classified as {}", ctx.intent.kind),
                format!(
                    "Weighted keyword/pattern scoring with contextual adjustments; \
                     matched keywords: [{}]",
                    ctx.intent.matched_keywords.join(", ")
                ),
            )
            .with_metadata("confidence", json!(ctx.intent.confidence))
            .with_metadata("intent", json!(ctx.intent.kind))
            .with_metadata("parameters", Value::Object(ctx.intent.parameters.clone())),
        )
        .await;
        Ok(())
    }

    async fn run_generator(&self, index: usize, ctx: &mut RunContext) -> Result<()> {
        let recalled = self
            .memory
            .retrieve_relevant(
                &self.shared.session_id,
                &self.trigger,
                self.config.memory_recall_limit,
            )
            .await;

        let mut recall_log = LogEntry::new(
            format!("Recalled {} relevant memory items", recalled.len()),
            "Session memory provides personalization context for generation",
        )
        .with_metadata("recalled", json!(recalled.len()));
        if let Some(top) = recalled.first() {
            recall_log = recall_log.with_metadata("top_match", json!(top.content));
        }
        self.push_log(index, recall_log).await;
        ctx.recalled = recalled;

        self.log_sub_steps(index, "Preparing the candidate content draft")
            .await;

        let prompt = self.candidate_prompt(ctx, &self.trigger);
        let started = Instant::now();
        let candidate = self.generate_with_timeout(&prompt).await?;

        self.push_log(
            index,
            LogEntry::new(
                "Candidate content generated",
                "Draft questions produced for reviewer approval",
            )
            .with_metadata("model", json!(self.generation.model_name()))
            .with_metadata(
                "processing_time_ms",
                json!(started.elapsed().as_millis() as u64),
            )
            .with_metadata("prompt_chars", json!(prompt.len())),
        )
        .await;

        ctx.candidate = Some(candidate);
        Ok(())
    }

    async fn run_personaliser(&self, index: usize, ctx: &mut RunContext) -> Result<()> {
        self.log_sub_steps(index, "Adapting content to the classroom profile")
            .await;

        if let Some(difficulty) = ctx
            .intent
            .parameters
            .get("difficulty")
            .and_then(Value::as_str)
        {
            ctx.difficulty = difficulty.to_string();
        }
        let language = ctx
            .intent
            .parameters
            .get("targetLanguage")
            .and_then(Value::as_str)
            .unwrap_or("en")
            .to_string();
        let grade = self.grade_label(ctx);

        self.push_log(
            index,
            LogEntry::new(
                "Personalization profile applied",
                format!(
                    "Targeting Grade {grade} at {} difficulty, language '{language}'",
                    ctx.difficulty
                ),
            )
            .with_metadata("difficulty", json!(ctx.difficulty))
            .with_metadata("language", json!(language))
            .with_metadata("grade", json!(grade)),
        )
        .await;
        Ok(())
    }

    async fn run_judge(&self, index: usize, stage_id: &str, ctx: &mut RunContext) -> Result<()> {
        self.log_sub_steps(index, "Reviewing the candidate against quality criteria")
            .await;

        let candidate = ctx
            .candidate
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| SahayakError::stage(stage_id, "no candidate content to review"))?;

        let questions = candidate
            .lines()
            .filter(|line| {
                let trimmed = line.trim();
                !trimmed.is_empty()
                    && (trimmed.contains('?')
                        || trimmed.chars().next().is_some_and(|c| c.is_ascii_digit()))
            })
            .count();
        if questions == 0 {
            return Err(SahayakError::stage(
                stage_id,
                "candidate contains no reviewable questions",
            ));
        }

        self.push_log(
            index,
            LogEntry::new(
                "Candidate passed quality review",
                format!("Found {questions} reviewable questions in the draft"),
            )
            .with_metadata("questions", json!(questions))
            .with_metadata("candidate_chars", json!(candidate.len())),
        )
        .await;
        Ok(())
    }

    async fn run_memory(&self, index: usize, ctx: &mut RunContext) -> Result<()> {
        self.log_sub_steps(index, "Persisting what this run revealed about the teacher")
            .await;

        let mut stored = self
            .memory
            .store_classification(
                &self.shared.session_id,
                &self.trigger,
                &ctx.intent,
                &self.subjects,
                &self.grades,
            )
            .await;

        if ctx.approved.is_some() {
            stored.push(
                self.memory
                    .store(
                        &self.shared.session_id,
                        format!("Reviewer approved a {} draft", ctx.intent.kind),
                        MemoryKind::Context,
                        MemoryMetadata {
                            intent: Some(ctx.intent.kind),
                            subjects: self.subjects.clone(),
                            grades: self.grades.clone(),
                            confidence: Some(ctx.intent.confidence),
                        },
                    )
                    .await,
            );
        }

        self.push_log(
            index,
            LogEntry::new(
                format!("Stored {} memory items", stored.len()),
                "Extracted facts and preferences feed future retrievals",
            )
            .with_metadata("stored", json!(stored.len())),
        )
        .await;
        Ok(())
    }

    async fn run_notifier(&self, index: usize, ctx: &mut RunContext) -> Result<()> {
        self.log_sub_steps(index, "Dispatching delivery notifications")
            .await;

        let delivery = ctx
            .scheduled_for
            .clone()
            .unwrap_or_else(|| "immediately".to_string());
        self.push_log(
            index,
            LogEntry::new(
                "Notifications dispatched",
                format!("Students will receive the material {delivery}"),
            )
            .with_metadata("scheduled_for", json!(delivery)),
        )
        .await;
        Ok(())
    }

    async fn run_generic(&self, index: usize, stage_id: &str) -> Result<()> {
        self.log_sub_steps(index, "Executing configured stage logic").await;
        self.push_log(
            index,
            LogEntry::new(format!("Stage '{stage_id}' completed"), "No dedicated executor; ran as a log-only stage"),
        )
        .await;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Checkpoint stages
    // ------------------------------------------------------------------

    async fn execute_checkpoint(
        &self,
        index: usize,
        stage_id: &str,
        ctx: &mut RunContext,
        decisions: &mut mpsc::UnboundedReceiver<CheckpointResolution>,
    ) -> Result<StageFlow> {
        match stage_id {
            FEEDBACK_STAGE_ID => self.run_feedback_checkpoint(index, stage_id, ctx, decisions).await,
            SCHEDULER_STAGE_ID => self.run_scheduler_checkpoint(index, stage_id, ctx, decisions).await,
            other => self.run_approval_checkpoint(index, other, decisions).await,
        }
    }

    /// Content review: the reviewer approves, regenerates (bounded), or
    /// rejects the candidate produced upstream.
    async fn run_feedback_checkpoint(
        &self,
        index: usize,
        stage_id: &str,
        ctx: &mut RunContext,
        decisions: &mut mpsc::UnboundedReceiver<CheckpointResolution>,
    ) -> Result<StageFlow> {
        self.push_log(
            index,
            LogEntry::new(
                "Awaiting reviewer approval",
                "Candidate content needs human sign-off before the final artifact is produced",
            )
            .with_metadata("candidate", json!(ctx.candidate)),
        )
        .await;
        self.suspend_stage(index).await;

        loop {
            match self.wait_for_decision(stage_id, decisions).await? {
                WaitResult::Cancelled => return Ok(StageFlow::Cancelled),
                WaitResult::Decision(CheckpointDecision::Approve { .. }) => {
                    ctx.approved = ctx.candidate.clone();
                    self.resume_stage(index).await;
                    self.push_log(
                        index,
                        LogEntry::new("Draft approved", "Reviewer accepted the candidate content"),
                    )
                    .await;
                    return Ok(StageFlow::Continue);
                }
                WaitResult::Decision(CheckpointDecision::Regenerate { note }) => {
                    if ctx.regenerations >= self.config.max_regenerations {
                        self.push_log(
                            index,
                            LogEntry::new(
                                "Regeneration limit reached",
                                format!(
                                    "{} attempts already used; approve or reject to proceed",
                                    ctx.regenerations
                                ),
                            ),
                        )
                        .await;
                        continue;
                    }

                    ctx.regenerations += 1;
                    let varied_trigger =
                        prompts::regeneration(&self.trigger, ctx.regenerations + 1);
                    let prompt = self.candidate_prompt(ctx, &varied_trigger);
                    let candidate = self.generate_with_timeout(&prompt).await?;

                    let mut entry = LogEntry::new(
                        format!("Regenerated candidate (attempt {})", ctx.regenerations),
                        "Reviewer asked for a different draft",
                    )
                    .with_metadata("attempt", json!(ctx.regenerations))
                    .with_metadata("candidate", json!(candidate));
                    if let Some(note) = note {
                        entry = entry.with_metadata("note", json!(note));
                    }
                    self.push_log(index, entry).await;

                    ctx.candidate = Some(candidate);
                    // Remain suspended; the next wait gets a fresh timeout.
                }
                WaitResult::Decision(CheckpointDecision::Reject { reason }) => {
                    let reason =
                        reason.unwrap_or_else(|| "reviewer rejected the draft".to_string());
                    self.push_log(
                        index,
                        LogEntry::new("Draft rejected", reason.clone()),
                    )
                    .await;
                    return Err(SahayakError::stage(stage_id, reason));
                }
            }
        }
    }

    /// Delivery scheduling: the reviewer picks a distribution date.
    async fn run_scheduler_checkpoint(
        &self,
        index: usize,
        stage_id: &str,
        ctx: &mut RunContext,
        decisions: &mut mpsc::UnboundedReceiver<CheckpointResolution>,
    ) -> Result<StageFlow> {
        self.push_log(
            index,
            LogEntry::new(
                "Awaiting delivery date selection",
                "The reviewer picks when students receive the material",
            ),
        )
        .await;
        self.suspend_stage(index).await;

        loop {
            match self.wait_for_decision(stage_id, decisions).await? {
                WaitResult::Cancelled => return Ok(StageFlow::Cancelled),
                WaitResult::Decision(CheckpointDecision::Approve { payload }) => {
                    ctx.scheduled_for = extract_date(payload.as_ref());
                    self.resume_stage(index).await;
                    self.push_log(
                        index,
                        LogEntry::new(
                            "Delivery scheduled",
                            match &ctx.scheduled_for {
                                Some(date) => format!("Distribution set for {date}"),
                                None => "No date selected; delivering immediately".to_string(),
                            },
                        )
                        .with_metadata("scheduled_for", json!(ctx.scheduled_for)),
                    )
                    .await;
                    return Ok(StageFlow::Continue);
                }
                WaitResult::Decision(CheckpointDecision::Regenerate { .. }) => {
                    self.push_log(
                        index,
                        LogEntry::new(
                            "Unsupported decision ignored",
                            "Regeneration is not applicable at the scheduling checkpoint",
                        ),
                    )
                    .await;
                }
                WaitResult::Decision(CheckpointDecision::Reject { reason }) => {
                    let reason =
                        reason.unwrap_or_else(|| "scheduling was rejected".to_string());
                    self.push_log(index, LogEntry::new("Scheduling rejected", reason.clone()))
                        .await;
                    return Err(SahayakError::stage(stage_id, reason));
                }
            }
        }
    }

    /// Fallback for checkpoint stages with no dedicated executor:
    /// plain approve/reject.
    async fn run_approval_checkpoint(
        &self,
        index: usize,
        stage_id: &str,
        decisions: &mut mpsc::UnboundedReceiver<CheckpointResolution>,
    ) -> Result<StageFlow> {
        self.push_log(
            index,
            LogEntry::new("Awaiting external approval", "Configured checkpoint with no dedicated executor"),
        )
        .await;
        self.suspend_stage(index).await;

        loop {
            match self.wait_for_decision(stage_id, decisions).await? {
                WaitResult::Cancelled => return Ok(StageFlow::Cancelled),
                WaitResult::Decision(CheckpointDecision::Approve { .. }) => {
                    self.resume_stage(index).await;
                    return Ok(StageFlow::Continue);
                }
                WaitResult::Decision(CheckpointDecision::Regenerate { .. }) => {
                    self.push_log(
                        index,
                        LogEntry::new(
                            "Unsupported decision ignored",
                            "This checkpoint has nothing to regenerate",
                        ),
                    )
                    .await;
                }
                WaitResult::Decision(CheckpointDecision::Reject { reason }) => {
                    let reason = reason.unwrap_or_else(|| "checkpoint rejected".to_string());
                    return Err(SahayakError::stage(stage_id, reason));
                }
            }
        }
    }

    /// Races the decision channel against the checkpoint timeout and the
    /// cancellation token.
    async fn wait_for_decision(
        &self,
        stage_id: &str,
        decisions: &mut mpsc::UnboundedReceiver<CheckpointResolution>,
    ) -> Result<WaitResult> {
        let seconds = self.config.checkpoint_timeout_secs;
        let deadline = tokio::time::sleep(self.config.checkpoint_timeout());
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = self.shared.cancel.cancelled() => return Ok(WaitResult::Cancelled),
                _ = &mut deadline => {
                    return Err(SahayakError::CheckpointTimeout {
                        stage_id: stage_id.to_string(),
                        seconds,
                    });
                }
                resolution = decisions.recv() => match resolution {
                    None => {
                        return Err(SahayakError::internal(
                            "decision channel closed while a checkpoint was suspended",
                        ));
                    }
                    Some(resolution) if resolution.stage_id == stage_id => {
                        return Ok(WaitResult::Decision(resolution.decision));
                    }
                    Some(resolution) => {
                        tracing::warn!(
                            target: "orchestrator",
                            session_id = %self.shared.session_id,
                            stale_stage = %resolution.stage_id,
                            "ignoring decision for a stage that is not suspended"
                        );
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Stage list mutation helpers
    // ------------------------------------------------------------------

    async fn begin_stage(&self, index: usize) {
        let spec = &self.config.stages[index];
        {
            let mut stages = self.shared.stages.write().await;
            stages[index].begin();
            stages[index].push_log(LogEntry::new(
                format!("{} started", spec.name),
                spec.description.clone(),
            ));
        }
        self.emit(index).await;
        tracing::debug!(
            target: "orchestrator",
            session_id = %self.shared.session_id,
            stage = %spec.id,
            "stage started"
        );
    }

    async fn complete_stage(&self, index: usize) {
        let (stage_id, progress) = {
            let mut stages = self.shared.stages.write().await;
            stages[index].complete();
            (stages[index].id.clone(), compute_progress(&stages))
        };
        self.emit(index).await;
        tracing::info!(
            target: "orchestrator",
            session_id = %self.shared.session_id,
            stage = %stage_id,
            progress,
            "stage completed"
        );
    }

    async fn fail_stage(&self, index: usize, err: &SahayakError) {
        {
            let mut stages = self.shared.stages.write().await;
            stages[index].push_log(LogEntry::new("Stage failed", err.to_string()));
            stages[index].fail();
        }
        self.emit(index).await;
    }

    async fn skip_stage(&self, index: usize, ctx: &RunContext) {
        {
            let mut stages = self.shared.stages.write().await;
            stages[index].push_log(LogEntry::new(
                "Stage skipped",
                format!(
                    "{} requests produce no distributable artifact",
                    ctx.intent.kind
                ),
            ));
            stages[index].skip();
        }
        self.emit(index).await;
    }

    async fn suspend_stage(&self, index: usize) {
        {
            let mut stages = self.shared.stages.write().await;
            stages[index].suspend();
        }
        *self.shared.state.write().await = RunState::AwaitingInput;
        self.emit(index).await;
    }

    async fn resume_stage(&self, index: usize) {
        {
            let mut stages = self.shared.stages.write().await;
            stages[index].resume();
        }
        *self.shared.state.write().await = RunState::Running;
        self.emit(index).await;
    }

    /// Marks the classifier stage `Error` when the initial classification
    /// phase produced an ambiguous intent; the run never starts its loop.
    async fn fail_classification(&self, intent: &Intent) -> SahayakError {
        let index = {
            let mut stages = self.shared.stages.write().await;
            let index = stages
                .iter()
                .position(|s| s.id == INTENT_CLASSIFIER_STAGE_ID)
                .unwrap_or(0);
            if let Some(stage) = stages.get_mut(index) {
                stage.push_log(
                    LogEntry::new(
                        "Request intent is unclear",
                        format!(
                            "Classification fell back to {} at confidence {}%; \
                             halting instead of proceeding blindly",
                            intent.kind, intent.confidence
                        ),
                    )
                    .with_metadata(
                        "intent",
                        serde_json::to_value(intent).unwrap_or(Value::Null),
                    ),
                );
                stage.fail();
            }
            index
        };
        self.emit(index).await;

        SahayakError::stage(
            INTENT_CLASSIFIER_STAGE_ID,
            format!(
                "ambiguous intent (confidence {}%); please rephrase the request",
                intent.confidence
            ),
        )
    }

    async fn push_log(&self, index: usize, entry: LogEntry) {
        let mut stages = self.shared.stages.write().await;
        stages[index].push_log(entry);
    }

    /// One log entry per declared sub-step label, in order.
    async fn log_sub_steps(&self, index: usize, reasoning: &str) {
        let labels = {
            let stages = self.shared.stages.read().await;
            stages[index].sub_step_labels.clone()
        };
        for label in labels {
            self.push_log(index, LogEntry::new(label, reasoning)).await;
        }
    }

    async fn emit(&self, index: usize) {
        let (stage_id, status) = {
            let stages = self.shared.stages.read().await;
            let Some(stage) = stages.get(index) else {
                return;
            };
            (stage.id.clone(), stage.status)
        };
        let _ = self.events.send(StageEvent {
            session_id: self.shared.session_id.clone(),
            stage_id,
            status,
            timestamp: Utc::now(),
        });
    }

    // ------------------------------------------------------------------
    // Generation plumbing
    // ------------------------------------------------------------------

    /// Wraps collaborator calls in the orchestrator's own timeout; the
    /// external services define none, and an unresponsive provider must not
    /// wedge the run indefinitely.
    async fn generate_with_timeout(&self, prompt: &str) -> Result<String> {
        let budget = self.config.generation_timeout();
        match tokio::time::timeout(budget, self.generation.generate(prompt)).await {
            Ok(result) => result,
            Err(_) => Err(SahayakError::GenerationUnavailable(format!(
                "no response within {}s",
                self.config.generation_timeout_secs
            ))),
        }
    }

    fn candidate_prompt(&self, ctx: &RunContext, trigger: &str) -> String {
        let mut prompt = prompts::sample_questions(
            trigger,
            &self.subject(),
            &self.grade_label(ctx),
            ctx.question_count(),
        );
        if !ctx.recalled.is_empty() {
            prompt.push_str("\n\nConsider these known teacher preferences:\n");
            for item in &ctx.recalled {
                prompt.push_str(&format!("- {}\n", item.content));
            }
        }
        prompt
    }

    fn subject(&self) -> String {
        self.subjects
            .first()
            .cloned()
            .unwrap_or_else(|| "Mathematics".to_string())
    }

    fn grade_label(&self, ctx: &RunContext) -> String {
        if let Some(grade) = ctx
            .intent
            .parameters
            .get("targetGrade")
            .and_then(Value::as_u64)
        {
            return grade.to_string();
        }
        self.grades
            .first()
            .map(|g| g.to_string())
            .unwrap_or_else(|| "3".to_string())
    }
}

fn extract_date(payload: Option<&Value>) -> Option<String> {
    match payload {
        Some(Value::String(date)) => Some(date.clone()),
        Some(Value::Object(map)) => map
            .get("date")
            .and_then(Value::as_str)
            .map(|s| s.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::{RunOutcome, RunState, WorkflowOrchestrator};
    use crate::pipeline::StageSpec;
    use sahayak_core::service::StaticGenerationService;
    use sahayak_core::stage::{Stage, StageStatus};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    const TRIGGER: &str = "Create a worksheet for Grade 3 addition";

    /// Generation mock that replays a scripted sequence of responses.
    struct SeqGeneration {
        responses: Mutex<VecDeque<String>>,
    }

    impl SeqGeneration {
        fn new(responses: &[&str]) -> Self {
            Self {
                responses: Mutex::new(responses.iter().map(|s| s.to_string()).collect()),
            }
        }
    }

    #[async_trait::async_trait]
    impl GenerationService for SeqGeneration {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            Ok(self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| "1. What is 2 + 2?".to_string()))
        }

        fn model_name(&self) -> &str {
            "seq-mock"
        }
    }

    struct FailingGeneration;

    #[async_trait::async_trait]
    impl GenerationService for FailingGeneration {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            Err(SahayakError::GenerationUnavailable(
                "provider offline".to_string(),
            ))
        }
    }

    fn orchestrator_with(generation: Arc<dyn GenerationService>) -> WorkflowOrchestrator {
        WorkflowOrchestrator::new(
            PipelineConfig::default(),
            generation,
            Arc::new(MemoryStore::new()),
        )
    }

    fn automated_only_config(count: usize) -> PipelineConfig {
        PipelineConfig {
            stages: (0..count)
                .map(|i| StageSpec::automated(&format!("step-{i}"), &format!("Step {i}"), "test stage"))
                .collect(),
            ..PipelineConfig::default()
        }
    }

    async fn wait_for_suspension(
        orchestrator: &WorkflowOrchestrator,
        session_id: &str,
        stage_id: &str,
    ) {
        for _ in 0..500 {
            if let Ok(report) = orchestrator.status(session_id).await {
                let suspended = report
                    .stages
                    .iter()
                    .any(|s| s.id == stage_id && s.status == StageStatus::Suspended);
                if suspended {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("stage {stage_id} never suspended");
    }

    fn stage<'a>(report: &'a [Stage], id: &str) -> &'a Stage {
        report
            .iter()
            .find(|s| s.id == id)
            .unwrap_or_else(|| panic!("stage {id} missing"))
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_run_with_approvals_completes() {
        let generation = Arc::new(SeqGeneration::new(&[
            "1. What is 2 + 3?\n2. What is 4 + 4?",
            "# Final Worksheet\n1. What is 2 + 3?",
        ]));
        let orchestrator = orchestrator_with(generation);
        let handle = orchestrator
            .start_run("s-complete", TRIGGER, vec!["Mathematics".to_string()], vec![3])
            .await
            .unwrap();

        wait_for_suspension(&orchestrator, "s-complete", FEEDBACK_STAGE_ID).await;
        assert_eq!(
            orchestrator.status("s-complete").await.unwrap().overall,
            RunState::AwaitingInput
        );
        orchestrator
            .resolve_checkpoint(
                "s-complete",
                FEEDBACK_STAGE_ID,
                CheckpointDecision::Approve { payload: None },
            )
            .await
            .unwrap();

        wait_for_suspension(&orchestrator, "s-complete", SCHEDULER_STAGE_ID).await;
        orchestrator
            .resolve_checkpoint(
                "s-complete",
                SCHEDULER_STAGE_ID,
                CheckpointDecision::Approve {
                    payload: Some(json!({ "date": "2025-08-15" })),
                },
            )
            .await
            .unwrap();

        let outcome = handle.wait().await.unwrap();
        let RunOutcome::Completed(artifact) = outcome else {
            panic!("expected completion");
        };
        assert!(artifact.content.contains("Final Worksheet"));
        assert_eq!(artifact.scheduled_for.as_deref(), Some("2025-08-15"));

        let report = orchestrator.status("s-complete").await.unwrap();
        assert_eq!(report.overall, RunState::Completed);
        assert_eq!(report.progress, 1.0);
        assert!(report
            .stages
            .iter()
            .all(|s| s.status == StageStatus::Completed));

        // Stages ran in strict array order
        let starts: Vec<_> = report.stages.iter().filter_map(|s| s.started_at).collect();
        assert_eq!(starts.len(), report.stages.len());
        assert!(starts.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_checkpoint_timeout_fails_run_and_leaves_rest_pending() {
        let orchestrator = orchestrator_with(Arc::new(StaticGenerationService::new(
            "1. What is 1 + 1?",
        )));
        let handle = orchestrator
            .start_run("s-timeout", TRIGGER, vec![], vec![])
            .await
            .unwrap();

        let err = handle.wait().await.unwrap_err();
        assert!(matches!(err, SahayakError::CheckpointTimeout { .. }));
        assert_eq!(err.stage_id(), Some(FEEDBACK_STAGE_ID));

        let report = orchestrator.status("s-timeout").await.unwrap();
        assert_eq!(report.overall, RunState::Failed);
        assert_eq!(
            stage(&report.stages, FEEDBACK_STAGE_ID).status,
            StageStatus::Error
        );
        for later in [MEMORY_STAGE_ID, SCHEDULER_STAGE_ID, NOTIFIER_STAGE_ID] {
            assert_eq!(stage(&report.stages, later).status, StageStatus::Pending);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_mid_checkpoint() {
        let orchestrator = orchestrator_with(Arc::new(StaticGenerationService::new(
            "1. What is 1 + 1?",
        )));
        let handle = orchestrator
            .start_run("s-cancel", TRIGGER, vec![], vec![])
            .await
            .unwrap();

        wait_for_suspension(&orchestrator, "s-cancel", FEEDBACK_STAGE_ID).await;
        orchestrator.cancel_run("s-cancel").await.unwrap();

        let outcome = handle.wait().await.unwrap();
        assert!(matches!(outcome, RunOutcome::Cancelled));

        let report = orchestrator.status("s-cancel").await.unwrap();
        assert_eq!(report.overall, RunState::Cancelled);
        // Earlier stages finished, the current one keeps its status at
        // cancellation, later ones never ran.
        assert_eq!(
            stage(&report.stages, JUDGE_STAGE_ID).status,
            StageStatus::Completed
        );
        assert_eq!(
            stage(&report.stages, FEEDBACK_STAGE_ID).status,
            StageStatus::Suspended
        );
        assert_eq!(
            stage(&report.stages, NOTIFIER_STAGE_ID).status,
            StageStatus::Pending
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_regenerate_then_approve_uses_new_candidate() {
        let generation = Arc::new(SeqGeneration::new(&[
            "1. First draft question?",
            "1. Second draft question?",
            "# Worksheet from second draft",
        ]));
        let orchestrator = orchestrator_with(generation);
        let handle = orchestrator
            .start_run("s-regen", TRIGGER, vec![], vec![3])
            .await
            .unwrap();

        wait_for_suspension(&orchestrator, "s-regen", FEEDBACK_STAGE_ID).await;
        orchestrator
            .resolve_checkpoint(
                "s-regen",
                FEEDBACK_STAGE_ID,
                CheckpointDecision::Regenerate {
                    note: Some("make it harder".to_string()),
                },
            )
            .await
            .unwrap();

        // Still suspended after regeneration; approve the new draft.
        wait_for_suspension(&orchestrator, "s-regen", FEEDBACK_STAGE_ID).await;
        orchestrator
            .resolve_checkpoint(
                "s-regen",
                FEEDBACK_STAGE_ID,
                CheckpointDecision::Approve { payload: None },
            )
            .await
            .unwrap();

        wait_for_suspension(&orchestrator, "s-regen", SCHEDULER_STAGE_ID).await;
        orchestrator
            .resolve_checkpoint(
                "s-regen",
                SCHEDULER_STAGE_ID,
                CheckpointDecision::Approve { payload: None },
            )
            .await
            .unwrap();

        let outcome = handle.wait().await.unwrap();
        let RunOutcome::Completed(artifact) = outcome else {
            panic!("expected completion");
        };
        assert!(artifact.content.contains("second draft"));

        let report = orchestrator.status("s-regen").await.unwrap();
        let feedback = stage(&report.stages, FEEDBACK_STAGE_ID);
        assert!(feedback
            .log_entries
            .iter()
            .any(|e| e.message.contains("attempt 1")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reject_aborts_run() {
        let orchestrator = orchestrator_with(Arc::new(StaticGenerationService::new(
            "1. What is 1 + 1?",
        )));
        let handle = orchestrator
            .start_run("s-reject", TRIGGER, vec![], vec![])
            .await
            .unwrap();

        wait_for_suspension(&orchestrator, "s-reject", FEEDBACK_STAGE_ID).await;
        orchestrator
            .resolve_checkpoint(
                "s-reject",
                FEEDBACK_STAGE_ID,
                CheckpointDecision::Reject {
                    reason: Some("wrong topic".to_string()),
                },
            )
            .await
            .unwrap();

        let err = handle.wait().await.unwrap_err();
        assert!(matches!(err, SahayakError::StageExecution { .. }));

        let report = orchestrator.status("s-reject").await.unwrap();
        assert_eq!(
            stage(&report.stages, FEEDBACK_STAGE_ID).status,
            StageStatus::Error
        );
        assert_eq!(
            stage(&report.stages, SCHEDULER_STAGE_ID).status,
            StageStatus::Pending
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_ambiguous_intent_halts_before_stages_run() {
        let orchestrator = orchestrator_with(Arc::new(StaticGenerationService::new("unused")));
        let handle = orchestrator
            .start_run("s-unclear", "zzz qqq xxx", vec![], vec![])
            .await
            .unwrap();

        let err = handle.wait().await.unwrap_err();
        assert_eq!(err.stage_id(), Some(INTENT_CLASSIFIER_STAGE_ID));

        let report = orchestrator.status("s-unclear").await.unwrap();
        assert_eq!(report.overall, RunState::Failed);
        assert_eq!(
            stage(&report.stages, INTENT_CLASSIFIER_STAGE_ID).status,
            StageStatus::Error
        );
        assert_eq!(
            stage(&report.stages, ORCHESTRATOR_STAGE_ID).status,
            StageStatus::Pending
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_is_rejected_while_active() {
        let orchestrator = orchestrator_with(Arc::new(StaticGenerationService::new(
            "1. What is 1 + 1?",
        )));
        let _handle = orchestrator
            .start_run("s-dup", TRIGGER, vec![], vec![])
            .await
            .unwrap();

        let err = orchestrator
            .start_run("s-dup", TRIGGER, vec![], vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, SahayakError::RunAlreadyActive(_)));

        orchestrator.cancel_run("s-dup").await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_generation_failure_marks_generator_stage() {
        let orchestrator = orchestrator_with(Arc::new(FailingGeneration));
        let handle = orchestrator
            .start_run("s-genfail", TRIGGER, vec![], vec![])
            .await
            .unwrap();

        let err = handle.wait().await.unwrap_err();
        assert!(matches!(err, SahayakError::GenerationUnavailable(_)));

        let report = orchestrator.status("s-genfail").await.unwrap();
        assert_eq!(
            stage(&report.stages, GENERATOR_STAGE_ID).status,
            StageStatus::Error
        );
        assert_eq!(
            stage(&report.stages, JUDGE_STAGE_ID).status,
            StageStatus::Pending
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_deliverable_intent_skips_distribution() {
        let generation = Arc::new(SeqGeneration::new(&[
            "1. Why does rain fall?",
            "Rain falls because water vapor condenses.",
        ]));
        let orchestrator = orchestrator_with(generation);
        let handle = orchestrator
            .start_run(
                "s-explain",
                "Explain the concept of evaporation, what is it?",
                vec!["Science".to_string()],
                vec![4],
            )
            .await
            .unwrap();

        wait_for_suspension(&orchestrator, "s-explain", FEEDBACK_STAGE_ID).await;
        orchestrator
            .resolve_checkpoint(
                "s-explain",
                FEEDBACK_STAGE_ID,
                CheckpointDecision::Approve { payload: None },
            )
            .await
            .unwrap();

        let outcome = handle.wait().await.unwrap();
        assert!(matches!(outcome, RunOutcome::Completed(_)));

        let report = orchestrator.status("s-explain").await.unwrap();
        assert_eq!(
            stage(&report.stages, SCHEDULER_STAGE_ID).status,
            StageStatus::Skipped
        );
        assert_eq!(
            stage(&report.stages, NOTIFIER_STAGE_ID).status,
            StageStatus::Skipped
        );
        assert_eq!(report.progress, 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_automated_only_pipeline_sequences_in_order() {
        let orchestrator = WorkflowOrchestrator::new(
            automated_only_config(3),
            Arc::new(StaticGenerationService::new("final artifact")),
            Arc::new(MemoryStore::new()),
        );
        let mut events = orchestrator.subscribe();

        let handle = orchestrator
            .start_run("s-seq", TRIGGER, vec![], vec![])
            .await
            .unwrap();
        let outcome = handle.wait().await.unwrap();
        assert!(matches!(outcome, RunOutcome::Completed(_)));

        let report = orchestrator.status("s-seq").await.unwrap();
        assert_eq!(report.progress, 1.0);
        assert!(report.stages.iter().all(|s| s.status == StageStatus::Completed));

        // The event stream saw each stage start before the next one
        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            if event.status == StageStatus::Running {
                seen.push(event.stage_id);
            }
        }
        assert_eq!(seen, vec!["step-0", "step-1", "step-2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_checkpoint_requires_suspension() {
        let orchestrator = orchestrator_with(Arc::new(StaticGenerationService::new(
            "1. What is 1 + 1?",
        )));
        let _handle = orchestrator
            .start_run("s-notpending", TRIGGER, vec![], vec![])
            .await
            .unwrap();

        let err = orchestrator
            .resolve_checkpoint(
                "s-notpending",
                SCHEDULER_STAGE_ID,
                CheckpointDecision::Approve { payload: None },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SahayakError::CheckpointNotPending { .. }));

        orchestrator.cancel_run("s-notpending").await.unwrap();
    }

    #[tokio::test]
    async fn test_status_for_unknown_session() {
        let orchestrator = orchestrator_with(Arc::new(StaticGenerationService::new("x")));
        let err = orchestrator.status("nope").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_extract_date_variants() {
        assert_eq!(
            extract_date(Some(&json!("2025-08-15"))),
            Some("2025-08-15".to_string())
        );
        assert_eq!(
            extract_date(Some(&json!({ "date": "2025-09-01" }))),
            Some("2025-09-01".to_string())
        );
        assert_eq!(extract_date(Some(&json!(42))), None);
        assert_eq!(extract_date(None), None);
    }
}
