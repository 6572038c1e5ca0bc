//! The job runner: one coordinating loop per run.
//!
//! The loop owns the [`PipelineRun`] and is the only code that changes it.
//! Stage attempts run as spawned tasks bounded by the shared
//! [`ConcurrencyLimiter`](super::ConcurrencyLimiter); their results, limiter
//! permits and due retries all come back to the loop as [`LoopEvent`]s.

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::{LimiterPermit, PipelineDefinition, RunContext};
use crate::assembly::check_slot_output;
use crate::core::{PipelineRun, RunFailure, RunStatus, StageStatus};
use crate::errors::{GenerationError, ServiceError, StageError};
use crate::events;
use crate::stages::{build_prompt, Generator};
use crate::store::persist_run;

/// The final state of an executed run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// The run in its terminal state.
    pub run: PipelineRun,
    /// Whether the terminal snapshot reached the store.
    pub persisted: bool,
}

enum LoopEvent {
    Attempt {
        stage: String,
        result: Result<Value, StageError>,
    },
    RetryDue {
        stage: String,
    },
    Permit(Option<LimiterPermit>),
}

/// Executes one run of a pipeline definition.
pub struct JobRunner {
    definition: Arc<PipelineDefinition>,
    generator: Arc<dyn Generator>,
    ctx: RunContext,
    run: PipelineRun,
    publisher: Option<watch::Sender<PipelineRun>>,
}

impl JobRunner {
    /// Creates a runner for a fresh run over `seed`.
    #[must_use]
    pub fn new(
        definition: Arc<PipelineDefinition>,
        generator: Arc<dyn Generator>,
        ctx: RunContext,
        seed: Value,
    ) -> Self {
        let run = PipelineRun::new(&definition, seed);
        Self::for_run(definition, generator, ctx, run)
    }

    /// Creates a runner for an already created, pending run.
    #[must_use]
    pub fn for_run(
        definition: Arc<PipelineDefinition>,
        generator: Arc<dyn Generator>,
        ctx: RunContext,
        run: PipelineRun,
    ) -> Self {
        Self {
            definition,
            generator,
            ctx,
            run,
            publisher: None,
        }
    }

    /// Creates a runner continuing a persisted, interrupted run.
    ///
    /// Succeeded stages keep their outputs and are not re-run.
    ///
    /// # Errors
    ///
    /// Fails if the run belongs to another definition or is already terminal.
    pub fn resume(
        definition: Arc<PipelineDefinition>,
        generator: Arc<dyn Generator>,
        ctx: RunContext,
        mut run: PipelineRun,
    ) -> Result<Self, ServiceError> {
        let same_stages = run.stages.len() == definition.len()
            && definition.stage_names().all(|name| run.stages.contains_key(name));
        if run.definition_id != definition.id() || !same_stages {
            return Err(ServiceError::DefinitionMismatch {
                expected: run.definition_id.clone(),
                actual: definition.id().to_string(),
            });
        }
        if run.is_terminal() {
            return Err(ServiceError::NotResumable {
                run_id: run.id,
                status: run.status,
            });
        }

        run.prepare_resume();
        info!(
            run_id = %run.id,
            succeeded = run.succeeded_stages().len(),
            "Resuming pipeline run"
        );
        Ok(Self::for_run(definition, generator, ctx, run))
    }

    /// Publishes every state change of the run to `sender`.
    #[must_use]
    pub fn with_publisher(mut self, sender: watch::Sender<PipelineRun>) -> Self {
        sender.send_replace(self.run.clone());
        self.publisher = Some(sender);
        self
    }

    /// The run being executed.
    #[must_use]
    pub fn run(&self) -> &PipelineRun {
        &self.run
    }

    /// Drives the run to a terminal status.
    ///
    /// Never fails: stage errors are classified into the run, and store
    /// failures are reported through [`RunOutcome::persisted`].
    pub async fn execute(mut self) -> RunOutcome {
        let cancellation = self.ctx.cancellation.clone();
        let run_id = self.run.id;

        info!(
            run_id = %run_id,
            pipeline = %self.run.definition_id,
            stages = self.definition.len(),
            "Starting pipeline run"
        );
        self.set_run_status(RunStatus::Running);
        self.checkpoint().await;

        let mut pending: FuturesUnordered<BoxFuture<'static, LoopEvent>> = FuturesUnordered::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        let mut permit_requested = false;
        let mut running = 0usize;
        let mut retries_waiting = 0usize;
        // Set once no new attempt may start: a stage failed for good, or
        // the run was cancelled.
        let mut halted = self.run.failure.is_some()
            || self
                .run
                .stages
                .values()
                .any(|exec| exec.status == StageStatus::Failed);

        loop {
            if !halted && cancellation.is_cancelled() {
                halted = true;
            }

            if !halted {
                self.promote_ready(&mut queue);
                if !queue.is_empty() && !permit_requested {
                    permit_requested = true;
                    let limiter = self.ctx.limiter.clone();
                    pending.push(async move { LoopEvent::Permit(limiter.acquire().await) }.boxed());
                }
            }

            if running == 0 && (halted || (queue.is_empty() && retries_waiting == 0)) {
                break;
            }

            let event = tokio::select! {
                event = pending.next() => match event {
                    Some(event) => event,
                    None => break,
                },
                () = cancellation.cancelled(), if !halted => {
                    info!(run_id = %run_id, in_flight = running, "Run cancelled; draining in-flight attempts");
                    halted = true;
                    continue;
                }
            };

            match event {
                LoopEvent::Permit(None) => {
                    permit_requested = false;
                    cancellation.cancel("concurrency limiter closed");
                    halted = true;
                }
                LoopEvent::Permit(Some(permit)) => {
                    permit_requested = false;
                    if halted {
                        continue;
                    }
                    if let Some(stage) = queue.pop_front() {
                        if let Some(attempt) = self.launch(&stage, permit) {
                            running += 1;
                            pending.push(attempt);
                        }
                    }
                }
                LoopEvent::RetryDue { stage } => {
                    retries_waiting = retries_waiting.saturating_sub(1);
                    if !halted && self.transition(&stage, StageStatus::Ready) {
                        queue.push_back(stage);
                    }
                }
                LoopEvent::Attempt { stage, result } => {
                    running = running.saturating_sub(1);
                    match result {
                        Ok(output) => self.record_success(&stage, output),
                        Err(error) => {
                            if let Some(delay) = self.record_failure(&stage, &error, halted) {
                                retries_waiting += 1;
                                let token = cancellation.clone();
                                pending.push(
                                    async move {
                                        tokio::select! {
                                            () = tokio::time::sleep(delay) => {}
                                            () = token.cancelled() => {}
                                        }
                                        LoopEvent::RetryDue { stage }
                                    }
                                    .boxed(),
                                );
                            } else if self.run.failure.is_some() {
                                halted = true;
                            }
                        }
                    }
                    self.checkpoint().await;
                }
            }
        }

        self.finish().await
    }

    /// Moves every blocked stage whose dependencies all succeeded to ready.
    fn promote_ready(&mut self, queue: &mut VecDeque<String>) {
        let ready = self.definition.graph().ready_set(&self.run.succeeded_stages());
        let newly_ready: Vec<String> = self
            .definition
            .stage_names()
            .filter(|name| ready.contains(*name))
            .filter(|name| {
                self.run
                    .stage(name)
                    .is_some_and(|exec| exec.status == StageStatus::Blocked)
            })
            .map(str::to_string)
            .collect();

        for stage in newly_ready {
            if self.transition(&stage, StageStatus::Ready) {
                queue.push_back(stage);
            }
        }
    }

    /// Marks `stage` running and spawns one attempt holding `permit`.
    fn launch(&mut self, stage_name: &str, permit: LimiterPermit) -> Option<BoxFuture<'static, LoopEvent>> {
        let stage = self.definition.stage(stage_name)?.clone();
        if !self.transition(stage_name, StageStatus::Running) {
            return None;
        }

        let prompt = build_prompt(&stage, &self.run.seed, &self.run.outputs());
        let generator = self.generator.clone();
        let validator = self.ctx.validator.clone();
        let definition = self.definition.clone();
        let attempt = self.run.stage(stage_name).map_or(0, |exec| exec.attempts);

        debug!(run_id = %self.run.id, stage = stage_name, attempt, "Launching stage attempt");

        let handle = tokio::spawn(async move {
            let _permit = permit;
            let timeout = stage.timeout;
            let generated =
                tokio::time::timeout(timeout, generator.generate(&prompt, &stage.output_schema, timeout))
                    .await;
            match generated {
                Ok(Ok(raw)) => validator
                    .validate(raw, &stage.output_schema)
                    .and_then(|output| {
                        check_slot_output(&definition, &stage, &output, &prompt.upstream)?;
                        Ok(output)
                    })
                    .map_err(StageError::from),
                Ok(Err(error)) => Err(StageError::from(error)),
                Err(_) => Err(StageError::Generation(GenerationError::Timeout {
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                })),
            }
        });

        let stage = stage_name.to_string();
        Some(
            async move {
                let result = match handle.await {
                    Ok(result) => result,
                    Err(e) => Err(StageError::Generation(GenerationError::Transport(format!(
                        "stage task ended abnormally: {e}"
                    )))),
                };
                LoopEvent::Attempt { stage, result }
            }
            .boxed(),
        )
    }

    fn record_success(&mut self, stage: &str, output: Value) {
        if let Some(exec) = self.run.stages.get_mut(stage) {
            exec.output = Some(output);
        }
        if self.transition(stage, StageStatus::Succeeded) {
            info!(run_id = %self.run.id, stage, "Stage succeeded");
        }
    }

    /// Records a failed attempt. Returns the backoff delay if a retry should
    /// be scheduled.
    fn record_failure(
        &mut self,
        stage: &str,
        error: &StageError,
        halted: bool,
    ) -> Option<std::time::Duration> {
        let policy = self.definition.stage(stage)?.retry.clone();
        let exec = self.run.stages.get_mut(stage)?;
        exec.last_error = Some(error.to_record());
        let attempts = exec.attempts;

        warn!(
            run_id = %self.run.id,
            stage,
            attempt = attempts,
            max_attempts = policy.max_attempts,
            kind = %error.kind(),
            error = %error,
            "Stage attempt failed"
        );

        if !policy.allows_another(attempts) {
            self.transition(stage, StageStatus::Failed);
            if self.run.failure.is_none() {
                self.run.failure = Some(RunFailure {
                    stage: stage.to_string(),
                    attempts,
                    error: error.to_record(),
                });
            }
            return None;
        }

        if !self.transition(stage, StageStatus::RetryPending) || halted {
            return None;
        }

        let delay = policy.delay_for(attempts.saturating_sub(1));
        debug!(
            run_id = %self.run.id,
            stage,
            attempt = attempts,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Scheduling stage retry"
        );
        Some(delay)
    }

    /// Applies a state machine transition, emitting and publishing it.
    /// Returns false (and logs) if the transition is illegal.
    fn transition(&mut self, stage: &str, next: StageStatus) -> bool {
        let Some(exec) = self.run.stages.get_mut(stage) else {
            return false;
        };
        let (from, attempt) = match exec.transition(next) {
            Ok(from) => (from, exec.attempts),
            Err(e) => {
                tracing::error!(run_id = %self.run.id, error = %e, "Rejected stage transition");
                return false;
            }
        };
        self.run.touch();

        self.ctx.events.try_emit(
            events::STAGE_TRANSITION,
            Some(json!({
                "run_id": self.run.id,
                "stage": stage,
                "from": from,
                "to": next,
                "attempt": attempt,
            })),
        );
        self.publish();
        true
    }

    fn set_run_status(&mut self, status: RunStatus) {
        self.run.status = status;
        self.run.touch();
        self.ctx.events.try_emit(
            events::RUN_STATUS,
            Some(json!({ "run_id": self.run.id, "status": status })),
        );
        self.publish();
    }

    fn publish(&self) {
        if let Some(sender) = &self.publisher {
            sender.send_replace(self.run.clone());
        }
    }

    /// Saves the current snapshot. A write that exhausts the persistence
    /// policy is logged; the next checkpoint saves the full state again.
    async fn checkpoint(&self) -> bool {
        match persist_run(
            self.ctx.store.as_ref(),
            &self.ctx.persistence_retry,
            self.ctx.events.as_ref(),
            &self.run,
        )
        .await
        {
            Ok(()) => true,
            Err(error) => {
                warn!(run_id = %self.run.id, error = %error, "Failed to persist run snapshot");
                self.ctx.events.try_emit(
                    events::PERSISTENCE_FAILED,
                    Some(json!({ "run_id": self.run.id, "error": error.to_string() })),
                );
                false
            }
        }
    }

    async fn finish(mut self) -> RunOutcome {
        let status = if self.run.all_succeeded() {
            RunStatus::Completed
        } else if self.run.failure.is_some() {
            RunStatus::Failed
        } else if let Some(exec) = self
            .run
            .stages
            .values()
            .find(|exec| exec.status == StageStatus::Failed)
        {
            // Failed on a previous execution whose failure was not recorded.
            let failure = exec.last_error.clone().map(|error| RunFailure {
                stage: exec.stage.clone(),
                attempts: exec.attempts,
                error,
            });
            self.run.failure = failure;
            RunStatus::Failed
        } else {
            self.run.cancel_reason = Some(
                self.ctx
                    .cancellation
                    .reason()
                    .unwrap_or_else(|| "cancelled".to_string()),
            );
            RunStatus::Cancelled
        };

        self.set_run_status(status);
        let persisted = self.checkpoint().await;

        match &self.run.failure {
            Some(failure) if status == RunStatus::Failed => warn!(
                run_id = %self.run.id,
                stage = %failure.stage,
                attempts = failure.attempts,
                error = %failure.error.message,
                "Pipeline run failed"
            ),
            _ => info!(
                run_id = %self.run.id,
                status = %status,
                attempts = self.run.total_attempts(),
                "Pipeline run finished"
            ),
        }

        RunOutcome {
            run: self.run,
            persisted,
        }
    }
}

impl std::fmt::Debug for JobRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRunner")
            .field("pipeline", &self.definition.id())
            .field("run_id", &self.run.id)
            .field("status", &self.run.status)
            .finish_non_exhaustive()
    }
}
