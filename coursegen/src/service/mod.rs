//! The submission interface.
//!
//! [`PipelineService`] owns registered definitions and the runs it started.
//! `submit` returns as soon as the run is persisted; execution, assembly and
//! record persistence happen on a spawned task. A run's handle is dropped
//! once that task is done, after which reports come from the store.

use dashmap::{DashMap, DashSet};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::assembly::{assemble, AssembledRecord};
use crate::cancellation::CancellationToken;
use crate::config::EngineConfig;
use crate::core::{PipelineRun, RunStatus};
use crate::errors::{AssemblyError, CoursegenError, PersistenceError, ServiceError};
use crate::events::{self, EventSink, NoOpEventSink};
use crate::pipeline::{
    ConcurrencyLimiter, JobRunner, PipelineDefinition, RetryPolicy, RunContext, RunOutcome,
};
use crate::schema::SchemaValidator;
use crate::stages::Generator;
use crate::store::{persist_record, persist_run, PipelineStore};

/// Points at the assembled record of a completed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordRef {
    /// The run, which is also the record's key in the store.
    pub run_id: Uuid,
    /// The record's fingerprint.
    pub fingerprint: String,
}

/// What `status` and `wait` report about a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunStatusReport {
    /// Current run state, including per-stage progress.
    pub run: PipelineRun,
    /// Set once a completed run was assembled and its record saved.
    pub record: Option<RecordRef>,
    /// Set if a completed run could not be assembled.
    pub assembly_error: Option<String>,
    /// False if the latest snapshot or the record did not reach the store.
    pub persisted: bool,
    /// True while this process is still working on the run.
    pub active: bool,
}

#[derive(Debug, Clone)]
struct Completion {
    record: Option<RecordRef>,
    assembly_error: Option<String>,
    persisted: bool,
}

#[derive(Clone)]
struct RunHandle {
    state: watch::Receiver<PipelineRun>,
    completion: watch::Receiver<Option<Completion>>,
    cancellation: Arc<CancellationToken>,
}

impl RunHandle {
    fn is_finished(&self) -> bool {
        self.completion.borrow().is_some() || self.state.borrow().is_terminal()
    }

    fn report(&self) -> RunStatusReport {
        let run = self.state.borrow().clone();
        match self.completion.borrow().clone() {
            Some(done) => RunStatusReport {
                run,
                record: done.record,
                assembly_error: done.assembly_error,
                persisted: done.persisted,
                active: false,
            },
            None => RunStatusReport {
                run,
                record: None,
                assembly_error: None,
                persisted: true,
                active: true,
            },
        }
    }
}

/// Registers definitions, starts runs and answers questions about them.
pub struct PipelineService {
    definitions: DashMap<String, Arc<PipelineDefinition>>,
    runs: Arc<DashMap<Uuid, RunHandle>>,
    resuming: DashSet<Uuid>,
    generator: Arc<dyn Generator>,
    store: Arc<dyn PipelineStore>,
    events: Arc<dyn EventSink>,
    limiter: ConcurrencyLimiter,
    validator: Arc<SchemaValidator>,
    persistence_retry: RetryPolicy,
}

impl PipelineService {
    /// Creates a service with the default configuration.
    #[must_use]
    pub fn new(generator: Arc<dyn Generator>, store: Arc<dyn PipelineStore>) -> Self {
        Self::with_config(generator, store, &EngineConfig::default())
    }

    /// Creates a service sized by `config`.
    #[must_use]
    pub fn with_config(
        generator: Arc<dyn Generator>,
        store: Arc<dyn PipelineStore>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            definitions: DashMap::new(),
            runs: Arc::new(DashMap::new()),
            resuming: DashSet::new(),
            generator,
            store,
            events: Arc::new(NoOpEventSink),
            limiter: config.limiter(),
            validator: Arc::new(SchemaValidator::new()),
            persistence_retry: config.persistence_retry.clone(),
        }
    }

    /// Sets the event sink used by every run.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// The limiter shared by every run.
    #[must_use]
    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    /// The validator shared by every run.
    #[must_use]
    pub fn validator(&self) -> &SchemaValidator {
        &self.validator
    }

    /// Registers `definition` under its id, replacing any previous one.
    pub fn register(&self, definition: PipelineDefinition) -> Arc<PipelineDefinition> {
        let definition = Arc::new(definition);
        let replaced = self
            .definitions
            .insert(definition.id().to_string(), definition.clone())
            .is_some();
        info!(
            pipeline = %definition.id(),
            stages = definition.len(),
            replaced,
            "Registered pipeline definition"
        );
        definition
    }

    /// Looks up a registered definition.
    #[must_use]
    pub fn definition(&self, id: &str) -> Option<Arc<PipelineDefinition>> {
        self.definitions.get(id).map(|entry| entry.value().clone())
    }

    /// Starts a run of `definition_id` over `seed` and returns its id.
    ///
    /// # Errors
    ///
    /// Fails for an unknown definition or if the new run cannot be persisted.
    pub async fn submit(&self, definition_id: &str, seed: Value) -> Result<Uuid, CoursegenError> {
        let definition = self
            .definition(definition_id)
            .ok_or_else(|| ServiceError::UnknownDefinition(definition_id.to_string()))?;

        let run = PipelineRun::new(&definition, seed);
        let run_id = run.id;
        persist_run(
            self.store.as_ref(),
            &self.persistence_retry,
            self.events.as_ref(),
            &run,
        )
        .await?;

        let token = Arc::new(CancellationToken::new());
        let runner = JobRunner::for_run(
            definition.clone(),
            self.generator.clone(),
            self.context(token.clone()),
            run,
        );
        self.start(definition, runner, token);

        info!(run_id = %run_id, pipeline = %definition_id, "Submitted pipeline run");
        Ok(run_id)
    }

    /// Continues a persisted run that was interrupted, e.g. by a restart.
    ///
    /// # Errors
    ///
    /// Fails if the run is active here, unknown, terminal, or its definition
    /// is not registered.
    pub async fn resume(&self, run_id: Uuid) -> Result<(), CoursegenError> {
        // Held until the new handle is in `runs`, so only one caller gets past here.
        let Some(_claim) = ResumeClaim::acquire(&self.resuming, run_id) else {
            return Err(ServiceError::AlreadyRunning(run_id).into());
        };
        if self.runs.contains_key(&run_id) {
            return Err(ServiceError::AlreadyRunning(run_id).into());
        }

        let run = self.load_run(run_id).await?;
        let definition = self
            .definition(&run.definition_id)
            .ok_or_else(|| ServiceError::UnknownDefinition(run.definition_id.clone()))?;

        let token = Arc::new(CancellationToken::new());
        let runner = JobRunner::resume(
            definition.clone(),
            self.generator.clone(),
            self.context(token.clone()),
            run,
        )?;
        self.start(definition, runner, token);
        info!(run_id = %run_id, "Resumed pipeline run");
        Ok(())
    }

    /// Reports the state of a run. Runs this process never started are read
    /// from the store.
    ///
    /// # Errors
    ///
    /// Fails if the run is unknown or the store cannot be read.
    pub async fn status(&self, run_id: Uuid) -> Result<RunStatusReport, CoursegenError> {
        if let Some(report) = self.runs.get(&run_id).map(|handle| handle.report()) {
            return Ok(report);
        }

        let run = self.load_run(run_id).await?;
        if run.status != RunStatus::Completed {
            return Ok(RunStatusReport {
                run,
                record: None,
                assembly_error: None,
                persisted: true,
                active: false,
            });
        }

        match self.store.load_assembled_record(run_id).await {
            Ok(record) => Ok(RunStatusReport {
                run,
                record: Some(RecordRef {
                    run_id,
                    fingerprint: record.fingerprint,
                }),
                assembly_error: None,
                persisted: true,
                active: false,
            }),
            Err(PersistenceError::RecordNotFound(_)) => {
                // No record: either it never assembled or saving it failed.
                let assembly_error = self
                    .definition(&run.definition_id)
                    .and_then(|definition| assemble(&definition, &run).err())
                    .map(|error| error.to_string());
                let persisted = assembly_error.is_some();
                Ok(RunStatusReport {
                    run,
                    record: None,
                    assembly_error,
                    persisted,
                    active: false,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Waits until the run and its post-processing are finished.
    ///
    /// # Errors
    ///
    /// Fails if the run is unknown.
    pub async fn wait(&self, run_id: Uuid) -> Result<RunStatusReport, CoursegenError> {
        let Some(mut handle) = self.runs.get(&run_id).map(|h| h.value().clone()) else {
            return self.status(run_id).await;
        };

        // An Err means the run task is gone without reporting back.
        if handle.completion.wait_for(Option::is_some).await.is_err() {
            return self.status(run_id).await;
        }
        Ok(handle.report())
    }

    /// Requests cancellation of an active run. Returns false if the run had
    /// already been cancelled or has already finished.
    ///
    /// # Errors
    ///
    /// [`ServiceError::UnknownRun`] if the run is not active in this process.
    pub fn cancel(&self, run_id: Uuid, reason: impl Into<String>) -> Result<bool, CoursegenError> {
        let handle = self
            .runs
            .get(&run_id)
            .ok_or(ServiceError::UnknownRun(run_id))?;
        if handle.is_finished() {
            return Ok(false);
        }
        let cancelled = handle.cancellation.cancel(reason);
        if cancelled {
            info!(run_id = %run_id, "Cancellation requested");
        }
        Ok(cancelled)
    }

    /// Loads the assembled record of a completed run.
    ///
    /// # Errors
    ///
    /// [`AssemblyError::IncompletePipeline`] if the run is not completed, or
    /// the store's error.
    pub async fn record(&self, run_id: Uuid) -> Result<AssembledRecord, CoursegenError> {
        match self.store.load_assembled_record(run_id).await {
            Ok(record) => Ok(record),
            Err(PersistenceError::RecordNotFound(_)) => {
                let report = self.status(run_id).await?;
                if report.run.status == RunStatus::Completed {
                    Err(PersistenceError::RecordNotFound(run_id).into())
                } else {
                    Err(AssemblyError::IncompletePipeline {
                        run_id,
                        status: report.run.status,
                    }
                    .into())
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Number of runs still executing in this process.
    #[must_use]
    pub fn active_runs(&self) -> usize {
        self.runs.len()
    }

    async fn load_run(&self, run_id: Uuid) -> Result<PipelineRun, CoursegenError> {
        self.store.load_run(run_id).await.map_err(|e| match e {
            PersistenceError::RunNotFound(id) => ServiceError::UnknownRun(id).into(),
            other => other.into(),
        })
    }

    fn context(&self, token: Arc<CancellationToken>) -> RunContext {
        RunContext::new(self.store.clone())
            .with_limiter(self.limiter.clone())
            .with_cancellation(token)
            .with_events(self.events.clone())
            .with_validator(self.validator.clone())
            .with_persistence_retry(self.persistence_retry.clone())
    }

    fn start(
        &self,
        definition: Arc<PipelineDefinition>,
        runner: JobRunner,
        cancellation: Arc<CancellationToken>,
    ) {
        let run_id = runner.run().id;
        let (state_tx, state_rx) = watch::channel(runner.run().clone());
        let (completion_tx, completion_rx) = watch::channel(None);

        self.runs.insert(
            run_id,
            RunHandle {
                state: state_rx,
                completion: completion_rx,
                cancellation,
            },
        );

        let runner = runner.with_publisher(state_tx);
        let runs = self.runs.clone();
        let store = self.store.clone();
        let events = self.events.clone();
        let policy = self.persistence_retry.clone();
        let span = tracing::info_span!("pipeline_run", run_id = %run_id, pipeline = %definition.id());

        tokio::spawn(
            async move {
                let outcome = runner.execute().await;
                let completion =
                    finalize(&definition, outcome, store.as_ref(), events.as_ref(), &policy).await;
                // Evict first: once waiters wake, the run is no longer active.
                runs.remove(&run_id);
                completion_tx.send_replace(Some(completion));
            }
            .instrument(span),
        );
    }
}

/// Marks a run as being resumed for as long as it lives.
struct ResumeClaim<'a> {
    claims: &'a DashSet<Uuid>,
    run_id: Uuid,
}

impl<'a> ResumeClaim<'a> {
    fn acquire(claims: &'a DashSet<Uuid>, run_id: Uuid) -> Option<Self> {
        claims.insert(run_id).then_some(Self { claims, run_id })
    }
}

impl Drop for ResumeClaim<'_> {
    fn drop(&mut self) {
        self.claims.remove(&self.run_id);
    }
}

/// Assembles and saves the record of a completed run.
async fn finalize(
    definition: &PipelineDefinition,
    outcome: RunOutcome,
    store: &dyn PipelineStore,
    sink: &dyn EventSink,
    policy: &RetryPolicy,
) -> Completion {
    let RunOutcome { run, persisted } = outcome;
    if run.status != RunStatus::Completed {
        return Completion {
            record: None,
            assembly_error: None,
            persisted,
        };
    }

    let record = match assemble(definition, &run) {
        Ok(record) => record,
        Err(error) => {
            warn!(run_id = %run.id, error = %error, "Completed run could not be assembled");
            return Completion {
                record: None,
                assembly_error: Some(error.to_string()),
                persisted,
            };
        }
    };

    match persist_record(store, policy, &record).await {
        Ok(()) => {
            sink.try_emit(
                events::RECORD_ASSEMBLED,
                Some(json!({ "run_id": run.id, "fingerprint": record.fingerprint })),
            );
            info!(run_id = %run.id, fingerprint = %record.fingerprint, "Saved assembled record");
            Completion {
                record: Some(RecordRef {
                    run_id: run.id,
                    fingerprint: record.fingerprint,
                }),
                assembly_error: None,
                persisted,
            }
        }
        Err(error) => {
            warn!(run_id = %run.id, error = %error, "Failed to persist assembled record");
            sink.try_emit(
                events::PERSISTENCE_FAILED,
                Some(json!({ "run_id": run.id, "error": error.to_string() })),
            );
            Completion {
                record: None,
                assembly_error: None,
                persisted: false,
            }
        }
    }
}

impl std::fmt::Debug for PipelineService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineService")
            .field("definitions", &self.definitions.len())
            .field("runs", &self.runs.len())
            .field("limit", &self.limiter.limit())
            .finish_non_exhaustive()
    }
}
