//! Ordered step execution.
//!
//! A pipeline is an ordered list of [`Step`]s. Steps with ordinal -1 always
//! run; the others run when their ordinal is at or above the resume point.
//! Each step runs inside a savepoint: a failing step is rolled back to it,
//! logged as critical, and the run continues so later steps can report
//! their own problems. Failures are aggregated into one
//! [`EtlError::FatalPipeline`] after the last step.

use std::fmt;
use std::time::Instant;

use chrono::{DateTime, Utc};
use omop_model::{EtlError, StepFailure};
use tracing::{debug, error, info, info_span, warn};

use crate::memory::resident_memory_bytes;
use crate::registry::{ResultRegistry, StepValue};
use crate::session::Session;

const STEP_SAVEPOINT: &str = "etl_step";

/// What a step sees while it runs.
pub struct StepContext<'a> {
    pub session: &'a mut dyn Session,
    pub registry: &'a ResultRegistry,
    /// Records of the steps that already ran in this pipeline.
    pub records: &'a [StepRecord],
}

pub type StepAction = dyn Fn(&mut StepContext<'_>) -> anyhow::Result<StepValue>;

pub struct Step {
    key: String,
    description: String,
    ordinal: i32,
    action: Box<StepAction>,
}

impl Step {
    pub fn new<F>(key: &str, description: &str, ordinal: i32, action: F) -> Self
    where
        F: Fn(&mut StepContext<'_>) -> anyhow::Result<StepValue> + 'static,
    {
        Self {
            key: key.to_string(),
            description: description.to_string(),
            ordinal,
            action: Box::new(action),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn ordinal(&self) -> i32 {
        self.ordinal
    }

    /// Whether this step runs when resuming from `etl_run_step`.
    pub fn runs_from(&self, etl_run_step: i32) -> bool {
        self.ordinal == -1 || self.ordinal >= etl_run_step
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("key", &self.key)
            .field("ordinal", &self.ordinal)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Succeeded,
    Failed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Succeeded => "succeeded",
            StepStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct StepRecord {
    pub key: String,
    pub description: String,
    pub ordinal: i32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub memory_bytes: u64,
    pub rows: Option<u64>,
    pub status: StepStatus,
}

impl StepRecord {
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

/// Progress callbacks; all methods default to no-ops.
pub trait StepObserver {
    fn on_step_start(&mut self, _step: &Step) {}
    fn on_step_finish(&mut self, _record: &StepRecord) {}
    fn on_step_skipped(&mut self, _step: &Step) {}
}

/// Observer that ignores every event.
#[derive(Debug, Default)]
pub struct NoopObserver;

impl StepObserver for NoopObserver {}

#[derive(Debug)]
pub struct RunReport {
    pub records: Vec<StepRecord>,
    pub registry: ResultRegistry,
}

/// An ordered list of steps.
#[derive(Debug, Default)]
pub struct EtlPipeline {
    steps: Vec<Step>,
}

impl EtlPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a step to the end of the pipeline.
    pub fn add_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn push(&mut self, step: Step) {
        self.steps.push(step);
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Step keys in execution order.
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(Step::key).collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Runs every step that applies from `etl_run_step`.
    ///
    /// The caller owns the surrounding transaction; see
    /// [`crate::session::with_transaction`].
    pub fn run(
        &self,
        session: &mut dyn Session,
        etl_run_step: i32,
        observer: &mut dyn StepObserver,
    ) -> Result<RunReport, EtlError> {
        let registry = ResultRegistry::new();
        let mut records: Vec<StepRecord> = Vec::new();
        let mut failures = Vec::new();

        for step in &self.steps {
            if !step.runs_from(etl_run_step) {
                debug!(step = step.key(), ordinal = step.ordinal(), "skipped before resume point");
                observer.on_step_skipped(step);
                continue;
            }

            let span = info_span!("step", key = step.key(), ordinal = step.ordinal());
            let _guard = span.enter();
            observer.on_step_start(step);
            info!(description = step.description(), "step started");

            let started_at = Utc::now();
            let timer = Instant::now();
            let outcome = run_in_savepoint(session, &registry, &records, step);
            let memory_bytes = resident_memory_bytes();
            let finished_at = Utc::now();
            let duration_ms = timer.elapsed().as_millis() as u64;

            let (status, rows) = match outcome {
                Ok(value) => {
                    let rows = value.row_count();
                    registry.insert(step.key(), value);
                    (StepStatus::Succeeded, rows)
                }
                Err(err) => {
                    let message = format!("{err:#}");
                    error!(critical = true, error = %message, "step failed");
                    failures.push(StepFailure {
                        key: step.key().to_string(),
                        message,
                    });
                    (StepStatus::Failed, None)
                }
            };
            info!(
                duration_ms,
                memory_bytes,
                rows = rows.unwrap_or(0),
                status = status.as_str(),
                "step finished"
            );

            let record = StepRecord {
                key: step.key().to_string(),
                description: step.description().to_string(),
                ordinal: step.ordinal(),
                started_at,
                finished_at,
                memory_bytes,
                rows,
                status,
            };
            observer.on_step_finish(&record);
            records.push(record);
        }

        if failures.is_empty() {
            Ok(RunReport { records, registry })
        } else {
            Err(EtlError::FatalPipeline { failures })
        }
    }
}

fn run_in_savepoint(
    session: &mut dyn Session,
    registry: &ResultRegistry,
    records: &[StepRecord],
    step: &Step,
) -> anyhow::Result<StepValue> {
    session.savepoint(STEP_SAVEPOINT)?;
    let result = {
        let mut ctx = StepContext {
            session: &mut *session,
            registry,
            records,
        };
        (step.action)(&mut ctx)
    };
    match result {
        Ok(value) => {
            session.release_savepoint(STEP_SAVEPOINT)?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback) = session.rollback_to_savepoint(STEP_SAVEPOINT) {
                warn!(error = %rollback, "rollback to savepoint failed");
            }
            Err(err)
        }
    }
}
