use std::rc::Rc;

use anyhow::{Context, Result};
use tracing::{info, info_span};

use omop_core::{
    ConnectionConfig, EtlPipeline, PostgresSession, RecordingSession, RunReport, RunSummary,
    SUMMARY_STEP, Session, StepObserver, with_transaction,
};
use omop_lookups::{LoadOptions, read_dir};
use omop_merge::{merge_pipeline, merge_step_catalog};
use omop_model::EtlSettings;
use omop_transform::{TransformContext, etl_pipeline, step_catalog};

use crate::cli::{RunArgs, StepsArgs};
use crate::progress::ProgressObserver;

/// Result of a completed run.
#[derive(Debug)]
pub struct RunOutcome {
    pub report: RunReport,
    /// The generated statements, for `--dry-run`.
    pub script: Option<String>,
}

impl RunOutcome {
    pub fn summary(&self) -> Option<Rc<RunSummary>> {
        self.report.registry.get_as::<RunSummary>(SUMMARY_STEP)
    }
}

pub fn run_etl(args: &RunArgs, settings: EtlSettings) -> Result<RunOutcome> {
    let span = info_span!("run_etl", source = %settings.source_name());
    let _guard = span.enter();
    let lookups = read_dir(&settings.lookup_dir)
        .with_context(|| format!("read lookups from {}", settings.lookup_dir.display()))?;
    let options = LoadOptions {
        validate_in_database: !args.dry_run,
    };
    let run_step = settings.etl_run_step;
    let ctx = TransformContext::new(settings);
    let pipeline = etl_pipeline(&ctx, lookups, options);
    execute(&pipeline, run_step, args)
}

pub fn run_merge(args: &RunArgs, settings: EtlSettings) -> Result<RunOutcome> {
    let span = info_span!("run_merge", sites = settings.merge_schemas.len());
    let _guard = span.enter();
    let run_step = settings.etl_run_step;
    let ctx = TransformContext::new(settings);
    let pipeline = merge_pipeline(&ctx)?;
    execute(&pipeline, run_step, args)
}

/// `(key, ordinal, description)` of the site or merge steps.
pub fn run_steps(args: &StepsArgs, settings: EtlSettings) -> Result<Vec<(String, i32, String)>> {
    let ctx = TransformContext::new(settings);
    if args.merge {
        Ok(merge_step_catalog(&ctx)?)
    } else {
        Ok(step_catalog(&ctx))
    }
}

/// Runs `pipeline` in one transaction, against the database or, for a
/// dry run, against a recording session.
pub fn execute(pipeline: &EtlPipeline, run_step: i32, args: &RunArgs) -> Result<RunOutcome> {
    if args.dry_run {
        let mut session = RecordingSession::new();
        let mut observer = ProgressObserver::hidden(pipeline.len());
        let report = run_in_transaction(pipeline, &mut session, run_step, &mut observer)?;
        info!(statements = session.statements().len(), "dry run finished");
        return Ok(RunOutcome {
            report,
            script: Some(session.script()),
        });
    }

    let path = args
        .conn_file
        .as_deref()
        .context("--conn-file is required unless --dry-run is given")?;
    let config = ConnectionConfig::from_path(path)?;
    let mut session = PostgresSession::connect(&config)
        .with_context(|| format!("connect to {}", config.target()))?;
    let mut observer = ProgressObserver::new(pipeline.len());
    let result = run_in_transaction(pipeline, &mut session, run_step, &mut observer);
    observer.finish();
    Ok(RunOutcome {
        report: result?,
        script: None,
    })
}

fn run_in_transaction(
    pipeline: &EtlPipeline,
    session: &mut dyn Session,
    run_step: i32,
    observer: &mut dyn StepObserver,
) -> Result<RunReport> {
    with_transaction(session, |session| Ok(pipeline.run(session, run_step, observer)?))
}
