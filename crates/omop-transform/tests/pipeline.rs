//! Full site runs against a recording session.

mod common;

use omop_core::{NoopObserver, RecordingSession, RunSummary, SUMMARY_STEP, with_transaction};
use omop_lookups::LoadOptions;
use omop_model::{EtlError, EtlSettings};
use omop_transform::{etl_pipeline, step_catalog};

use common::{context, default_context, sample_lookups};

const OFFLINE: LoadOptions = LoadOptions {
    validate_in_database: false,
};

fn run(settings: EtlSettings, session: &mut RecordingSession) -> Result<(), EtlError> {
    let ctx = context(settings);
    let pipeline = etl_pipeline(&ctx, sample_lookups(), OFFLINE);
    pipeline
        .run(session, ctx.settings.etl_run_step, &mut NoopObserver)
        .map(|_| ())
}

#[test]
fn steps_run_leaves_first() {
    let keys: Vec<(String, i32)> = step_catalog(&default_context())
        .into_iter()
        .map(|(key, ordinal, _)| (key, ordinal))
        .collect();
    let expected = [
        ("create_schemas", -1),
        ("load_lookups", -1),
        ("cdm_source", -1),
        ("location", 1),
        ("care_site", 2),
        ("person", 3),
        ("death", 4),
        ("visit_occurrence", 5),
        ("stem", 6),
        ("condition_occurrence", 7),
        ("drug_exposure", 8),
        ("procedure_occurrence", 9),
        ("measurement", 10),
        ("observation", 11),
        ("device_exposure", 12),
        ("specimen", 13),
        ("observation_period", 14),
        ("drug_era", 15),
        ("condition_era", 16),
        (SUMMARY_STEP, -1),
    ];
    let expected: Vec<(String, i32)> = expected
        .iter()
        .map(|(key, ordinal)| ((*key).to_string(), *ordinal))
        .collect();
    assert_eq!(keys, expected);
}

#[test]
fn full_run_writes_every_table_in_order() {
    let mut session = RecordingSession::new();
    run(EtlSettings::default(), &mut session).unwrap();

    let order = [
        "CREATE SCHEMA IF NOT EXISTS omopcdm",
        "INSERT INTO lookups.concept_lookup_stem",
        "INSERT INTO omopcdm.cdm_source",
        "INSERT INTO omopcdm.location",
        "INSERT INTO omopcdm.care_site",
        "INSERT INTO omopcdm.person",
        "INSERT INTO omopcdm.death",
        "INSERT INTO omopcdm.visit_occurrence",
        "INSERT INTO omopcdm.stem",
        "INSERT INTO omopcdm.condition_occurrence",
        "INSERT INTO omopcdm.drug_exposure",
        "INSERT INTO omopcdm.measurement",
        "INSERT INTO omopcdm.observation (",
        "INSERT INTO omopcdm.observation_period",
        "INSERT INTO omopcdm.drug_era",
        "INSERT INTO omopcdm.condition_era",
        "INSERT INTO results.cdm_summary",
    ];
    let positions: Vec<usize> = order
        .iter()
        .map(|pattern| session.position(pattern).unwrap_or_else(|| panic!("{pattern} not executed")))
        .collect();
    assert!(positions.windows(2).all(|pair| pair[0] < pair[1]), "{positions:?}");
    assert_eq!(session.matching("SAVEPOINT etl_step").len(), 40);
}

#[test]
fn resume_skips_earlier_steps_but_keeps_setup() {
    let mut session = RecordingSession::new();
    run(EtlSettings::default().with_run_step(7), &mut session).unwrap();

    assert!(session.executed("INSERT INTO lookups.concept_lookup"));
    assert!(session.executed("INSERT INTO omopcdm.cdm_source"));
    assert!(!session.executed("INSERT INTO omopcdm.person"));
    assert!(!session.executed("INSERT INTO omopcdm.stem"));
    assert!(!session.executed("DROP TABLE IF EXISTS omopcdm.stem"));
    assert!(session.executed("DROP TABLE IF EXISTS omopcdm.condition_occurrence"));
    assert!(session.executed("INSERT INTO omopcdm.condition_occurrence"));
}

#[test]
fn missing_source_table_fails_the_run_after_all_steps() {
    let mut session = RecordingSession::new().with_missing_table("source.laboratory");
    let err = run(EtlSettings::default(), &mut session).unwrap_err();

    match err {
        EtlError::FatalPipeline { failures } => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].key, "stem");
            assert!(failures[0].message.contains("source.laboratory"), "{}", failures[0].message);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(session.executed("ROLLBACK TO SAVEPOINT etl_step"));
    assert!(session.executed("INSERT INTO omopcdm.condition_era"));
}

#[test]
fn failures_roll_back_the_transaction() {
    let mut session = RecordingSession::new()
        .fail_on("INSERT INTO omopcdm.person", "duplicate key")
        .fail_on("INSERT INTO omopcdm.drug_era", "division by zero");
    let ctx = default_context();
    let pipeline = etl_pipeline(&ctx, sample_lookups(), OFFLINE);

    let result: anyhow::Result<_> = with_transaction(&mut session, |session| {
        Ok(pipeline.run(session, 0, &mut NoopObserver)?)
    });

    let err = result.unwrap_err();
    let Some(EtlError::FatalPipeline { failures }) = err.downcast_ref::<EtlError>() else {
        panic!("expected a fatal pipeline error, got {err:#}");
    };
    let keys: Vec<&str> = failures.iter().map(|failure| failure.key.as_str()).collect();
    assert_eq!(keys, vec!["person", "drug_era"]);
    assert_eq!(session.statements().last().map(String::as_str), Some("ROLLBACK"));
    assert!(!session.executed("COMMIT"));
}

#[test]
fn summary_is_published_last() {
    let ctx = default_context();
    let pipeline = etl_pipeline(&ctx, sample_lookups(), OFFLINE);
    let mut session = RecordingSession::new().with_affected("INSERT INTO results.cdm_summary", 19);
    let report = pipeline.run(&mut session, 0, &mut NoopObserver).unwrap();

    let summary = report.registry.get_as::<RunSummary>(SUMMARY_STEP).unwrap();
    assert_eq!(summary.steps_recorded, 19);
    assert!(summary.counts.iter().any(|count| count.table == "drug_era"));
    assert_eq!(report.records.last().unwrap().key, SUMMARY_STEP);
}
