//! Merge SQL and merge runs against a recording session.

use std::rc::Rc;

use omop_core::sql::clean_sql;
use omop_core::{NoopObserver, RecordingSession, SUMMARY_STEP};
use omop_merge::{MergeKind, merge_pipeline, merge_sql, merge_step_catalog, merged_tables};
use omop_model::{EtlError, EtlSettings};
use omop_transform::TransformContext;

fn two_sites() -> Rc<TransformContext> {
    TransformContext::new(
        EtlSettings::default().with_merge_schemas(vec!["site_a".to_string(), "site_b".to_string()]),
    )
}

fn statements(ctx: &TransformContext, table: &str) -> Vec<String> {
    let table = ctx.catalog.cdm(table).unwrap();
    merge_sql(ctx, table, &ctx.settings.merge_schemas)
        .iter()
        .map(|sql| clean_sql(sql))
        .collect()
}

#[test]
fn no_site_schemas_is_a_setup_error() {
    let ctx = TransformContext::new(EtlSettings::default());
    match merge_pipeline(&ctx) {
        Err(EtlError::FatalSetup(message)) => assert!(message.contains("MERGE_SCHEMAS")),
        Err(other) => panic!("unexpected {other:?}"),
        Ok(_) => panic!("expected a setup error"),
    }
}

#[test]
fn merge_steps_skip_the_stem_table() {
    let keys: Vec<(String, i32)> = merge_step_catalog(&two_sites())
        .unwrap()
        .into_iter()
        .map(|(key, ordinal, _)| (key, ordinal))
        .collect();
    let expected = [
        ("create_schemas", -1),
        ("cdm_source", -1),
        ("location", 1),
        ("care_site", 2),
        ("person", 3),
        ("death", 4),
        ("visit_occurrence", 5),
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
fn persons_keep_the_lowest_id_per_source_value() {
    let ctx = two_sites();
    let person = statements(&ctx, "person");

    assert_eq!(person.len(), 1);
    let sql = &person[0];
    assert!(sql.starts_with("INSERT INTO omopcdm.person (person_id, gender_concept_id"));
    assert!(sql.contains(
        "SELECT DISTINCT ON (coalesce(u.person_source_value, u.person_id::text)) u.*"
    ));
    assert!(sql.contains("t.person_id AS person_id"));
    assert!(sql.contains("FROM site_a.person t"));
    assert!(sql.contains(" UNION ALL SELECT t.person_id AS person_id"));
    assert!(sql.contains("FROM site_b.person t"));
    assert!(sql.ends_with("ORDER BY coalesce(u.person_source_value, u.person_id::text), u.person_id"));
}

#[test]
fn site_measurements_are_rewritten_to_the_merged_person() {
    let ctx = two_sites();
    let measurement = statements(&ctx, "measurement");

    assert_eq!(measurement.len(), 2);
    let site_b = &measurement[1];
    assert!(site_b.starts_with("INSERT INTO omopcdm.measurement (person_id, measurement_concept_id"));
    assert!(site_b.contains("SELECT mp.person_id AS person_id, t.measurement_concept_id AS measurement_concept_id"));
    assert!(site_b.contains(
        "FROM site_b.measurement t JOIN site_b.person sp ON sp.person_id = t.person_id \
         JOIN omopcdm.person mp ON mp.person_source_value = sp.person_source_value"
    ));
    assert!(site_b.contains("NULL AS provider_id"));
}

#[test]
fn visits_are_remapped_through_their_source_value() {
    let ctx = two_sites();
    let sql = &statements(&ctx, "measurement")[0];

    assert!(sql.contains("m_visit_occurrence_id.visit_occurrence_id AS visit_occurrence_id"));
    assert!(sql.contains(
        "LEFT JOIN site_a.visit_occurrence s_visit_occurrence_id \
         ON s_visit_occurrence_id.visit_occurrence_id = t.visit_occurrence_id"
    ));
    assert!(sql.contains(
        "LEFT JOIN (SELECT visit_source_value, min(visit_occurrence_id) AS visit_occurrence_id \
         FROM omopcdm.visit_occurrence GROUP BY visit_source_value) m_visit_occurrence_id \
         ON m_visit_occurrence_id.visit_source_value = s_visit_occurrence_id.visit_source_value"
    ));
}

#[test]
fn care_sites_are_relinked_to_locations() {
    let ctx = two_sites();
    let care_site = statements(&ctx, "care_site");

    assert_eq!(care_site.len(), 3);
    assert!(care_site[0].contains("m_location_id.location_id AS location_id"));
    assert_eq!(
        care_site[2],
        "UPDATE omopcdm.care_site cs SET location_id = l.location_id \
         FROM (SELECT location_source_value, min(location_id) AS location_id \
         FROM omopcdm.location GROUP BY location_source_value) l \
         WHERE cs.care_site_source_value = l.location_source_value"
    );

    let location = statements(&ctx, "location");
    assert_eq!(location.len(), 2);
    assert!(location[1].ends_with("FROM site_b.location t"));
}

#[test]
fn deaths_are_unique_per_person() {
    let ctx = two_sites();
    let death = statements(&ctx, "death");

    assert_eq!(death.len(), 1);
    assert!(death[0].contains("SELECT DISTINCT ON (u.person_id) u.*"));
    assert!(death[0].ends_with("ORDER BY u.person_id, u.death_date"));
}

#[test]
fn eras_are_collapsed_again_across_sites() {
    let ctx = two_sites();
    let drug_era = &statements(&ctx, "drug_era")[0];

    assert!(drug_era.starts_with(
        "INSERT INTO omopcdm.drug_era (person_id, drug_concept_id, drug_era_start_date, drug_era_end_date, drug_exposure_count)"
    ));
    assert!(drug_era.contains("coalesce(drug_exposure_count, 1) AS n, interval '0 seconds' AS lookback FROM (SELECT"));
    assert!(drug_era.contains("FROM site_a.drug_era t"));
    assert!(drug_era.contains("FROM site_b.drug_era t"));
    assert!(drug_era.contains(") merged WHERE"));

    let period = &statements(&ctx, "observation_period")[0];
    assert!(period.contains("PARTITION BY person_id, period_type_concept_id ORDER BY a"));
    assert!(period.contains("1 AS n, interval '0 seconds' AS lookback"));
    assert!(period.contains(
        "SELECT e.person_id, e.period_type_concept_id, e.era_start::date, e.era_end::date FROM"
    ));
}

#[test]
fn merge_kinds_by_table() {
    assert_eq!(MergeKind::for_table("location"), MergeKind::Append);
    assert_eq!(MergeKind::for_table("visit_occurrence"), MergeKind::Append);
    assert!(matches!(MergeKind::for_table("person"), MergeKind::Dedup { .. }));
    assert!(matches!(
        MergeKind::for_table("condition_era"),
        MergeKind::Intervals {
            count: Some("condition_occurrence_count"),
            ..
        }
    ));
}

#[test]
fn merged_tables_are_ordered_leaves_first() {
    let ctx = two_sites();
    let ordinals: Vec<i32> = merged_tables(&ctx).iter().map(|table| table.step_ordinal).collect();
    assert!(ordinals.windows(2).all(|pair| pair[0] < pair[1]), "{ordinals:?}");
}

#[test]
fn full_merge_runs_every_site() {
    let ctx = two_sites();
    let pipeline = merge_pipeline(&ctx).unwrap();
    let mut session = RecordingSession::new();
    pipeline.run(&mut session, 0, &mut NoopObserver).unwrap();

    let person = session.position("INSERT INTO omopcdm.person").unwrap();
    let measurement = session.position("INSERT INTO omopcdm.measurement").unwrap();
    let update = session.position("UPDATE omopcdm.care_site").unwrap();
    assert!(update < person && person < measurement);
    assert_eq!(session.matching("INSERT INTO omopcdm.condition_occurrence").len(), 2);
    assert!(!session.executed("INSERT INTO omopcdm.stem"));
    assert!(session.executed("INSERT INTO results.cdm_summary"));
}

#[test]
fn missing_site_table_is_reported_per_step() {
    let ctx = two_sites();
    let pipeline = merge_pipeline(&ctx).unwrap();
    let mut session = RecordingSession::new().with_missing_table("site_b.drug_era");

    let err = pipeline.run(&mut session, 0, &mut NoopObserver).unwrap_err();
    let EtlError::FatalPipeline { failures } = err else {
        panic!("expected a fatal pipeline error");
    };
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].key, "drug_era");
    assert_eq!(failures[0].message, "missing required site table: site_b.drug_era");
    assert!(!session.executed("INSERT INTO omopcdm.drug_era"));
    assert!(session.executed("INSERT INTO omopcdm.condition_era"));
}
