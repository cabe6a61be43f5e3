//! Tests for omop-model types.

use omop_model::cdm::{self, ordinal};
use omop_model::{Catalog, EtlError, Lookback, OmopDomain, SchemaNames, SchemaRole};
use proptest::prelude::*;

#[test]
fn catalog_covers_every_domain_table() {
    let catalog = Catalog::omop();
    for domain in OmopDomain::ALL {
        let table = catalog
            .cdm(domain.table_name())
            .unwrap_or_else(|| panic!("missing {}", domain.table_name()));
        assert!(table.references_person(), "{}", table.name);
        assert!(table.step_ordinal > ordinal::STEM);
    }
}

#[test]
fn ordinals_follow_reference_graph() {
    let order = [
        ordinal::LOCATION,
        ordinal::CARE_SITE,
        ordinal::PERSON,
        ordinal::VISIT_OCCURRENCE,
        ordinal::STEM,
        ordinal::OBSERVATION_PERIOD,
        ordinal::DRUG_ERA,
        ordinal::CONDITION_ERA,
    ];
    assert!(order.windows(2).all(|pair| pair[0] < pair[1]));
    assert!(ordinal::DEATH > ordinal::PERSON);
}

#[test]
fn ddl_uses_configured_schemas() {
    let schemas = SchemaNames {
        results: "site_results".to_string(),
        ..SchemaNames::default()
    };
    let summary = cdm::cdm_summary();
    assert_eq!(summary.role, SchemaRole::Results);
    assert!(summary.create_sql(&schemas).starts_with("CREATE TABLE site_results.cdm_summary ("));
    assert_eq!(
        cdm::person().drop_sql(&schemas),
        "DROP TABLE IF EXISTS omopcdm.person CASCADE"
    );
}

#[test]
fn natural_keys_are_declared_for_merge_remapping() {
    let catalog = Catalog::omop();
    for (table, key) in [
        ("person", "person_source_value"),
        ("visit_occurrence", "visit_source_value"),
        ("care_site", "care_site_source_value"),
        ("location", "location_source_value"),
    ] {
        let def = catalog.cdm(table).unwrap();
        assert_eq!(def.natural_key.as_deref(), Some(key));
        assert!(def.has_column(key));
    }
}

#[test]
fn stem_carries_projection_columns() {
    let stem = cdm::stem();
    for column in [
        "domain_id",
        "concept_id",
        "type_concept_id",
        "start_date",
        "end_datetime",
        "quantity",
        "value_as_concept_id",
        "era_lookback_interval",
        "datasource",
    ] {
        assert!(stem.has_column(column), "stem lacks {column}");
    }
    assert!(!stem.insert_columns().contains(&"stem_id"));
}

#[test]
fn unknown_domain_is_an_error() {
    assert!(matches!(
        "Episode".parse::<OmopDomain>(),
        Err(EtlError::UnknownDomain(_))
    ));
}

proptest! {
    #[test]
    fn lookback_parses_every_unit(amount in 0i64..100_000, unit in 0usize..4, plural: bool, upper: bool) {
        let (name, factor) = [("second", 1), ("minute", 60), ("hour", 3_600), ("day", 86_400)][unit];
        let mut raw = format!("{amount} {name}{}", if plural { "s" } else { "" });
        if upper {
            raw = raw.to_uppercase();
        }
        let lookback: Lookback = raw.parse().unwrap();
        prop_assert_eq!(lookback.seconds(), amount * factor);
        prop_assert_eq!(lookback.canonical().parse::<Lookback>().unwrap(), lookback);
    }

    #[test]
    fn lookback_rejects_unitless_text(raw in "[a-z ]{0,12}") {
        prop_assert!(raw.parse::<Lookback>().is_err());
    }
}
