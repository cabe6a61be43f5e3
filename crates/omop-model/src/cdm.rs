//! OMOP CDM v5.4 tables, the Stem intermediate, and ETL bookkeeping tables.

use crate::catalog::{Catalog, SchemaRole, SqlType, TableBuilder, TableDef};
use crate::source::source_tables;

/// Step ordinals. Leaves of the reference graph come first.
pub mod ordinal {
    pub const ALWAYS: i32 = -1;
    pub const LOCATION: i32 = 1;
    pub const CARE_SITE: i32 = 2;
    pub const PERSON: i32 = 3;
    pub const DEATH: i32 = 4;
    pub const VISIT_OCCURRENCE: i32 = 5;
    pub const STEM: i32 = 6;
    pub const CONDITION_OCCURRENCE: i32 = 7;
    pub const DRUG_EXPOSURE: i32 = 8;
    pub const PROCEDURE_OCCURRENCE: i32 = 9;
    pub const MEASUREMENT: i32 = 10;
    pub const OBSERVATION: i32 = 11;
    pub const DEVICE_EXPOSURE: i32 = 12;
    pub const SPECIMEN: i32 = 13;
    pub const OBSERVATION_PERIOD: i32 = 14;
    pub const DRUG_ERA: i32 = 15;
    pub const CONDITION_ERA: i32 = 16;
}

use SqlType::{BigInt, Date, Integer, Interval, Numeric, Text, Timestamp, Varchar};

fn cdm(name: &str, step: i32) -> TableBuilder {
    TableBuilder::new(SchemaRole::Cdm, name).ordinal(step)
}

fn person_ref(builder: TableBuilder) -> TableBuilder {
    builder
        .required("person_id", BigInt)
        .references("person_id", "person", "person_id")
}

pub fn location() -> TableDef {
    cdm("location", ordinal::LOCATION)
        .id("location_id")
        .optional("address_1", Varchar(50))
        .optional("address_2", Varchar(50))
        .optional("city", Varchar(50))
        .optional("state", Varchar(2))
        .optional("zip", Varchar(9))
        .optional("county", Varchar(20))
        .optional("location_source_value", Varchar(50))
        .optional("country_concept_id", Integer)
        .optional("country_source_value", Varchar(80))
        .optional("latitude", Numeric)
        .optional("longitude", Numeric)
        .natural_key("location_source_value")
        .build()
}

pub fn care_site() -> TableDef {
    cdm("care_site", ordinal::CARE_SITE)
        .id("care_site_id")
        .optional("care_site_name", Varchar(255))
        .optional("place_of_service_concept_id", Integer)
        .optional("location_id", BigInt)
        .optional("care_site_source_value", Varchar(50))
        .optional("place_of_service_source_value", Varchar(50))
        .references("location_id", "location", "location_id")
        .natural_key("care_site_source_value")
        .build()
}

pub fn person() -> TableDef {
    cdm("person", ordinal::PERSON)
        .key("person_id", BigInt)
        .required("gender_concept_id", Integer)
        .required("year_of_birth", Integer)
        .optional("month_of_birth", Integer)
        .optional("day_of_birth", Integer)
        .optional("birth_datetime", Timestamp)
        .required("race_concept_id", Integer)
        .required("ethnicity_concept_id", Integer)
        .optional("location_id", BigInt)
        .optional("provider_id", BigInt)
        .optional("care_site_id", BigInt)
        .optional("person_source_value", Varchar(50))
        .optional("gender_source_value", Varchar(50))
        .optional("gender_source_concept_id", Integer)
        .optional("race_source_value", Varchar(50))
        .optional("race_source_concept_id", Integer)
        .optional("ethnicity_source_value", Varchar(50))
        .optional("ethnicity_source_concept_id", Integer)
        .references("location_id", "location", "location_id")
        .references("care_site_id", "care_site", "care_site_id")
        .natural_key("person_source_value")
        .build()
}

pub fn death() -> TableDef {
    person_ref(cdm("death", ordinal::DEATH))
        .required("death_date", Date)
        .optional("death_datetime", Timestamp)
        .optional("death_type_concept_id", Integer)
        .optional("cause_concept_id", Integer)
        .optional("cause_source_value", Varchar(50))
        .optional("cause_source_concept_id", Integer)
        .build()
}

pub fn visit_occurrence() -> TableDef {
    person_ref(cdm("visit_occurrence", ordinal::VISIT_OCCURRENCE).id("visit_occurrence_id"))
        .required("visit_concept_id", Integer)
        .required("visit_start_date", Date)
        .optional("visit_start_datetime", Timestamp)
        .required("visit_end_date", Date)
        .optional("visit_end_datetime", Timestamp)
        .required("visit_type_concept_id", Integer)
        .optional("provider_id", BigInt)
        .optional("care_site_id", BigInt)
        .optional("visit_source_value", Varchar(50))
        .optional("visit_source_concept_id", Integer)
        .optional("admitted_from_concept_id", Integer)
        .optional("admitted_from_source_value", Varchar(50))
        .optional("discharged_to_concept_id", Integer)
        .optional("discharged_to_source_value", Varchar(50))
        .optional("preceding_visit_occurrence_id", BigInt)
        .references("care_site_id", "care_site", "care_site_id")
        .natural_key("visit_source_value")
        .build()
}

fn visit_ref(builder: TableBuilder) -> TableBuilder {
    builder
        .optional("provider_id", BigInt)
        .optional("visit_occurrence_id", BigInt)
        .optional("visit_detail_id", BigInt)
        .references("visit_occurrence_id", "visit_occurrence", "visit_occurrence_id")
}

pub fn condition_occurrence() -> TableDef {
    let builder = person_ref(
        cdm("condition_occurrence", ordinal::CONDITION_OCCURRENCE).id("condition_occurrence_id"),
    )
    .required("condition_concept_id", Integer)
    .required("condition_start_date", Date)
    .optional("condition_start_datetime", Timestamp)
    .optional("condition_end_date", Date)
    .optional("condition_end_datetime", Timestamp)
    .required("condition_type_concept_id", Integer)
    .optional("condition_status_concept_id", Integer)
    .optional("stop_reason", Varchar(20));
    visit_ref(builder)
        .optional("condition_source_value", Varchar(50))
        .optional("condition_source_concept_id", Integer)
        .optional("condition_status_source_value", Varchar(50))
        .build()
}

pub fn drug_exposure() -> TableDef {
    let builder = person_ref(cdm("drug_exposure", ordinal::DRUG_EXPOSURE).id("drug_exposure_id"))
        .required("drug_concept_id", Integer)
        .required("drug_exposure_start_date", Date)
        .optional("drug_exposure_start_datetime", Timestamp)
        .required("drug_exposure_end_date", Date)
        .optional("drug_exposure_end_datetime", Timestamp)
        .optional("verbatim_end_date", Date)
        .required("drug_type_concept_id", Integer)
        .optional("stop_reason", Varchar(20))
        .optional("refills", Integer)
        .optional("quantity", Numeric)
        .optional("days_supply", Integer)
        .optional("sig", Text)
        .optional("route_concept_id", Integer)
        .optional("lot_number", Varchar(50));
    visit_ref(builder)
        .optional("drug_source_value", Varchar(50))
        .optional("drug_source_concept_id", Integer)
        .optional("route_source_value", Varchar(50))
        .optional("dose_unit_source_value", Varchar(50))
        .build()
}

pub fn procedure_occurrence() -> TableDef {
    let builder = person_ref(
        cdm("procedure_occurrence", ordinal::PROCEDURE_OCCURRENCE).id("procedure_occurrence_id"),
    )
    .required("procedure_concept_id", Integer)
    .required("procedure_date", Date)
    .optional("procedure_datetime", Timestamp)
    .optional("procedure_end_date", Date)
    .optional("procedure_end_datetime", Timestamp)
    .required("procedure_type_concept_id", Integer)
    .optional("modifier_concept_id", Integer)
    .optional("quantity", Integer);
    visit_ref(builder)
        .optional("procedure_source_value", Varchar(50))
        .optional("procedure_source_concept_id", Integer)
        .optional("modifier_source_value", Varchar(50))
        .build()
}

pub fn device_exposure() -> TableDef {
    let builder =
        person_ref(cdm("device_exposure", ordinal::DEVICE_EXPOSURE).id("device_exposure_id"))
            .required("device_concept_id", Integer)
            .required("device_exposure_start_date", Date)
            .optional("device_exposure_start_datetime", Timestamp)
            .optional("device_exposure_end_date", Date)
            .optional("device_exposure_end_datetime", Timestamp)
            .required("device_type_concept_id", Integer)
            .optional("unique_device_id", Varchar(255))
            .optional("production_id", Varchar(255))
            .optional("quantity", Integer);
    visit_ref(builder)
        .optional("device_source_value", Varchar(50))
        .optional("device_source_concept_id", Integer)
        .optional("unit_concept_id", Integer)
        .optional("unit_source_value", Varchar(50))
        .optional("unit_source_concept_id", Integer)
        .build()
}

pub fn measurement() -> TableDef {
    let builder = person_ref(cdm("measurement", ordinal::MEASUREMENT).id("measurement_id"))
        .required("measurement_concept_id", Integer)
        .required("measurement_date", Date)
        .optional("measurement_datetime", Timestamp)
        .optional("measurement_time", Varchar(10))
        .required("measurement_type_concept_id", Integer)
        .optional("operator_concept_id", Integer)
        .optional("value_as_number", Numeric)
        .optional("value_as_concept_id", Integer)
        .optional("unit_concept_id", Integer)
        .optional("range_low", Numeric)
        .optional("range_high", Numeric);
    visit_ref(builder)
        .optional("measurement_source_value", Varchar(50))
        .optional("measurement_source_concept_id", Integer)
        .optional("unit_source_value", Varchar(50))
        .optional("unit_source_concept_id", Integer)
        .optional("value_source_value", Varchar(50))
        .optional("measurement_event_id", BigInt)
        .optional("meas_event_field_concept_id", Integer)
        .build()
}

pub fn observation() -> TableDef {
    let builder = person_ref(cdm("observation", ordinal::OBSERVATION).id("observation_id"))
        .required("observation_concept_id", Integer)
        .required("observation_date", Date)
        .optional("observation_datetime", Timestamp)
        .required("observation_type_concept_id", Integer)
        .optional("value_as_number", Numeric)
        .optional("value_as_string", Varchar(60))
        .optional("value_as_concept_id", Integer)
        .optional("qualifier_concept_id", Integer)
        .optional("unit_concept_id", Integer);
    visit_ref(builder)
        .optional("observation_source_value", Varchar(50))
        .optional("observation_source_concept_id", Integer)
        .optional("unit_source_value", Varchar(50))
        .optional("qualifier_source_value", Varchar(50))
        .optional("value_source_value", Varchar(50))
        .optional("observation_event_id", BigInt)
        .optional("obs_event_field_concept_id", Integer)
        .build()
}

pub fn specimen() -> TableDef {
    person_ref(cdm("specimen", ordinal::SPECIMEN).id("specimen_id"))
        .required("specimen_concept_id", Integer)
        .required("specimen_type_concept_id", Integer)
        .required("specimen_date", Date)
        .optional("specimen_datetime", Timestamp)
        .optional("quantity", Numeric)
        .optional("unit_concept_id", Integer)
        .optional("anatomic_site_concept_id", Integer)
        .optional("disease_status_concept_id", Integer)
        .optional("specimen_source_id", Varchar(50))
        .optional("specimen_source_value", Varchar(50))
        .optional("unit_source_value", Varchar(50))
        .optional("anatomic_site_source_value", Varchar(50))
        .optional("disease_status_source_value", Varchar(50))
        .build()
}

pub fn observation_period() -> TableDef {
    person_ref(
        cdm("observation_period", ordinal::OBSERVATION_PERIOD).id("observation_period_id"),
    )
    .required("observation_period_start_date", Date)
    .required("observation_period_end_date", Date)
    .required("period_type_concept_id", Integer)
    .build()
}

pub fn drug_era() -> TableDef {
    person_ref(cdm("drug_era", ordinal::DRUG_ERA).id("drug_era_id"))
        .required("drug_concept_id", Integer)
        .required("drug_era_start_date", Date)
        .required("drug_era_end_date", Date)
        .optional("drug_exposure_count", Integer)
        .optional("gap_days", Integer)
        .build()
}

pub fn condition_era() -> TableDef {
    person_ref(cdm("condition_era", ordinal::CONDITION_ERA).id("condition_era_id"))
        .required("condition_concept_id", Integer)
        .required("condition_era_start_date", Date)
        .required("condition_era_end_date", Date)
        .optional("condition_occurrence_count", Integer)
        .build()
}

pub fn cdm_source() -> TableDef {
    cdm("cdm_source", ordinal::ALWAYS)
        .required("cdm_source_name", Varchar(255))
        .required("cdm_source_abbreviation", Varchar(25))
        .required("cdm_holder", Varchar(255))
        .optional("source_description", Text)
        .optional("source_documentation_reference", Varchar(255))
        .optional("cdm_etl_reference", Varchar(255))
        .required("source_release_date", Date)
        .required("cdm_release_date", Date)
        .optional("cdm_version", Varchar(10))
        .required("cdm_version_concept_id", Integer)
        .required("vocabulary_version", Varchar(20))
        .build()
}

/// The wide polymorphic intermediate. Every typed fact lands here before
/// it is projected into its domain table.
pub fn stem() -> TableDef {
    cdm("stem", ordinal::STEM)
        .id("stem_id")
        .optional("domain_id", Varchar(20))
        .optional("person_id", BigInt)
        .optional("visit_occurrence_id", BigInt)
        .optional("provider_id", BigInt)
        .optional("concept_id", Integer)
        .optional("source_value", Varchar(255))
        .optional("source_concept_id", Integer)
        .optional("type_concept_id", Integer)
        .optional("start_date", Date)
        .optional("start_datetime", Timestamp)
        .optional("end_date", Date)
        .optional("end_datetime", Timestamp)
        .optional("verbatim_end_date", Date)
        .optional("days_supply", Integer)
        .optional("dose_unit_source_value", Varchar(50))
        .optional("lot_number", Varchar(50))
        .optional("modifier_concept_id", Integer)
        .optional("modifier_source_value", Varchar(50))
        .optional("operator_concept_id", Integer)
        .optional("quantity", Numeric)
        .optional("range_high", Numeric)
        .optional("range_low", Numeric)
        .optional("refills", Integer)
        .optional("route_concept_id", Integer)
        .optional("route_source_value", Varchar(50))
        .optional("sig", Text)
        .optional("stop_reason", Varchar(20))
        .optional("unique_device_id", Varchar(255))
        .optional("unit_concept_id", Integer)
        .optional("unit_source_value", Varchar(50))
        .optional("value_as_concept_id", Integer)
        .optional("value_as_number", Numeric)
        .optional("value_as_string", Varchar(60))
        .optional("value_source_value", Varchar(255))
        .optional("anatomic_site_concept_id", Integer)
        .optional("disease_status_concept_id", Integer)
        .optional("specimen_source_id", Varchar(50))
        .optional("anatomic_site_source_value", Varchar(50))
        .optional("disease_status_source_value", Varchar(50))
        .optional("condition_status_concept_id", Integer)
        .optional("condition_status_source_value", Varchar(50))
        .optional("qualifier_concept_id", Integer)
        .optional("qualifier_source_value", Varchar(50))
        .optional("datasource", Varchar(50))
        .optional("era_lookback_interval", Interval)
        .build()
}

pub fn cdm_summary() -> TableDef {
    TableBuilder::new(SchemaRole::Results, "cdm_summary")
        .required("transform_name", Varchar(100))
        .optional("description", Text)
        .required("step_ordinal", Integer)
        .required("start_datetime", Timestamp)
        .required("end_datetime", Timestamp)
        .optional("memory_bytes", BigInt)
        .optional("row_count", BigInt)
        .required("status", Varchar(20))
        .build()
}

pub fn concept_lookup_table() -> TableDef {
    TableBuilder::new(SchemaRole::Lookups, "concept_lookup")
        .required("filter", Varchar(50))
        .required("concept_string", Varchar(255))
        .required("concept_id", Integer)
        .build()
}

pub fn concept_lookup_stem_table() -> TableDef {
    TableBuilder::new(SchemaRole::Lookups, "concept_lookup_stem")
        .required("datasource", Varchar(50))
        .optional("source_variable", Varchar(255))
        .optional("source_concept_code", Varchar(255))
        .optional("value_type", Varchar(20))
        .optional("mapped_standard_code", Integer)
        .optional("std_code_domain", Varchar(20))
        .optional("type_concept_id", Integer)
        .optional("value_as_concept_id", Integer)
        .optional("conversion_factor", Numeric)
        .optional("conversion_recipe", Varchar(50))
        .optional("range_low", Numeric)
        .optional("range_high", Numeric)
        .optional("unit_concept_id", Integer)
        .optional("unit_source_value", Varchar(50))
        .optional("drug_exposure_type", Varchar(20))
        .optional("quantity_or_value_as_number", Varchar(50))
        .optional("value_as_string", Varchar(50))
        .optional("route_source_value", Varchar(50))
        .optional("era_lookback_interval", Varchar(30))
        .optional("start_date", Varchar(50))
        .optional("end_date", Varchar(50))
        .build()
}

pub fn shak_lookup_table() -> TableDef {
    TableBuilder::new(SchemaRole::Lookups, "shak_lookup")
        .required("shak_code", Varchar(20))
        .optional("name", Varchar(255))
        .optional("postal_code", Varchar(9))
        .optional("type", Varchar(50))
        .optional("timezone", Varchar(64))
        .build()
}

/// The OMOP clinical and derived tables, leaves first.
pub fn cdm_tables() -> Vec<TableDef> {
    vec![
        location(),
        care_site(),
        person(),
        death(),
        visit_occurrence(),
        stem(),
        condition_occurrence(),
        drug_exposure(),
        procedure_occurrence(),
        measurement(),
        observation(),
        device_exposure(),
        specimen(),
        observation_period(),
        drug_era(),
        condition_era(),
        cdm_source(),
    ]
}

pub fn lookup_tables() -> Vec<TableDef> {
    vec![
        concept_lookup_table(),
        concept_lookup_stem_table(),
        shak_lookup_table(),
    ]
}

impl Catalog {
    /// Every table the ETL reads or writes.
    pub fn omop() -> Self {
        Catalog::new()
            .with_tables(cdm_tables())
            .with_tables(lookup_tables())
            .with_tables([cdm_summary()])
            .with_tables(source_tables())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn references_point_at_earlier_steps() {
        let catalog = Catalog::omop();
        for table in catalog.tables(SchemaRole::Cdm) {
            if table.step_ordinal < 0 {
                continue;
            }
            for fk in &table.foreign_keys {
                let target = catalog.cdm(&fk.table).expect("referenced table");
                assert!(
                    target.step_ordinal < table.step_ordinal,
                    "{} (step {}) references {} (step {})",
                    table.name,
                    table.step_ordinal,
                    target.name,
                    target.step_ordinal
                );
            }
        }
    }

    #[test]
    fn only_person_has_a_supplied_primary_key() {
        for table in cdm_tables() {
            let Some(pk) = &table.primary_key else {
                continue;
            };
            let column = table.column(pk).unwrap();
            assert_eq!(column.identity, table.name != "person", "{}", table.name);
        }
    }
}
