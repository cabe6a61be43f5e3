//! Site source tables.
//!
//! These are preloaded per site; the ETL only reads them. Generic fact
//! tables are narrow `(courseid, timestamp, variable, value, from_file)`
//! rows whose typing comes from `concept_lookup_stem`.

use crate::catalog::{SchemaRole, SqlType, TableBuilder, TableDef};

pub const PERSON: &str = "person";
pub const COURSE_METADATA: &str = "course_metadata";
pub const COURSE_ID_CPR_MAPPING: &str = "courseid_cpr_mapping";
pub const ADMINISTRATIONS: &str = "administrations";
pub const PRESCRIPTIONS: &str = "prescriptions";
pub const DIAGNOSES_PROCEDURES: &str = "diagnoses_procedures";
pub const LABORATORY: &str = "laboratory";
pub const OBSERVATIONS: &str = "observations";
pub const REGISTRIES: &str = "registries";

/// Narrow fact tables loaded by the generic typed-fact rules.
pub const FACT_TABLES: [&str; 3] = [OBSERVATIONS, DIAGNOSES_PROCEDURES, LABORATORY];

fn source(name: &str) -> TableBuilder {
    TableBuilder::new(SchemaRole::Source, name)
}

fn narrow_fact(name: &str) -> TableDef {
    source(name)
        .required("courseid", SqlType::Text)
        .optional("timestamp", SqlType::Timestamp)
        .optional("timestamp_end", SqlType::Timestamp)
        .required("variable", SqlType::Text)
        .optional("value", SqlType::Text)
        .optional("from_file", SqlType::Text)
        .build()
}

pub fn source_tables() -> Vec<TableDef> {
    vec![
        source(PERSON)
            .required("cpr_enc", SqlType::Text)
            .optional("c_kon", SqlType::Text)
            .optional("d_foddato", SqlType::Date)
            .optional("c_status", SqlType::Text)
            .optional("d_status_hen_start", SqlType::Date)
            .build(),
        source(COURSE_METADATA)
            .required("courseid", SqlType::Text)
            .optional("dept_shak", SqlType::Text)
            .optional("admdatetime", SqlType::Timestamp)
            .optional("dischargedatetime", SqlType::Timestamp)
            .optional("from_file", SqlType::Text)
            .build(),
        source(COURSE_ID_CPR_MAPPING)
            .required("courseid", SqlType::Text)
            .required("cpr_enc", SqlType::Text)
            .build(),
        source(ADMINISTRATIONS)
            .required("courseid", SqlType::Text)
            .required("epaspresbaseid", SqlType::Text)
            .optional("administration_type", SqlType::Text)
            .optional("timestamp", SqlType::Timestamp)
            .optional("value", SqlType::Numeric)
            .optional("value0", SqlType::Numeric)
            .optional("value1", SqlType::Numeric)
            .optional("from_file", SqlType::Text)
            .build(),
        source(PRESCRIPTIONS)
            .required("courseid", SqlType::Text)
            .required("epaspresid", SqlType::Text)
            .required("epaspresbaseid", SqlType::Text)
            .optional("epaspresdrugname", SqlType::Text)
            .optional("epaspresdrugatc", SqlType::Text)
            .optional("epaspresdose", SqlType::Numeric)
            .optional("epaspresweight", SqlType::Numeric)
            .optional("epaspresmixamount", SqlType::Numeric)
            .optional("epaspresconc", SqlType::Numeric)
            .optional("epaspresdrugunit", SqlType::Text)
            .optional("from_file", SqlType::Text)
            .build(),
        narrow_fact(DIAGNOSES_PROCEDURES),
        narrow_fact(LABORATORY),
        narrow_fact(OBSERVATIONS),
        source(REGISTRIES)
            .required("cpr_enc", SqlType::Text)
            .required("sks_code", SqlType::Text)
            .optional("d_inddto", SqlType::Date)
            .optional("d_uddto", SqlType::Date)
            .optional("from_file", SqlType::Text)
            .build(),
    ]
}
