//! Always-run setup steps: schema creation and `cdm_source`.

use std::rc::Rc;

use omop_core::sql::quote_literal;
use omop_core::{Step, StepValue};
use omop_model::SchemaRole;
use omop_model::cdm::ordinal;
use tracing::debug;

use crate::context::TransformContext;

pub const CREATE_SCHEMAS_STEP: &str = "create_schemas";
pub const CDM_SOURCE_STEP: &str = "cdm_source";

/// `cdm_version_concept_id` of CDM v5.4.
const CDM_V54_CONCEPT: i32 = 756_265;

/// DDL for the owned schemas and the CDM tables.
///
/// Tables of steps at or after the resume point are recreated; the others
/// keep their rows and are only created when missing.
pub fn create_schemas_sql(ctx: &TransformContext) -> Vec<String> {
    let schemas = ctx.schemas();
    let mut statements: Vec<String> = schemas
        .owned()
        .iter()
        .map(|schema| format!("CREATE SCHEMA IF NOT EXISTS {schema}"))
        .collect();
    for table in ctx.catalog.tables(SchemaRole::Cdm) {
        if table.step_ordinal >= 0 && ctx.settings.runs_ordinal(table.step_ordinal) {
            statements.push(table.drop_sql(schemas));
            statements.push(table.create_sql(schemas));
        } else {
            statements.push(table.create_if_missing_sql(schemas));
        }
    }
    statements
}

pub fn create_schemas_step(ctx: Rc<TransformContext>) -> Step {
    Step::new(
        CREATE_SCHEMAS_STEP,
        "Create schemas and CDM tables",
        ordinal::ALWAYS,
        move |step| {
            let statements = create_schemas_sql(&ctx);
            for statement in &statements {
                step.session.execute(statement)?;
            }
            debug!(statements = statements.len(), "schemas ready");
            Ok(StepValue::none())
        },
    )
}

pub fn cdm_source_sql(ctx: &TransformContext) -> Vec<String> {
    let table = format!("{}.cdm_source", ctx.cdm());
    let name = ctx.settings.source_name();
    let abbreviation: String = name.chars().take(25).collect();
    vec![
        format!("DELETE FROM {table}"),
        format!(
            "INSERT INTO {table} (cdm_source_name, cdm_source_abbreviation, cdm_holder, \
             source_description, cdm_etl_reference, source_release_date, cdm_release_date, \
             cdm_version, cdm_version_concept_id, vocabulary_version) \
             SELECT {name}, {abbreviation}, {holder}, 'ICU courses and registry data', \
             'omop-etl', current_date, current_date, 'v5.4', {CDM_V54_CONCEPT}, \
             coalesce((SELECT vocabulary_version FROM {vocab}.vocabulary \
             WHERE vocabulary_id = 'None' LIMIT 1), '')",
            name = quote_literal(&name),
            abbreviation = quote_literal(&abbreviation),
            holder = quote_literal(ctx.settings.hospital_shak_code.as_deref().unwrap_or(&name)),
            vocab = ctx.vocab(),
        ),
    ]
}

pub fn cdm_source_step(ctx: Rc<TransformContext>) -> Step {
    Step::new(
        CDM_SOURCE_STEP,
        "Describe the CDM instance",
        ordinal::ALWAYS,
        move |step| {
            let mut rows = 0;
            for statement in cdm_source_sql(&ctx) {
                rows = step.session.execute(&statement)?;
            }
            Ok(StepValue::rows(rows))
        },
    )
}
