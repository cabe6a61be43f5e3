//! Run summary: per-step records in `cdm_summary` and CDM row counts.

use anyhow::{Context, Result};
use omop_model::cdm::{self, ordinal};
use omop_model::{Catalog, SchemaNames, SchemaRole};
use tracing::info;

use crate::registry::StepValue;
use crate::runner::{Step, StepRecord};
use crate::session::Session;
use crate::sql::{insert_values, number_or_null, quote_literal, text_or_null};

pub const SUMMARY_STEP: &str = "cdm_summary";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableCount {
    pub table: String,
    pub rows: u64,
}

/// Payload of the summary step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub counts: Vec<TableCount>,
    pub steps_recorded: u64,
}

/// INSERT statements for `records`; empty when there is nothing to write.
pub fn summary_insert_sql(schemas: &SchemaNames, records: &[StepRecord]) -> Vec<String> {
    let table = cdm::cdm_summary();
    let rows: Vec<Vec<String>> = records
        .iter()
        .map(|record| {
            vec![
                quote_literal(&record.key),
                text_or_null(Some(&record.description)),
                record.ordinal.to_string(),
                quote_literal(&record.started_at.format(TIMESTAMP_FORMAT).to_string()),
                quote_literal(&record.finished_at.format(TIMESTAMP_FORMAT).to_string()),
                record.memory_bytes.to_string(),
                number_or_null(record.rows),
                quote_literal(record.status.as_str()),
            ]
        })
        .collect();
    insert_values(
        &table.qualified(schemas),
        &table.insert_columns(),
        &rows,
        500,
    )
}

pub fn write_summary(
    session: &mut dyn Session,
    schemas: &SchemaNames,
    records: &[StepRecord],
) -> Result<u64> {
    let table = cdm::cdm_summary();
    session
        .execute(&table.create_if_missing_sql(schemas))
        .context("create cdm_summary")?;
    let mut written = 0;
    for statement in summary_insert_sql(schemas, records) {
        written += session.execute(&statement).context("insert cdm_summary")?;
    }
    Ok(written)
}

/// `count(*)` of every CDM table in catalog order.
pub fn count_tables(
    session: &mut dyn Session,
    catalog: &Catalog,
    schemas: &SchemaNames,
) -> Result<Vec<TableCount>> {
    let mut counts = Vec::new();
    for table in catalog.tables(SchemaRole::Cdm) {
        let qualified = table.qualified(schemas);
        let rows = session
            .query_scalar(&format!("SELECT count(*) AS n FROM {qualified}"))
            .with_context(|| format!("count rows of {qualified}"))?
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(0);
        counts.push(TableCount {
            table: table.name.clone(),
            rows,
        });
    }
    Ok(counts)
}

/// The last step of a run: writes prior step records and collects table counts.
pub fn summary_step(catalog: Catalog, schemas: SchemaNames) -> Step {
    Step::new(
        SUMMARY_STEP,
        "Record step timings and CDM row counts",
        ordinal::ALWAYS,
        move |ctx| {
            let steps_recorded = write_summary(ctx.session, &schemas, ctx.records)?;
            let counts = count_tables(ctx.session, &catalog, &schemas)?;
            let total: u64 = counts.iter().map(|count| count.rows).sum();
            info!(tables = counts.len(), rows = total, "collected CDM row counts");
            Ok(StepValue::rows(steps_recorded).with_payload(RunSummary {
                counts,
                steps_recorded,
            }))
        },
    )
}
