//! Assembly of the merge pipeline.

use std::rc::Rc;

use anyhow::Result;
use omop_core::{EtlPipeline, Step, StepContext, StepValue, summary_step};
use omop_model::{EtlError, InputKind, SchemaRole, TableDef};
use omop_transform::TransformContext;
use omop_transform::schema::{cdm_source_step, create_schemas_step};
use tracing::{debug, info};

use crate::tables::merge_sql;

/// CDM tables the merge fills, leaves first. Stem is a per-site staging
/// table and is not merged.
pub fn merged_tables(ctx: &TransformContext) -> Vec<&TableDef> {
    let mut tables: Vec<&TableDef> = ctx
        .catalog
        .tables(SchemaRole::Cdm)
        .filter(|table| table.step_ordinal >= 0 && table.name != "stem")
        .collect();
    tables.sort_by_key(|table| table.step_ordinal);
    tables
}

/// Fails unless every site has `table` and, when rows are remapped
/// through it, `person`.
fn require_site_tables(step: &mut StepContext<'_>, sites: &[String], table: &TableDef) -> Result<()> {
    let mut needed = vec![table.name.as_str()];
    if table.references_person() {
        needed.push("person");
    }
    for site in sites {
        for name in &needed {
            if !step.session.table_exists(site, name)? {
                return Err(EtlError::MissingRequiredInput {
                    kind: InputKind::SiteTable,
                    name: format!("{site}.{name}"),
                }
                .into());
            }
        }
    }
    Ok(())
}

fn merge_step(ctx: Rc<TransformContext>, table: &TableDef) -> Step {
    let name = table.name.clone();
    Step::new(
        &table.name,
        &format!("Merge {} from every site", table.name),
        table.step_ordinal,
        move |step| {
            let sites = &ctx.settings.merge_schemas;
            let table = ctx.table(&name)?;
            require_site_tables(step, sites, table)?;
            let mut rows = 0;
            for statement in merge_sql(&ctx, table, sites) {
                rows += step.session.execute(&statement)?;
            }
            debug!(table = %name, sites = sites.len(), "site rows combined");
            info!(table = %name, rows, "rows merged");
            Ok(StepValue::rows(rows))
        },
    )
}

/// Every step of a merge run in execution order.
pub fn merge_pipeline(ctx: &Rc<TransformContext>) -> Result<EtlPipeline, EtlError> {
    if ctx.settings.merge_schemas.is_empty() {
        return Err(EtlError::FatalSetup(
            "MERGE_SCHEMAS names no site schema to merge".to_string(),
        ));
    }
    let mut pipeline = EtlPipeline::new()
        .add_step(create_schemas_step(Rc::clone(ctx)))
        .add_step(cdm_source_step(Rc::clone(ctx)));
    for table in merged_tables(ctx) {
        pipeline.push(merge_step(Rc::clone(ctx), table));
    }
    Ok(pipeline.add_step(summary_step(ctx.catalog.clone(), ctx.schemas().clone())))
}

/// `(key, ordinal, description)` of every merge step, for listings.
pub fn merge_step_catalog(ctx: &Rc<TransformContext>) -> Result<Vec<(String, i32, String)>, EtlError> {
    Ok(merge_pipeline(ctx)?
        .steps()
        .iter()
        .map(|step| {
            (
                step.key().to_string(),
                step.ordinal(),
                step.description().to_string(),
            )
        })
        .collect())
}
