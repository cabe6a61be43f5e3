//! Loading every typed source fact into the Stem table.
//!
//! Three families of rules feed Stem: the narrow fact tables
//! (`observations`, `diagnoses_procedures`, `laboratory`), the drug
//! administrations with their quantity recipes, and the registry entries.
//! Drugs without a mapping row can additionally be auto-mapped through the
//! ATC vocabulary. Each family is a sub-loader that can be switched off
//! with `STEM_TRANSFORMS`.

mod automap;
mod drugs;
mod facts;
pub mod recipes;
mod registries;

use std::rc::Rc;

use omop_core::{Step, StepValue};
use omop_lookups::LookupSet;
use omop_model::cdm::{self, ordinal};
use omop_model::{EtlError, source};
use tracing::{debug, info};

use crate::context::{TransformContext, lookups};

pub use automap::automap_sql;
pub use drugs::{drug_quantity_expr, drug_sql};
pub use facts::{FactColumns, fact_sql, resolve_fact_columns};
pub use registries::registry_sql;

pub const STEM_STEP: &str = "stem";
pub const ADMINISTRATIONS_LOADER: &str = "administrations";
pub const REGISTRIES_LOADER: &str = "registries";
pub const AUTOMAP_LOADER: &str = "automap";

/// One generated Stem insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StemLoader {
    pub name: String,
    pub sources: Vec<&'static str>,
    pub sql: String,
}

/// `INSERT INTO <cdm>.stem (...) SELECT ...` assembled column by column.
#[derive(Debug, Default)]
pub(crate) struct StemInsert {
    columns: Vec<(&'static str, String)>,
}

impl StemInsert {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set(mut self, column: &'static str, expr: impl Into<String>) -> Self {
        self.columns.push((column, expr.into()));
        self
    }

    /// Text values are cut to the Stem column widths.
    pub(crate) fn render(&self, schema: &str, body: &str) -> String {
        let stem = cdm::stem();
        let names: Vec<&str> = self.columns.iter().map(|(name, _)| *name).collect();
        let exprs: Vec<String> = self
            .columns
            .iter()
            .map(|(name, expr)| stem.fit_expr(name, expr))
            .collect();
        format!(
            "INSERT INTO {schema}.stem ({}) SELECT {} {body}",
            names.join(", "),
            exprs.join(", ")
        )
    }
}

/// Text-to-number cast that yields NULL instead of failing; accepts a decimal comma.
pub(crate) fn numeric(expr: &str) -> String {
    format!(
        "CASE WHEN trim({expr}::text) ~ '^[-+]?[0-9]+([.,][0-9]+)?$' \
         THEN replace(trim({expr}::text), ',', '.')::numeric END"
    )
}

/// Join keyword for mapping rows: outer when unmapped codes are kept.
pub(crate) fn mapping_join(ctx: &TransformContext) -> &'static str {
    if ctx.settings.include_unmapped_codes {
        "LEFT JOIN"
    } else {
        "JOIN"
    }
}

/// The enabled sub-loaders in execution order.
pub fn stem_loaders(ctx: &TransformContext, lookups: &LookupSet) -> Result<Vec<StemLoader>, EtlError> {
    let mut loaders = Vec::new();
    for table in source::FACT_TABLES {
        if ctx.settings.stem_transform_enabled(table) {
            loaders.push(StemLoader {
                name: table.to_string(),
                sources: vec![table],
                sql: fact_sql(ctx, lookups, table)?,
            });
        }
    }
    if ctx.settings.stem_transform_enabled(REGISTRIES_LOADER) {
        loaders.push(StemLoader {
            name: REGISTRIES_LOADER.to_string(),
            sources: vec![source::REGISTRIES],
            sql: registry_sql(ctx, lookups)?,
        });
    }
    if ctx.settings.stem_transform_enabled(ADMINISTRATIONS_LOADER) {
        for exposure in omop_model::DrugExposureType::ALL {
            if let Some(sql) = drug_sql(ctx, lookups, exposure)? {
                loaders.push(StemLoader {
                    name: format!("{ADMINISTRATIONS_LOADER}_{exposure}"),
                    sources: vec![source::ADMINISTRATIONS, source::PRESCRIPTIONS],
                    sql,
                });
            }
        }
    }
    if ctx.settings.include_unmapped_codes && ctx.settings.stem_transform_enabled(AUTOMAP_LOADER) {
        loaders.push(StemLoader {
            name: AUTOMAP_LOADER.to_string(),
            sources: vec![source::ADMINISTRATIONS, source::PRESCRIPTIONS],
            sql: automap_sql(ctx, lookups)?,
        });
    }
    Ok(loaders)
}

pub fn stem_step(ctx: Rc<TransformContext>) -> Step {
    Step::new(
        STEM_STEP,
        "Map source facts into the Stem table",
        ordinal::STEM,
        move |step| {
            let lookups = lookups(step)?;
            let loaders = stem_loaders(&ctx, &lookups)?;
            if loaders.is_empty() {
                debug!("no stem loaders enabled");
            }
            let mut total = 0;
            for loader in &loaders {
                for table in &loader.sources {
                    ctx.require_source(step, table)?;
                }
                let rows = step.session.execute(&loader.sql)?;
                info!(datasource = %loader.name, rows, "stem rows inserted");
                total += rows;
            }
            Ok(StepValue::rows(total))
        },
    )
}
