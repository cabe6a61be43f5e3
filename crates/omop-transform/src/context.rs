//! Shared, read-only state of one ETL run.

use std::rc::Rc;

use anyhow::{Context, Result};
use omop_core::StepContext;
use omop_core::sql::quote_literal;
use omop_lookups::{LOOKUPS_STEP, LookupSet};
use omop_model::{Catalog, EtlError, EtlSettings, SchemaNames, TableDef};

/// Prefix of `person.person_source_value`.
pub const PERSON_SOURCE_PREFIX: &str = "cpr_enc|";
/// Prefix of `visit_occurrence.visit_source_value`.
pub const VISIT_SOURCE_PREFIX: &str = "courseid|";

/// Settings and catalog, shared by every step closure.
#[derive(Debug, Clone)]
pub struct TransformContext {
    pub settings: EtlSettings,
    pub catalog: Catalog,
}

impl TransformContext {
    pub fn new(settings: EtlSettings) -> Rc<Self> {
        Rc::new(Self {
            settings,
            catalog: Catalog::omop(),
        })
    }

    pub fn schemas(&self) -> &SchemaNames {
        &self.settings.schemas
    }

    pub fn cdm(&self) -> &str {
        &self.settings.schemas.cdm
    }

    pub fn source(&self) -> &str {
        &self.settings.schemas.source
    }

    pub fn lookups(&self) -> &str {
        &self.settings.schemas.lookups
    }

    pub fn vocab(&self) -> &str {
        &self.settings.schemas.vocab
    }

    pub fn table(&self, name: &str) -> Result<&TableDef> {
        self.catalog
            .cdm(name)
            .with_context(|| format!("table {name} is not in the catalog"))
    }

    /// Deterministic `person_id` for a `cpr_enc` expression.
    ///
    /// Salted with the department code unless persons come from the
    /// registry or no department is configured.
    pub fn person_id_sql(&self, cpr_expr: &str) -> String {
        let input = match (&self.settings.department_shak_code, self.settings.person_from_registry) {
            (Some(department), false) => {
                format!("{} || '|' || {cpr_expr}", quote_literal(department))
            }
            _ => cpr_expr.to_string(),
        };
        format!("floor(hashtextextended({input}, 0) / 2.0)::bigint")
    }

    /// `'cpr_enc|' || <expr>`.
    pub fn person_source_sql(&self, cpr_expr: &str) -> String {
        format!("{} || {cpr_expr}", quote_literal(PERSON_SOURCE_PREFIX))
    }

    /// `'courseid|' || <expr>`.
    pub fn visit_source_sql(&self, courseid_expr: &str) -> String {
        format!("{} || {courseid_expr}", quote_literal(VISIT_SOURCE_PREFIX))
    }

    /// Location and care-site source value for a SHAK code expression,
    /// prefixed with the hospital code.
    pub fn site_source_sql(&self, shak_expr: &str) -> String {
        let hospital = self
            .settings
            .hospital_shak_code
            .as_deref()
            .unwrap_or("shak");
        format!("{} || {shak_expr}", quote_literal(&format!("{hospital}|")))
    }

    /// Fails when a source table the step reads is absent.
    pub fn require_source(&self, step: &mut StepContext<'_>, table: &str) -> Result<()> {
        if step.session.table_exists(self.source(), table)? {
            Ok(())
        } else {
            Err(EtlError::missing_source_table(format!("{}.{table}", self.source())).into())
        }
    }
}

/// The validated dictionaries published by the lookup step.
pub fn lookups(step: &StepContext<'_>) -> Result<Rc<LookupSet>> {
    step.registry
        .lazy(LOOKUPS_STEP)
        .get_as::<LookupSet>()
        .context("lookup dictionaries have not been loaded")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn person_id_is_salted_with_the_department() {
        let mut settings = EtlSettings::default();
        settings.department_shak_code = Some("1301029".to_string());
        let ctx = TransformContext::new(settings.clone());
        assert_eq!(
            ctx.person_id_sql("p.cpr_enc"),
            "floor(hashtextextended('1301029' || '|' || p.cpr_enc, 0) / 2.0)::bigint"
        );

        settings.person_from_registry = true;
        let ctx = TransformContext::new(settings);
        assert_eq!(
            ctx.person_id_sql("p.cpr_enc"),
            "floor(hashtextextended(p.cpr_enc, 0) / 2.0)::bigint"
        );
    }
}
