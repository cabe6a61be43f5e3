//! National patient registry entries (SKS-coded diagnoses and procedures).

use omop_core::sql::{quote_ident, quote_literal};
use omop_lookups::LookupSet;
use omop_model::{ColumnRole, EtlError, source};

use super::{StemInsert, mapping_join};
use crate::context::TransformContext;

pub fn registry_sql(ctx: &TransformContext, lookups: &LookupSet) -> Result<String, EtlError> {
    let start_column = lookups
        .resolve_column(source::REGISTRIES, ColumnRole::StartDate)?
        .unwrap_or_else(|| "d_inddto".to_string());
    let end_column = lookups
        .resolve_column(source::REGISTRIES, ColumnRole::EndDate)?
        .unwrap_or_else(|| "d_uddto".to_string());
    let start = format!("r.{}", quote_ident(&start_column));
    let end = format!("r.{}", quote_ident(&end_column));

    let insert = StemInsert::new()
        .set("domain_id", "m.std_code_domain")
        .set("person_id", "per.person_id")
        .set("concept_id", "m.mapped_standard_code")
        .set("source_value", "r.sks_code")
        .set("type_concept_id", "m.type_concept_id")
        .set("start_date", format!("{start}::date"))
        .set("start_datetime", format!("{start}::timestamp"))
        .set("end_date", format!("{end}::date"))
        .set("end_datetime", format!("{end}::timestamp"))
        .set("value_as_concept_id", "m.value_as_concept_id")
        .set("datasource", quote_literal(source::REGISTRIES));

    let body = format!(
        "FROM {source}.{registries} r
         JOIN {cdm}.person per ON per.person_source_value = {person_source}
         {join} {lookups}.concept_lookup_stem m ON m.datasource = {datasource}
             AND m.value_type = 'categorical'
             AND m.source_variable = lower(r.sks_code)",
        source = ctx.source(),
        registries = source::REGISTRIES,
        cdm = ctx.cdm(),
        person_source = ctx.person_source_sql("r.cpr_enc"),
        join = mapping_join(ctx),
        lookups = ctx.lookups(),
        datasource = quote_literal(source::REGISTRIES),
    );
    Ok(insert.render(ctx.cdm(), &body))
}
