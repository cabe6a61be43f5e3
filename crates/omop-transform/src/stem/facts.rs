//! Narrow `(courseid, timestamp, variable, value)` fact tables.

use omop_core::sql::{quote_ident, quote_literal};
use omop_lookups::LookupSet;
use omop_model::{ColumnRole, EtlError};

use super::{StemInsert, mapping_join, numeric};
use crate::context::TransformContext;

/// Source columns a fact table uses for each role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactColumns {
    pub start: String,
    pub end: Option<String>,
    pub number: String,
    pub text: String,
    pub route: Option<String>,
}

/// Columns named by the mapping rows of `datasource`, falling back to the
/// narrow-table layout (`timestamp`, `value`) where no row names one.
pub fn resolve_fact_columns(lookups: &LookupSet, datasource: &str) -> Result<FactColumns, EtlError> {
    let resolve = |role| lookups.resolve_column(datasource, role);
    Ok(FactColumns {
        start: resolve(ColumnRole::StartDate)?.unwrap_or_else(|| "timestamp".to_string()),
        end: resolve(ColumnRole::EndDate)?,
        number: resolve(ColumnRole::ValueAsNumber)?.unwrap_or_else(|| "value".to_string()),
        text: resolve(ColumnRole::ValueAsString)?.unwrap_or_else(|| "value".to_string()),
        route: resolve(ColumnRole::RouteSourceValue)?,
    })
}

fn column(name: &str) -> String {
    format!("t.{}", quote_ident(name))
}

pub fn fact_sql(ctx: &TransformContext, lookups: &LookupSet, datasource: &str) -> Result<String, EtlError> {
    let columns = resolve_fact_columns(lookups, datasource)?;
    let start = column(&columns.start);
    let end = columns.end.as_deref().map(column);
    let raw_number = column(&columns.number);
    let number = numeric(&raw_number);
    let text = format!("{}::text", column(&columns.text));

    let is_numerical = "m.value_type = 'numerical'";
    let is_free_text = "m.value_type = 'free_text'";
    let factor = "coalesce(m.conversion_factor, 1)";

    let insert = StemInsert::new()
        .set("domain_id", "m.std_code_domain")
        .set("person_id", "v.person_id")
        .set("visit_occurrence_id", "v.visit_occurrence_id")
        .set("concept_id", "m.mapped_standard_code")
        .set("source_value", "t.variable")
        .set("type_concept_id", "m.type_concept_id")
        .set("start_date", format!("{start}::date"))
        .set("start_datetime", format!("{start}::timestamp"))
        .set(
            "end_date",
            end.as_ref().map_or_else(|| "NULL".to_string(), |e| format!("{e}::date")),
        )
        .set(
            "end_datetime",
            end.as_ref().map_or_else(|| "NULL".to_string(), |e| format!("{e}::timestamp")),
        )
        .set("range_high", format!("{factor} * m.range_high"))
        .set("range_low", format!("{factor} * m.range_low"))
        .set(
            "route_source_value",
            columns
                .route
                .as_deref()
                .map_or_else(|| "NULL".to_string(), |r| format!("{}::text", column(r))),
        )
        .set("unit_concept_id", "m.unit_concept_id")
        .set("unit_source_value", "m.unit_source_value")
        .set(
            "value_as_concept_id",
            "coalesce(m.value_as_concept_id, vl.concept_id)",
        )
        .set(
            "value_as_number",
            format!("CASE WHEN {is_numerical} THEN {factor} * {number} END"),
        )
        .set(
            "value_as_string",
            format!("CASE WHEN {is_free_text} THEN {text} END"),
        )
        .set(
            "value_source_value",
            format!(
                "coalesce(CASE WHEN {is_numerical} THEN {raw_number}::text END, \
                 CASE WHEN {is_free_text} THEN {text} END, t.value::text)"
            ),
        )
        .set("datasource", quote_literal(datasource));

    let body = format!(
        "FROM {source}.{table} t
         JOIN {cdm}.visit_occurrence v ON v.visit_source_value = {visit_source}
         {join} {lookups}.concept_lookup_stem m ON m.datasource = {datasource_literal} AND (
             (m.value_type = 'categorical' AND m.source_concept_code = lower(t.variable || '__' || t.value))
             OR ({is_numerical} AND m.source_variable = lower(t.variable))
             OR ({is_free_text} AND m.source_variable = lower(t.variable)))
         LEFT JOIN {lookups}.concept_lookup vl ON {is_free_text}
             AND vl.filter = lower(m.std_code_domain) || '_value'
             AND vl.concept_string = lower({text})",
        source = ctx.source(),
        table = quote_ident(datasource),
        cdm = ctx.cdm(),
        visit_source = ctx.visit_source_sql("t.courseid"),
        join = mapping_join(ctx),
        lookups = ctx.lookups(),
        datasource_literal = quote_literal(datasource),
    );
    Ok(insert.render(ctx.cdm(), &body))
}
