//! Administrations of drugs with no mapping row, mapped through ATC.
//!
//! An administration counts as mapped only when a mapping row names both
//! the drug and its administration type. The prescription's ATC code is
//! followed to an RxNorm ingredient in the vocabulary. Rows where that
//! fails are still loaded with concept 0 so the exposure is not lost.

use omop_core::sql::{quote_ident, quote_literal};
use omop_lookups::LookupSet;
use omop_model::{ColumnRole, DrugExposureType, EtlError, source};

use super::StemInsert;
use crate::context::TransformContext;

pub const AUTOMAPPED_DATASOURCE: &str = "automapped_administrations";
pub const UNMAPPED_DATASOURCE: &str = "unmapped_administrations";

const TYPE_EHR: i32 = 32_817;

/// `administration_type`/`from_file` pairs that are loaded.
fn file_gate() -> String {
    let pairs: Vec<String> = DrugExposureType::ALL
        .into_iter()
        .map(|exposure| {
            format!(
                "(lower(a.administration_type) = {} AND a.from_file LIKE {})",
                quote_literal(exposure.as_str()),
                quote_literal(&format!("{}%", exposure.file_prefix()))
            )
        })
        .collect();
    format!("({})", pairs.join(" OR "))
}

pub fn automap_sql(ctx: &TransformContext, lookups: &LookupSet) -> Result<String, EtlError> {
    let timestamp_column = lookups
        .resolve_column(source::ADMINISTRATIONS, ColumnRole::EndDate)?
        .unwrap_or_else(|| "timestamp".to_string());
    let end = format!("a.{}", quote_ident(&timestamp_column));
    let start = format!(
        "CASE WHEN lower(a.administration_type) = {continuous} \
         THEN {end} - interval '59 seconds' ELSE {end} END",
        continuous = quote_literal(DrugExposureType::Continuous.as_str()),
    );

    let insert = StemInsert::new()
        .set("domain_id", "'Drug'")
        .set("person_id", "v.person_id")
        .set("visit_occurrence_id", "v.visit_occurrence_id")
        .set("concept_id", "coalesce(ing.concept_id, 0)")
        .set("source_value", "p.epaspresdrugname")
        .set("type_concept_id", TYPE_EHR.to_string())
        .set("start_date", format!("({start})::date"))
        .set("start_datetime", format!("({start})"))
        .set("end_date", format!("{end}::date"))
        .set("end_datetime", end.clone())
        .set("quantity", "coalesce(a.value0, a.value)")
        .set("dose_unit_source_value", "p.epaspresdrugunit")
        .set(
            "datasource",
            format!(
                "CASE WHEN ing.concept_id IS NULL THEN {} ELSE {} END",
                quote_literal(UNMAPPED_DATASOURCE),
                quote_literal(AUTOMAPPED_DATASOURCE)
            ),
        )
        .set("era_lookback_interval", "interval '0 seconds'");

    let body = format!(
        "FROM {source}.{administrations} a
         JOIN {source}.{prescriptions} p
             ON p.epaspresbaseid = p.epaspresid AND p.epaspresbaseid = a.epaspresbaseid
         JOIN {cdm}.visit_occurrence v ON v.visit_source_value = {visit_source}
         LEFT JOIN LATERAL (
             SELECT rx.concept_id
             FROM {vocab}.concept atc
             JOIN {vocab}.concept_relationship cr ON cr.concept_id_1 = atc.concept_id
                 AND cr.relationship_id = 'ATC - RxNorm'
             JOIN {vocab}.concept rx ON rx.concept_id = cr.concept_id_2
                 AND rx.concept_class_id = 'Ingredient'
             WHERE atc.vocabulary_id = 'ATC' AND atc.concept_code = upper(p.epaspresdrugatc)
             ORDER BY rx.concept_id
             LIMIT 1
         ) ing ON true
         WHERE {gate}
             AND NOT EXISTS (
                 SELECT 1 FROM {lookups}.concept_lookup_stem m
                 WHERE m.datasource = {datasource}
                     AND m.drug_exposure_type = lower(a.administration_type)
                     AND (m.source_variable = lower(p.epaspresdrugname)
                         OR m.source_concept_code = lower(p.epaspresdrugatc)))",
        source = ctx.source(),
        administrations = source::ADMINISTRATIONS,
        prescriptions = source::PRESCRIPTIONS,
        cdm = ctx.cdm(),
        visit_source = ctx.visit_source_sql("a.courseid"),
        vocab = ctx.vocab(),
        gate = file_gate(),
        lookups = ctx.lookups(),
        datasource = quote_literal(source::ADMINISTRATIONS),
    );
    Ok(insert.render(ctx.cdm(), &body))
}
