//! Drug administrations joined to their prescriptions.

use omop_core::sql::{Cond, Expr, case_lookup, quote_ident, quote_literal};
use omop_lookups::LookupSet;
use omop_model::{ColumnRole, DrugExposureType, EtlError, QuantitySource, source};
use tracing::warn;

use super::StemInsert;
use super::recipes::{conversion_recipe, quantity_recipe};
use crate::context::TransformContext;

/// Seconds subtracted from a continuous administration's timestamp to
/// anchor the interval on its minute boundary.
const CONTINUOUS_WINDOW_SECONDS: u32 = 59;

fn quantity_expr(lookups: &LookupSet, exposure: DrugExposureType) -> Expr {
    let arms = lookups
        .quantity_sources(exposure)
        .into_iter()
        .map(|origin| match origin {
            QuantitySource::Column(name) => {
                let expr = Expr::Column(format!("a.{}", quote_ident(&name)));
                (Expr::Text(name), expr)
            }
            QuantitySource::Recipe(name) => {
                let expr = quantity_recipe(exposure, &name).unwrap_or_else(|| {
                    warn!(recipe = %name, exposure = %exposure, "unknown quantity recipe");
                    Expr::Null
                });
                (Expr::Text(name), expr)
            }
        })
        .collect();
    Expr::Switch {
        operand: Box::new(Expr::column("m.quantity_or_value_as_number")),
        arms,
        otherwise: Box::new(Expr::Null),
    }
}

fn conversion_expr(lookups: &LookupSet, exposure: DrugExposureType) -> Expr {
    let mut branches = vec![(
        Cond::IsNull(Expr::column("m.conversion_recipe")),
        Expr::coalesce(vec![Expr::column("m.conversion_factor"), Expr::int(1)]),
    )];
    for name in lookups.conversion_recipes() {
        match conversion_recipe(exposure, &name) {
            Some(expr) => branches.push((
                Cond::eq(Expr::column("m.conversion_recipe"), Expr::text(&name)),
                expr,
            )),
            None => warn!(recipe = %name, "unknown conversion recipe"),
        }
    }
    Expr::case(branches, Expr::Null)
}

/// `conversion × quantity` for administrations of `exposure`, over the
/// recipes the mapping rows use.
pub fn drug_quantity_expr(lookups: &LookupSet, exposure: DrugExposureType) -> Expr {
    conversion_expr(lookups, exposure).mul(quantity_expr(lookups, exposure))
}

/// Stem insert for one administration type; `None` when no mapping row uses it.
pub fn drug_sql(
    ctx: &TransformContext,
    lookups: &LookupSet,
    exposure: DrugExposureType,
) -> Result<Option<String>, EtlError> {
    if !lookups
        .drug_rows()
        .any(|row| row.drug_exposure_type == Some(exposure))
    {
        return Ok(None);
    }
    let timestamp_column = lookups
        .resolve_column(source::ADMINISTRATIONS, ColumnRole::EndDate)?
        .unwrap_or_else(|| "timestamp".to_string());
    let end = format!("a.{}", quote_ident(&timestamp_column));
    let start = match exposure {
        DrugExposureType::Continuous => {
            format!("({end} - interval '{CONTINUOUS_WINDOW_SECONDS} seconds')")
        }
        DrugExposureType::Bolus | DrugExposureType::Discrete => end.clone(),
    };
    let route = case_lookup("lower(m.route_source_value)", &lookups.concept_map("route"), Some(0));

    let insert = StemInsert::new()
        .set("domain_id", "coalesce(m.std_code_domain, 'Drug')")
        .set("person_id", "v.person_id")
        .set("visit_occurrence_id", "v.visit_occurrence_id")
        .set("concept_id", "m.mapped_standard_code")
        .set("source_value", "p.epaspresdrugname")
        .set("type_concept_id", "m.type_concept_id")
        .set("start_date", format!("{start}::date"))
        .set("start_datetime", start.clone())
        .set("end_date", format!("{end}::date"))
        .set("end_datetime", end.clone())
        .set("quantity", drug_quantity_expr(lookups, exposure).render())
        .set("route_concept_id", route)
        .set("route_source_value", "m.route_source_value")
        .set("unit_concept_id", "m.unit_concept_id")
        .set("unit_source_value", "m.unit_source_value")
        .set("dose_unit_source_value", "p.epaspresdrugunit")
        .set("datasource", quote_literal(source::ADMINISTRATIONS))
        .set("era_lookback_interval", "m.era_lookback_interval::interval");

    let body = format!(
        "FROM {source}.{administrations} a
         JOIN {source}.{prescriptions} p
             ON p.epaspresbaseid = p.epaspresid AND p.epaspresbaseid = a.epaspresbaseid
         JOIN {cdm}.visit_occurrence v ON v.visit_source_value = {visit_source}
         JOIN {lookups}.concept_lookup_stem m ON m.datasource = {datasource}
             AND m.drug_exposure_type = {exposure}
             AND (m.source_variable = lower(p.epaspresdrugname)
                 OR m.source_concept_code = lower(p.epaspresdrugatc))
         WHERE lower(a.administration_type) = {exposure}
             AND a.from_file LIKE {file_pattern}",
        source = ctx.source(),
        administrations = source::ADMINISTRATIONS,
        prescriptions = source::PRESCRIPTIONS,
        cdm = ctx.cdm(),
        visit_source = ctx.visit_source_sql("a.courseid"),
        lookups = ctx.lookups(),
        datasource = quote_literal(source::ADMINISTRATIONS),
        exposure = quote_literal(exposure.as_str()),
        file_pattern = quote_literal(&format!("{}%", exposure.file_prefix())),
    );
    Ok(Some(insert.render(ctx.cdm(), &body)))
}
