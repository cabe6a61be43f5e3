//! One observation period per person, spanning every dated fact.
//!
//! A person without any usable date gets the sentinel envelope.

use std::rc::Rc;

use omop_core::{Step, StepValue};
use omop_model::cdm::ordinal;
use tracing::info;

use crate::context::TransformContext;

pub const OBSERVATION_PERIOD_STEP: &str = "observation_period";

/// `period_type_concept_id` of the envelope.
pub const PERIOD_TYPE_OBSERVATION_PERIOD: i32 = 44_814_724;

/// Placeholder date some sources use for "unknown".
pub const SENTINEL_DATE: &str = "1800-01-01";

/// Date columns that open and close the envelope, per table.
const FACT_DATES: [(&str, &str, &str); 6] = [
    ("measurement", "measurement_date", "measurement_date"),
    ("condition_occurrence", "condition_start_date", "condition_end_date"),
    ("visit_occurrence", "visit_start_date", "visit_end_date"),
    ("procedure_occurrence", "procedure_date", "procedure_end_date"),
    ("observation", "observation_date", "observation_date"),
    ("drug_exposure", "drug_exposure_start_date", "drug_exposure_end_date"),
];

pub fn observation_period_sql(ctx: &TransformContext) -> String {
    let cdm = ctx.cdm();
    let sentinel = format!("DATE '{SENTINEL_DATE}'");
    let mut branches: Vec<String> = FACT_DATES
        .iter()
        .map(|(table, first, last)| {
            format!(
                "SELECT person_id, nullif({first}, {sentinel}) AS lower_date, \
                 nullif(coalesce({last}, {first}), {sentinel}) AS upper_date FROM {cdm}.{table}"
            )
        })
        .collect();
    branches.push(format!(
        "SELECT person_id, NULL::date AS lower_date, nullif(death_date, {sentinel}) AS upper_date \
         FROM {cdm}.death"
    ));
    format!(
        "INSERT INTO {cdm}.observation_period (person_id, observation_period_start_date,
             observation_period_end_date, period_type_concept_id)
         SELECT p.person_id,
             coalesce(min(f.lower_date), max(f.upper_date), {sentinel}),
             coalesce(max(f.upper_date), min(f.lower_date), {sentinel}),
             {PERIOD_TYPE_OBSERVATION_PERIOD}
         FROM {cdm}.person p
         LEFT JOIN ({facts}) f ON f.person_id = p.person_id
         GROUP BY p.person_id",
        facts = branches.join(" UNION ALL "),
    )
}

pub fn observation_period_step(ctx: Rc<TransformContext>) -> Step {
    Step::new(
        OBSERVATION_PERIOD_STEP,
        "Envelope of dated facts per person",
        ordinal::OBSERVATION_PERIOD,
        move |step| {
            let rows = step.session.execute(&observation_period_sql(&ctx))?;
            info!(table = OBSERVATION_PERIOD_STEP, rows, "observation periods inserted");
            Ok(StepValue::rows(rows))
        },
    )
}
