//! Projection of Stem rows into their OMOP domain tables.
//!
//! Each domain is described as a column map plus the filters a Stem row
//! must pass. Dates go through coalesce ladders so a row with only an end
//! date still lands with `start = end`; a row whose required date is
//! still null after the ladder is not projected.

use std::rc::Rc;

use omop_core::sql::quote_literal;
use omop_core::{Step, StepValue};
use omop_model::cdm::{self, ordinal};
use omop_model::{OmopDomain, TableDef};
use tracing::info;

use crate::context::TransformContext;

const START_DATE_LADDER: &str = "coalesce(s.start_date, s.start_datetime::date, s.end_date, s.end_datetime::date)";
const START_DATETIME_LADDER: &str =
    "coalesce(s.start_datetime, s.start_date::timestamp, s.end_datetime, s.end_date::timestamp)";
const END_DATE_LADDER: &str = "coalesce(s.end_date, s.end_datetime::date, s.start_date, s.start_datetime::date)";
const END_DATETIME_LADDER: &str =
    "coalesce(s.end_datetime, s.end_date::timestamp, s.start_datetime, s.start_date::timestamp)";

/// INSERT…SELECT from Stem into one domain table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projection {
    pub domain: OmopDomain,
    table: TableDef,
    columns: Vec<(String, String)>,
    filters: Vec<String>,
}

fn prefix(domain: OmopDomain) -> &'static str {
    match domain {
        OmopDomain::Condition => "condition",
        OmopDomain::Drug => "drug",
        OmopDomain::Procedure => "procedure",
        OmopDomain::Measurement => "measurement",
        OmopDomain::Observation => "observation",
        OmopDomain::Device => "device",
        OmopDomain::Specimen => "specimen",
    }
}

fn domain_table(domain: OmopDomain) -> TableDef {
    match domain {
        OmopDomain::Condition => cdm::condition_occurrence(),
        OmopDomain::Drug => cdm::drug_exposure(),
        OmopDomain::Procedure => cdm::procedure_occurrence(),
        OmopDomain::Measurement => cdm::measurement(),
        OmopDomain::Observation => cdm::observation(),
        OmopDomain::Device => cdm::device_exposure(),
        OmopDomain::Specimen => cdm::specimen(),
    }
}

impl Projection {
    fn new(domain: OmopDomain) -> Self {
        let p = prefix(domain);
        let mut projection = Self {
            domain,
            table: domain_table(domain),
            columns: Vec::new(),
            filters: vec![
                format!("s.domain_id = {}", quote_literal(domain.as_str())),
                "s.person_id IS NOT NULL".to_string(),
            ],
        }
        .map("person_id", "s.person_id")
        .map(&format!("{p}_concept_id"), "s.concept_id")
        .map(&format!("{p}_type_concept_id"), "s.type_concept_id")
        .map(&format!("{p}_source_value"), "s.source_value");
        if domain != OmopDomain::Specimen {
            projection = projection
                .map("visit_occurrence_id", "s.visit_occurrence_id")
                .map("provider_id", "s.provider_id")
                .map(&format!("{p}_source_concept_id"), "s.source_concept_id");
        }
        projection
    }

    fn map(mut self, target: &str, expr: &str) -> Self {
        self.columns.push((target.to_string(), expr.to_string()));
        self
    }

    fn require(mut self, condition: &str) -> Self {
        self.filters.push(condition.to_string());
        self
    }

    fn require_concept(self) -> Self {
        self.require("s.concept_id IS NOT NULL")
    }

    fn require_type(self) -> Self {
        self.require("s.type_concept_id IS NOT NULL")
    }

    /// The projection rules of `domain`.
    pub fn for_domain(domain: OmopDomain) -> Self {
        let base = Self::new(domain);
        match domain {
            OmopDomain::Condition => base
                .require_concept()
                .require_type()
                .map("condition_start_date", "coalesce(s.start_date, s.end_date)")
                .map("condition_start_datetime", START_DATETIME_LADDER)
                .map("condition_end_date", "coalesce(s.end_date, s.start_date)")
                .map(
                    "condition_end_datetime",
                    "coalesce(s.end_datetime, s.end_date::timestamp, s.start_datetime)",
                )
                .map("condition_status_concept_id", "s.condition_status_concept_id")
                .map("condition_status_source_value", "s.condition_status_source_value")
                .map("stop_reason", "s.stop_reason")
                .require("coalesce(s.start_date, s.end_date) IS NOT NULL")
                .require(
                    "(s.start_date IS NULL OR s.start_datetime IS NULL \
                     OR s.start_date = s.start_datetime::date)",
                ),
            OmopDomain::Drug => base
                .require_concept()
                .require_type()
                .map("drug_exposure_start_date", "coalesce(s.start_date, s.end_date)")
                .map("drug_exposure_start_datetime", START_DATETIME_LADDER)
                .map("drug_exposure_end_date", "coalesce(s.end_date, s.start_date)")
                .map("drug_exposure_end_datetime", END_DATETIME_LADDER)
                .map("verbatim_end_date", "s.verbatim_end_date")
                .map("stop_reason", "s.stop_reason")
                .map("refills", "s.refills")
                .map("quantity", "s.quantity")
                .map("days_supply", "s.days_supply")
                .map("sig", "s.sig")
                .map("route_concept_id", "s.route_concept_id")
                .map("lot_number", "s.lot_number")
                .map("route_source_value", "s.route_source_value")
                .map("dose_unit_source_value", "s.dose_unit_source_value")
                .require("coalesce(s.start_date, s.end_date) IS NOT NULL"),
            OmopDomain::Procedure => base
                .require_concept()
                .require_type()
                .map("procedure_date", START_DATE_LADDER)
                .map("procedure_datetime", START_DATETIME_LADDER)
                .map("procedure_end_date", END_DATE_LADDER)
                .map("procedure_end_datetime", END_DATETIME_LADDER)
                .map("modifier_concept_id", "s.modifier_concept_id")
                .map("quantity", "s.quantity::integer")
                .map("modifier_source_value", "s.modifier_source_value")
                .require(&format!("{START_DATE_LADDER} IS NOT NULL")),
            OmopDomain::Measurement => base
                .require_concept()
                .require_type()
                .map("measurement_date", "coalesce(s.start_date, s.end_date)")
                .map("measurement_datetime", START_DATETIME_LADDER)
                .map("operator_concept_id", "s.operator_concept_id")
                .map("value_as_number", "s.value_as_number")
                .map("value_as_concept_id", "s.value_as_concept_id")
                .map("unit_concept_id", "s.unit_concept_id")
                .map("range_low", "s.range_low")
                .map("range_high", "s.range_high")
                .map("unit_source_value", "s.unit_source_value")
                .map("value_source_value", "s.value_source_value")
                .require("coalesce(s.start_date, s.end_date) IS NOT NULL"),
            OmopDomain::Observation => base
                .require_concept()
                .require_type()
                .map("observation_date", "coalesce(s.start_date, s.end_date)")
                .map("observation_datetime", START_DATETIME_LADDER)
                .map("value_as_number", "s.value_as_number")
                .map("value_as_string", "s.value_as_string")
                .map("value_as_concept_id", "s.value_as_concept_id")
                .map("qualifier_concept_id", "s.qualifier_concept_id")
                .map("unit_concept_id", "s.unit_concept_id")
                .map("unit_source_value", "s.unit_source_value")
                .map("qualifier_source_value", "s.qualifier_source_value")
                .map("value_source_value", "s.value_source_value")
                .require("coalesce(s.start_date, s.end_date) IS NOT NULL"),
            OmopDomain::Device => base
                .require_concept()
                .require_type()
                .map("device_exposure_start_date", "coalesce(s.start_date, s.end_date)")
                .map("device_exposure_start_datetime", START_DATETIME_LADDER)
                .map("device_exposure_end_date", "s.end_date")
                .map("device_exposure_end_datetime", "s.end_datetime")
                .map("unique_device_id", "s.unique_device_id")
                .map("quantity", "s.quantity::integer")
                .map("unit_concept_id", "s.unit_concept_id")
                .map("unit_source_value", "s.unit_source_value")
                .require("coalesce(s.start_date, s.end_date) IS NOT NULL"),
            OmopDomain::Specimen => base
                .require_concept()
                .require_type()
                .map("specimen_date", "coalesce(s.start_date, s.end_date)")
                .map("specimen_datetime", START_DATETIME_LADDER)
                .map("quantity", "s.quantity")
                .map("unit_concept_id", "s.unit_concept_id")
                .map("anatomic_site_concept_id", "s.anatomic_site_concept_id")
                .map("disease_status_concept_id", "s.disease_status_concept_id")
                .map("specimen_source_id", "s.specimen_source_id")
                .map("unit_source_value", "s.unit_source_value")
                .map("anatomic_site_source_value", "s.anatomic_site_source_value")
                .map("disease_status_source_value", "s.disease_status_source_value")
                .require("coalesce(s.start_date, s.end_date) IS NOT NULL"),
        }
    }

    /// Target column names in insert order.
    pub fn target_columns(&self) -> Vec<&str> {
        self.columns.iter().map(|(target, _)| target.as_str()).collect()
    }

    /// Text columns are cut to the target widths.
    pub fn sql(&self, schema: &str) -> String {
        let targets = self.target_columns().join(", ");
        let exprs = self
            .columns
            .iter()
            .map(|(target, expr)| self.table.fit_expr(target, expr))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "INSERT INTO {schema}.{table} ({targets}) SELECT {exprs} FROM {schema}.stem s WHERE {filters}",
            table = self.table.name,
            filters = self.filters.join(" AND "),
        )
    }
}

fn domain_ordinal(domain: OmopDomain) -> i32 {
    match domain {
        OmopDomain::Condition => ordinal::CONDITION_OCCURRENCE,
        OmopDomain::Drug => ordinal::DRUG_EXPOSURE,
        OmopDomain::Procedure => ordinal::PROCEDURE_OCCURRENCE,
        OmopDomain::Measurement => ordinal::MEASUREMENT,
        OmopDomain::Observation => ordinal::OBSERVATION,
        OmopDomain::Device => ordinal::DEVICE_EXPOSURE,
        OmopDomain::Specimen => ordinal::SPECIMEN,
    }
}

pub fn projection_step(ctx: Rc<TransformContext>, domain: OmopDomain) -> Step {
    let table = domain.table_name();
    Step::new(
        table,
        &format!("Project {domain} rows from the Stem table"),
        domain_ordinal(domain),
        move |step| {
            let sql = Projection::for_domain(domain).sql(ctx.cdm());
            let rows = step.session.execute(&sql)?;
            info!(table, rows, "rows projected");
            Ok(StepValue::rows(rows))
        },
    )
}

/// One projection step per domain, in ordinal order.
pub fn projection_steps(ctx: &Rc<TransformContext>) -> Vec<Step> {
    OmopDomain::ALL
        .into_iter()
        .map(|domain| projection_step(Rc::clone(ctx), domain))
        .collect()
}
