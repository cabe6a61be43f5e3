//! Interval union: collapsing overlapping intervals into eras.
//!
//! The union runs entirely in SQL as a sweep over interval endpoints:
//!
//! 1. every interval contributes a start point `(a = start, d = +1, n = 1)`
//!    and an end point `(a = end + lookback, d = -1, n = 0)`;
//! 2. points with the same key and position are summed;
//! 3. a running sum of `d` (minus the point's own `d`) counts the
//!    intervals still open before the point;
//! 4. a point with no open interval before it starts a new era, so a
//!    running count of such points numbers the eras;
//! 5. each era spans its first point to the latest raw end it absorbed.
//!
//! Drug eras, condition eras and the merged observation periods all use
//! the same generator with different keys and lookbacks.

use std::rc::Rc;

use omop_core::sql::quote_literal;
use omop_core::{Step, StepValue};
use omop_model::cdm::ordinal;
use omop_model::{Lookback, OmopDomain};
use tracing::info;

use crate::context::TransformContext;

pub const DRUG_ERA_STEP: &str = "drug_era";
pub const CONDITION_ERA_STEP: &str = "condition_era";

/// Tolerance added to each interval's end before the union.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EraLookback {
    Constant(Lookback),
    /// Interval-typed column of the source; NULL counts as zero.
    Column(String),
}

impl EraLookback {
    fn to_sql(&self) -> String {
        match self {
            EraLookback::Constant(lookback) => lookback.to_sql(),
            EraLookback::Column(column) => {
                format!("coalesce({column}, {})", Lookback::ZERO.to_sql())
            }
        }
    }
}

/// A set of intervals to union, read from `source`.
///
/// `source` is a table or a parenthesised, aliased subquery. The result
/// has the key columns followed by `era_start`, `era_end` (timestamps)
/// and `era_count`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntervalUnion {
    pub source: String,
    pub keys: Vec<String>,
    pub start: String,
    pub end: String,
    /// Weight of each interval; `None` counts every interval once.
    pub count: Option<String>,
    pub lookback: EraLookback,
}

/// Where the eras of an [`IntervalUnion`] are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EraTarget<'a> {
    pub table: String,
    pub keys: Vec<&'a str>,
    pub start: &'a str,
    pub end: &'a str,
    pub count: Option<&'a str>,
}

impl IntervalUnion {
    pub fn new(source: impl Into<String>, keys: &[&str], start: &str, end: &str) -> Self {
        Self {
            source: source.into(),
            keys: keys.iter().map(|key| (*key).to_string()).collect(),
            start: start.to_string(),
            end: end.to_string(),
            count: None,
            lookback: EraLookback::Constant(Lookback::ZERO),
        }
    }

    pub fn count(mut self, column: &str) -> Self {
        self.count = Some(column.to_string());
        self
    }

    pub fn lookback(mut self, lookback: EraLookback) -> Self {
        self.lookback = lookback;
        self
    }

    pub fn to_sql(&self) -> String {
        let keys = self.keys.join(", ");
        let count = self.count.as_deref().unwrap_or("1");
        format!(
            "WITH intervals AS (
                 SELECT {keys}, ({start})::timestamp AS start_at, ({end})::timestamp AS end_at,
                     {count} AS n, {lookback} AS lookback
                 FROM {source}
                 WHERE ({start}) IS NOT NULL AND ({end}) IS NOT NULL
             ),
             endpoints AS (
                 SELECT {keys}, start_at AS a, 1 AS d, n, NULL::timestamp AS end_at FROM intervals
                 UNION ALL
                 SELECT {keys}, end_at + lookback AS a, -1 AS d, 0 AS n, end_at FROM intervals
             ),
             weighted AS (
                 SELECT {keys}, a, sum(d) AS d, sum(n) AS n, max(end_at) AS end_at
                 FROM endpoints
                 GROUP BY {keys}, a
             ),
             coverage AS (
                 SELECT {keys}, a, n, end_at,
                     sum(d) OVER (PARTITION BY {keys} ORDER BY a ROWS UNBOUNDED PRECEDING) - d AS c
                 FROM weighted
             ),
             classes AS (
                 SELECT {keys}, a, n, end_at,
                     count(*) FILTER (WHERE c = 0)
                         OVER (PARTITION BY {keys} ORDER BY a ROWS UNBOUNDED PRECEDING) AS era_id
                 FROM coverage
             )
             SELECT {keys}, min(a) AS era_start, max(end_at) AS era_end, sum(n) AS era_count
             FROM classes
             GROUP BY {keys}, era_id",
            start = self.start,
            end = self.end,
            lookback = self.lookback.to_sql(),
            source = self.source,
        )
    }

    /// `INSERT INTO <target> ... SELECT` of the eras, dates truncated to days.
    pub fn insert_sql(&self, target: &EraTarget<'_>) -> String {
        let mut columns: Vec<&str> = target.keys.clone();
        columns.push(target.start);
        columns.push(target.end);
        let mut values: Vec<String> = self.keys.iter().map(|key| format!("e.{key}")).collect();
        values.push("e.era_start::date".to_string());
        values.push("e.era_end::date".to_string());
        if let Some(count) = target.count {
            columns.push(count);
            values.push("e.era_count".to_string());
        }
        format!(
            "INSERT INTO {table} ({columns}) SELECT {values} FROM ({union}) e",
            table = target.table,
            columns = columns.join(", "),
            values = values.join(", "),
            union = self.to_sql(),
        )
    }
}

/// Drug exposures from Stem, rolled up to their ingredient.
///
/// Stem keeps the per-drug lookback, which the projected drug_exposure
/// table does not.
pub fn drug_era_union(ctx: &TransformContext) -> IntervalUnion {
    let source = format!(
        "(SELECT s.person_id, coalesce(ing.ingredient_id, s.concept_id) AS drug_concept_id,
             coalesce(s.start_date, s.end_date) AS start_date,
             coalesce(s.end_date, s.start_date) AS end_date,
             s.era_lookback_interval
         FROM {cdm}.stem s
         LEFT JOIN LATERAL (
             SELECT ca.ancestor_concept_id AS ingredient_id
             FROM {vocab}.concept_ancestor ca
             JOIN {vocab}.concept c ON c.concept_id = ca.ancestor_concept_id
                 AND c.concept_class_id = 'Ingredient'
             WHERE ca.descendant_concept_id = s.concept_id
             ORDER BY ca.min_levels_of_separation, ca.ancestor_concept_id
             LIMIT 1
         ) ing ON true
         WHERE s.domain_id = {drug} AND s.person_id IS NOT NULL
             AND s.concept_id IS NOT NULL AND s.concept_id <> 0
             AND s.type_concept_id IS NOT NULL) exposures",
        cdm = ctx.cdm(),
        vocab = ctx.vocab(),
        drug = quote_literal(OmopDomain::Drug.as_str()),
    );
    IntervalUnion::new(source, &["person_id", "drug_concept_id"], "start_date", "end_date")
        .lookback(EraLookback::Column("era_lookback_interval".to_string()))
}

pub fn drug_era_sql(ctx: &TransformContext) -> String {
    drug_era_union(ctx).insert_sql(&EraTarget {
        table: format!("{}.drug_era", ctx.cdm()),
        keys: vec!["person_id", "drug_concept_id"],
        start: "drug_era_start_date",
        end: "drug_era_end_date",
        count: Some("drug_exposure_count"),
    })
}

pub fn condition_era_union(ctx: &TransformContext) -> IntervalUnion {
    let source = format!(
        "(SELECT person_id, condition_concept_id, condition_start_date,
             coalesce(condition_end_date, condition_start_date) AS condition_end_date
         FROM {cdm}.condition_occurrence
         WHERE condition_concept_id <> 0) conditions",
        cdm = ctx.cdm(),
    );
    IntervalUnion::new(
        source,
        &["person_id", "condition_concept_id"],
        "condition_start_date",
        "condition_end_date",
    )
    .lookback(EraLookback::Constant(ctx.settings.condition_era_lookback))
}

pub fn condition_era_sql(ctx: &TransformContext) -> String {
    condition_era_union(ctx).insert_sql(&EraTarget {
        table: format!("{}.condition_era", ctx.cdm()),
        keys: vec!["person_id", "condition_concept_id"],
        start: "condition_era_start_date",
        end: "condition_era_end_date",
        count: Some("condition_occurrence_count"),
    })
}

pub fn drug_era_step(ctx: Rc<TransformContext>) -> Step {
    Step::new(
        DRUG_ERA_STEP,
        "Collapse drug exposures into ingredient eras",
        ordinal::DRUG_ERA,
        move |step| {
            let rows = step.session.execute(&drug_era_sql(&ctx))?;
            info!(table = DRUG_ERA_STEP, rows, "eras inserted");
            Ok(StepValue::rows(rows))
        },
    )
}

pub fn condition_era_step(ctx: Rc<TransformContext>) -> Step {
    Step::new(
        CONDITION_ERA_STEP,
        "Collapse condition occurrences into eras",
        ordinal::CONDITION_ERA,
        move |step| {
            let rows = step.session.execute(&condition_era_sql(&ctx))?;
            info!(table = CONDITION_ERA_STEP, rows, "eras inserted");
            Ok(StepValue::rows(rows))
        },
    )
}
