//! Interval union: the sweep it generates and the SQL around it.

mod common;

use std::collections::BTreeMap;

use omop_core::sql::clean_sql;
use omop_model::{EtlSettings, Lookback};
use omop_transform::era::{condition_era_sql, drug_era_sql};
use omop_transform::observation_period::observation_period_sql;
use omop_transform::{EraLookback, IntervalUnion};
use proptest::prelude::*;

use common::{context, default_context};

/// One interval in days: `(start, end, lookback)`.
type Interval = (i64, i64, i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Era {
    start: i64,
    end: i64,
    count: u64,
}

#[derive(Default)]
struct Point {
    d: i64,
    n: u64,
    end: Option<i64>,
}

/// The generated SQL's stages, run over one key's intervals.
fn sweep(intervals: &[Interval]) -> Vec<Era> {
    let mut points: BTreeMap<i64, Point> = BTreeMap::new();
    for &(start, end, lookback) in intervals {
        let opening = points.entry(start).or_default();
        opening.d += 1;
        opening.n += 1;
        let closing = points.entry(end + lookback).or_default();
        closing.d -= 1;
        closing.end = closing.end.max(Some(end));
    }

    let mut eras: Vec<Era> = Vec::new();
    let mut open = 0;
    for (a, point) in points {
        let before = open;
        open += point.d;
        if before == 0 {
            eras.push(Era {
                start: a,
                end: i64::MIN,
                count: 0,
            });
        }
        if let Some(era) = eras.last_mut() {
            era.end = era.end.max(point.end.unwrap_or(i64::MIN));
            era.count += point.n;
        }
    }
    eras
}

#[test]
fn overlapping_exposures_form_one_era() {
    let eras = sweep(&[(1, 5, 0), (4, 10, 0)]);
    assert_eq!(
        eras,
        vec![Era {
            start: 1,
            end: 10,
            count: 2
        }]
    );
}

#[test]
fn lookback_bridges_a_gap() {
    let separate = sweep(&[(1, 2, 0), (5, 6, 0)]);
    assert_eq!(separate.len(), 2);

    let bridged = sweep(&[(1, 2, 3), (5, 6, 3)]);
    assert_eq!(
        bridged,
        vec![Era {
            start: 1,
            end: 6,
            count: 2
        }]
    );
}

#[test]
fn zero_length_intervals_are_kept() {
    assert_eq!(
        sweep(&[(5, 5, 0), (7, 8, 0)]),
        vec![
            Era {
                start: 5,
                end: 5,
                count: 1
            },
            Era {
                start: 7,
                end: 8,
                count: 1
            }
        ]
    );
}

fn interval() -> impl Strategy<Value = Interval> {
    (0i64..200, 0i64..30, 0i64..10).prop_map(|(start, length, lookback)| (start, start + length, lookback))
}

proptest! {
    #[test]
    fn eras_are_disjoint_maximal_and_complete(intervals in prop::collection::vec(interval(), 1..40)) {
        let eras = sweep(&intervals);

        let total: u64 = eras.iter().map(|era| era.count).sum();
        prop_assert_eq!(total, intervals.len() as u64);

        for &(start, end, _) in &intervals {
            let holders = eras.iter().filter(|era| era.start <= start && end <= era.end).count();
            prop_assert_eq!(holders, 1);
        }

        for pair in eras.windows(2) {
            let (current, next) = (pair[0], pair[1]);
            let reach = intervals
                .iter()
                .filter(|(start, end, _)| current.start <= *start && *end <= current.end)
                .map(|(_, end, lookback)| end + lookback)
                .max()
                .unwrap();
            prop_assert!(next.start > reach, "{current:?} reaches {reach}, next starts {}", next.start);
        }
    }
}

#[test]
fn generated_sql_has_every_stage() {
    let union = IntervalUnion::new("t", &["person_id", "drug_concept_id"], "s", "e")
        .count("n0")
        .lookback(EraLookback::Constant(Lookback::from_days(3)));
    let sql = clean_sql(&union.to_sql());

    assert!(sql.starts_with("WITH intervals AS (SELECT person_id, drug_concept_id, (s)::timestamp AS start_at"));
    assert!(sql.contains("n0 AS n, interval '259200 seconds' AS lookback FROM t"));
    for stage in ["endpoints AS (", "weighted AS (", "coverage AS (", "classes AS ("] {
        assert!(sql.contains(stage), "{stage}");
    }
    assert!(sql.contains("end_at + lookback AS a, -1 AS d, 0 AS n"));
    assert!(sql.contains(
        "sum(d) OVER (PARTITION BY person_id, drug_concept_id ORDER BY a ROWS UNBOUNDED PRECEDING) - d AS c"
    ));
    assert!(sql.ends_with(
        "SELECT person_id, drug_concept_id, min(a) AS era_start, max(end_at) AS era_end, sum(n) AS era_count \
         FROM classes GROUP BY person_id, drug_concept_id, era_id"
    ));
}

#[test]
fn drug_eras_roll_up_to_ingredients_with_per_row_lookback() {
    let sql = clean_sql(&drug_era_sql(&default_context()));

    assert!(sql.starts_with(
        "INSERT INTO omopcdm.drug_era (person_id, drug_concept_id, drug_era_start_date, drug_era_end_date, drug_exposure_count)"
    ));
    assert!(sql.contains("coalesce(era_lookback_interval, interval '0 seconds') AS lookback"));
    assert!(sql.contains("JOIN vocab.concept c ON c.concept_id = ca.ancestor_concept_id AND c.concept_class_id = 'Ingredient'"));
    assert!(sql.contains("coalesce(ing.ingredient_id, s.concept_id) AS drug_concept_id"));
    assert!(sql.contains("WHERE s.domain_id = 'Drug'"));
}

#[test]
fn condition_era_lookback_comes_from_settings() {
    let zero = clean_sql(&condition_era_sql(&default_context()));
    assert!(zero.contains("interval '0 seconds' AS lookback"));

    let settings = EtlSettings::from_lookup(|name| {
        (name == "CONDITION_ERA_LOOKBACK").then(|| "3 days".to_string())
    })
    .unwrap();
    let sql = clean_sql(&condition_era_sql(&context(settings)));
    assert!(sql.contains("interval '259200 seconds' AS lookback"));
    assert!(sql.contains("condition_occurrence_count) SELECT e.person_id, e.condition_concept_id, e.era_start::date"));
}

#[test]
fn observation_period_ignores_the_sentinel_and_includes_death() {
    let sql = clean_sql(&observation_period_sql(&default_context()));

    assert!(sql.contains(
        "SELECT person_id, nullif(measurement_date, DATE '1800-01-01') AS lower_date"
    ));
    assert!(sql.contains(
        "SELECT person_id, NULL::date AS lower_date, nullif(death_date, DATE '1800-01-01') AS upper_date FROM omopcdm.death"
    ));
    assert!(sql.contains("coalesce(max(f.upper_date), min(f.lower_date), DATE '1800-01-01'), 44814724"));
    assert!(sql.contains("FROM omopcdm.person p LEFT JOIN (SELECT person_id"));
    assert!(sql.ends_with("f ON f.person_id = p.person_id GROUP BY p.person_id"));
    assert!(sql.contains("FROM omopcdm.drug_exposure"));
}
