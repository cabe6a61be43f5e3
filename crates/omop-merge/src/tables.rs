//! Merge statements per table class.

use omop_model::{Lookback, TableDef};
use omop_transform::{EraLookback, EraTarget, IntervalUnion, TransformContext};

use crate::remap::SiteSelect;

/// How the site rows of one table are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeKind {
    /// One INSERT per site.
    Append,
    /// Union of all sites keeping the first row per `key` in `order`.
    Dedup {
        key: &'static str,
        order: &'static str,
    },
    /// Union of all sites, then collapsed by the interval union.
    Intervals {
        keys: &'static [&'static str],
        start: &'static str,
        end: &'static str,
        count: Option<&'static str>,
    },
}

impl MergeKind {
    pub fn for_table(name: &str) -> Self {
        match name {
            "person" => MergeKind::Dedup {
                key: "coalesce(u.person_source_value, u.person_id::text)",
                order: "u.person_id",
            },
            "death" => MergeKind::Dedup {
                key: "u.person_id",
                order: "u.death_date",
            },
            "observation_period" => MergeKind::Intervals {
                keys: &["person_id", "period_type_concept_id"],
                start: "observation_period_start_date",
                end: "observation_period_end_date",
                count: None,
            },
            "drug_era" => MergeKind::Intervals {
                keys: &["person_id", "drug_concept_id"],
                start: "drug_era_start_date",
                end: "drug_era_end_date",
                count: Some("drug_exposure_count"),
            },
            "condition_era" => MergeKind::Intervals {
                keys: &["person_id", "condition_concept_id"],
                start: "condition_era_start_date",
                end: "condition_era_end_date",
                count: Some("condition_occurrence_count"),
            },
            _ => MergeKind::Append,
        }
    }
}

fn union_all(ctx: &TransformContext, table: &TableDef, sites: &[String]) -> String {
    sites
        .iter()
        .map(|site| SiteSelect::new(ctx, table, site).sql())
        .collect::<Vec<_>>()
        .join(" UNION ALL ")
}

/// Statements that fill the merged `table` from every site, in order.
pub fn merge_sql(ctx: &TransformContext, table: &TableDef, sites: &[String]) -> Vec<String> {
    let target = table.qualified_in(ctx.cdm());
    let columns = table.insert_columns().join(", ");
    let mut statements = match MergeKind::for_table(&table.name) {
        MergeKind::Append => sites
            .iter()
            .map(|site| {
                format!(
                    "INSERT INTO {target} ({columns}) {}",
                    SiteSelect::new(ctx, table, site).sql()
                )
            })
            .collect(),
        MergeKind::Dedup { key, order } => vec![format!(
            "INSERT INTO {target} ({columns})
             SELECT DISTINCT ON ({key}) u.*
             FROM ({union}) u
             ORDER BY {key}, {order}",
            union = union_all(ctx, table, sites),
        )],
        MergeKind::Intervals {
            keys,
            start,
            end,
            count,
        } => {
            let source = format!("({}) merged", union_all(ctx, table, sites));
            let mut union = IntervalUnion::new(source, keys, start, end)
                .lookback(EraLookback::Constant(Lookback::ZERO));
            if let Some(count) = count {
                union = union.count(&format!("coalesce({count}, 1)"));
            }
            vec![union.insert_sql(&EraTarget {
                table: target.clone(),
                keys: keys.to_vec(),
                start,
                end,
                count,
            })]
        }
    };
    if table.name == "care_site" {
        statements.push(format!(
            "UPDATE {target} cs SET location_id = l.location_id
             FROM (SELECT location_source_value, min(location_id) AS location_id
                   FROM {cdm}.location GROUP BY location_source_value) l
             WHERE cs.care_site_source_value = l.location_source_value",
            cdm = ctx.cdm(),
        ));
    }
    statements
}
