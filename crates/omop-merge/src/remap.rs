//! Per-site SELECTs whose surrogate references point into the merged CDM.
//!
//! `person_id` is remapped through `person_source_value`. Every other
//! foreign key is remapped through the natural key of the table it
//! references, taking the lowest merged id per natural key.

use omop_model::TableDef;
use omop_transform::TransformContext;

/// Site-local ids the merge cannot remap; they are written as NULL.
pub const UNMAPPED_REFERENCES: [&str; 3] = ["provider_id", "visit_detail_id", "preceding_visit_occurrence_id"];

/// How one insert column is filled from a site row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Remap {
    Copy,
    Person,
    Natural {
        table: String,
        id: String,
        key: String,
    },
    Null,
}

/// The rows of `site.table`, shaped like the merged table's insert columns.
#[derive(Debug, Clone, Copy)]
pub struct SiteSelect<'a> {
    ctx: &'a TransformContext,
    table: &'a TableDef,
    site: &'a str,
}

impl<'a> SiteSelect<'a> {
    pub fn new(ctx: &'a TransformContext, table: &'a TableDef, site: &'a str) -> Self {
        Self { ctx, table, site }
    }

    pub fn remap(&self, column: &str) -> Remap {
        if UNMAPPED_REFERENCES.contains(&column) {
            return Remap::Null;
        }
        let Some(fk) = self.table.foreign_key(column) else {
            return Remap::Copy;
        };
        if fk.table == "person" {
            return Remap::Person;
        }
        match self
            .ctx
            .catalog
            .cdm(&fk.table)
            .and_then(|target| target.natural_key.clone())
        {
            Some(key) => Remap::Natural {
                table: fk.table.clone(),
                id: fk.references.clone(),
                key,
            },
            None => Remap::Null,
        }
    }

    /// `SELECT <expr> AS <column>, ... FROM <site>.<table> t <joins>`.
    pub fn sql(&self) -> String {
        let cdm = self.ctx.cdm();
        let site = self.site;
        let mut values = Vec::new();
        let mut joins = Vec::new();
        for column in self.table.insert_columns() {
            let value = match self.remap(column) {
                Remap::Copy => format!("t.{column}"),
                Remap::Null => "NULL".to_string(),
                Remap::Person => {
                    joins.push(format!(
                        "JOIN {site}.person sp ON sp.person_id = t.{column} \
                         JOIN {cdm}.person mp ON mp.person_source_value = sp.person_source_value"
                    ));
                    "mp.person_id".to_string()
                }
                Remap::Natural { table, id, key } => {
                    let (local, merged) = (format!("s_{column}"), format!("m_{column}"));
                    joins.push(format!(
                        "LEFT JOIN {site}.{table} {local} ON {local}.{id} = t.{column} \
                         LEFT JOIN (SELECT {key}, min({id}) AS {id} FROM {cdm}.{table} GROUP BY {key}) {merged} \
                         ON {merged}.{key} = {local}.{key}"
                    ));
                    format!("{merged}.{id}")
                }
            };
            values.push(format!("{value} AS {column}"));
        }
        let mut sql = format!("SELECT {} FROM {site}.{} t", values.join(", "), self.table.name);
        for join in joins {
            sql.push(' ');
            sql.push_str(&join);
        }
        sql
    }
}
