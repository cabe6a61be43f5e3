//! Declarative table catalog.
//!
//! Tables are described once with [`TableBuilder`] and frozen into
//! [`TableDef`] values. A [`Catalog`] is built at startup and passed
//! explicitly to every component that needs table metadata.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Logical schema a table belongs to. Physical names come from [`SchemaNames`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SchemaRole {
    Cdm,
    Lookups,
    Source,
    Vocab,
    Results,
}

/// Physical schema names of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaNames {
    pub cdm: String,
    pub lookups: String,
    pub source: String,
    pub vocab: String,
    pub results: String,
}

impl Default for SchemaNames {
    fn default() -> Self {
        Self {
            cdm: "omopcdm".to_string(),
            lookups: "lookups".to_string(),
            source: "source".to_string(),
            vocab: "vocab".to_string(),
            results: "results".to_string(),
        }
    }
}

impl SchemaNames {
    pub fn resolve(&self, role: SchemaRole) -> &str {
        match role {
            SchemaRole::Cdm => &self.cdm,
            SchemaRole::Lookups => &self.lookups,
            SchemaRole::Source => &self.source,
            SchemaRole::Vocab => &self.vocab,
            SchemaRole::Results => &self.results,
        }
    }

    /// Schemas the ETL creates (source and vocabulary are preloaded).
    pub fn owned(&self) -> [&str; 3] {
        [&self.cdm, &self.lookups, &self.results]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SqlType {
    Integer,
    BigInt,
    Numeric,
    Text,
    Varchar(u16),
    Date,
    Timestamp,
    Interval,
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlType::Integer => f.write_str("integer"),
            SqlType::BigInt => f.write_str("bigint"),
            SqlType::Numeric => f.write_str("numeric"),
            SqlType::Text => f.write_str("text"),
            SqlType::Varchar(len) => write!(f, "varchar({len})"),
            SqlType::Date => f.write_str("date"),
            SqlType::Timestamp => f.write_str("timestamp"),
            SqlType::Interval => f.write_str("interval"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub sql_type: SqlType,
    pub nullable: bool,
    /// Surrogate key filled by the database (`GENERATED BY DEFAULT AS IDENTITY`).
    pub identity: bool,
}

impl ColumnDef {
    fn ddl(&self) -> String {
        let mut ddl = format!("{} {}", self.name, self.sql_type);
        if self.identity {
            ddl.push_str(" GENERATED BY DEFAULT AS IDENTITY");
        }
        if !self.nullable {
            ddl.push_str(" NOT NULL");
        }
        ddl
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub column: String,
    pub table: String,
    pub references: String,
}

/// Immutable description of one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDef {
    pub role: SchemaRole,
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub primary_key: Option<String>,
    pub foreign_keys: Vec<ForeignKey>,
    /// Column that identifies a row across sites (used to remap surrogate keys).
    pub natural_key: Option<String>,
    /// Step ordinal that populates the table; -1 means "always".
    pub step_ordinal: i32,
}

impl TableDef {
    pub fn qualified(&self, schemas: &SchemaNames) -> String {
        self.qualified_in(schemas.resolve(self.role))
    }

    pub fn qualified_in(&self, schema: &str) -> String {
        format!("{schema}.{}", self.name)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|column| column.name.as_str())
    }

    /// Columns an INSERT supplies: everything except identity surrogates.
    pub fn insert_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|column| !column.identity)
            .map(|column| column.name.as_str())
            .collect()
    }

    /// `expr` cut to the declared width of a `varchar` column; other
    /// columns and NULL pass through unchanged.
    pub fn fit_expr(&self, column: &str, expr: &str) -> String {
        match self.column(column).map(|c| c.sql_type) {
            Some(SqlType::Varchar(len)) if expr != "NULL" => format!("left(({expr})::text, {len})"),
            _ => expr.to_string(),
        }
    }

    pub fn foreign_key(&self, column: &str) -> Option<&ForeignKey> {
        self.foreign_keys.iter().find(|fk| fk.column == column)
    }

    pub fn references_person(&self) -> bool {
        self.foreign_key("person_id")
            .is_some_and(|fk| fk.table == "person")
    }

    pub fn drop_sql(&self, schemas: &SchemaNames) -> String {
        format!("DROP TABLE IF EXISTS {} CASCADE", self.qualified(schemas))
    }

    pub fn create_sql(&self, schemas: &SchemaNames) -> String {
        self.create_sql_in(schemas.resolve(self.role))
    }

    /// `CREATE TABLE IF NOT EXISTS`, for tables that accumulate across runs.
    pub fn create_if_missing_sql(&self, schemas: &SchemaNames) -> String {
        self.create_sql(schemas)
            .replacen("CREATE TABLE", "CREATE TABLE IF NOT EXISTS", 1)
    }

    pub fn create_sql_in(&self, schema: &str) -> String {
        let mut parts: Vec<String> = self.columns.iter().map(ColumnDef::ddl).collect();
        if let Some(pk) = &self.primary_key {
            parts.push(format!("PRIMARY KEY ({pk})"));
        }
        format!(
            "CREATE TABLE {} ({})",
            self.qualified_in(schema),
            parts.join(", ")
        )
    }
}

/// Builder for [`TableDef`]. Columns keep insertion order.
#[derive(Debug, Clone)]
pub struct TableBuilder {
    table: TableDef,
}

impl TableBuilder {
    pub fn new(role: SchemaRole, name: &str) -> Self {
        Self {
            table: TableDef {
                role,
                name: name.to_string(),
                columns: Vec::new(),
                primary_key: None,
                foreign_keys: Vec::new(),
                natural_key: None,
                step_ordinal: -1,
            },
        }
    }

    pub fn ordinal(mut self, ordinal: i32) -> Self {
        self.table.step_ordinal = ordinal;
        self
    }

    fn push(mut self, name: &str, sql_type: SqlType, nullable: bool, identity: bool) -> Self {
        self.table.columns.push(ColumnDef {
            name: name.to_string(),
            sql_type,
            nullable,
            identity,
        });
        self
    }

    /// Identity surrogate primary key.
    pub fn id(mut self, name: &str) -> Self {
        self.table.primary_key = Some(name.to_string());
        self.push(name, SqlType::BigInt, false, true)
    }

    /// Non-identity primary key supplied by the ETL.
    pub fn key(mut self, name: &str, sql_type: SqlType) -> Self {
        self.table.primary_key = Some(name.to_string());
        self.push(name, sql_type, false, false)
    }

    pub fn required(self, name: &str, sql_type: SqlType) -> Self {
        self.push(name, sql_type, false, false)
    }

    pub fn optional(self, name: &str, sql_type: SqlType) -> Self {
        self.push(name, sql_type, true, false)
    }

    /// Declares `column` as a reference to `table.references`.
    pub fn references(mut self, column: &str, table: &str, references: &str) -> Self {
        self.table.foreign_keys.push(ForeignKey {
            column: column.to_string(),
            table: table.to_string(),
            references: references.to_string(),
        });
        self
    }

    pub fn natural_key(mut self, column: &str) -> Self {
        self.table.natural_key = Some(column.to_string());
        self
    }

    pub fn build(self) -> TableDef {
        self.table
    }
}

/// The set of tables known to one run.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    tables: BTreeMap<(SchemaRole, String), TableDef>,
    order: Vec<(SchemaRole, String)>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tables(mut self, tables: impl IntoIterator<Item = TableDef>) -> Self {
        for table in tables {
            self.insert(table);
        }
        self
    }

    pub fn insert(&mut self, table: TableDef) {
        let key = (table.role, table.name.clone());
        if !self.tables.contains_key(&key) {
            self.order.push(key.clone());
        }
        self.tables.insert(key, table);
    }

    pub fn get(&self, role: SchemaRole, name: &str) -> Option<&TableDef> {
        self.tables.get(&(role, name.to_string()))
    }

    /// CDM table by name (including `stem`).
    pub fn cdm(&self, name: &str) -> Option<&TableDef> {
        self.get(SchemaRole::Cdm, name)
    }

    /// Tables of `role` in declaration order.
    pub fn tables(&self, role: SchemaRole) -> impl Iterator<Item = &TableDef> {
        self.order
            .iter()
            .filter(move |(r, _)| *r == role)
            .filter_map(|key| self.tables.get(key))
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_freezes_columns_in_order() {
        let table = TableBuilder::new(SchemaRole::Cdm, "thing")
            .ordinal(4)
            .id("thing_id")
            .required("person_id", SqlType::BigInt)
            .optional("note", SqlType::Varchar(20))
            .references("person_id", "person", "person_id")
            .build();
        assert_eq!(table.primary_key.as_deref(), Some("thing_id"));
        assert_eq!(table.insert_columns(), vec!["person_id", "note"]);
        assert!(table.references_person());
        assert_eq!(
            table.create_sql_in("x"),
            "CREATE TABLE x.thing (thing_id bigint GENERATED BY DEFAULT AS IDENTITY NOT NULL, \
             person_id bigint NOT NULL, note varchar(20), PRIMARY KEY (thing_id))"
        );
    }

    #[test]
    fn varchar_expressions_are_cut_to_width() {
        let table = TableBuilder::new(SchemaRole::Cdm, "thing")
            .optional("note", SqlType::Varchar(60))
            .optional("amount", SqlType::Numeric)
            .build();
        assert_eq!(table.fit_expr("note", "t.value::text"), "left((t.value::text)::text, 60)");
        assert_eq!(table.fit_expr("note", "NULL"), "NULL");
        assert_eq!(table.fit_expr("amount", "t.value"), "t.value");
        assert_eq!(table.fit_expr("missing", "t.value"), "t.value");
    }

    #[test]
    fn catalog_keeps_declaration_order() {
        let catalog = Catalog::new().with_tables([
            TableBuilder::new(SchemaRole::Cdm, "b").build(),
            TableBuilder::new(SchemaRole::Cdm, "a").build(),
            TableBuilder::new(SchemaRole::Lookups, "c").build(),
        ]);
        let names: Vec<_> = catalog
            .tables(SchemaRole::Cdm)
            .map(|t| t.name.as_str())
            .collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(catalog.len(), 3);
    }
}
