//! Database session contract.
//!
//! Steps only see `&mut dyn Session`. Values come back as text so the
//! pipeline never depends on driver types; large tables stay in the
//! database and only small result sets (counts, dictionaries, column
//! checks) are read back.

use thiserror::Error;

use crate::sql::quote_literal;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to connect to {target}: {source}")]
    Connect {
        target: String,
        #[source]
        source: postgres::Error,
    },

    #[error("statement failed: {source}\n  sql: {sql}")]
    Database {
        sql: String,
        #[source]
        source: postgres::Error,
    },

    #[error("statement rejected: {message}\n  sql: {sql}")]
    Rejected { sql: String, message: String },
}

impl SessionError {
    /// The failing statement, when the error came from one.
    pub fn sql(&self) -> Option<&str> {
        match self {
            SessionError::Connect { .. } => None,
            SessionError::Database { sql, .. } | SessionError::Rejected { sql, .. } => Some(sql),
        }
    }
}

/// One result row with text values keyed by column name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Option<String>>,
}

impl Row {
    pub fn new(columns: Vec<String>, values: Vec<Option<String>>) -> Self {
        Self { columns, values }
    }

    /// Convenience constructor for scripted results.
    pub fn from_pairs(pairs: &[(&str, Option<&str>)]) -> Self {
        Self {
            columns: pairs.iter().map(|(name, _)| (*name).to_string()).collect(),
            values: pairs
                .iter()
                .map(|(_, value)| value.map(str::to_string))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.columns
            .iter()
            .position(|column| column == name)
            .and_then(|idx| self.get_index(idx))
    }

    pub fn get_index(&self, idx: usize) -> Option<&str> {
        self.values.get(idx).and_then(|value| value.as_deref())
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(|value| value.trim().parse().ok())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A single connection with explicit transaction control.
pub trait Session {
    /// Runs a statement and returns the number of affected rows.
    fn execute(&mut self, sql: &str) -> Result<u64, SessionError>;

    /// Runs a query and returns its rows.
    fn query(&mut self, sql: &str) -> Result<Vec<Row>, SessionError>;

    fn begin(&mut self) -> Result<(), SessionError> {
        self.execute("BEGIN").map(|_| ())
    }

    fn commit(&mut self) -> Result<(), SessionError> {
        self.execute("COMMIT").map(|_| ())
    }

    fn rollback(&mut self) -> Result<(), SessionError> {
        self.execute("ROLLBACK").map(|_| ())
    }

    fn savepoint(&mut self, name: &str) -> Result<(), SessionError> {
        self.execute(&format!("SAVEPOINT {name}")).map(|_| ())
    }

    fn release_savepoint(&mut self, name: &str) -> Result<(), SessionError> {
        self.execute(&format!("RELEASE SAVEPOINT {name}")).map(|_| ())
    }

    fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), SessionError> {
        self.execute(&format!("ROLLBACK TO SAVEPOINT {name}"))
            .map(|_| ())
    }

    /// First column of the first row, if any.
    fn query_scalar(&mut self, sql: &str) -> Result<Option<String>, SessionError> {
        Ok(self
            .query(sql)?
            .first()
            .and_then(|row| row.get_index(0))
            .map(str::to_string))
    }

    fn table_exists(&mut self, schema: &str, table: &str) -> Result<bool, SessionError> {
        let sql = format!(
            "SELECT to_regclass({}) IS NOT NULL AS present",
            quote_literal(&format!("{schema}.{table}"))
        );
        Ok(matches!(
            self.query_scalar(&sql)?.as_deref(),
            Some("t" | "true")
        ))
    }

    /// Column names of `schema.table`, lowercase, in table order.
    fn table_columns(&mut self, schema: &str, table: &str) -> Result<Vec<String>, SessionError> {
        let sql = format!(
            "SELECT column_name FROM information_schema.columns \
             WHERE table_schema = {} AND table_name = {} ORDER BY ordinal_position",
            quote_literal(schema),
            quote_literal(table)
        );
        Ok(self
            .query(&sql)?
            .iter()
            .filter_map(|row| row.get("column_name"))
            .map(str::to_ascii_lowercase)
            .collect())
    }
}

/// Runs `f` inside BEGIN/COMMIT. Any error rolls the transaction back.
pub fn with_transaction<T, E, F>(session: &mut dyn Session, f: F) -> Result<T, E>
where
    F: FnOnce(&mut dyn Session) -> Result<T, E>,
    E: From<SessionError>,
{
    session.begin()?;
    match f(&mut *session) {
        Ok(value) => {
            session.commit()?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback) = session.rollback() {
                tracing::warn!(error = %rollback, "rollback failed");
            }
            Err(err)
        }
    }
}
