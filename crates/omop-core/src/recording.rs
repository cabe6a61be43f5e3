//! In-memory session that records statements instead of running them.
//!
//! Used by tests and by the CLI's dry-run mode. Query results, affected
//! row counts and failures are scripted by substring match against the
//! cleaned statement.

use std::collections::BTreeSet;

use crate::session::{Row, Session, SessionError};
use crate::sql::{clean_sql, quote_literal};

#[derive(Debug, Default)]
pub struct RecordingSession {
    statements: Vec<String>,
    responses: Vec<(String, Vec<Row>)>,
    affected: Vec<(String, u64)>,
    failures: Vec<(String, String)>,
    missing_tables: BTreeSet<String>,
}

impl RecordingSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queries containing `pattern` return `rows`. The first registered match wins.
    pub fn with_rows(mut self, pattern: &str, rows: Vec<Row>) -> Self {
        self.responses.push((pattern.to_string(), rows));
        self
    }

    /// Statements containing `pattern` report `count` affected rows.
    pub fn with_affected(mut self, pattern: &str, count: u64) -> Self {
        self.affected.push((pattern.to_string(), count));
        self
    }

    /// Statements containing `pattern` fail with `message`.
    pub fn fail_on(mut self, pattern: &str, message: &str) -> Self {
        self.failures
            .push((pattern.to_string(), message.to_string()));
        self
    }

    /// `schema.table` reports as absent from [`Session::table_exists`].
    pub fn with_missing_table(mut self, qualified: &str) -> Self {
        self.missing_tables.insert(qualified.to_string());
        self
    }

    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    /// Statements containing `pattern`, in execution order.
    pub fn matching(&self, pattern: &str) -> Vec<&str> {
        self.statements
            .iter()
            .filter(|sql| sql.contains(pattern))
            .map(String::as_str)
            .collect()
    }

    pub fn executed(&self, pattern: &str) -> bool {
        self.statements.iter().any(|sql| sql.contains(pattern))
    }

    /// Position of the first statement containing `pattern`.
    pub fn position(&self, pattern: &str) -> Option<usize> {
        self.statements.iter().position(|sql| sql.contains(pattern))
    }

    /// All statements as one script.
    pub fn script(&self) -> String {
        let mut script = self.statements.join(";\n");
        if !script.is_empty() {
            script.push_str(";\n");
        }
        script
    }

    pub fn clear(&mut self) {
        self.statements.clear();
    }

    fn record(&mut self, sql: &str) -> Result<String, SessionError> {
        let sql = clean_sql(sql);
        self.statements.push(sql.clone());
        if let Some((_, message)) = self
            .failures
            .iter()
            .find(|(pattern, _)| sql.contains(pattern.as_str()))
        {
            return Err(SessionError::Rejected {
                sql,
                message: message.clone(),
            });
        }
        Ok(sql)
    }
}

impl Session for RecordingSession {
    fn execute(&mut self, sql: &str) -> Result<u64, SessionError> {
        let sql = self.record(sql)?;
        Ok(self
            .affected
            .iter()
            .find(|(pattern, _)| sql.contains(pattern.as_str()))
            .map_or(0, |(_, count)| *count))
    }

    fn query(&mut self, sql: &str) -> Result<Vec<Row>, SessionError> {
        let sql = self.record(sql)?;
        Ok(self
            .responses
            .iter()
            .find(|(pattern, _)| sql.contains(pattern.as_str()))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default())
    }

    fn table_exists(&mut self, schema: &str, table: &str) -> Result<bool, SessionError> {
        let qualified = format!("{schema}.{table}");
        self.record(&format!(
            "SELECT to_regclass({}) IS NOT NULL AS present",
            quote_literal(&qualified)
        ))?;
        Ok(!self.missing_tables.contains(&qualified))
    }
}
