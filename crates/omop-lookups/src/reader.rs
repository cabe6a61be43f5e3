//! Delimited file reading for lookup dictionaries.

use std::collections::BTreeMap;
use std::path::Path;

use csv::{ReaderBuilder, Trim};

use crate::error::LookupError;

/// One data row keyed by lowercase header, with its 1-based file line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvRow {
    pub line: usize,
    pub fields: BTreeMap<String, String>,
}

impl CsvRow {
    /// Trimmed value; empty or missing fields are `None`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    pub fn get_lower(&self, key: &str) -> Option<String> {
        self.get(key).map(str::to_lowercase)
    }
}

/// Reads a delimited file with a header row.
///
/// Handles a leading BOM, trims whitespace and lowercases header names.
pub fn read_rows(path: &Path, delimiter: u8) -> Result<Vec<CsvRow>, LookupError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .delimiter(delimiter)
        .trim(Trim::All)
        .flexible(true)
        .from_path(path)
        .map_err(|source| LookupError::csv(path, source))?;

    let headers: Vec<String> = reader
        .headers()
        .map_err(|source| LookupError::csv(path, source))?
        .iter()
        .map(|header| header.trim_matches('\u{feff}').trim().to_lowercase())
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|source| LookupError::csv(path, source))?;
        if record.iter().all(str::is_empty) {
            continue;
        }
        let line = record
            .position()
            .map_or(0, |position| position.line() as usize);
        let fields = headers
            .iter()
            .zip(record.iter())
            .map(|(header, value)| (header.clone(), value.to_string()))
            .collect();
        rows.push(CsvRow { line, fields });
    }
    Ok(rows)
}
