use std::fmt;

use thiserror::Error;

/// Kind of input the pipeline expected but could not find.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    LookupFile,
    SourceTable,
    SiteTable,
}

impl fmt::Display for InputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InputKind::LookupFile => "lookup file",
            InputKind::SourceTable => "source table",
            InputKind::SiteTable => "site table",
        })
    }
}

/// A step that failed during a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepFailure {
    pub key: String,
    pub message: String,
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.key, self.message)
    }
}

#[derive(Debug, Error)]
pub enum EtlError {
    #[error("setup failed: {0}")]
    FatalSetup(String),

    #[error("missing required {kind}: {name}")]
    MissingRequiredInput { kind: InputKind, name: String },

    #[error("ambiguous mapping for {datasource}.{role}: candidates {}", .candidates.join(", "))]
    AmbiguousMapping {
        datasource: String,
        role: String,
        candidates: Vec<String>,
    },

    #[error("invalid era lookback interval: {0:?}")]
    InvalidEraLookbackInterval(String),

    #[error("unknown OMOP domain: {0:?}")]
    UnknownDomain(String),

    #[error("unknown timezone(s): {}", .0.join(", "))]
    UnknownTimezone(Vec<String>),

    #[error("invalid mapping row at line {line}: {message}")]
    InvalidMappingRow { line: usize, message: String },

    #[error("invalid value for {name}: {value:?}")]
    InvalidSetting { name: String, value: String },

    #[error("pipeline failed in {} step(s): {}", .failures.len(), join_failures(.failures))]
    FatalPipeline { failures: Vec<StepFailure> },
}

fn join_failures(failures: &[StepFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl EtlError {
    pub fn missing_source_table(name: impl Into<String>) -> Self {
        Self::MissingRequiredInput {
            kind: InputKind::SourceTable,
            name: name.into(),
        }
    }

    pub fn invalid_setting(name: &str, value: &str) -> Self {
        Self::InvalidSetting {
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;
