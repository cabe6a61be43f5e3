use std::path::PathBuf;

use omop_model::EtlError;

#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("failed to read lookup file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse CSV {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("invalid lookup file {path}: {source}")]
    Invalid {
        path: PathBuf,
        #[source]
        source: EtlError,
    },

    #[error(transparent)]
    Etl(#[from] EtlError),
}

impl LookupError {
    pub(crate) fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        Self::Csv {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn invalid(path: impl Into<PathBuf>, source: EtlError) -> Self {
        Self::Invalid {
            path: path.into(),
            source,
        }
    }

    /// The underlying taxonomy error, if this is a validation failure.
    pub fn etl_error(&self) -> Option<&EtlError> {
        match self {
            LookupError::Invalid { source, .. } | LookupError::Etl(source) => Some(source),
            _ => None,
        }
    }
}
