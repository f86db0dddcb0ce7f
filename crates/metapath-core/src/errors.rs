//! Error types for the metapath gathering core.

#[cfg(feature = "python")]
use pyo3::exceptions::{PyConnectionError, PyLookupError, PyRuntimeError, PyValueError};
#[cfg(feature = "python")]
use pyo3::PyErr;

/// Top-level error enum for the metapath gathering core.
///
/// `NotFound` and `TransientFetch` are scoped to a single triple and are
/// subject to the configured failure policy. Everything else aborts the
/// current batch or the whole run.
#[derive(Debug, thiserror::Error)]
pub enum GatherError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Transient fetch error: {0}")]
    TransientFetch(String),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Fatal error: {0}")]
    Fatal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl GatherError {
    /// Errors that belong to one triple rather than to the batch or run.
    pub fn is_per_triple(&self) -> bool {
        matches!(self, GatherError::NotFound(_) | GatherError::TransientFetch(_))
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, GatherError::TransientFetch(_))
    }

    /// Short category label stored alongside recorded failures.
    pub fn category(&self) -> &'static str {
        match self {
            GatherError::InvalidArgument(_) => "invalid_argument",
            GatherError::NotFound(_) => "not_found",
            GatherError::TransientFetch(_) => "transient_fetch",
            GatherError::SchemaMismatch(_) => "schema_mismatch",
            GatherError::Fatal(_) => "fatal",
            GatherError::Io(_) => "io",
            GatherError::Sqlite(_) => "sqlite",
            GatherError::Json(_) => "json",
            GatherError::Csv(_) => "csv",
        }
    }
}

impl From<reqwest::Error> for GatherError {
    fn from(err: reqwest::Error) -> Self {
        GatherError::TransientFetch(err.to_string())
    }
}

#[cfg(feature = "python")]
impl From<GatherError> for PyErr {
    fn from(err: GatherError) -> PyErr {
        match &err {
            GatherError::InvalidArgument(_) | GatherError::SchemaMismatch(_) => {
                PyValueError::new_err(err.to_string())
            }
            GatherError::NotFound(_) => PyLookupError::new_err(err.to_string()),
            GatherError::TransientFetch(_) => PyConnectionError::new_err(err.to_string()),
            GatherError::Io(_) => pyo3::exceptions::PyIOError::new_err(err.to_string()),
            GatherError::Json(_) | GatherError::Csv(_) => PyValueError::new_err(err.to_string()),
            GatherError::Fatal(_) | GatherError::Sqlite(_) => {
                PyRuntimeError::new_err(err.to_string())
            }
        }
    }
}

pub type GatherResult<T> = Result<T, GatherError>;
