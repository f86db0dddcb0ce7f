//! Run configuration: defaults, environment overrides, JSON files, validation.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{GatherError, GatherResult};
use crate::models::TableSchema;
use crate::store::schema::validate_identifier;

pub const DEFAULT_TABLE_NAME: &str = "bioprocess_gene_metapath_scores";
pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_MAX_CONCURRENCY: usize = 8;
pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 250;

pub const DEFAULT_API_BASE: &str = "https://search-api.het.io/v1";
pub const DEFAULT_NEO4J_URI: &str = "https://neo4j.het.io";
pub const DEFAULT_NEO4J_TX_PATH: &str = "/db/neo4j/tx/commit";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

// ---------------------------------------------------------------------------
// Env helpers
// ---------------------------------------------------------------------------

fn env_string(key: &str) -> Option<String> {
    match std::env::var(key) {
        Ok(val) if !val.trim().is_empty() => Some(val.trim().to_string()),
        _ => None,
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> GatherResult<Option<T>> {
    match env_string(key) {
        Some(raw) => raw.parse::<T>().map(Some).map_err(|_| {
            GatherError::InvalidArgument(format!("{key} has an unparseable value '{raw}'"))
        }),
        None => Ok(None),
    }
}

// ---------------------------------------------------------------------------
// FailurePolicy
// ---------------------------------------------------------------------------

/// What the dispatcher does when a single triple fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Stop the batch on the first failed triple; nothing from it is appended.
    Abort,
    /// Omit the failed triple's rows, record the failure, keep going.
    #[default]
    #[serde(alias = "record-and-skip")]
    Skip,
}

impl FailurePolicy {
    pub fn parse(value: &str) -> GatherResult<Self> {
        match value.trim().to_lowercase().as_str() {
            "abort" => Ok(FailurePolicy::Abort),
            "skip" | "record-and-skip" => Ok(FailurePolicy::Skip),
            other => Err(GatherError::InvalidArgument(format!(
                "unknown failure policy '{other}' (expected 'abort' or 'skip')"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailurePolicy::Abort => "abort",
            FailurePolicy::Skip => "skip",
        }
    }
}

// ---------------------------------------------------------------------------
// PipelineConfig
// ---------------------------------------------------------------------------

/// Orchestration parameters passed to the pipeline entry point.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub table_name: String,
    pub chunk_size: usize,
    pub max_concurrency: usize,
    /// Optional projection applied to every fetched row, in this order.
    pub columns: Option<Vec<String>>,
    pub failure_policy: FailurePolicy,
    /// Stop after this many batches; `None` processes the whole cross product.
    pub max_batches: Option<usize>,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    /// Declared table schema. When absent the first non-empty batch sets the
    /// column order and path-statistics columns keep their fixed kinds.
    pub schema: Option<TableSchema>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            table_name: DEFAULT_TABLE_NAME.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            columns: None,
            failure_policy: FailurePolicy::default(),
            max_batches: None,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            schema: None,
        }
    }
}

impl PipelineConfig {
    /// Defaults overridden by `METAPATH_*` environment variables.
    pub fn from_env() -> GatherResult<Self> {
        let mut config = Self::default();
        if let Some(name) = env_string("METAPATH_TABLE_NAME") {
            config.table_name = name;
        }
        if let Some(size) = env_parse("METAPATH_CHUNK_SIZE")? {
            config.chunk_size = size;
        }
        if let Some(n) = env_parse("METAPATH_MAX_CONCURRENCY")? {
            config.max_concurrency = n;
        }
        if let Some(cols) = env_string("METAPATH_COLUMNS") {
            config.columns = Some(
                cols.split(',')
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty())
                    .collect(),
            );
        }
        if let Some(policy) = env_string("METAPATH_FAILURE_POLICY") {
            config.failure_policy = FailurePolicy::parse(&policy)?;
        }
        if let Some(n) = env_parse("METAPATH_MAX_BATCHES")? {
            config.max_batches = Some(n);
        }
        if let Some(n) = env_parse("METAPATH_MAX_RETRIES")? {
            config.max_retries = n;
        }
        if let Some(ms) = env_parse("METAPATH_RETRY_BACKOFF_MS")? {
            config.retry_backoff_ms = ms;
        }
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> GatherResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> GatherResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Reject malformed configuration before any work starts.
    pub fn validate(&self) -> GatherResult<()> {
        validate_identifier(&self.table_name)?;
        if self.chunk_size == 0 {
            return Err(GatherError::InvalidArgument(
                "chunk_size must be at least 1".to_string(),
            ));
        }
        if self.max_concurrency == 0 {
            return Err(GatherError::InvalidArgument(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.max_batches == Some(0) {
            return Err(GatherError::InvalidArgument(
                "max_batches must be at least 1 when set".to_string(),
            ));
        }
        if let Some(columns) = &self.columns {
            if columns.is_empty() {
                return Err(GatherError::InvalidArgument(
                    "column projection must name at least one column".to_string(),
                ));
            }
            let mut seen = std::collections::HashSet::new();
            for column in columns {
                validate_identifier(column)?;
                if !seen.insert(column.as_str()) {
                    return Err(GatherError::InvalidArgument(format!(
                        "column '{column}' appears twice in the projection"
                    )));
                }
            }
        }
        if let Some(schema) = &self.schema {
            let checked = TableSchema::new(schema.columns().to_vec())?;
            for column in checked.columns() {
                validate_identifier(&column.name)?;
            }
            if let Some(columns) = &self.columns {
                let names = checked.names();
                if names.len() != columns.len() || columns.iter().any(|c| !names.contains(&c.as_str())) {
                    return Err(GatherError::InvalidArgument(
                        "declared schema and column projection name different columns"
                            .to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

// ---------------------------------------------------------------------------
// HetionetConfig
// ---------------------------------------------------------------------------

/// Endpoints and credentials for the het.io services.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HetionetConfig {
    pub api_base: String,
    pub neo4j_uri: String,
    pub neo4j_tx_path: String,
    pub neo4j_user: String,
    pub neo4j_password: String,
    pub timeout_secs: u64,
}

impl Default for HetionetConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            neo4j_uri: DEFAULT_NEO4J_URI.to_string(),
            neo4j_tx_path: DEFAULT_NEO4J_TX_PATH.to_string(),
            neo4j_user: "neo4j".to_string(),
            neo4j_password: "neo4j".to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl HetionetConfig {
    /// Defaults overridden by `HETIONET_*` environment variables.
    pub fn from_env() -> GatherResult<Self> {
        let mut config = Self::default();
        if let Some(v) = env_string("HETIONET_API_BASE") {
            config.api_base = v;
        }
        if let Some(v) = env_string("HETIONET_NEO4J_URI") {
            config.neo4j_uri = v;
        }
        if let Some(v) = env_string("HETIONET_NEO4J_TX_PATH") {
            config.neo4j_tx_path = v;
        }
        if let Some(v) = env_string("HETIONET_NEO4J_USER") {
            config.neo4j_user = v;
        }
        if let Some(v) = env_string("HETIONET_NEO4J_PASSWORD") {
            config.neo4j_password = v;
        }
        if let Some(secs) = env_parse("HETIONET_TIMEOUT_SECS")? {
            config.timeout_secs = secs;
        }
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> GatherResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn validate(&self) -> GatherResult<()> {
        if self.timeout_secs == 0 {
            return Err(GatherError::InvalidArgument(
                "timeout_secs must be positive; a hung service would stall the run".to_string(),
            ));
        }
        for (name, value) in [("api_base", &self.api_base), ("neo4j_uri", &self.neo4j_uri)] {
            if !(value.starts_with("http://") || value.starts_with("https://")) {
                return Err(GatherError::InvalidArgument(format!(
                    "{name} must be an http(s) URL, got '{value}'"
                )));
            }
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Full URL of the Cypher transactional commit endpoint.
    pub fn neo4j_tx_url(&self) -> String {
        format!(
            "{}/{}",
            self.neo4j_uri.trim_end_matches('/'),
            self.neo4j_tx_path.trim_start_matches('/')
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        PipelineConfig::default().validate().unwrap();
        HetionetConfig::default().validate().unwrap();
    }

    #[test]
    fn zero_chunk_size_is_invalid() {
        let config = PipelineConfig {
            chunk_size: 0,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(GatherError::InvalidArgument(_))
        ));
    }

    #[test]
    fn zero_concurrency_and_zero_batch_cap_are_invalid() {
        let config = PipelineConfig {
            max_concurrency: 0,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
        let config = PipelineConfig {
            max_batches: Some(0),
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn projection_must_be_unique_identifiers() {
        let config = PipelineConfig {
            columns: Some(vec!["DWPC".into(), "DWPC".into()]),
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
        let config = PipelineConfig {
            columns: Some(vec!["DWPC; DROP TABLE x".into()]),
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
        let config = PipelineConfig {
            columns: Some(vec![]),
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn json_config_fills_missing_fields_with_defaults() {
        let config = PipelineConfig::from_json_str(
            r#"{"chunk_size": 5000000, "failure_policy": "abort", "columns": ["DWPC", "source_id"]}"#,
        )
        .unwrap();
        assert_eq!(config.chunk_size, 5_000_000);
        assert_eq!(config.failure_policy, FailurePolicy::Abort);
        assert_eq!(config.max_concurrency, DEFAULT_MAX_CONCURRENCY);
        assert_eq!(config.table_name, DEFAULT_TABLE_NAME);
        config.validate().unwrap();
    }

    #[test]
    fn failure_policy_parses_aliases() {
        assert_eq!(FailurePolicy::parse("ABORT").unwrap(), FailurePolicy::Abort);
        assert_eq!(
            FailurePolicy::parse("record-and-skip").unwrap(),
            FailurePolicy::Skip
        );
        assert!(FailurePolicy::parse("retry").is_err());
    }

    #[test]
    fn hetionet_timeout_must_be_positive() {
        let config = HetionetConfig {
            timeout_secs: 0,
            ..HetionetConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn tx_url_joins_without_double_slash() {
        let config = HetionetConfig {
            neo4j_uri: "https://neo4j.het.io/".into(),
            ..HetionetConfig::default()
        };
        assert_eq!(config.neo4j_tx_url(), "https://neo4j.het.io/db/neo4j/tx/commit");
    }
}
