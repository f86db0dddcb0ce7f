//! HTTP clients for the het.io services.
//!
//! Identifier resolution goes through Neo4j's transactional Cypher endpoint;
//! path statistics come from the search API's `/paths` route. Both use a
//! blocking `reqwest` client that is shared by every worker thread.

use reqwest::blocking::Client;
use reqwest::Url;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::HetionetConfig;
use crate::errors::{GatherError, GatherResult};
use crate::models::{CellValue, ResultRow};
use crate::source::{IdentifierResolver, PathQueryClient};

/// Cypher lookup from an external identifier to the internal node id.
///
/// Ordered by node id so duplicate identifiers resolve deterministically.
pub const IDENTIFIER_LOOKUP_CYPHER: &str = "MATCH (node) \
     WHERE node.identifier = $identifier \
     RETURN id(node) AS neo4j_id, node.identifier AS identifier \
     ORDER BY neo4j_id";

fn build_client(config: &HetionetConfig) -> GatherResult<Client> {
    config.validate()?;
    Client::builder()
        .timeout(config.timeout())
        .connect_timeout(config.timeout())
        .build()
        .map_err(|e| GatherError::Fatal(format!("failed to build http client: {e}")))
}

fn check_status(
    resp: reqwest::blocking::Response,
    what: &str,
) -> GatherResult<reqwest::blocking::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let text = resp.text().unwrap_or_default();
    Err(GatherError::TransientFetch(format!(
        "{what} http error {status}: {}",
        text.chars().take(200).collect::<String>()
    )))
}

// ---------------------------------------------------------------------------
// Identifier resolution
// ---------------------------------------------------------------------------

/// Hetionet stores Entrez gene identifiers as integers and everything else
/// as strings; the Cypher equality only matches the right JSON type.
pub fn identifier_param(identifier: &str) -> Value {
    let plain_integer = !identifier.is_empty()
        && identifier.bytes().all(|b| b.is_ascii_digit())
        && (identifier == "0" || !identifier.starts_with('0'));
    match identifier.parse::<i64>() {
        Ok(n) if plain_integer => json!(n),
        _ => json!(identifier),
    }
}

pub fn lookup_request_body(identifier: &str) -> Value {
    json!({
        "statements": [{
            "statement": IDENTIFIER_LOOKUP_CYPHER,
            "parameters": { "identifier": identifier_param(identifier) },
        }]
    })
}

/// Extract the first `neo4j_id` from a transactional endpoint response.
pub fn parse_lookup_response(body: &Value) -> GatherResult<Option<i64>> {
    if let Some(errors) = body.get("errors").and_then(Value::as_array) {
        if let Some(first) = errors.first() {
            let message = first
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown cypher error");
            return Err(GatherError::TransientFetch(format!(
                "identifier lookup failed: {message}"
            )));
        }
    }
    let result = body
        .get("results")
        .and_then(Value::as_array)
        .and_then(|r| r.first())
        .ok_or_else(|| {
            GatherError::TransientFetch("identifier lookup returned no result set".to_string())
        })?;
    let column = result
        .get("columns")
        .and_then(Value::as_array)
        .and_then(|cols| cols.iter().position(|c| c.as_str() == Some("neo4j_id")))
        .unwrap_or(0);
    let first_row = result
        .get("data")
        .and_then(Value::as_array)
        .and_then(|d| d.first())
        .and_then(|d| d.get("row"))
        .and_then(Value::as_array);
    match first_row {
        None => Ok(None),
        Some(row) => row
            .get(column)
            .and_then(Value::as_i64)
            .map(Some)
            .ok_or_else(|| {
                GatherError::TransientFetch("identifier lookup row has no integer id".to_string())
            }),
    }
}

/// Resolves identifiers against the Hetionet Neo4j instance over HTTP.
pub struct HetionetResolver {
    client: Client,
    tx_url: String,
    user: String,
    password: String,
}

impl HetionetResolver {
    pub fn new(config: &HetionetConfig) -> GatherResult<Self> {
        Ok(Self {
            client: build_client(config)?,
            tx_url: config.neo4j_tx_url(),
            user: config.neo4j_user.clone(),
            password: config.neo4j_password.clone(),
        })
    }
}

impl IdentifierResolver for HetionetResolver {
    fn resolve(&self, identifier: &str) -> GatherResult<i64> {
        let resp = self
            .client
            .post(&self.tx_url)
            .basic_auth(&self.user, Some(&self.password))
            .json(&lookup_request_body(identifier))
            .send()?;
        let body: Value = check_status(resp, "neo4j")?.json()?;
        parse_lookup_response(&body)?.ok_or_else(|| {
            GatherError::NotFound(format!("no node with identifier '{identifier}'"))
        })
    }
}

// ---------------------------------------------------------------------------
// Path queries
// ---------------------------------------------------------------------------

/// `{api_base}/paths/source/{s}/target/{t}/metapath/{m}` with each segment escaped.
pub fn path_url(api_base: &str, source: i64, target: i64, metapath: &str) -> GatherResult<Url> {
    let source = source.to_string();
    let target = target.to_string();
    let mut url = Url::parse(api_base)
        .map_err(|e| GatherError::InvalidArgument(format!("bad api base '{api_base}': {e}")))?;
    url.path_segments_mut()
        .map_err(|_| GatherError::InvalidArgument(format!("api base '{api_base}' cannot take a path")))?
        .pop_if_empty()
        .extend([
            "paths",
            "source",
            source.as_str(),
            "target",
            target.as_str(),
            "metapath",
            metapath,
        ]);
    Ok(url)
}

/// Turn the `paths` array of a search API response into rows.
pub fn parse_paths_response(body: &Value) -> GatherResult<Vec<ResultRow>> {
    let paths = body
        .get("paths")
        .and_then(Value::as_array)
        .ok_or_else(|| GatherError::TransientFetch("response has no 'paths' array".to_string()))?;
    paths
        .iter()
        .map(|path| {
            let fields = path.as_object().ok_or_else(|| {
                GatherError::TransientFetch("path entry is not an object".to_string())
            })?;
            Ok(fields
                .iter()
                .map(|(k, v)| (k.clone(), CellValue::from_json(v)))
                .collect())
        })
        .collect()
}

/// Fetches path statistics from the het.io search API.
pub struct HetionetPathClient {
    client: Client,
    api_base: String,
}

impl HetionetPathClient {
    pub fn new(config: &HetionetConfig) -> GatherResult<Self> {
        Ok(Self {
            client: build_client(config)?,
            api_base: config.api_base.clone(),
        })
    }
}

impl PathQueryClient for HetionetPathClient {
    fn fetch(&self, source: i64, target: i64, metapath: &str) -> GatherResult<Vec<ResultRow>> {
        let url = path_url(&self.api_base, source, target, metapath)?;
        debug!(%url, "fetching paths");
        let resp = self.client.get(url).send()?;
        let body: Value = check_status(resp, "path search")?.json()?;
        parse_paths_response(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entrez_ids_are_sent_as_integers() {
        assert_eq!(identifier_param("1"), json!(1));
        assert_eq!(identifier_param("5243"), json!(5243));
        assert_eq!(identifier_param("GO:0000002"), json!("GO:0000002"));
        assert_eq!(identifier_param("007"), json!("007"));
        assert_eq!(identifier_param("-4"), json!("-4"));
        assert_eq!(identifier_param(""), json!(""));
    }

    #[test]
    fn lookup_body_carries_statement_and_parameter() {
        let body = lookup_request_body("UBERON:0001135");
        let stmt = &body["statements"][0];
        assert_eq!(stmt["statement"], json!(IDENTIFIER_LOOKUP_CYPHER));
        assert_eq!(stmt["parameters"]["identifier"], json!("UBERON:0001135"));
    }

    #[test]
    fn lookup_response_takes_first_row() {
        let body = json!({
            "results": [{
                "columns": ["neo4j_id", "identifier"],
                "data": [{"row": [16764, 1], "meta": []}, {"row": [99999, 1], "meta": []}]
            }],
            "errors": []
        });
        assert_eq!(parse_lookup_response(&body).unwrap(), Some(16764));
    }

    #[test]
    fn lookup_response_without_rows_is_none() {
        let body = json!({
            "results": [{"columns": ["neo4j_id", "identifier"], "data": []}],
            "errors": []
        });
        assert_eq!(parse_lookup_response(&body).unwrap(), None);
    }

    #[test]
    fn lookup_response_errors_are_transient() {
        let body = json!({
            "results": [],
            "errors": [{"code": "Neo.TransientError", "message": "database unavailable"}]
        });
        assert!(matches!(
            parse_lookup_response(&body),
            Err(GatherError::TransientFetch(_))
        ));
    }

    #[test]
    fn path_url_escapes_metapath_segments() {
        let url = path_url("https://search-api.het.io/v1", 40731, 16764, "BPpGdAdG").unwrap();
        assert_eq!(
            url.as_str(),
            "https://search-api.het.io/v1/paths/source/40731/target/16764/metapath/BPpGdAdG"
        );
        let url = path_url("https://search-api.het.io/v1/", 1, 2, "Gr>G").unwrap();
        assert_eq!(
            url.as_str(),
            "https://search-api.het.io/v1/paths/source/1/target/2/metapath/Gr%3EG"
        );
    }

    #[test]
    fn paths_response_preserves_field_order() {
        let body: Value = serde_json::from_str(
            r#"{"paths": [{
                "metapath": "AeGiGaD",
                "node_ids": [18472, 34788, 13320, 17256],
                "rel_ids": [1722767, 1555684, 94499],
                "PDP": 6.413883958245207e-05,
                "percent_of_DWPC": 5.967299638241672,
                "score": -0.0,
                "PC": 447.0,
                "DWPC": 0.0010748385948547952
            }]}"#,
        )
        .unwrap();
        let rows = parse_paths_response(&body).unwrap();
        assert_eq!(rows.len(), 1);
        let keys: Vec<&str> = rows[0].keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec!["metapath", "node_ids", "rel_ids", "PDP", "percent_of_DWPC", "score", "PC", "DWPC"]
        );
        assert_eq!(
            rows[0]["rel_ids"],
            CellValue::IntList(vec![1722767, 1555684, 94499])
        );
        assert_eq!(rows[0]["PC"], CellValue::Real(447.0));
    }

    #[test]
    fn empty_paths_array_is_zero_rows() {
        assert!(parse_paths_response(&json!({"paths": []})).unwrap().is_empty());
    }

    #[test]
    fn missing_paths_key_is_transient() {
        assert!(matches!(
            parse_paths_response(&json!({"detail": "not found"})),
            Err(GatherError::TransientFetch(_))
        ));
    }
}
