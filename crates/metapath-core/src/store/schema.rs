//! SQLite DDL for result tables and the run metadata catalog.

use std::sync::LazyLock;

use regex::Regex;
use rusqlite::Connection;

use crate::errors::{GatherError, GatherResult};
use crate::models::TableSchema;

/// Current metadata schema version, stored in `PRAGMA user_version`.
pub const SCHEMA_VERSION: i32 = 1;

static IDENTIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,127}$").unwrap());

/// Table names the sink reserves for its own bookkeeping.
pub const RESERVED_TABLES: &[&str] = &["result_columns", "runs", "fetch_failures"];

/// Catalog and diagnostics tables shared by every result table in a database.
///
/// Executed with `CREATE … IF NOT EXISTS` so they are safe to replay.
pub const META_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS result_columns (
        table_name TEXT NOT NULL,
        position INTEGER NOT NULL,
        name TEXT NOT NULL,
        kind TEXT NOT NULL,
        PRIMARY KEY (table_name, position)
    );",
    "CREATE TABLE IF NOT EXISTS runs (
        run_id TEXT PRIMARY KEY,
        table_name TEXT NOT NULL,
        input_fingerprint TEXT,
        expected_triples INTEGER,
        status TEXT NOT NULL DEFAULT 'running',
        batches INTEGER NOT NULL DEFAULT 0,
        rows INTEGER NOT NULL DEFAULT 0,
        started_at TEXT DEFAULT CURRENT_TIMESTAMP,
        finished_at TEXT
    );",
    "CREATE TABLE IF NOT EXISTS fetch_failures (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        run_id TEXT NOT NULL,
        batch_index INTEGER NOT NULL,
        source_id TEXT NOT NULL,
        target_id TEXT NOT NULL,
        metapath TEXT NOT NULL,
        category TEXT NOT NULL,
        message TEXT NOT NULL,
        created_at TEXT DEFAULT CURRENT_TIMESTAMP
    );",
    "CREATE INDEX IF NOT EXISTS idx_fetch_failures_run_batch \
     ON fetch_failures(run_id, batch_index);",
];

/// Accept only plain SQL identifiers; table and column names are spliced into DDL.
pub fn validate_identifier(name: &str) -> GatherResult<()> {
    if IDENTIFIER_RE.is_match(name) {
        Ok(())
    } else {
        Err(GatherError::InvalidArgument(format!(
            "'{name}' is not a valid table or column name"
        )))
    }
}

pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Create the metadata tables and stamp the schema version.
pub fn init_meta(conn: &Connection) -> GatherResult<()> {
    for stmt in META_STATEMENTS {
        conn.execute_batch(stmt)?;
    }
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}

/// `CREATE TABLE` statement for a result table with the given schema.
pub fn create_table_sql(table_name: &str, schema: &TableSchema) -> GatherResult<String> {
    validate_identifier(table_name)?;
    let mut defs = Vec::with_capacity(schema.len());
    for column in schema.columns() {
        validate_identifier(&column.name)?;
        defs.push(format!(
            "{} {}",
            quote_identifier(&column.name),
            column.kind.sql_type()
        ));
    }
    Ok(format!(
        "CREATE TABLE {} ({});",
        quote_identifier(table_name),
        defs.join(", ")
    ))
}

/// `INSERT` statement with one positional parameter per schema column.
pub fn insert_row_sql(table_name: &str, schema: &TableSchema) -> String {
    let names: Vec<String> = schema
        .columns()
        .iter()
        .map(|c| quote_identifier(&c.name))
        .collect();
    let placeholders: Vec<String> = (1..=schema.len()).map(|i| format!("?{i}")).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({});",
        quote_identifier(table_name),
        names.join(", "),
        placeholders.join(", ")
    )
}
