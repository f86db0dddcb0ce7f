//! SQLite-backed append-only result table.
//!
//! Every public method opens its own connection so the sink can be handed
//! between the coordinating flow and inspection code without lifetime
//! juggling. Appends are all-or-nothing: a batch's rows and its failure
//! diagnostics commit in one transaction.

use std::path::{Path, PathBuf};

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::errors::{GatherError, GatherResult};
use crate::models::{
    BatchResult, CellValue, ColumnDef, ColumnKind, ResultRow, TableSchema, TripleFailure,
};
use crate::store::schema::{
    self, create_table_sql, insert_row_sql, quote_identifier, validate_identifier,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            let mut expanded = PathBuf::from(home);
            if path.len() > 2 {
                expanded.push(&path[2..]);
            }
            return expanded;
        }
    }
    PathBuf::from(path)
}

fn to_sql_value(kind: ColumnKind, value: &CellValue) -> GatherResult<SqlValue> {
    Ok(match value {
        CellValue::Null => SqlValue::Null,
        CellValue::Integer(i) if kind == ColumnKind::Real => SqlValue::Real(*i as f64),
        CellValue::Integer(i) => SqlValue::Integer(*i),
        CellValue::Real(r) => SqlValue::Real(*r),
        CellValue::Text(s) => SqlValue::Text(s.clone()),
        CellValue::IntList(ids) => SqlValue::Text(serde_json::to_string(ids)?),
    })
}

fn from_sql_row(
    row: &rusqlite::Row<'_>,
    schema: &TableSchema,
) -> rusqlite::Result<GatherResult<ResultRow>> {
    let mut out = ResultRow::with_capacity(schema.len());
    for (i, column) in schema.columns().iter().enumerate() {
        let cell = match column.kind {
            ColumnKind::Integer => row
                .get::<_, Option<i64>>(i)?
                .map_or(CellValue::Null, CellValue::Integer),
            ColumnKind::Real => row
                .get::<_, Option<f64>>(i)?
                .map_or(CellValue::Null, CellValue::Real),
            ColumnKind::Text => row
                .get::<_, Option<String>>(i)?
                .map_or(CellValue::Null, CellValue::Text),
            ColumnKind::IntList => match row.get::<_, Option<String>>(i)? {
                Some(raw) => match serde_json::from_str::<Vec<i64>>(&raw) {
                    Ok(ids) => CellValue::IntList(ids),
                    Err(e) => return Ok(Err(e.into())),
                },
                None => CellValue::Null,
            },
        };
        out.insert(column.name.clone(), cell);
    }
    Ok(Ok(out))
}

// ---------------------------------------------------------------------------
// Records read back from the catalog
// ---------------------------------------------------------------------------

/// A row of the `runs` table.
#[derive(Clone, Debug, PartialEq)]
pub struct RunRecord {
    pub run_id: String,
    pub table_name: String,
    pub input_fingerprint: Option<String>,
    pub expected_triples: Option<i64>,
    pub status: String,
    pub batches: i64,
    pub rows: i64,
}

/// A row of the `fetch_failures` table.
#[derive(Clone, Debug, PartialEq)]
pub struct FailureRecord {
    pub batch_index: i64,
    pub source_id: String,
    pub target_id: String,
    pub metapath: String,
    pub category: String,
    pub message: String,
}

fn insert_failures(
    conn: &Connection,
    run_id: &str,
    batch_index: usize,
    failures: &[TripleFailure],
) -> GatherResult<()> {
    let mut record = conn.prepare(
        "INSERT INTO fetch_failures(run_id, batch_index, source_id, target_id, \
         metapath, category, message) VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7);",
    )?;
    for failure in failures {
        record.execute(params![
            run_id,
            batch_index as i64,
            failure.triple.source_id,
            failure.triple.target_id,
            failure.triple.metapath,
            failure.category,
            failure.message,
        ])?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// ResultSink
// ---------------------------------------------------------------------------

/// Persistent result table for one run.
pub struct ResultSink {
    db_path: PathBuf,
    table_name: String,
    schema: Option<TableSchema>,
}

impl ResultSink {
    /// Prepare a sink for `table_name` in the database at `db_path`.
    ///
    /// Parent directories are created and the metadata catalog is
    /// initialised; the result table itself is only created by
    /// [`ResultSink::initialize`].
    pub fn new(db_path: impl AsRef<Path>, table_name: &str) -> GatherResult<Self> {
        validate_identifier(table_name)?;
        if schema::RESERVED_TABLES.contains(&table_name) {
            return Err(GatherError::InvalidArgument(format!(
                "'{table_name}' is reserved for run metadata"
            )));
        }
        let expanded = expand_tilde(&db_path.as_ref().to_string_lossy());
        let resolved = if expanded.is_absolute() {
            expanded
        } else {
            std::env::current_dir()?.join(&expanded)
        };
        if let Some(parent) = resolved.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let sink = Self {
            db_path: resolved,
            table_name: table_name.to_string(),
            schema: None,
        };
        let conn = sink.connect()?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        schema::init_meta(&conn)?;
        Ok(sink)
    }

    /// Re-open an existing result table, loading its schema from the catalog.
    pub fn open(db_path: impl AsRef<Path>, table_name: &str) -> GatherResult<Self> {
        let mut sink = Self::new(db_path, table_name)?;
        let conn = sink.connect()?;
        let mut stmt = conn.prepare(
            "SELECT name, kind FROM result_columns WHERE table_name = ?1 ORDER BY position;",
        )?;
        let pairs = stmt
            .query_map(params![table_name], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        if pairs.is_empty() {
            return Err(GatherError::NotFound(format!(
                "no result table named '{table_name}'"
            )));
        }
        let columns = pairs
            .into_iter()
            .map(|(name, kind)| Ok(ColumnDef::new(name, ColumnKind::parse(&kind)?)))
            .collect::<GatherResult<Vec<_>>>()?;
        sink.schema = Some(TableSchema::new(columns)?);
        Ok(sink)
    }

    fn connect(&self) -> GatherResult<Connection> {
        let conn = Connection::open(&self.db_path).map_err(|e| {
            GatherError::Fatal(format!(
                "cannot open result store {}: {e}",
                self.db_path.display()
            ))
        })?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(conn)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn is_initialized(&self) -> bool {
        self.schema.is_some()
    }

    /// Schema the table was created with, once initialised.
    pub fn schema(&self) -> Option<&TableSchema> {
        self.schema.as_ref()
    }

    // -- table lifecycle -----------------------------------------------------

    /// Create the result table, overwriting any previous table of the same name.
    pub fn initialize(&mut self, schema: TableSchema) -> GatherResult<()> {
        let ddl = create_table_sql(&self.table_name, &schema)?;
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        Self::drop_with(&tx, &self.table_name)?;
        tx.execute_batch(&ddl)?;
        for (position, column) in schema.columns().iter().enumerate() {
            tx.execute(
                "INSERT INTO result_columns(table_name, position, name, kind) \
                 VALUES(?1, ?2, ?3, ?4);",
                params![
                    self.table_name,
                    position as i64,
                    column.name,
                    column.kind.as_str()
                ],
            )?;
        }
        tx.commit()?;
        info!(
            table = %self.table_name,
            columns = schema.len(),
            "created result table"
        );
        self.schema = Some(schema);
        Ok(())
    }

    /// Create the table with a schema derived from sample rows.
    pub fn initialize_from_sample(&mut self, sample: &[ResultRow]) -> GatherResult<()> {
        let schema = TableSchema::for_fetched_rows(sample)?;
        self.initialize(schema)
    }

    /// Remove the table and its catalog entry, if any. Run diagnostics stay.
    pub fn drop_table(&mut self) -> GatherResult<()> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        Self::drop_with(&tx, &self.table_name)?;
        tx.commit()?;
        if self.schema.take().is_some() {
            debug!(table = %self.table_name, "dropped result table");
        }
        Ok(())
    }

    fn drop_with(conn: &Connection, table_name: &str) -> GatherResult<()> {
        conn.execute_batch(&format!(
            "DROP TABLE IF EXISTS {};",
            quote_identifier(table_name)
        ))?;
        conn.execute(
            "DELETE FROM result_columns WHERE table_name = ?1;",
            params![table_name],
        )?;
        Ok(())
    }

    // -- appends -------------------------------------------------------------

    /// Append all rows of a batch; returns the new total row count.
    pub fn append(&self, batch: &BatchResult) -> GatherResult<u64> {
        self.append_batch(None, batch)
    }

    /// Append a batch and record its skipped triples under `run_id`, atomically.
    pub fn append_with_diagnostics(&self, run_id: &str, batch: &BatchResult) -> GatherResult<u64> {
        self.append_batch(Some(run_id), batch)
    }

    fn append_batch(&self, run_id: Option<&str>, batch: &BatchResult) -> GatherResult<u64> {
        let schema = self.schema.as_ref().ok_or_else(|| {
            GatherError::InvalidArgument(format!(
                "result table '{}' has not been initialised",
                self.table_name
            ))
        })?;
        for row in &batch.rows {
            schema.check_row(row)?;
        }

        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        {
            let mut insert = tx.prepare(&insert_row_sql(&self.table_name, schema))?;
            for row in &batch.rows {
                let values = schema
                    .columns()
                    .iter()
                    .map(|column| match row.get(&column.name) {
                        Some(cell) => to_sql_value(column.kind, cell),
                        None => Ok(SqlValue::Null),
                    })
                    .collect::<GatherResult<Vec<_>>>()?;
                insert.execute(rusqlite::params_from_iter(values))?;
            }
        }
        if let Some(run_id) = run_id {
            insert_failures(&tx, run_id, batch.index, &batch.failures)?;
        }
        let total = Self::count_with(&tx, &self.table_name)?;
        tx.commit()?;
        debug!(
            table = %self.table_name,
            batch = batch.index,
            appended = batch.rows.len(),
            total,
            "appended batch"
        );
        Ok(total)
    }

    /// Record skipped triples of a batch that produced no table rows.
    pub fn record_failures(
        &self,
        run_id: &str,
        batch_index: usize,
        failures: &[TripleFailure],
    ) -> GatherResult<()> {
        if failures.is_empty() {
            return Ok(());
        }
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        insert_failures(&tx, run_id, batch_index, failures)?;
        tx.commit()?;
        Ok(())
    }

    // -- accessors -----------------------------------------------------------

    fn count_with(conn: &Connection, table_name: &str) -> GatherResult<u64> {
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {};", quote_identifier(table_name)),
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Total rows in the result table; zero before initialisation.
    pub fn count(&self) -> GatherResult<u64> {
        if self.schema.is_none() {
            return Ok(0);
        }
        let conn = self.connect()?;
        Self::count_with(&conn, &self.table_name)
    }

    /// Read rows back in insertion order, up to `limit`.
    pub fn rows(&self, limit: Option<usize>) -> GatherResult<Vec<ResultRow>> {
        let Some(schema) = self.schema.as_ref() else {
            return Ok(Vec::new());
        };
        let conn = self.connect()?;
        let names: Vec<String> = schema
            .columns()
            .iter()
            .map(|c| quote_identifier(&c.name))
            .collect();
        let limit_sql = limit.map_or(-1, |n| n as i64);
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM {} ORDER BY rowid LIMIT ?1;",
            names.join(", "),
            quote_identifier(&self.table_name)
        ))?;
        let rows = stmt
            .query_map(params![limit_sql], |row| from_sql_row(row, schema))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().collect()
    }

    /// On-disk size of the database file in bytes.
    pub fn size_bytes(&self) -> GatherResult<u64> {
        let conn = self.connect()?;
        let page_count: i64 = conn.pragma_query_value(None, "page_count", |row| row.get(0))?;
        let page_size: i64 = conn.pragma_query_value(None, "page_size", |row| row.get(0))?;
        Ok((page_count * page_size).max(0) as u64)
    }

    // -- run bookkeeping -----------------------------------------------------

    pub fn begin_run(
        &self,
        run_id: &str,
        input_fingerprint: Option<&str>,
        expected_triples: u64,
    ) -> GatherResult<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO runs(run_id, table_name, input_fingerprint, expected_triples) \
             VALUES(?1, ?2, ?3, ?4);",
            params![
                run_id,
                self.table_name,
                input_fingerprint,
                i64::try_from(expected_triples).unwrap_or(i64::MAX)
            ],
        )?;
        Ok(())
    }

    pub fn finish_run(&self, run_id: &str, status: &str, batches: u64, rows: u64) -> GatherResult<()> {
        let conn = self.connect()?;
        conn.execute(
            "UPDATE runs SET status = ?2, batches = ?3, rows = ?4, \
             finished_at = CURRENT_TIMESTAMP WHERE run_id = ?1;",
            params![run_id, status, batches as i64, rows as i64],
        )?;
        Ok(())
    }

    pub fn run_record(&self, run_id: &str) -> GatherResult<Option<RunRecord>> {
        let conn = self.connect()?;
        let record = conn
            .query_row(
                "SELECT run_id, table_name, input_fingerprint, expected_triples, status, \
                 batches, rows FROM runs WHERE run_id = ?1;",
                params![run_id],
                |row| {
                    Ok(RunRecord {
                        run_id: row.get(0)?,
                        table_name: row.get(1)?,
                        input_fingerprint: row.get(2)?,
                        expected_triples: row.get(3)?,
                        status: row.get(4)?,
                        batches: row.get(5)?,
                        rows: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    pub fn list_fetch_failures(&self, run_id: &str) -> GatherResult<Vec<FailureRecord>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT batch_index, source_id, target_id, metapath, category, message \
             FROM fetch_failures WHERE run_id = ?1 ORDER BY id;",
        )?;
        let records = stmt
            .query_map(params![run_id], |row| {
                Ok(FailureRecord {
                    batch_index: row.get(0)?,
                    source_id: row.get(1)?,
                    target_id: row.get(2)?,
                    metapath: row.get(3)?,
                    category: row.get(4)?,
                    message: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CombinationTriple, TripleFailure};

    fn scores_schema() -> TableSchema {
        TableSchema::new(vec![
            ColumnDef::new("metapath", ColumnKind::Text),
            ColumnDef::new("node_ids", ColumnKind::IntList),
            ColumnDef::new("DWPC", ColumnKind::Real),
            ColumnDef::new("source_id", ColumnKind::Text),
            ColumnDef::new("target_id", ColumnKind::Text),
        ])
        .unwrap()
    }

    fn score_row(source: &str, target: &str, dwpc: f64) -> ResultRow {
        let mut row = ResultRow::new();
        row.insert("metapath".into(), CellValue::Text("BPpGdAdG".into()));
        row.insert("node_ids".into(), CellValue::IntList(vec![1, 2, 3]));
        row.insert("DWPC".into(), CellValue::Real(dwpc));
        row.insert("source_id".into(), CellValue::Text(source.into()));
        row.insert("target_id".into(), CellValue::Text(target.into()));
        row
    }

    fn batch(index: usize, rows: Vec<ResultRow>) -> BatchResult {
        BatchResult {
            index,
            attempted: rows.len(),
            rows,
            failures: Vec::new(),
        }
    }

    fn new_sink(dir: &tempfile::TempDir) -> ResultSink {
        ResultSink::new(dir.path().join("results/scores.db"), "scores").unwrap()
    }

    #[test]
    fn sequential_appends_accumulate() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = new_sink(&dir);
        sink.initialize(scores_schema()).unwrap();

        let first = sink
            .append(&batch(0, vec![score_row("S1", "T1", 0.1), score_row("S1", "T2", 0.2)]))
            .unwrap();
        assert_eq!(first, 2);
        let second = sink
            .append(&batch(1, vec![score_row("S2", "T1", 0.3)]))
            .unwrap();
        assert_eq!(second, 3);
        assert_eq!(sink.count().unwrap(), 3);
    }

    #[test]
    fn mismatched_columns_fail_and_leave_count_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = new_sink(&dir);
        sink.initialize(scores_schema()).unwrap();
        sink.append(&batch(0, vec![score_row("S1", "T1", 0.1)])).unwrap();

        let mut bad = score_row("S1", "T2", 0.2);
        bad.shift_remove("DWPC");
        bad.insert("PDP".into(), CellValue::Real(0.5));
        let err = sink
            .append(&batch(1, vec![score_row("S1", "T3", 0.3), bad]))
            .unwrap_err();
        assert!(matches!(err, GatherError::SchemaMismatch(_)));
        assert_eq!(sink.count().unwrap(), 1);
    }

    #[test]
    fn incompatible_value_kind_is_a_schema_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = new_sink(&dir);
        sink.initialize(scores_schema()).unwrap();
        let mut bad = score_row("S1", "T1", 0.1);
        bad.insert("DWPC".into(), CellValue::Text("high".into()));
        assert!(matches!(
            sink.append(&batch(0, vec![bad])),
            Err(GatherError::SchemaMismatch(_))
        ));
        assert_eq!(sink.count().unwrap(), 0);
    }

    #[test]
    fn initialize_overwrites_previous_table() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = new_sink(&dir);
        sink.initialize(scores_schema()).unwrap();
        sink.append(&batch(0, vec![score_row("S1", "T1", 0.1)])).unwrap();

        let narrow = TableSchema::new(vec![ColumnDef::new("DWPC", ColumnKind::Real)]).unwrap();
        sink.initialize(narrow.clone()).unwrap();
        assert_eq!(sink.count().unwrap(), 0);
        assert_eq!(sink.schema(), Some(&narrow));
    }

    #[test]
    fn drop_table_removes_rows_and_catalog_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scores.db");
        let mut sink = ResultSink::new(&path, "scores").unwrap();
        sink.initialize(scores_schema()).unwrap();
        sink.append(&batch(0, vec![score_row("S1", "T1", 0.1)])).unwrap();

        sink.drop_table().unwrap();
        assert!(!sink.is_initialized());
        assert_eq!(sink.count().unwrap(), 0);
        assert!(matches!(
            ResultSink::open(&path, "scores"),
            Err(GatherError::NotFound(_))
        ));
        // Dropping a table that does not exist is fine.
        sink.drop_table().unwrap();
    }

    #[test]
    fn append_before_initialize_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let sink = new_sink(&dir);
        assert!(matches!(
            sink.append(&batch(0, vec![score_row("S1", "T1", 0.1)])),
            Err(GatherError::InvalidArgument(_))
        ));
        assert_eq!(sink.count().unwrap(), 0);
    }

    #[test]
    fn rows_round_trip_kinds_and_widen_integers() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = new_sink(&dir);
        sink.initialize(scores_schema()).unwrap();
        let mut row = score_row("GO:0000002", "1", 0.0);
        row.insert("DWPC".into(), CellValue::Integer(2));
        sink.append(&batch(0, vec![row])).unwrap();

        let back = sink.rows(None).unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0]["DWPC"], CellValue::Real(2.0));
        assert_eq!(back[0]["node_ids"], CellValue::IntList(vec![1, 2, 3]));
        assert_eq!(back[0]["source_id"], CellValue::Text("GO:0000002".into()));
    }

    #[test]
    fn open_restores_schema_from_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scores.db");
        {
            let mut sink = ResultSink::new(&path, "scores").unwrap();
            sink.initialize(scores_schema()).unwrap();
            sink.append(&batch(0, vec![score_row("S1", "T1", 0.1)])).unwrap();
        }
        let reopened = ResultSink::open(&path, "scores").unwrap();
        assert_eq!(reopened.schema(), Some(&scores_schema()));
        assert_eq!(reopened.count().unwrap(), 1);

        assert!(matches!(
            ResultSink::open(&path, "other"),
            Err(GatherError::NotFound(_))
        ));
    }

    #[test]
    fn reserved_and_invalid_table_names_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ResultSink::new(dir.path().join("a.db"), "runs").is_err());
        assert!(ResultSink::new(dir.path().join("a.db"), "bad name").is_err());
    }

    #[test]
    fn diagnostics_commit_with_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = new_sink(&dir);
        sink.initialize(scores_schema()).unwrap();
        sink.begin_run("run-1", Some("abc"), 3).unwrap();

        let mut result = batch(0, vec![score_row("S1", "T1", 0.1)]);
        result.attempted = 2;
        result.failures.push(TripleFailure::new(
            CombinationTriple::new("S1", "T2", "BPpGdAdG"),
            &GatherError::NotFound("T2".into()),
        ));
        sink.append_with_diagnostics("run-1", &result).unwrap();
        sink.finish_run("run-1", "completed", 1, 1).unwrap();

        let failures = sink.list_fetch_failures("run-1").unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].target_id, "T2");
        assert_eq!(failures[0].category, "not_found");

        let record = sink.run_record("run-1").unwrap().unwrap();
        assert_eq!(record.status, "completed");
        assert_eq!(record.rows, 1);
        assert_eq!(record.expected_triples, Some(3));
        assert!(sink.run_record("missing").unwrap().is_none());
    }

    #[test]
    fn failures_can_be_recorded_before_the_table_exists() {
        let dir = tempfile::tempdir().unwrap();
        let sink = new_sink(&dir);
        sink.begin_run("run-2", None, 1).unwrap();
        let failure = TripleFailure::new(
            CombinationTriple::new("S9", "T9", "BPpGdAdG"),
            &GatherError::TransientFetch("timeout".into()),
        );
        sink.record_failures("run-2", 4, &[failure]).unwrap();
        let failures = sink.list_fetch_failures("run-2").unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].batch_index, 4);
        assert_eq!(sink.count().unwrap(), 0);
    }

    #[test]
    fn size_bytes_is_positive_after_writes() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = new_sink(&dir);
        sink.initialize(scores_schema()).unwrap();
        sink.append(&batch(0, vec![score_row("S1", "T1", 0.1)])).unwrap();
        assert!(sink.size_bytes().unwrap() > 0);
    }
}
