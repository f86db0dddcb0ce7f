//! Shared typed models used across the pipeline, path source, and store layers.

use std::collections::HashSet;
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::errors::{GatherError, GatherResult};

// ---------------------------------------------------------------------------
// Column name constants
// ---------------------------------------------------------------------------

/// Column stamped onto every fetched row with the original source identifier.
pub const SOURCE_ID_COLUMN: &str = "source_id";

/// Column stamped onto every fetched row with the original target identifier.
pub const TARGET_ID_COLUMN: &str = "target_id";

/// Columns returned by the het.io path search API, in response order.
pub const PATH_STATISTICS_COLUMNS: &[(&str, ColumnKind)] = &[
    ("metapath", ColumnKind::Text),
    ("node_ids", ColumnKind::IntList),
    ("rel_ids", ColumnKind::IntList),
    ("PDP", ColumnKind::Real),
    ("percent_of_DWPC", ColumnKind::Real),
    ("score", ColumnKind::Real),
    ("PC", ColumnKind::Real),
    ("DWPC", ColumnKind::Real),
];

// ---------------------------------------------------------------------------
// 1. CombinationTriple
// ---------------------------------------------------------------------------

/// One (source, target, metapath) combination to query.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CombinationTriple {
    pub source_id: String,
    pub target_id: String,
    pub metapath: String,
}

impl CombinationTriple {
    pub fn new(
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        metapath: impl Into<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            target_id: target_id.into(),
            metapath: metapath.into(),
        }
    }
}

impl fmt::Display for CombinationTriple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.source_id, self.target_id, self.metapath)
    }
}

// ---------------------------------------------------------------------------
// 2. Batch
// ---------------------------------------------------------------------------

/// An ordered group of triples processed and persisted as one unit.
#[derive(Clone, Debug, PartialEq)]
pub struct Batch {
    /// Zero-based position of this batch within the run.
    pub index: usize,
    /// Declared target size; only the final batch may hold fewer triples.
    pub chunk_size: usize,
    pub triples: Vec<CombinationTriple>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.triples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triples.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CombinationTriple> {
        self.triples.iter()
    }
}

// ---------------------------------------------------------------------------
// 3. CellValue / ColumnKind
// ---------------------------------------------------------------------------

/// A single value in a result row.
#[derive(Clone, Debug, PartialEq)]
pub enum CellValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    IntList(Vec<i64>),
}

impl CellValue {
    /// Convert a JSON value from the path API into a cell.
    ///
    /// Arrays of integers become `IntList`; booleans become `Integer`;
    /// objects and heterogeneous arrays are kept as their JSON text.
    pub fn from_json(value: &serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => CellValue::Null,
            Value::Bool(b) => CellValue::Integer(i64::from(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => CellValue::Integer(i),
                None => CellValue::Real(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => CellValue::Text(s.clone()),
            Value::Array(items) => {
                let ints: Option<Vec<i64>> = items.iter().map(Value::as_i64).collect();
                match ints {
                    Some(list) => CellValue::IntList(list),
                    None => CellValue::Text(value.to_string()),
                }
            }
            Value::Object(_) => CellValue::Text(value.to_string()),
        }
    }

    /// The column kind this value naturally belongs to; `None` for null.
    pub fn kind(&self) -> Option<ColumnKind> {
        match self {
            CellValue::Null => None,
            CellValue::Integer(_) => Some(ColumnKind::Integer),
            CellValue::Real(_) => Some(ColumnKind::Real),
            CellValue::Text(_) => Some(ColumnKind::Text),
            CellValue::IntList(_) => Some(ColumnKind::IntList),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Integer(i) => Some(*i as f64),
            CellValue::Real(r) => Some(*r),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Declared type of a result column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Integer,
    Real,
    Text,
    /// Ordered sequence of integers (node or relationship ids).
    IntList,
}

impl ColumnKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnKind::Integer => "integer",
            ColumnKind::Real => "real",
            ColumnKind::Text => "text",
            ColumnKind::IntList => "int_list",
        }
    }

    pub fn parse(value: &str) -> GatherResult<Self> {
        match value {
            "integer" => Ok(ColumnKind::Integer),
            "real" => Ok(ColumnKind::Real),
            "text" => Ok(ColumnKind::Text),
            "int_list" => Ok(ColumnKind::IntList),
            other => Err(GatherError::InvalidArgument(format!(
                "unknown column kind '{other}'"
            ))),
        }
    }

    /// SQLite storage type; integer lists are stored as JSON text.
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnKind::Integer => "INTEGER",
            ColumnKind::Real => "REAL",
            ColumnKind::Text | ColumnKind::IntList => "TEXT",
        }
    }

    /// Whether a value may be stored in a column of this kind.
    ///
    /// Null fits anywhere and integers widen into real columns. The path API
    /// serialises whole-number floats such as `-0.0` or `447.0` inconsistently,
    /// so that widening is required.
    pub fn accepts(&self, value: &CellValue) -> bool {
        match (self, value) {
            (_, CellValue::Null) => true,
            (ColumnKind::Real, CellValue::Integer(_)) => true,
            (kind, value) => value.kind() == Some(*kind),
        }
    }
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fetched path row; keys are column names in insertion order.
pub type ResultRow = IndexMap<String, CellValue>;

// ---------------------------------------------------------------------------
// 4. TableSchema
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub kind: ColumnKind,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Ordered column set of a persistent result table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableSchema {
    columns: Vec<ColumnDef>,
}

impl TableSchema {
    pub fn new(columns: Vec<ColumnDef>) -> GatherResult<Self> {
        if columns.is_empty() {
            return Err(GatherError::InvalidArgument(
                "a table schema needs at least one column".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for column in &columns {
            if !seen.insert(column.name.as_str()) {
                return Err(GatherError::InvalidArgument(format!(
                    "duplicate column '{}' in schema",
                    column.name
                )));
            }
        }
        Ok(Self { columns })
    }

    /// Declared schema for stamped het.io path rows.
    pub fn path_statistics() -> Self {
        let mut columns: Vec<ColumnDef> = PATH_STATISTICS_COLUMNS
            .iter()
            .map(|(name, kind)| ColumnDef::new(*name, *kind))
            .collect();
        columns.push(ColumnDef::new(SOURCE_ID_COLUMN, ColumnKind::Text));
        columns.push(ColumnDef::new(TARGET_ID_COLUMN, ColumnKind::Text));
        Self { columns }
    }

    /// Derive a schema from fetched rows.
    ///
    /// Column order follows the first row. Each column takes the kind of its
    /// first non-null value; a column that is null throughout becomes `Text`.
    /// A column mixing integers and reals becomes `Real`.
    pub fn infer_from_rows(rows: &[ResultRow]) -> GatherResult<Self> {
        let first = rows.first().ok_or_else(|| {
            GatherError::InvalidArgument("cannot infer a schema from zero rows".to_string())
        })?;
        let columns = first
            .keys()
            .map(|name| {
                let mut kind: Option<ColumnKind> = None;
                for row in rows {
                    match (kind, row.get(name).and_then(CellValue::kind)) {
                        (None, found) => kind = found,
                        (Some(ColumnKind::Integer), Some(ColumnKind::Real)) => {
                            kind = Some(ColumnKind::Real)
                        }
                        _ => {}
                    }
                }
                ColumnDef::new(name.clone(), kind.unwrap_or(ColumnKind::Text))
            })
            .collect();
        Self::new(columns)
    }

    /// Schema for a run that declared none.
    ///
    /// Column order follows the first fetched row. Path-statistics columns
    /// keep their fixed kinds whatever the sample holds. Any other column is
    /// inferred, with integers stored as reals since the path API does not
    /// keep whole-number floats apart from integers.
    pub fn for_fetched_rows(rows: &[ResultRow]) -> GatherResult<Self> {
        let known = Self::path_statistics();
        let inferred = Self::infer_from_rows(rows)?;
        let columns = inferred
            .columns
            .into_iter()
            .map(|column| match known.column(&column.name) {
                Some(fixed) => fixed.clone(),
                None if column.kind == ColumnKind::Integer => {
                    ColumnDef::new(column.name, ColumnKind::Real)
                }
                None => column,
            })
            .collect();
        Self::new(columns)
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Check that a row has exactly this schema's column set with compatible values.
    pub fn check_row(&self, row: &ResultRow) -> GatherResult<()> {
        if row.len() != self.columns.len() {
            return Err(GatherError::SchemaMismatch(format!(
                "row has columns [{}], table expects [{}]",
                row.keys().cloned().collect::<Vec<_>>().join(", "),
                self.names().join(", ")
            )));
        }
        for column in &self.columns {
            let value = row.get(&column.name).ok_or_else(|| {
                GatherError::SchemaMismatch(format!("row is missing column '{}'", column.name))
            })?;
            if !column.kind.accepts(value) {
                return Err(GatherError::SchemaMismatch(format!(
                    "column '{}' expects {}, got {:?}",
                    column.name, column.kind, value
                )));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// 5. Batch results
// ---------------------------------------------------------------------------

/// A per-triple failure recorded under the skip policy.
#[derive(Clone, Debug, PartialEq)]
pub struct TripleFailure {
    pub triple: CombinationTriple,
    pub category: String,
    pub message: String,
}

impl TripleFailure {
    pub fn new(triple: CombinationTriple, error: &GatherError) -> Self {
        Self {
            triple,
            category: error.category().to_string(),
            message: error.to_string(),
        }
    }
}

/// Aggregated rows for one batch, in input-triple order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BatchResult {
    pub index: usize,
    /// Number of triples the batch contained.
    pub attempted: usize,
    pub rows: Vec<ResultRow>,
    pub failures: Vec<TripleFailure>,
}

impl BatchResult {
    /// True when at least one triple was skipped.
    pub fn is_degraded(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}
