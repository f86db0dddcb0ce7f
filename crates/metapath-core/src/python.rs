//! PyO3 bindings for the `_metapath_core` extension module.

use std::path::PathBuf;

use pyo3::prelude::*;
use pyo3::types::{PyDict, PyList};

use crate::config::{HetionetConfig, PipelineConfig};
use crate::inputs::InputCollections;
use crate::models::{CellValue, ResultRow};
use crate::pipeline::chunker::{checked_chunk_size, chunk_triples};
use crate::pipeline::combinations::generate_combinations;
use crate::pipeline::estimate::RunEstimate;
use crate::pipeline::runner::{Pipeline, RunSummary};
use crate::source::hetionet::{HetionetPathClient, HetionetResolver};
use crate::source::CachingResolver;
use crate::store::results::ResultSink;

type Triple = (String, String, String);

fn cell_into_dict(dict: &Bound<'_, PyDict>, name: &str, cell: &CellValue) -> PyResult<()> {
    match cell {
        CellValue::Null => dict.set_item(name, dict.py().None()),
        CellValue::Integer(i) => dict.set_item(name, *i),
        CellValue::Real(r) => dict.set_item(name, *r),
        CellValue::Text(s) => dict.set_item(name, s),
        CellValue::IntList(ids) => dict.set_item(name, ids.clone()),
    }
}

fn row_to_pydict<'py>(py: Python<'py>, row: &ResultRow) -> PyResult<Bound<'py, PyDict>> {
    let dict = PyDict::new(py);
    for (name, cell) in row {
        cell_into_dict(&dict, name, cell)?;
    }
    Ok(dict)
}

fn summary_to_pydict<'py>(py: Python<'py>, summary: &RunSummary) -> PyResult<Bound<'py, PyDict>> {
    let dict = PyDict::new(py);
    dict.set_item("run_id", &summary.run_id)?;
    dict.set_item("status", summary.status.as_str())?;
    dict.set_item("batches_committed", summary.batches_committed)?;
    dict.set_item("batches_degraded", summary.batches_degraded)?;
    dict.set_item("batches_clean", summary.batches_clean())?;
    dict.set_item("triples_attempted", summary.triples_attempted)?;
    dict.set_item("triples_failed", summary.triples_failed)?;
    dict.set_item("rows_total", summary.rows_total)?;
    dict.set_item("elapsed_ms", summary.elapsed_ms)?;
    match &summary.aborted {
        Some(abort) => {
            let detail = PyDict::new(py);
            detail.set_item("batch_index", abort.batch_index)?;
            detail.set_item("source_id", &abort.triple.source_id)?;
            detail.set_item("target_id", &abort.triple.target_id)?;
            detail.set_item("metapath", &abort.triple.metapath)?;
            detail.set_item("category", abort.error.category())?;
            detail.set_item("message", abort.error.to_string())?;
            dict.set_item("aborted", detail)?;
        }
        None => dict.set_item("aborted", py.None())?,
    }
    Ok(dict)
}

/// Full cross product as a list of tuples. Meant for small inputs.
#[pyfunction]
#[pyo3(name = "generate_combinations")]
pub fn generate_combinations_py(
    sources: Vec<String>,
    targets: Vec<String>,
    metapaths: Vec<String>,
) -> Vec<Triple> {
    generate_combinations(&sources, &targets, &metapaths)
        .map(|t| (t.source_id, t.target_id, t.metapath))
        .collect()
}

#[pyfunction]
pub fn chunk_combinations(
    sources: Vec<String>,
    targets: Vec<String>,
    metapaths: Vec<String>,
    chunk_size: i64,
) -> PyResult<Vec<Vec<Triple>>> {
    let chunk_size = checked_chunk_size(chunk_size)?;
    let batches = chunk_triples(
        generate_combinations(&sources, &targets, &metapaths),
        chunk_size,
    )?;
    Ok(batches
        .map(|batch| {
            batch
                .triples
                .into_iter()
                .map(|t| (t.source_id, t.target_id, t.metapath))
                .collect()
        })
        .collect())
}

#[pyfunction]
#[pyo3(signature = (num_sources, num_targets, num_metapaths, chunk_size=1000))]
pub fn expected_queries(
    py: Python<'_>,
    num_sources: usize,
    num_targets: usize,
    num_metapaths: usize,
    chunk_size: i64,
) -> PyResult<PyObject> {
    let chunk_size = checked_chunk_size(chunk_size)?;
    let estimate = RunEstimate::new(num_sources, num_targets, num_metapaths, chunk_size);
    let result = PyDict::new(py);
    result.set_item("expected_triples", estimate.expected_triples)?;
    result.set_item("expected_batches", estimate.expected_batches)?;
    Ok(result.into())
}

/// Run the whole gather against the live het.io services.
///
/// `config_json` overrides the `METAPATH_*` environment configuration;
/// connection settings always come from `HETIONET_*`. `metapaths` limits the
/// run to those entries of `metapaths_csv`.
#[pyfunction]
#[pyo3(signature = (db_path, bioprocess_csv, gene_csv, metapaths_csv, ignore_csv=None, config_json=None, metapaths=None))]
pub fn gather_metapath_scores(
    py: Python<'_>,
    db_path: PathBuf,
    bioprocess_csv: PathBuf,
    gene_csv: PathBuf,
    metapaths_csv: PathBuf,
    ignore_csv: Option<PathBuf>,
    config_json: Option<&str>,
    metapaths: Option<Vec<String>>,
) -> PyResult<PyObject> {
    let config = match config_json {
        Some(raw) => PipelineConfig::from_json_str(raw)?,
        None => PipelineConfig::from_env()?,
    };
    let hetionet = HetionetConfig::from_env()?;

    let summary = py.allow_threads(|| {
        let inputs = InputCollections::load(
            &bioprocess_csv,
            &gene_csv,
            &metapaths_csv,
            ignore_csv.as_deref(),
            metapaths.as_deref(),
        )?;
        let mut sink = ResultSink::new(&db_path, &config.table_name)?;
        let resolver = CachingResolver::new(HetionetResolver::new(&hetionet)?);
        let client = HetionetPathClient::new(&hetionet)?;
        let pipeline = Pipeline::new(config, resolver, client)?;
        pipeline.run(&inputs, &mut sink)
    })?;
    Ok(summary_to_pydict(py, &summary)?.into())
}

/// Read-only handle on a persisted result table.
#[pyclass]
pub struct ResultTable {
    sink: ResultSink,
}

#[pymethods]
impl ResultTable {
    #[new]
    #[pyo3(signature = (db_path, table_name=crate::config::DEFAULT_TABLE_NAME))]
    pub fn new(db_path: PathBuf, table_name: &str) -> PyResult<Self> {
        Ok(Self {
            sink: ResultSink::open(&db_path, table_name)?,
        })
    }

    pub fn count(&self) -> PyResult<u64> {
        Ok(self.sink.count()?)
    }

    /// `[(name, kind), ...]` in table order.
    pub fn schema(&self) -> Vec<(String, String)> {
        self.sink
            .schema()
            .map(|schema| {
                schema
                    .columns()
                    .iter()
                    .map(|c| (c.name.clone(), c.kind.as_str().to_string()))
                    .collect()
            })
            .unwrap_or_default()
    }

    #[pyo3(signature = (limit=None))]
    pub fn rows<'py>(&self, py: Python<'py>, limit: Option<usize>) -> PyResult<Bound<'py, PyList>> {
        let rows = self.sink.rows(limit)?;
        let dicts = rows
            .iter()
            .map(|row| row_to_pydict(py, row))
            .collect::<PyResult<Vec<_>>>()?;
        PyList::new(py, dicts)
    }

    pub fn size_bytes(&self) -> PyResult<u64> {
        Ok(self.sink.size_bytes()?)
    }

    pub fn fetch_failures<'py>(
        &self,
        py: Python<'py>,
        run_id: &str,
    ) -> PyResult<Bound<'py, PyList>> {
        let mut out = Vec::new();
        for failure in self.sink.list_fetch_failures(run_id)? {
            let dict = PyDict::new(py);
            dict.set_item("batch_index", failure.batch_index)?;
            dict.set_item("source_id", failure.source_id)?;
            dict.set_item("target_id", failure.target_id)?;
            dict.set_item("metapath", failure.metapath)?;
            dict.set_item("category", failure.category)?;
            dict.set_item("message", failure.message)?;
            out.push(dict);
        }
        PyList::new(py, out)
    }

    fn __repr__(&self) -> String {
        format!(
            "ResultTable(db_path={:?}, table_name={:?})",
            self.sink.db_path(),
            self.sink.table_name()
        )
    }
}

pub fn register(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add("DEFAULT_TABLE_NAME", crate::config::DEFAULT_TABLE_NAME)?;
    m.add("DEFAULT_CHUNK_SIZE", crate::config::DEFAULT_CHUNK_SIZE)?;
    m.add("SOURCE_ID_COLUMN", crate::models::SOURCE_ID_COLUMN)?;
    m.add("TARGET_ID_COLUMN", crate::models::TARGET_ID_COLUMN)?;

    m.add_function(wrap_pyfunction!(generate_combinations_py, m)?)?;
    m.add_function(wrap_pyfunction!(chunk_combinations, m)?)?;
    m.add_function(wrap_pyfunction!(expected_queries, m)?)?;
    m.add_function(wrap_pyfunction!(gather_metapath_scores, m)?)?;
    m.add_class::<ResultTable>()?;
    Ok(())
}
