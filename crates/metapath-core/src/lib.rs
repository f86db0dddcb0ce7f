//! Metapath core library: bulk gathering of Hetionet metapath statistics.
//!
//! Every (biological process, gene, metapath) combination is resolved against
//! the Hetionet graph, its path statistics fetched from the het.io search API
//! with bounded parallelism, and the rows appended batch by batch to a SQLite
//! result table. With the `python` feature the crate also builds the
//! `_metapath_core` extension module used from the analysis notebooks.

pub mod config;
pub mod errors;
pub mod inputs;
pub mod models;
pub mod pipeline;
pub mod source;
pub mod store;

#[cfg(feature = "python")]
mod python;

pub use config::{FailurePolicy, HetionetConfig, PipelineConfig};
pub use errors::{GatherError, GatherResult};
pub use inputs::InputCollections;
pub use pipeline::{Pipeline, RunStatus, RunSummary};
pub use store::results::ResultSink;

#[cfg(feature = "python")]
use pyo3::prelude::*;

// ---------------------------------------------------------------------------
// Top-level Python module: _metapath_core
// ---------------------------------------------------------------------------

#[cfg(feature = "python")]
#[pymodule]
fn _metapath_core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    python::register(m)
}
