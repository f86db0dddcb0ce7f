//! Per-batch fetch fan-out with Rayon-based bounded parallelism.
//!
//! Each triple is resolved, fetched, stamped with its original identifiers,
//! and optionally projected. Results come back in input order whatever the
//! completion order of the workers.

use std::thread;
use std::time::Duration;

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::config::{FailurePolicy, PipelineConfig};
use crate::errors::{GatherError, GatherResult};
use crate::models::{
    Batch, BatchResult, CellValue, CombinationTriple, ResultRow, TripleFailure, SOURCE_ID_COLUMN,
    TARGET_ID_COLUMN,
};
use crate::source::{IdentifierResolver, PathQueryClient};

/// Why a batch was abandoned under [`FailurePolicy::Abort`], or because of a
/// non-per-triple error under either policy.
#[derive(Debug)]
pub struct BatchAbort {
    pub batch_index: usize,
    pub triple: CombinationTriple,
    pub error: GatherError,
}

/// Tag a fetched row with the original (unresolved) identifiers.
pub fn stamp_row(row: &mut ResultRow, triple: &CombinationTriple) {
    row.insert(
        SOURCE_ID_COLUMN.to_string(),
        CellValue::Text(triple.source_id.clone()),
    );
    row.insert(
        TARGET_ID_COLUMN.to_string(),
        CellValue::Text(triple.target_id.clone()),
    );
}

/// Keep only `columns`, in that order; absent columns become null.
pub fn project_row(mut row: ResultRow, columns: &[String]) -> ResultRow {
    columns
        .iter()
        .map(|name| {
            let value = row.swap_remove(name).unwrap_or(CellValue::Null);
            (name.clone(), value)
        })
        .collect()
}

pub struct FetchDispatcher<R, C> {
    resolver: R,
    client: C,
    pool: Option<rayon::ThreadPool>,
    max_concurrency: usize,
    policy: FailurePolicy,
    columns: Option<Vec<String>>,
    max_retries: u32,
    retry_backoff: Duration,
}

impl<R, C> FetchDispatcher<R, C>
where
    R: IdentifierResolver,
    C: PathQueryClient,
{
    pub fn new(resolver: R, client: C, config: &PipelineConfig) -> GatherResult<Self> {
        if config.max_concurrency == 0 {
            return Err(GatherError::InvalidArgument(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        let pool = match rayon::ThreadPoolBuilder::new()
            .num_threads(config.max_concurrency)
            .thread_name(|i| format!("metapath-fetch-{i}"))
            .build()
        {
            Ok(pool) => Some(pool),
            Err(e) => {
                warn!("failed to build fetch pool, fetching sequentially: {e}");
                None
            }
        };
        Ok(Self {
            resolver,
            client,
            pool,
            max_concurrency: config.max_concurrency,
            policy: config.failure_policy,
            columns: config.columns.clone(),
            max_retries: config.max_retries,
            retry_backoff: config.retry_backoff(),
        })
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    fn with_retries<T>(
        &self,
        what: &str,
        mut op: impl FnMut() -> GatherResult<T>,
    ) -> GatherResult<T> {
        let mut attempt: u32 = 0;
        loop {
            match op() {
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(attempt, max = self.max_retries, "retrying {what}: {e}");
                    thread::sleep(self.retry_backoff * attempt);
                }
                other => return other,
            }
        }
    }

    /// Resolve, fetch, stamp, and project one triple.
    pub fn fetch_one(&self, triple: &CombinationTriple) -> GatherResult<Vec<ResultRow>> {
        let source = self.with_retries("source lookup", || {
            self.resolver.resolve(&triple.source_id)
        })?;
        let target = self.with_retries("target lookup", || {
            self.resolver.resolve(&triple.target_id)
        })?;
        let rows = self.with_retries("path query", || {
            self.client.fetch(source, target, &triple.metapath)
        })?;
        debug!(%triple, rows = rows.len(), "fetched triple");
        Ok(rows
            .into_iter()
            .map(|mut row| {
                stamp_row(&mut row, triple);
                match &self.columns {
                    Some(columns) => project_row(row, columns),
                    None => row,
                }
            })
            .collect())
    }

    /// Map `f` over the batch in input order: on the fetch pool, or on the
    /// calling thread when the pool could not be built.
    fn map_triples<T, B, F>(&self, batch: &Batch, f: F) -> B
    where
        T: Send,
        F: Fn(&CombinationTriple) -> T + Sync + Send,
        B: FromParallelIterator<T> + FromIterator<T> + Send,
    {
        match &self.pool {
            Some(pool) => pool.install(|| batch.triples.par_iter().map(&f).collect()),
            None => batch.triples.iter().map(&f).collect(),
        }
    }

    /// Fetch every triple of `batch` and aggregate the rows in input order.
    ///
    /// Under `Skip`, per-triple failures are recorded on the result and
    /// their rows omitted; any other error still aborts the batch.
    pub fn dispatch(&self, batch: &Batch) -> Result<BatchResult, BatchAbort> {
        let abort = |triple: &CombinationTriple, error: GatherError| BatchAbort {
            batch_index: batch.index,
            triple: triple.clone(),
            error,
        };

        match self.policy {
            FailurePolicy::Abort => {
                let per_triple: Result<Vec<Vec<ResultRow>>, BatchAbort> =
                    self.map_triples(batch, |t| self.fetch_one(t).map_err(|e| abort(t, e)));
                let rows = per_triple?.into_iter().flatten().collect();
                Ok(BatchResult {
                    index: batch.index,
                    attempted: batch.len(),
                    rows,
                    failures: Vec::new(),
                })
            }
            FailurePolicy::Skip => {
                let outcomes: Vec<GatherResult<Vec<ResultRow>>> =
                    self.map_triples(batch, |t| self.fetch_one(t));
                let mut result = BatchResult {
                    index: batch.index,
                    attempted: batch.len(),
                    ..BatchResult::default()
                };
                for (triple, outcome) in batch.triples.iter().zip(outcomes) {
                    match outcome {
                        Ok(rows) => result.rows.extend(rows),
                        Err(e) if e.is_per_triple() => {
                            warn!(batch = batch.index, %triple, "skipping triple: {e}");
                            result.failures.push(TripleFailure::new(triple.clone(), &e));
                        }
                        Err(e) => return Err(abort(triple, e)),
                    }
                }
                Ok(result)
            }
        }
    }
}
