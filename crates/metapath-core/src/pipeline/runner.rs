//! Pipeline entry point: combinations -> batches -> dispatch -> sink.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::errors::{GatherError, GatherResult};
use crate::inputs::InputCollections;
use crate::models::BatchResult;
use crate::pipeline::chunker::chunk_triples;
use crate::pipeline::combinations::generate_combinations;
use crate::pipeline::dispatcher::{BatchAbort, FetchDispatcher};
use crate::pipeline::estimate::RunEstimate;
use crate::source::{IdentifierResolver, PathQueryClient};
use crate::store::results::ResultSink;

/// Shared stop request, checked between batches. In-flight requests of the
/// current batch always drain.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunStatus {
    /// Every batch of the cross product was processed.
    Completed,
    /// A batch failed and the run stopped without appending it.
    Aborted,
    Cancelled,
    /// Stopped early at `max_batches`.
    Capped,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Aborted => "aborted",
            Self::Cancelled => "cancelled",
            Self::Capped => "capped",
        }
    }
}

#[derive(Debug)]
pub struct RunSummary {
    pub run_id: String,
    pub status: RunStatus,
    /// Batches appended to the table, degraded ones included.
    pub batches_committed: usize,
    /// Committed batches that skipped at least one triple.
    pub batches_degraded: usize,
    pub triples_attempted: u64,
    pub triples_failed: u64,
    pub rows_total: u64,
    pub elapsed_ms: u64,
    pub aborted: Option<BatchAbort>,
}

impl RunSummary {
    fn new(run_id: String) -> Self {
        Self {
            run_id,
            status: RunStatus::Completed,
            batches_committed: 0,
            batches_degraded: 0,
            triples_attempted: 0,
            triples_failed: 0,
            rows_total: 0,
            elapsed_ms: 0,
            aborted: None,
        }
    }

    fn record(&mut self, batch: &BatchResult, rows_total: u64) {
        self.batches_committed += 1;
        if batch.is_degraded() {
            self.batches_degraded += 1;
        }
        self.triples_attempted += batch.attempted as u64;
        self.triples_failed += batch.failures.len() as u64;
        self.rows_total = rows_total;
    }

    /// Committed batches where every triple was fetched.
    pub fn batches_clean(&self) -> usize {
        self.batches_committed - self.batches_degraded
    }
}

fn make_run_id(fingerprint: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(fingerprint.as_bytes());
    hasher.update(nanos.to_le_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}

pub struct Pipeline<R, C> {
    config: PipelineConfig,
    dispatcher: FetchDispatcher<R, C>,
}

impl<R, C> Pipeline<R, C>
where
    R: IdentifierResolver,
    C: PathQueryClient,
{
    pub fn new(config: PipelineConfig, resolver: R, client: C) -> GatherResult<Self> {
        config.validate()?;
        let dispatcher = FetchDispatcher::new(resolver, client, &config)?;
        Ok(Self { config, dispatcher })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &FetchDispatcher<R, C> {
        &self.dispatcher
    }

    pub fn estimate(&self, inputs: &InputCollections) -> RunEstimate {
        RunEstimate::new(
            inputs.sources.len(),
            inputs.targets.len(),
            inputs.metapaths.len(),
            self.config.chunk_size,
        )
    }

    pub fn run(&self, inputs: &InputCollections, sink: &mut ResultSink) -> GatherResult<RunSummary> {
        self.run_with_cancel(inputs, sink, &CancelFlag::new())
    }

    /// Process every batch (or up to `max_batches`) into `sink`.
    ///
    /// Sink failures are fatal: the run is marked `failed` and the error
    /// returned. Fetch failures follow the configured policy and end up in
    /// the summary.
    pub fn run_with_cancel(
        &self,
        inputs: &InputCollections,
        sink: &mut ResultSink,
        cancel: &CancelFlag,
    ) -> GatherResult<RunSummary> {
        if sink.table_name() != self.config.table_name {
            return Err(GatherError::InvalidArgument(format!(
                "sink writes '{}' but the run is configured for '{}'",
                sink.table_name(),
                self.config.table_name
            )));
        }
        let started = Instant::now();
        let estimate = self.estimate(inputs);
        let fingerprint = inputs.fingerprint();
        let mut summary = RunSummary::new(make_run_id(&fingerprint));
        info!(
            run_id = %summary.run_id,
            expected_triples = estimate.expected_triples,
            expected_batches = estimate.expected_batches,
            chunk_size = self.config.chunk_size,
            max_concurrency = self.config.max_concurrency,
            policy = self.config.failure_policy.as_str(),
            "starting run"
        );
        sink.begin_run(&summary.run_id, Some(&fingerprint), estimate.expected_triples)?;

        let outcome = self.process_batches(inputs, sink, cancel, &estimate, &mut summary);
        summary.elapsed_ms = started.elapsed().as_millis() as u64;
        let batches = summary.batches_committed as u64;

        if let Err(e) = outcome {
            warn!(run_id = %summary.run_id, "run failed: {e}");
            if let Err(mark) = sink.finish_run(&summary.run_id, "failed", batches, summary.rows_total) {
                warn!(run_id = %summary.run_id, "could not mark run as failed: {mark}");
            }
            return Err(e);
        }

        sink.finish_run(
            &summary.run_id,
            summary.status.as_str(),
            batches,
            summary.rows_total,
        )?;
        info!(
            run_id = %summary.run_id,
            status = summary.status.as_str(),
            batches = summary.batches_committed,
            degraded = summary.batches_degraded,
            triples_failed = summary.triples_failed,
            rows = summary.rows_total,
            elapsed_ms = summary.elapsed_ms,
            "run finished"
        );
        Ok(summary)
    }

    fn process_batches(
        &self,
        inputs: &InputCollections,
        sink: &mut ResultSink,
        cancel: &CancelFlag,
        estimate: &RunEstimate,
        summary: &mut RunSummary,
    ) -> GatherResult<()> {
        // The table is rebuilt by every run, even one that commits nothing.
        match &self.config.schema {
            Some(schema) => sink.initialize(schema.clone())?,
            None => sink.drop_table()?,
        }

        let triples = generate_combinations(&inputs.sources, &inputs.targets, &inputs.metapaths);

        for batch in chunk_triples(triples, self.config.chunk_size)? {
            if self
                .config
                .max_batches
                .is_some_and(|cap| summary.batches_committed >= cap)
            {
                info!(cap = summary.batches_committed, "batch cap reached");
                summary.status = RunStatus::Capped;
                return Ok(());
            }
            if cancel.is_cancelled() {
                info!(batch = batch.index, "run cancelled");
                summary.status = RunStatus::Cancelled;
                return Ok(());
            }

            let result = match self.dispatcher.dispatch(&batch) {
                Ok(result) => result,
                Err(abort) => {
                    warn!(
                        batch = abort.batch_index,
                        triple = %abort.triple,
                        "aborting run: {}",
                        abort.error
                    );
                    summary.status = RunStatus::Aborted;
                    summary.aborted = Some(abort);
                    return Ok(());
                }
            };

            if !sink.is_initialized() && !result.rows.is_empty() {
                sink.initialize_from_sample(&result.rows)?;
            }

            info!(batch = batch.index, rows = result.row_count(), "adding batch {}", batch.index);
            let initialized = sink.is_initialized();
            let rows_total = if initialized {
                sink.append_with_diagnostics(&summary.run_id, &result)?
            } else {
                sink.record_failures(&summary.run_id, result.index, &result.failures)?;
                0
            };
            let first_commit = initialized && summary.rows_total == 0 && rows_total > 0;
            summary.record(&result, rows_total);

            if first_commit {
                let bytes_per_triple =
                    sink.size_bytes()? as f64 / summary.triples_attempted.max(1) as f64;
                info!(
                    bytes_per_triple,
                    projected_gib = estimate.projected_gib(bytes_per_triple),
                    "projected storage for full run"
                );
            }
        }
        Ok(())
    }
}
