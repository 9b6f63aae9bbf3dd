//! Task wiring for continuous and one-shot ingestion.
//!
//! [`Pipeline::run`] spawns one [`SourcePoller`] per source, a single
//! consumer that drains the queue into the [`Indexer`], and a health task
//! that resumes a paused vector index once its backend answers again.
//! Cancelling the shutdown token stops pollers and the consumer from
//! pulling new work; a batch already inside the indexer runs to completion.
//!
//! [`Pipeline::sync`] runs exactly one cycle per selected source and
//! returns once everything fetched has been indexed. An exhausted vector
//! backend does not stop either mode; it is reported through
//! [`IndexReport::backend_unavailable`].

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::connector::{ConnectorRegistry, SourceConnector};
use crate::error::IngestError;
use crate::indexer::{IndexReport, Indexer};
use crate::poller::{CycleReport, SourcePoller};
use crate::queue::{IngestionQueue, QueueReceiver};
use crate::vector::VectorIndex;
use crate::watermark::WatermarkStore;

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub queue_capacity: usize,
    /// Most documents handed to the indexer per pass.
    pub batch_size: usize,
    pub health_check_interval: Duration,
}

impl PipelineOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            queue_capacity: config.queue.capacity,
            batch_size: config.indexer.batch_size,
            health_check_interval: Duration::from_secs(config.vector.health_check_interval_secs),
        }
    }
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            batch_size: 64,
            health_check_interval: Duration::from_secs(60),
        }
    }
}

/// Outcome of a one-shot sync.
#[derive(Debug, Default)]
pub struct SyncSummary {
    pub cycles: Vec<CycleReport>,
    /// `(source, error)` for each cycle that failed.
    pub failures: Vec<(String, String)>,
    pub indexed: IndexReport,
}

impl SyncSummary {
    /// True when any fetch failed or vector writes were left undone.
    pub fn is_degraded(&self) -> bool {
        !self.failures.is_empty() || self.indexed.backend_unavailable
    }
}

pub struct Pipeline {
    indexer: Arc<Indexer>,
    connectors: ConnectorRegistry,
    watermarks: Arc<dyn WatermarkStore>,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(
        indexer: Arc<Indexer>,
        connectors: ConnectorRegistry,
        watermarks: Arc<dyn WatermarkStore>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            indexer,
            connectors,
            watermarks,
            options,
        }
    }

    pub fn connectors(&self) -> &ConnectorRegistry {
        &self.connectors
    }

    /// Poll every source until `shutdown` is cancelled.
    ///
    /// Every source is validated first; an invalid one fails the call with
    /// [`IngestError::ConfigInvalid`] before any fetch starts.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<IndexReport, IngestError> {
        self.connectors.validate_all().await?;

        let (tx, rx) = IngestionQueue::bounded(self.options.queue_capacity);

        let mut pollers = Vec::new();
        for connector in self.connectors.connectors() {
            let poller = SourcePoller::new(Arc::clone(connector), tx.clone(), Arc::clone(&self.watermarks));
            pollers.push(tokio::spawn(poller.run(shutdown.clone())));
        }
        drop(tx);

        let health = tokio::spawn(health_loop(
            Arc::clone(self.indexer.vectors()),
            self.options.health_check_interval,
            shutdown.clone(),
        ));

        info!(sources = self.connectors.len(), "pipeline started");
        let totals = consume(&self.indexer, rx, self.options.batch_size, &shutdown).await;

        for poller in pollers {
            match poller.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "poller exited with error"),
                Err(e) => error!(error = %e, "poller task failed"),
            }
        }
        if let Err(e) = health.await {
            error!(error = %e, "health task failed");
        }

        info!(
            received = totals.received,
            lexical = totals.lexical,
            vectors = totals.vectors,
            "pipeline stopped"
        );
        Ok(totals)
    }

    /// Run one cycle for each of `sources` and index the results.
    ///
    /// A source whose configuration is invalid fails the call; a cycle that
    /// fails at fetch time is recorded in [`SyncSummary::failures`]. Watermarks
    /// advance as soon as items are enqueued, so documents that missed the
    /// vector index because the backend gave out are counted in
    /// `indexed.vector_deferred` and flagged by `indexed.backend_unavailable`.
    pub async fn sync(&self, sources: &[Arc<dyn SourceConnector>]) -> Result<SyncSummary, IngestError> {
        for source in sources {
            source.validate_config().await?;
        }

        let (tx, rx) = IngestionQueue::bounded(self.options.queue_capacity);
        // Never cancelled: the consumer stops when the last sender drops.
        let never = CancellationToken::new();

        let produce = async {
            let mut cycles = Vec::new();
            let mut failures = Vec::new();
            for source in sources {
                let poller = SourcePoller::new(Arc::clone(source), tx.clone(), Arc::clone(&self.watermarks));
                match poller.run_cycle(&never).await {
                    Ok(report) => cycles.push(report),
                    Err(e) => {
                        warn!(source = %source.source_id(), error = %e, "sync cycle failed");
                        failures.push((source.source_id(), e.to_string()));
                    }
                }
            }
            drop(tx);
            (cycles, failures)
        };

        let ((cycles, failures), indexed) = tokio::join!(
            produce,
            consume(&self.indexer, rx, self.options.batch_size, &never)
        );

        Ok(SyncSummary {
            cycles,
            failures,
            indexed,
        })
    }
}

/// Drain the queue into the indexer in batches of up to `batch_size`.
///
/// Returns when `shutdown` is cancelled or every sender is gone.
async fn consume(
    indexer: &Indexer,
    mut rx: QueueReceiver,
    batch_size: usize,
    shutdown: &CancellationToken,
) -> IndexReport {
    let mut totals = IndexReport::default();
    let batch_size = batch_size.max(1);

    while let Some(first) = rx.dequeue_or_shutdown(shutdown).await {
        let mut batch = vec![first];
        batch.extend(rx.drain_ready(batch_size - 1));

        match indexer.index_queued(&batch).await {
            Ok(report) => totals.merge(&report),
            Err(failure) => {
                if failure.error.is_backend_unavailable() {
                    warn!(error = %failure.error, batch = batch.len(), "continuing with lexical-only indexing");
                } else {
                    error!(error = %failure.error, batch = batch.len(), "indexing batch failed");
                }
                totals.merge(&failure.report);
            }
        }
    }

    rx.close();
    totals
}

/// Periodically probe a paused vector index and resume it when healthy.
async fn health_loop(vectors: Arc<VectorIndex>, interval: Duration, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
        if vectors.is_paused() && vectors.health_check().await {
            info!(namespace = %vectors.namespace(), "vector backend healthy again");
        }
    }
}
