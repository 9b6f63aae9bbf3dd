//! Periodic fetch loop for one source.
//!
//! A cycle reads the source's watermark, fetches everything modified at or
//! after it, enqueues each document in fetch order and only then advances
//! the watermark to the newest `modified_at` it saw. A cycle that fails or
//! is cancelled part way leaves the watermark untouched, so the next cycle
//! fetches the same items again.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::connector::SourceConnector;
use crate::error::IngestError;
use crate::models::QueuedDocument;
use crate::queue::QueueSender;
use crate::watermark::WatermarkStore;

/// What one fetch cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub source: String,
    pub fetched: usize,
    pub enqueued: usize,
    /// Watermark the cycle fetched against.
    pub since: Option<DateTime<Utc>>,
    /// Watermark in effect after the cycle.
    pub watermark: Option<DateTime<Utc>>,
}

pub struct SourcePoller {
    connector: Arc<dyn SourceConnector>,
    queue: QueueSender,
    watermarks: Arc<dyn WatermarkStore>,
}

impl SourcePoller {
    pub fn new(
        connector: Arc<dyn SourceConnector>,
        queue: QueueSender,
        watermarks: Arc<dyn WatermarkStore>,
    ) -> Self {
        Self {
            connector,
            queue,
            watermarks,
        }
    }

    pub fn source_id(&self) -> String {
        self.connector.source_id()
    }

    /// Run one fetch-and-enqueue cycle.
    pub async fn run_cycle(&self, shutdown: &CancellationToken) -> Result<CycleReport> {
        let source = self.connector.source_id();
        let cycle = Uuid::new_v4();
        let span = info_span!("poll", source = %source, cycle = %cycle);
        self.cycle_inner(source, shutdown).instrument(span).await
    }

    async fn cycle_inner(&self, source: String, shutdown: &CancellationToken) -> Result<CycleReport> {
        let since = self.watermarks.get(&source).await?;
        let timeout = self.connector.poll_config().fetch_timeout();

        let docs = tokio::select! {
            _ = shutdown.cancelled() => return Err(anyhow!("cancelled before fetch completed")),
            fetched = tokio::time::timeout(timeout, self.connector.fetch_since(since)) => {
                fetched.map_err(|_| anyhow!("fetch timed out after {:?}", timeout))??
            }
        };
        let fetched = docs.len();
        debug!(fetched, since = ?since, "fetched documents");

        let mut newest: Option<DateTime<Utc>> = None;
        let mut enqueued = 0;
        for doc in docs {
            let modified_at = doc.modified_at;
            tokio::select! {
                _ = shutdown.cancelled() => {
                    warn!(enqueued, fetched, "cycle cancelled; watermark not advanced");
                    return Err(anyhow!("cancelled after enqueuing {} of {} documents", enqueued, fetched));
                }
                sent = self.queue.enqueue(QueuedDocument::new(doc, since)) => sent?,
            }
            enqueued += 1;
            newest = newest.max(Some(modified_at));
        }

        let watermark = match newest {
            Some(newest) => Some(self.watermarks.advance(&source, newest).await?),
            None => since,
        };

        if enqueued > 0 {
            info!(enqueued, watermark = ?watermark, "cycle complete");
        } else {
            debug!("cycle complete; nothing new");
        }

        Ok(CycleReport {
            source,
            fetched,
            enqueued,
            since,
            watermark,
        })
    }

    /// Validate the source, then poll it until `shutdown` is cancelled.
    ///
    /// Configuration errors end the loop before the first fetch; failed
    /// cycles are logged and retried on the next tick.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), IngestError> {
        let source = self.source_id();
        self.connector.validate_config().await?;

        let interval = self.connector.poll_config().interval();
        info!(source = %source, interval_secs = interval.as_secs(), "poller started");

        loop {
            if let Err(e) = self.run_cycle(&shutdown).await {
                if shutdown.is_cancelled() {
                    break;
                }
                warn!(source = %source, error = %e, "poll cycle failed");
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        info!(source = %source, "poller stopped");
        Ok(())
    }
}
