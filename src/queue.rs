//! In-memory ingestion queue between source pollers and the indexer.
//!
//! A bounded tokio mpsc channel: many producers (one per source poller),
//! exactly one consumer (the indexer task). `enqueue` waits when the queue
//! is full, which is the backpressure policy. The queue does not
//! deduplicate; repeated ids are overwrites for the indexer to apply.
//!
//! The queue is memory-only. Documents that were enqueued but not yet
//! indexed are lost if the process dies; because their source watermark
//! has already advanced, they are only picked up again once the item
//! changes upstream or the source is re-synced with `--full`.

use anyhow::{anyhow, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::models::QueuedDocument;

/// Constructor for the sender/receiver pair.
pub struct IngestionQueue;

impl IngestionQueue {
    /// Create a queue that buffers at most `capacity` documents.
    pub fn bounded(capacity: usize) -> (QueueSender, QueueReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (QueueSender { tx }, QueueReceiver { rx })
    }
}

/// Producer handle. Cheap to clone, one per poller.
#[derive(Clone)]
pub struct QueueSender {
    tx: mpsc::Sender<QueuedDocument>,
}

impl QueueSender {
    /// Add one document, waiting for space if the queue is full.
    ///
    /// Fails only when the consumer has gone away.
    pub async fn enqueue(&self, item: QueuedDocument) -> Result<()> {
        self.tx
            .send(item)
            .await
            .map_err(|_| anyhow!("ingestion queue is closed"))
    }

    /// Documents currently buffered.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer handle. Exactly one exists per queue.
pub struct QueueReceiver {
    rx: mpsc::Receiver<QueuedDocument>,
}

impl QueueReceiver {
    /// Wait for the next document. Returns `None` once every sender is
    /// dropped and the buffer is empty.
    pub async fn dequeue(&mut self) -> Option<QueuedDocument> {
        self.rx.recv().await
    }

    /// Like [`dequeue`](Self::dequeue), but returns `None` as soon as
    /// `shutdown` is cancelled.
    pub async fn dequeue_or_shutdown(
        &mut self,
        shutdown: &CancellationToken,
    ) -> Option<QueuedDocument> {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => None,
            item = self.rx.recv() => item,
        }
    }

    /// Take up to `max` documents that are already buffered, without waiting.
    pub fn drain_ready(&mut self, max: usize) -> Vec<QueuedDocument> {
        let mut items = Vec::new();
        while items.len() < max {
            match self.rx.try_recv() {
                Ok(item) => items.push(item),
                Err(_) => break,
            }
        }
        items
    }

    /// Stop accepting new documents. Buffered ones can still be drained.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_document;
    use std::time::Duration;

    fn queued(source: &str, id: &str) -> QueuedDocument {
        QueuedDocument::new(test_document(source, id, "body"), None)
    }

    #[tokio::test]
    async fn test_fifo_per_producer() {
        let (tx, mut rx) = IngestionQueue::bounded(8);
        for id in ["a", "b", "c"] {
            tx.enqueue(queued("fs", id)).await.unwrap();
        }
        let ids: Vec<String> = rx
            .drain_ready(10)
            .into_iter()
            .map(|q| q.document.id)
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_duplicates_are_not_dropped() {
        let (tx, mut rx) = IngestionQueue::bounded(8);
        tx.enqueue(queued("fs", "a")).await.unwrap();
        tx.enqueue(queued("fs", "a")).await.unwrap();
        assert_eq!(tx.len(), 2);
        assert_eq!(rx.drain_ready(10).len(), 2);
    }

    #[tokio::test]
    async fn test_enqueue_waits_when_full() {
        let (tx, mut rx) = IngestionQueue::bounded(1);
        tx.enqueue(queued("fs", "a")).await.unwrap();

        let blocked = tokio::time::timeout(Duration::from_millis(50), tx.enqueue(queued("fs", "b"))).await;
        assert!(blocked.is_err(), "enqueue should wait while the queue is full");

        assert_eq!(rx.dequeue().await.unwrap().document.id, "a");
        tx.enqueue(queued("fs", "b")).await.unwrap();
        assert_eq!(rx.dequeue().await.unwrap().document.id, "b");
    }

    #[tokio::test]
    async fn test_dequeue_returns_none_when_senders_dropped() {
        let (tx, mut rx) = IngestionQueue::bounded(4);
        tx.enqueue(queued("fs", "a")).await.unwrap();
        drop(tx);
        assert!(rx.dequeue().await.is_some());
        assert!(rx.dequeue().await.is_none());
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_dequeue() {
        let (_tx, mut rx) = IngestionQueue::bounded(4);
        let shutdown = CancellationToken::new();
        let waiter = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            waiter.cancel();
        });
        assert!(rx.dequeue_or_shutdown(&shutdown).await.is_none());
    }

    #[tokio::test]
    async fn test_enqueue_fails_after_receiver_dropped() {
        let (tx, rx) = IngestionQueue::bounded(4);
        drop(rx);
        assert!(tx.is_closed());
        assert!(tx.enqueue(queued("fs", "a")).await.is_err());
    }
}
