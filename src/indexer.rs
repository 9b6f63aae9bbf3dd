//! Document indexing: the single writer to the lexical and vector indices.
//!
//! For each document the indexer validates it, drops it if it is older than
//! the source's watermark, resolves its numeric id, embeds it, writes it to
//! the [`LexicalIndex`] and queues the `(numeric_id, embedding)` pair. Pairs
//! are flushed to the [`VectorIndex`] once per batch; the index chunks them.
//!
//! Failures that concern one document (malformed, embedding, a storage error
//! for that document) are logged and counted in the [`IndexReport`]. The only
//! error that escapes a batch is a failed vector flush, and only after
//! lexical work for the whole batch is done; [`BatchFailure`] carries the
//! counts for that work alongside the error.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::IndexerConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::IngestError;
use crate::identity::IdRegistry;
use crate::lexical::LexicalIndex;
use crate::models::{document_key, Document, QueuedDocument, VectorEntry, Watermark};
use crate::vector::VectorIndex;
use crate::watermark::WatermarkStore;

/// Outcome counts for one indexing pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IndexReport {
    pub received: usize,
    /// Written to the lexical index.
    pub lexical: usize,
    /// Written to the vector index.
    pub vectors: usize,
    /// Older than the source watermark.
    pub stale: usize,
    pub malformed: usize,
    pub embedding_failed: usize,
    /// Skipped after an id-registry or lexical storage error.
    pub failed: usize,
    /// Not sent to the vector index because writes were paused.
    pub vector_deferred: usize,
    /// Vector writes were paused, or the backend exhausted its retries,
    /// during this pass.
    pub backend_unavailable: bool,
}

impl IndexReport {
    /// Add another report's counts to this one.
    pub fn merge(&mut self, other: &IndexReport) {
        self.received += other.received;
        self.lexical += other.lexical;
        self.vectors += other.vectors;
        self.stale += other.stale;
        self.malformed += other.malformed;
        self.embedding_failed += other.embedding_failed;
        self.failed += other.failed;
        self.vector_deferred += other.vector_deferred;
        self.backend_unavailable |= other.backend_unavailable;
    }
}

/// A batch whose vector flush failed after its lexical writes went through.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct BatchFailure {
    pub report: IndexReport,
    #[source]
    pub error: IngestError,
}

pub struct Indexer {
    lexical: Arc<dyn LexicalIndex>,
    vectors: Arc<VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    ids: Arc<dyn IdRegistry>,
    watermarks: Arc<dyn WatermarkStore>,
    config: IndexerConfig,
}

impl Indexer {
    /// Wire an indexer to its stores.
    ///
    /// Fails with [`IngestError::ConfigInvalid`] if the provider emits
    /// vectors of a different size than the index holds. A provider
    /// reporting zero dimensions turns vector indexing off.
    pub fn new(
        lexical: Arc<dyn LexicalIndex>,
        vectors: Arc<VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        ids: Arc<dyn IdRegistry>,
        watermarks: Arc<dyn WatermarkStore>,
        config: IndexerConfig,
    ) -> Result<Self, IngestError> {
        let dims = embedder.dims();
        if dims > 0 && dims != vectors.dimension() {
            return Err(IngestError::config(format!(
                "embedding model '{}' produces {} dimensions but vector namespace '{}' expects {}",
                embedder.model_name(),
                dims,
                vectors.namespace(),
                vectors.dimension()
            )));
        }
        Ok(Self {
            lexical,
            vectors,
            embedder,
            ids,
            watermarks,
            config,
        })
    }

    pub fn lexical(&self) -> &Arc<dyn LexicalIndex> {
        &self.lexical
    }

    pub fn vectors(&self) -> &Arc<VectorIndex> {
        &self.vectors
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    pub fn ids(&self) -> &Arc<dyn IdRegistry> {
        &self.ids
    }

    /// Index documents, using each source's stored watermark as the
    /// staleness floor.
    pub async fn index_documents(&self, docs: &[Document]) -> Result<IndexReport, IngestError> {
        let mut floors: HashMap<&str, Option<DateTime<Utc>>> = HashMap::new();
        let mut items = Vec::with_capacity(docs.len());
        for doc in docs {
            let floor = match floors.get(doc.source_id.as_str()) {
                Some(floor) => *floor,
                None => {
                    let floor = self.watermarks.get(&doc.source_id).await?;
                    floors.insert(&doc.source_id, floor);
                    floor
                }
            };
            items.push((doc, floor));
        }
        self.index_batch(items).await.map_err(|failure| failure.error)
    }

    /// Index documents drained from the queue. Each one is checked against
    /// the watermark its fetch cycle started from.
    ///
    /// On a failed vector flush the returned [`BatchFailure`] still counts
    /// what reached the lexical index.
    pub async fn index_queued(&self, batch: &[QueuedDocument]) -> Result<IndexReport, BatchFailure> {
        let items = batch
            .iter()
            .map(|queued| (&queued.document, queued.watermark))
            .collect();
        self.index_batch(items).await
    }

    /// Drop documents from both indices. Ids never indexed are ignored.
    /// Returns how many had a vector id.
    pub async fn remove_documents(&self, source: &str, doc_ids: &[String]) -> Result<usize, IngestError> {
        let mut numeric_ids = Vec::with_capacity(doc_ids.len());
        for doc_id in doc_ids {
            self.lexical.remove(&document_key(source, doc_id)).await?;
            if let Some(numeric_id) = self.ids.find(source, doc_id).await? {
                numeric_ids.push(numeric_id);
            }
        }
        self.vectors.remove(&numeric_ids).await?;
        info!(source, requested = doc_ids.len(), removed = numeric_ids.len(), "documents removed");
        Ok(numeric_ids.len())
    }

    /// Empty both indices. Watermarks and ids are kept.
    pub async fn clear(&self) -> Result<(), IngestError> {
        self.lexical.clear().await?;
        self.vectors.clear().await?;
        Ok(())
    }

    async fn index_batch(
        &self,
        items: Vec<(&Document, Option<DateTime<Utc>>)>,
    ) -> Result<IndexReport, BatchFailure> {
        let mut report = IndexReport {
            received: items.len(),
            ..IndexReport::default()
        };

        let embeddings_on = self.embedder.dims() > 0;
        let paused = embeddings_on && self.vectors.is_paused();
        if paused {
            warn!(
                namespace = %self.vectors.namespace(),
                "vector writes paused; indexing lexically only"
            );
        }

        report.backend_unavailable = paused;

        let mut pairs = Vec::new();
        for (doc, floor) in items {
            let lexical_before = report.lexical;
            if let Some(entry) = self
                .index_one(doc, floor, embeddings_on && !paused, &mut report)
                .await
            {
                pairs.push(entry);
            }
            if paused && report.lexical > lexical_before {
                report.vector_deferred += 1;
            }
        }

        let pairs = keep_last_per_id(pairs);
        let outcome = if pairs.is_empty() {
            Ok(())
        } else {
            self.vectors.update(&pairs).await
        };

        match outcome {
            Ok(()) => report.vectors = pairs.len(),
            Err(error) => {
                if error.is_backend_unavailable() {
                    report.vector_deferred += pairs.len();
                    report.backend_unavailable = true;
                    error!(
                        namespace = %self.vectors.namespace(),
                        pending = pairs.len(),
                        "vector backend unavailable; batch indexed lexically only"
                    );
                }
                log_report(&report);
                return Err(BatchFailure { report, error });
            }
        }

        log_report(&report);
        Ok(report)
    }

    /// Index one document lexically and return its vector entry, if any.
    async fn index_one(
        &self,
        doc: &Document,
        floor: Option<DateTime<Utc>>,
        with_vectors: bool,
        report: &mut IndexReport,
    ) -> Option<VectorEntry> {
        if let Err(e) = doc.validate() {
            warn!(source = %doc.source_id, doc_id = %doc.id, error = %e, "skipping document");
            report.malformed += 1;
            return None;
        }

        if let Some(floor) = floor {
            if Watermark::new(floor).is_stale(doc.modified_at) {
                debug!(
                    source = %doc.source_id,
                    doc_id = %doc.id,
                    modified_at = %doc.modified_at,
                    watermark = %floor,
                    "stale document skipped"
                );
                report.stale += 1;
                return None;
            }
        }

        let numeric_id = match self.ids.resolve(&doc.source_id, &doc.id).await {
            Ok(id) => id,
            Err(e) => {
                error!(source = %doc.source_id, doc_id = %doc.id, error = %e, "id resolution failed");
                report.failed += 1;
                return None;
            }
        };

        let embedding = if with_vectors {
            match self.embed(doc.embedding_text()).await {
                Ok(embedding) => Some(embedding),
                Err(e) if self.config.lexical_on_embedding_failure => {
                    warn!(
                        source = %doc.source_id,
                        doc_id = %doc.id,
                        numeric_id,
                        error = %e,
                        "embedding failed; indexing lexically only"
                    );
                    report.embedding_failed += 1;
                    None
                }
                Err(e) => {
                    warn!(
                        source = %doc.source_id,
                        doc_id = %doc.id,
                        numeric_id,
                        error = %e,
                        "embedding failed; document skipped"
                    );
                    report.embedding_failed += 1;
                    return None;
                }
            }
        } else {
            None
        };

        if let Err(e) = self.lexical.index(&doc.key(), &doc.lexical_text()).await {
            error!(source = %doc.source_id, doc_id = %doc.id, error = %e, "lexical write failed");
            report.failed += 1;
            return None;
        }
        report.lexical += 1;

        debug!(
            source = %doc.source_id,
            doc_id = %doc.id,
            numeric_id,
            vector = embedding.is_some(),
            "document indexed"
        );
        embedding.map(|embedding| VectorEntry::new(numeric_id, embedding))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, IngestError> {
        let embedding = match self.config.embed_timeout_secs {
            Some(secs) => {
                let deadline = Duration::from_secs(secs);
                tokio::time::timeout(deadline, self.embedder.embed(text))
                    .await
                    .map_err(|_| IngestError::embedding(format!("timed out after {:?}", deadline)))??
            }
            None => self.embedder.embed(text).await?,
        };

        if embedding.len() != self.vectors.dimension() {
            return Err(IngestError::DimensionMismatch {
                expected: self.vectors.dimension(),
                actual: embedding.len(),
            });
        }
        Ok(embedding)
    }
}

/// Collapse repeated ids to their last occurrence, keeping order.
fn keep_last_per_id(pairs: Vec<VectorEntry>) -> Vec<VectorEntry> {
    let mut last: HashMap<u64, usize> = HashMap::new();
    for (i, pair) in pairs.iter().enumerate() {
        last.insert(pair.numeric_id, i);
    }
    pairs
        .into_iter()
        .enumerate()
        .filter(|(i, pair)| last.get(&pair.numeric_id) == Some(i))
        .map(|(_, pair)| pair)
        .collect()
}

fn log_report(report: &IndexReport) {
    info!(
        received = report.received,
        lexical = report.lexical,
        vectors = report.vectors,
        stale = report.stale,
        malformed = report.malformed,
        embedding_failed = report.embedding_failed,
        failed = report.failed,
        vector_deferred = report.vector_deferred,
        "batch indexed"
    );
}
