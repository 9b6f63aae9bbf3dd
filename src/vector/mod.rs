//! Namespaced vector index over pluggable nearest-neighbour backends.
//!
//! [`VectorBackend`] is the thin adapter each backend implements: it makes
//! one call per method and may reject requests larger than
//! [`max_batch`](VectorBackend::max_batch). [`VectorIndex`] sits on top and
//! owns everything callers should not have to think about:
//!
//! - splitting `update`/`remove` into chunks no larger than the ceiling,
//! - per-call timeouts and bounded exponential backoff,
//! - pausing writes for the namespace once retries are exhausted, until
//!   [`resume`](VectorIndex::resume) or a passing
//!   [`health_check`](VectorIndex::health_check).
//!
//! [`VectorIndexRegistry`] hands out exactly one index per namespace.
//!
//! | Backend | Module |
//! |---------|--------|
//! | In-memory, brute-force cosine | [`memory`] |
//! | SQLite BLOBs, brute-force cosine | [`sqlite`] |
//! | Remote HTTP data plane | [`remote`] |

pub mod memory;
pub mod remote;
pub mod sqlite;

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::{debug, error, info, warn};

use crate::config::{VectorBackendKind, VectorConfig};
use crate::error::IngestError;
use crate::models::VectorEntry;

/// One nearest-neighbour match.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorMatch {
    pub numeric_id: u64,
    /// Backend similarity; higher is more similar.
    pub score: f32,
}

/// Raw backend operations. Each method is exactly one backend call.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    /// Short backend name for logs (e.g. `"sqlite"`).
    fn name(&self) -> &str;

    /// Most entries or ids a single call may carry.
    fn max_batch(&self) -> usize;

    /// Insert or overwrite entries.
    async fn upsert(&self, namespace: &str, entries: &[VectorEntry]) -> Result<()>;

    /// Delete entries by id. Missing ids are not an error.
    async fn delete(&self, namespace: &str, ids: &[u64]) -> Result<()>;

    /// `top_k` nearest entries to `vector`, most similar first.
    async fn query(&self, namespace: &str, vector: &[f32], top_k: usize)
        -> Result<Vec<VectorMatch>>;

    /// Delete every entry in `namespace`.
    async fn delete_all(&self, namespace: &str) -> Result<()>;

    /// Number of entries in `namespace`.
    async fn count(&self, namespace: &str) -> Result<usize>;

    /// Cheap reachability probe.
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// Tuning for a [`VectorIndex`].
#[derive(Debug, Clone)]
pub struct VectorIndexOptions {
    pub namespace: String,
    pub dimension: usize,
    /// Upper bound on entries per call; the effective ceiling is the lower
    /// of this and the backend's own limit.
    pub max_batch: usize,
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Per-call timeout. A timeout counts as a retryable failure.
    pub timeout: Duration,
}

impl VectorIndexOptions {
    pub fn new(namespace: impl Into<String>, dimension: usize) -> Self {
        Self {
            namespace: namespace.into(),
            dimension,
            max_batch: 1000,
            max_retries: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn from_config(config: &VectorConfig) -> Self {
        Self {
            namespace: config.namespace.clone(),
            dimension: config.dimension,
            max_batch: config.max_batch,
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Delay before retry number `attempt` (1-based).
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << (attempt.saturating_sub(1)).min(16);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Build the backend selected by `[vector].backend`.
pub fn create_backend(config: &VectorConfig, pool: &SqlitePool) -> Result<Arc<dyn VectorBackend>> {
    match config.backend {
        VectorBackendKind::Local => Ok(Arc::new(sqlite::SqliteVectorBackend::new(pool.clone()))),
        VectorBackendKind::Remote => {
            let remote = config
                .remote
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("[vector.remote] is not configured"))?;
            Ok(Arc::new(remote::RemoteVectorBackend::from_config(
                remote,
                std::time::Duration::from_secs(config.timeout_secs),
            )?))
        }
    }
}

/// A vector index bound to one namespace of one backend.
pub struct VectorIndex {
    backend: Arc<dyn VectorBackend>,
    options: VectorIndexOptions,
    paused: AtomicBool,
}

impl VectorIndex {
    fn new(backend: Arc<dyn VectorBackend>, options: VectorIndexOptions) -> Self {
        Self {
            backend,
            options,
            paused: AtomicBool::new(false),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.options.namespace
    }

    pub fn dimension(&self) -> usize {
        self.options.dimension
    }

    /// Largest number of entries sent in one backend call.
    pub fn ceiling(&self) -> usize {
        self.options.max_batch.min(self.backend.max_batch()).max(1)
    }

    /// Whether writes are paused after an exhausted retry budget.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Re-enable writes.
    pub fn resume(&self) {
        if self.paused.swap(false, Ordering::SeqCst) {
            info!(namespace = %self.namespace(), "vector writes resumed");
        }
    }

    /// Probe the backend; resume writes when it answers. Returns whether
    /// the backend is reachable.
    pub async fn health_check(&self) -> bool {
        match tokio::time::timeout(self.options.timeout, self.backend.ping()).await {
            Ok(Ok(())) => {
                self.resume();
                true
            }
            Ok(Err(e)) => {
                debug!(namespace = %self.namespace(), error = %e, "vector backend health check failed");
                false
            }
            Err(_) => {
                debug!(namespace = %self.namespace(), "vector backend health check timed out");
                false
            }
        }
    }

    /// Upsert entries, chunked to the backend ceiling.
    ///
    /// Overwrites per id, so replaying the same entries yields the same end
    /// state. Chunks are sent in input order; each chunk is retried on its
    /// own. Once a chunk exhausts its retries, writes are paused and
    /// [`IngestError::BackendUnavailable`] is returned; earlier chunks stay
    /// written.
    pub async fn update(&self, entries: &[VectorEntry]) -> Result<(), IngestError> {
        if let Some(bad) = entries
            .iter()
            .find(|e| e.embedding.len() != self.options.dimension)
        {
            return Err(IngestError::DimensionMismatch {
                expected: self.options.dimension,
                actual: bad.embedding.len(),
            });
        }
        self.ensure_writable()?;

        let namespace = self.namespace();
        for (chunk_index, chunk) in entries.chunks(self.ceiling()).enumerate() {
            self.write_with_retry("upsert", chunk_index, || {
                self.backend.upsert(namespace, chunk)
            })
            .await?;
            debug!(namespace, chunk = chunk_index, size = chunk.len(), "vector chunk upserted");
        }
        Ok(())
    }

    /// Delete entries by id, chunked like [`update`](Self::update).
    /// Unknown ids are ignored.
    pub async fn remove(&self, ids: &[u64]) -> Result<(), IngestError> {
        self.ensure_writable()?;

        let namespace = self.namespace();
        for (chunk_index, chunk) in ids.chunks(self.ceiling()).enumerate() {
            self.write_with_retry("delete", chunk_index, || {
                self.backend.delete(namespace, chunk)
            })
            .await?;
            debug!(namespace, chunk = chunk_index, size = chunk.len(), "vector chunk deleted");
        }
        Ok(())
    }

    /// For each query vector, the `top_k` nearest ids, most similar first.
    ///
    /// Order among equal scores is whatever the backend returns.
    pub async fn search(
        &self,
        queries: &[Vec<f32>],
        top_k: usize,
    ) -> Result<Vec<Vec<VectorMatch>>, IngestError> {
        let mut results = Vec::with_capacity(queries.len());
        for query in queries {
            if query.len() != self.options.dimension {
                return Err(IngestError::DimensionMismatch {
                    expected: self.options.dimension,
                    actual: query.len(),
                });
            }
            if top_k == 0 {
                results.push(Vec::new());
                continue;
            }
            let matches = self
                .call_with_retry("query", 0, false, || {
                    self.backend.query(self.namespace(), query, top_k)
                })
                .await?;
            results.push(matches);
        }
        Ok(results)
    }

    /// Remove every entry in this namespace. Irreversible.
    pub async fn clear(&self) -> Result<(), IngestError> {
        self.call_with_retry("delete_all", 0, false, || {
            self.backend.delete_all(self.namespace())
        })
        .await?;
        info!(namespace = %self.namespace(), "vector namespace cleared");
        Ok(())
    }

    /// Number of entries stored in this namespace.
    pub async fn count(&self) -> Result<usize, IngestError> {
        self.call_with_retry("count", 0, false, || self.backend.count(self.namespace()))
            .await
    }

    fn ensure_writable(&self) -> Result<(), IngestError> {
        if self.is_paused() {
            Err(IngestError::BackendUnavailable(self.namespace().to_string()))
        } else {
            Ok(())
        }
    }

    async fn write_with_retry<F, Fut>(&self, op: &str, chunk: usize, call: F) -> Result<(), IngestError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        self.call_with_retry(op, chunk, true, call).await
    }

    /// Run `call` with a timeout, retrying with backoff. When the budget is
    /// exhausted, writes are paused if `pause_on_exhaustion` is set.
    async fn call_with_retry<T, F, Fut>(
        &self,
        op: &str,
        chunk: usize,
        pause_on_exhaustion: bool,
        mut call: F,
    ) -> Result<T, IngestError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let namespace = self.namespace();
        let mut last_err: Option<IngestError> = None;

        for attempt in 0..=self.options.max_retries {
            if attempt > 0 {
                let delay = self.options.backoff(attempt);
                tokio::time::sleep(delay).await;
            }

            let outcome = tokio::time::timeout(self.options.timeout, call()).await;
            let message = match outcome {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!("timed out after {:?}", self.options.timeout),
            };

            warn!(
                namespace,
                backend = self.backend.name(),
                op,
                chunk,
                attempt,
                error = %message,
                "vector backend call failed"
            );
            last_err = Some(IngestError::BackendWriteFailure {
                namespace: namespace.to_string(),
                message,
            });
        }

        if pause_on_exhaustion {
            self.paused.store(true, Ordering::SeqCst);
            error!(
                namespace,
                backend = self.backend.name(),
                op,
                chunk,
                "retries exhausted; pausing vector writes"
            );
            return Err(IngestError::BackendUnavailable(namespace.to_string()));
        }

        Err(last_err.unwrap_or_else(|| IngestError::BackendUnavailable(namespace.to_string())))
    }
}

/// Hands out one [`VectorIndex`] per namespace.
///
/// Passed explicitly to whoever needs an index; creation is guarded so a
/// second `create` for the same namespace fails instead of replacing the
/// live instance.
#[derive(Default)]
pub struct VectorIndexRegistry {
    indexes: Mutex<HashMap<String, Arc<VectorIndex>>>,
}

impl VectorIndexRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Construct the index for `options.namespace`.
    ///
    /// Fails with [`IngestError::AlreadyInitialized`] if one exists.
    pub fn create(
        &self,
        backend: Arc<dyn VectorBackend>,
        options: VectorIndexOptions,
    ) -> Result<Arc<VectorIndex>, IngestError> {
        let mut indexes = self.indexes.lock().unwrap();
        if indexes.contains_key(&options.namespace) {
            return Err(IngestError::AlreadyInitialized(options.namespace));
        }
        let namespace = options.namespace.clone();
        let index = Arc::new(VectorIndex::new(backend, options));
        indexes.insert(namespace.clone(), Arc::clone(&index));
        info!(namespace = %namespace, backend = index.backend.name(), ceiling = index.ceiling(), "vector index created");
        Ok(index)
    }

    /// The index for `namespace`.
    ///
    /// Fails with [`IngestError::NotInitialized`] before `create`.
    pub fn get(&self, namespace: &str) -> Result<Arc<VectorIndex>, IngestError> {
        self.indexes
            .lock()
            .unwrap()
            .get(namespace)
            .cloned()
            .ok_or_else(|| IngestError::NotInitialized(namespace.to_string()))
    }

    /// Namespaces with a live index, sorted.
    pub fn namespaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self.indexes.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }
}
