//! Error taxonomy for the ingestion pipeline.
//!
//! Plumbing (config loading, database access, CLI) uses `anyhow`. The
//! variants here are the failures callers are expected to branch on:
//! per-document failures are logged and skipped, per-chunk failures are
//! retried, and only exhausted backends and invalid configuration escape
//! a batch.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    /// Source configuration is unreachable, unauthorized, or malformed.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// A document without enough data to index.
    #[error("malformed document: {0}")]
    MalformedDocument(String),

    /// The embedding provider failed for one document.
    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// A single chunk write to a vector backend failed. Retryable.
    #[error("backend write failed for namespace '{namespace}': {message}")]
    BackendWriteFailure { namespace: String, message: String },

    /// Retries exhausted; vector writes for the namespace are paused.
    #[error("vector backend unavailable for namespace '{0}'")]
    BackendUnavailable(String),

    /// A vector index already exists for the namespace.
    #[error("vector index for namespace '{0}' is already initialized")]
    AlreadyInitialized(String),

    /// No vector index has been created for the namespace.
    #[error("vector index for namespace '{0}' is not initialized")]
    NotInitialized(String),

    /// An embedding does not match the index dimension.
    #[error("embedding has {actual} dimensions, index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl IngestError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigInvalid(msg.into())
    }

    pub fn embedding(msg: impl Into<String>) -> Self {
        Self::EmbeddingUnavailable(msg.into())
    }

    pub fn is_backend_unavailable(&self) -> bool {
        matches!(self, Self::BackendUnavailable(_))
    }
}
