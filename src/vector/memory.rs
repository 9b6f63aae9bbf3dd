//! In-memory vector backend for tests and ephemeral runs.
//!
//! Namespaces are `HashMap`s behind a `std::sync::RwLock`. Queries are
//! brute-force cosine similarity over every entry in the namespace.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{bail, Result};
use async_trait::async_trait;

use super::{VectorBackend, VectorMatch};
use crate::embedding::cosine_similarity;
use crate::models::VectorEntry;

/// Largest call the in-memory backend accepts by default.
pub const DEFAULT_MAX_BATCH: usize = 1000;

pub struct InMemoryVectorBackend {
    namespaces: RwLock<HashMap<String, HashMap<u64, Vec<f32>>>>,
    max_batch: usize,
}

impl InMemoryVectorBackend {
    pub fn new() -> Self {
        Self::with_max_batch(DEFAULT_MAX_BATCH)
    }

    /// Backend that rejects calls carrying more than `max_batch` items.
    pub fn with_max_batch(max_batch: usize) -> Self {
        Self {
            namespaces: RwLock::new(HashMap::new()),
            max_batch,
        }
    }

    fn check_size(&self, n: usize) -> Result<()> {
        if n > self.max_batch {
            bail!("batch of {} exceeds backend limit {}", n, self.max_batch);
        }
        Ok(())
    }
}

impl Default for InMemoryVectorBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorBackend for InMemoryVectorBackend {
    fn name(&self) -> &str {
        "memory"
    }

    fn max_batch(&self) -> usize {
        self.max_batch
    }

    async fn upsert(&self, namespace: &str, entries: &[VectorEntry]) -> Result<()> {
        self.check_size(entries.len())?;
        let mut namespaces = self.namespaces.write().unwrap();
        let ns = namespaces.entry(namespace.to_string()).or_default();
        for entry in entries {
            ns.insert(entry.numeric_id, entry.embedding.clone());
        }
        Ok(())
    }

    async fn delete(&self, namespace: &str, ids: &[u64]) -> Result<()> {
        self.check_size(ids.len())?;
        let mut namespaces = self.namespaces.write().unwrap();
        if let Some(ns) = namespaces.get_mut(namespace) {
            for id in ids {
                ns.remove(id);
            }
        }
        Ok(())
    }

    async fn query(&self, namespace: &str, vector: &[f32], top_k: usize) -> Result<Vec<VectorMatch>> {
        let namespaces = self.namespaces.read().unwrap();
        let Some(ns) = namespaces.get(namespace) else {
            return Ok(Vec::new());
        };

        let mut matches: Vec<VectorMatch> = ns
            .iter()
            .map(|(id, embedding)| VectorMatch {
                numeric_id: *id,
                score: cosine_similarity(vector, embedding),
            })
            .collect();
        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.numeric_id.cmp(&b.numeric_id))
        });
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn delete_all(&self, namespace: &str) -> Result<()> {
        self.namespaces.write().unwrap().remove(namespace);
        Ok(())
    }

    async fn count(&self, namespace: &str) -> Result<usize> {
        Ok(self
            .namespaces
            .read()
            .unwrap()
            .get(namespace)
            .map(|ns| ns.len())
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rejects_oversized_calls() {
        let backend = InMemoryVectorBackend::with_max_batch(2);
        let entries: Vec<VectorEntry> = (1..=3).map(|i| VectorEntry::new(i, vec![1.0])).collect();
        assert!(backend.upsert("ns", &entries).await.is_err());
        assert!(backend.upsert("ns", &entries[..2]).await.is_ok());
        assert!(backend.delete("ns", &[1, 2, 3]).await.is_err());
    }

    #[tokio::test]
    async fn test_query_orders_by_similarity() {
        let backend = InMemoryVectorBackend::new();
        backend
            .upsert(
                "ns",
                &[
                    VectorEntry::new(1, vec![1.0, 0.0]),
                    VectorEntry::new(2, vec![0.7, 0.7]),
                    VectorEntry::new(3, vec![0.0, 1.0]),
                ],
            )
            .await
            .unwrap();

        let hits = backend.query("ns", &[1.0, 0.1], 2).await.unwrap();
        let ids: Vec<u64> = hits.iter().map(|m| m.numeric_id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert!(backend.query("other", &[1.0, 0.0], 2).await.unwrap().is_empty());
    }
}
