//! Local persistent vector backend.
//!
//! Embeddings live in the `vectors` table as little-endian `f32` BLOBs
//! keyed by `(namespace, numeric_id)`. Queries load the namespace and rank
//! by cosine similarity in process, which is fine up to a few hundred
//! thousand entries.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use super::{VectorBackend, VectorMatch};
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::models::VectorEntry;

/// SQLite keeps at most this many entries per transaction.
const MAX_BATCH: usize = 1000;

pub struct SqliteVectorBackend {
    pool: SqlitePool,
}

impl SqliteVectorBackend {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VectorBackend for SqliteVectorBackend {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn max_batch(&self) -> usize {
        MAX_BATCH
    }

    async fn upsert(&self, namespace: &str, entries: &[VectorEntry]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for entry in entries {
            sqlx::query(
                "INSERT INTO vectors (namespace, numeric_id, dims, embedding)
                 VALUES (?, ?, ?, ?)
                 ON CONFLICT(namespace, numeric_id) DO UPDATE SET
                    dims = excluded.dims,
                    embedding = excluded.embedding",
            )
            .bind(namespace)
            .bind(entry.numeric_id as i64)
            .bind(entry.embedding.len() as i64)
            .bind(vec_to_blob(&entry.embedding))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, namespace: &str, ids: &[u64]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for id in ids {
            sqlx::query("DELETE FROM vectors WHERE namespace = ? AND numeric_id = ?")
                .bind(namespace)
                .bind(*id as i64)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn query(&self, namespace: &str, vector: &[f32], top_k: usize) -> Result<Vec<VectorMatch>> {
        let rows = sqlx::query("SELECT numeric_id, embedding FROM vectors WHERE namespace = ?")
            .bind(namespace)
            .fetch_all(&self.pool)
            .await?;

        let mut matches: Vec<VectorMatch> = rows
            .iter()
            .map(|row| {
                let id: i64 = row.get("numeric_id");
                let blob: Vec<u8> = row.get("embedding");
                VectorMatch {
                    numeric_id: id as u64,
                    score: cosine_similarity(vector, &blob_to_vec(&blob)),
                }
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
        sqlx::query("DELETE FROM vectors WHERE namespace = ?")
            .bind(namespace)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn count(&self, namespace: &str) -> Result<usize> {
        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM vectors WHERE namespace = ?")
            .bind(namespace)
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, migrate};
    use tempfile::TempDir;

    async fn backend() -> (TempDir, SqliteVectorBackend) {
        let tmp = TempDir::new().unwrap();
        let pool = db::connect_path(&tmp.path().join("vectors.sqlite")).await.unwrap();
        migrate::apply(&pool).await.unwrap();
        (tmp, SqliteVectorBackend::new(pool))
    }

    #[tokio::test]
    async fn test_upsert_overwrites_and_persists() {
        let (_tmp, backend) = backend().await;
        backend
            .upsert("ns", &[VectorEntry::new(1, vec![1.0, 0.0, 0.0])])
            .await
            .unwrap();
        backend
            .upsert("ns", &[VectorEntry::new(1, vec![0.0, 1.0, 0.0])])
            .await
            .unwrap();
        assert_eq!(backend.count("ns").await.unwrap(), 1);

        let hits = backend.query("ns", &[0.0, 1.0, 0.0], 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_delete_and_namespaces() {
        let (_tmp, backend) = backend().await;
        let entries = vec![
            VectorEntry::new(1, vec![1.0, 0.0]),
            VectorEntry::new(2, vec![0.0, 1.0]),
        ];
        backend.upsert("a", &entries).await.unwrap();
        backend.upsert("b", &entries).await.unwrap();

        backend.delete("a", &[2, 99]).await.unwrap();
        assert_eq!(backend.count("a").await.unwrap(), 1);
        assert_eq!(backend.count("b").await.unwrap(), 2);

        backend.delete_all("b").await.unwrap();
        assert_eq!(backend.count("b").await.unwrap(), 0);
        assert_eq!(backend.count("a").await.unwrap(), 1);
        backend.ping().await.unwrap();
    }
}
