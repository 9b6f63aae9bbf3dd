//! Translation between source-native document ids and the integer ids
//! vector backends require.
//!
//! Ids come from an explicit registry rather than a hash: each
//! `(source, doc_id)` pair is assigned the next integer the first time it is
//! seen and keeps it for the lifetime of the registry. Numeric ids start at
//! 1 and are never reused, so the mapping is a bijection and reversible.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::SqlitePool;

/// A `(source, doc_id)` pair as stored in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentRef {
    pub source: String,
    pub doc_id: String,
}

impl DocumentRef {
    pub fn key(&self) -> String {
        crate::models::document_key(&self.source, &self.doc_id)
    }
}

#[async_trait]
pub trait IdRegistry: Send + Sync {
    /// Numeric id for the document, allocating one on first sight.
    async fn resolve(&self, source: &str, doc_id: &str) -> Result<u64>;

    /// Numeric id for the document if one was ever allocated.
    async fn find(&self, source: &str, doc_id: &str) -> Result<Option<u64>>;

    /// Reverse lookup.
    async fn lookup(&self, numeric_id: u64) -> Result<Option<DocumentRef>>;
}

#[derive(Default)]
struct RegistryState {
    by_ref: HashMap<DocumentRef, u64>,
    by_id: HashMap<u64, DocumentRef>,
    next_id: u64,
}

/// Registry kept in process memory.
#[derive(Default)]
pub struct InMemoryIdRegistry {
    state: Mutex<RegistryState>,
}

impl InMemoryIdRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl IdRegistry for InMemoryIdRegistry {
    async fn resolve(&self, source: &str, doc_id: &str) -> Result<u64> {
        let key = DocumentRef {
            source: source.to_string(),
            doc_id: doc_id.to_string(),
        };
        let mut state = self.state.lock().unwrap();
        if let Some(id) = state.by_ref.get(&key) {
            return Ok(*id);
        }
        state.next_id += 1;
        let id = state.next_id;
        state.by_ref.insert(key.clone(), id);
        state.by_id.insert(id, key);
        Ok(id)
    }

    async fn find(&self, source: &str, doc_id: &str) -> Result<Option<u64>> {
        let key = DocumentRef {
            source: source.to_string(),
            doc_id: doc_id.to_string(),
        };
        Ok(self.state.lock().unwrap().by_ref.get(&key).copied())
    }

    async fn lookup(&self, numeric_id: u64) -> Result<Option<DocumentRef>> {
        Ok(self.state.lock().unwrap().by_id.get(&numeric_id).cloned())
    }
}

/// Registry persisted in the `id_registry` table.
pub struct SqliteIdRegistry {
    pool: SqlitePool,
}

impl SqliteIdRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdRegistry for SqliteIdRegistry {
    async fn resolve(&self, source: &str, doc_id: &str) -> Result<u64> {
        sqlx::query(
            "INSERT OR IGNORE INTO id_registry (source, doc_id, created_at) VALUES (?, ?, ?)",
        )
        .bind(source)
        .bind(doc_id)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        self.find(source, doc_id).await?.ok_or_else(|| {
            anyhow::anyhow!("id registry lost the entry for {}:{}", source, doc_id)
        })
    }

    async fn find(&self, source: &str, doc_id: &str) -> Result<Option<u64>> {
        let id: Option<i64> = sqlx::query_scalar(
            "SELECT numeric_id FROM id_registry WHERE source = ? AND doc_id = ?",
        )
        .bind(source)
        .bind(doc_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(id.map(|v| v as u64))
    }

    async fn lookup(&self, numeric_id: u64) -> Result<Option<DocumentRef>> {
        let row: Option<(String, String)> =
            sqlx::query_as("SELECT source, doc_id FROM id_registry WHERE numeric_id = ?")
                .bind(numeric_id as i64)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(source, doc_id)| DocumentRef { source, doc_id }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, migrate};
    use tempfile::TempDir;

    async fn check_registry(registry: &dyn IdRegistry) {
        let a = registry.resolve("fs", "a.md").await.unwrap();
        let b = registry.resolve("fs", "b.md").await.unwrap();
        assert_ne!(a, b);

        // Same document, same id.
        assert_eq!(registry.resolve("fs", "a.md").await.unwrap(), a);

        // Same doc id in another source is a different document.
        let other = registry.resolve("notion", "a.md").await.unwrap();
        assert_ne!(other, a);

        assert_eq!(registry.find("fs", "b.md").await.unwrap(), Some(b));
        assert_eq!(registry.find("fs", "missing").await.unwrap(), None);

        let back = registry.lookup(a).await.unwrap().unwrap();
        assert_eq!(back.source, "fs");
        assert_eq!(back.doc_id, "a.md");
        assert_eq!(back.key(), "fs:a.md");
        assert!(registry.lookup(9_999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_in_memory_registry() {
        let registry = InMemoryIdRegistry::new();
        check_registry(&registry).await;
        assert_eq!(registry.len(), 3);
    }

    #[tokio::test]
    async fn test_sqlite_registry_survives_reconnect() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("ids.sqlite");
        let pool = db::connect_path(&path).await.unwrap();
        migrate::apply(&pool).await.unwrap();
        check_registry(&SqliteIdRegistry::new(pool.clone())).await;
        let a = SqliteIdRegistry::new(pool.clone())
            .resolve("fs", "a.md")
            .await
            .unwrap();
        pool.close().await;

        let pool = db::connect_path(&path).await.unwrap();
        let registry = SqliteIdRegistry::new(pool);
        assert_eq!(registry.resolve("fs", "a.md").await.unwrap(), a);
        let fresh = registry.resolve("fs", "c.md").await.unwrap();
        assert!(fresh > a);
    }
}
