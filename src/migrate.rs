use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table docsift needs. Safe to run repeatedly.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // Per-source watermarks
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS watermarks (
            source TEXT PRIMARY KEY,
            cursor TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Document id -> numeric id registry. AUTOINCREMENT keeps ids from
    // being reused after a row is deleted.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS id_registry (
            numeric_id INTEGER PRIMARY KEY AUTOINCREMENT,
            source TEXT NOT NULL,
            doc_id TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(source, doc_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Local vector backend
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vectors (
            namespace TEXT NOT NULL,
            numeric_id INTEGER NOT NULL,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            PRIMARY KEY (namespace, numeric_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 CREATE is not idempotent natively, so we check first
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='lexical_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE lexical_fts USING fts5(
                doc_key UNINDEXED,
                text
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    Ok(())
}
