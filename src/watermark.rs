//! Per-source watermark storage.
//!
//! A watermark is the newest `modified_at` a source has successfully handed
//! to the ingestion queue. Stores only ever move a watermark forward.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::SqlitePool;

use crate::models::Watermark;

#[async_trait]
pub trait WatermarkStore: Send + Sync {
    /// Current watermark for `source`, if it has ever been advanced.
    async fn get(&self, source: &str) -> Result<Option<DateTime<Utc>>>;

    /// Advance the watermark to `candidate` if it is newer. Returns the
    /// watermark in effect afterwards.
    async fn advance(&self, source: &str, candidate: DateTime<Utc>) -> Result<DateTime<Utc>>;

    /// Forget the watermark so the next fetch starts from scratch.
    async fn reset(&self, source: &str) -> Result<()>;

    /// All known watermarks, ordered by source.
    async fn list(&self) -> Result<Vec<(String, DateTime<Utc>)>>;
}

/// Watermarks held in process memory; lost on restart.
#[derive(Default)]
pub struct InMemoryWatermarks {
    marks: RwLock<HashMap<String, Watermark>>,
}

impl InMemoryWatermarks {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WatermarkStore for InMemoryWatermarks {
    async fn get(&self, source: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .marks
            .read()
            .unwrap()
            .get(source)
            .map(|mark| mark.last_index_time))
    }

    async fn advance(&self, source: &str, candidate: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let mut marks = self.marks.write().unwrap();
        let mark = marks
            .entry(source.to_string())
            .or_insert_with(|| Watermark::new(candidate));
        mark.advance(candidate);
        Ok(mark.last_index_time)
    }

    async fn reset(&self, source: &str) -> Result<()> {
        self.marks.write().unwrap().remove(source);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<(String, DateTime<Utc>)>> {
        let mut all: Vec<(String, DateTime<Utc>)> = self
            .marks
            .read()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), v.last_index_time))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(all)
    }
}

/// Watermarks persisted in the `watermarks` table.
///
/// Cursors are stored as fixed-width RFC 3339 UTC strings, so SQL string
/// comparison matches time ordering.
pub struct SqliteWatermarks {
    pool: SqlitePool,
}

impl SqliteWatermarks {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn encode_cursor(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_cursor(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("Invalid watermark cursor: {}", s))?
        .with_timezone(&Utc))
}

#[async_trait]
impl WatermarkStore for SqliteWatermarks {
    async fn get(&self, source: &str) -> Result<Option<DateTime<Utc>>> {
        let result: Option<String> =
            sqlx::query_scalar("SELECT cursor FROM watermarks WHERE source = ?")
                .bind(source)
                .fetch_optional(&self.pool)
                .await?;

        result.as_deref().map(decode_cursor).transpose()
    }

    async fn advance(&self, source: &str, candidate: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let now = Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO watermarks (source, cursor, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(source) DO UPDATE SET cursor = excluded.cursor, updated_at = excluded.updated_at
            WHERE excluded.cursor > watermarks.cursor
            "#,
        )
        .bind(source)
        .bind(encode_cursor(candidate))
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get(source)
            .await?
            .ok_or_else(|| anyhow::anyhow!("watermark for '{}' vanished after advance", source))
    }

    async fn reset(&self, source: &str) -> Result<()> {
        sqlx::query("DELETE FROM watermarks WHERE source = ?")
            .bind(source)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<(String, DateTime<Utc>)>> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT source, cursor FROM watermarks ORDER BY source")
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter()
            .map(|(source, cursor)| Ok((source, decode_cursor(&cursor)?)))
            .collect()
    }
}
