//! Keyword index with BM25 relevance ranking.
//!
//! Two implementations share the [`LexicalIndex`] trait:
//!
//! - [`InMemoryLexicalIndex`] keeps per-document term frequencies and
//!   scores with Okapi BM25 (`k1 = 1.2`, `b = 0.75`).
//! - [`SqliteLexicalIndex`] stores text in an FTS5 table and ranks with
//!   SQLite's built-in `bm25()`.
//!
//! Indexing an id that is already present replaces its text and term
//! statistics.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

const BM25_K1: f64 = 1.2;
const BM25_B: f64 = 0.75;

/// One ranked keyword match.
#[derive(Debug, Clone, PartialEq)]
pub struct LexicalHit {
    pub id: String,
    /// Higher is more relevant.
    pub score: f64,
}

#[async_trait]
pub trait LexicalIndex: Send + Sync {
    /// Add or replace the searchable text for `id`.
    async fn index(&self, id: &str, text: &str) -> Result<()>;

    /// Drop `id`. Unknown ids are ignored.
    async fn remove(&self, id: &str) -> Result<()>;

    /// Up to `top_k` ids ranked by relevance, best first.
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<LexicalHit>>;

    /// Drop every document.
    async fn clear(&self) -> Result<()>;

    /// Number of indexed documents.
    async fn len(&self) -> Result<usize>;
}

/// Lowercased alphanumeric terms of `text`.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

fn sort_hits(hits: &mut [LexicalHit]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
}

// ============ In-memory BM25 ============

struct TermStats {
    freqs: HashMap<String, u32>,
    len: usize,
}

#[derive(Default)]
struct Bm25State {
    docs: HashMap<String, TermStats>,
    doc_freq: HashMap<String, usize>,
    total_len: usize,
}

impl Bm25State {
    fn remove(&mut self, id: &str) {
        if let Some(old) = self.docs.remove(id) {
            self.total_len -= old.len;
            for term in old.freqs.keys() {
                if let Some(df) = self.doc_freq.get_mut(term) {
                    *df -= 1;
                    if *df == 0 {
                        self.doc_freq.remove(term);
                    }
                }
            }
        }
    }

    fn insert(&mut self, id: &str, text: &str) {
        let tokens = tokenize(text);
        let mut freqs: HashMap<String, u32> = HashMap::new();
        for t in &tokens {
            *freqs.entry(t.clone()).or_insert(0) += 1;
        }
        for term in freqs.keys() {
            *self.doc_freq.entry(term.clone()).or_insert(0) += 1;
        }
        self.total_len += tokens.len();
        self.docs.insert(
            id.to_string(),
            TermStats {
                freqs,
                len: tokens.len(),
            },
        );
    }

    fn score(&self, terms: &[String], stats: &TermStats) -> f64 {
        let n = self.docs.len() as f64;
        let avg_len = if self.docs.is_empty() {
            0.0
        } else {
            self.total_len as f64 / n
        };
        let norm_len = if avg_len > 0.0 {
            stats.len as f64 / avg_len
        } else {
            0.0
        };

        terms
            .iter()
            .filter_map(|term| {
                let tf = *stats.freqs.get(term)? as f64;
                let df = *self.doc_freq.get(term)? as f64;
                let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
                Some(idf * tf * (BM25_K1 + 1.0) / (tf + BM25_K1 * (1.0 - BM25_B + BM25_B * norm_len)))
            })
            .sum()
    }
}

/// BM25 index held in memory.
#[derive(Default)]
pub struct InMemoryLexicalIndex {
    state: RwLock<Bm25State>,
}

impl InMemoryLexicalIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `id` is currently indexed.
    pub fn contains(&self, id: &str) -> bool {
        self.state.read().unwrap().docs.contains_key(id)
    }
}

#[async_trait]
impl LexicalIndex for InMemoryLexicalIndex {
    async fn index(&self, id: &str, text: &str) -> Result<()> {
        let mut state = self.state.write().unwrap();
        state.remove(id);
        state.insert(id, text);
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.state.write().unwrap().remove(id);
        Ok(())
    }

    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<LexicalHit>> {
        let mut seen = HashSet::new();
        let terms: Vec<String> = tokenize(query)
            .into_iter()
            .filter(|t| seen.insert(t.clone()))
            .collect();
        if terms.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let state = self.state.read().unwrap();
        let mut hits: Vec<LexicalHit> = state
            .docs
            .iter()
            .filter_map(|(id, stats)| {
                let score = state.score(&terms, stats);
                (score > 0.0).then(|| LexicalHit {
                    id: id.clone(),
                    score,
                })
            })
            .collect();
        sort_hits(&mut hits);
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn clear(&self) -> Result<()> {
        *self.state.write().unwrap() = Bm25State::default();
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.state.read().unwrap().docs.len())
    }
}

// ============ SQLite FTS5 ============

/// FTS5-backed index over the `lexical_fts` table.
pub struct SqliteLexicalIndex {
    pool: SqlitePool,
}

impl SqliteLexicalIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Turn free text into an FTS5 query: every term quoted, OR-ed together.
///
/// Quoting keeps FTS5 operators in user input (`NOT`, `NEAR`, `*`, `:`)
/// from being interpreted.
fn fts_query(query: &str) -> Option<String> {
    let mut seen = HashSet::new();
    let terms: Vec<String> = tokenize(query)
        .into_iter()
        .filter(|t| seen.insert(t.clone()))
        .map(|t| format!("\"{}\"", t))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

#[async_trait]
impl LexicalIndex for SqliteLexicalIndex {
    async fn index(&self, id: &str, text: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM lexical_fts WHERE doc_key = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT INTO lexical_fts (doc_key, text) VALUES (?, ?)")
            .bind(id)
            .bind(text)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM lexical_fts WHERE doc_key = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<LexicalHit>> {
        let match_expr = match fts_query(query) {
            Some(q) if top_k > 0 => q,
            _ => return Ok(Vec::new()),
        };

        let rows = sqlx::query(
            r#"
            SELECT doc_key, bm25(lexical_fts) AS bm25_rank
            FROM lexical_fts
            WHERE lexical_fts MATCH ?
            ORDER BY bm25_rank
            LIMIT ?
            "#,
        )
        .bind(match_expr)
        .bind(top_k as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut hits: Vec<LexicalHit> = rows
            .iter()
            .map(|row| {
                let rank: f64 = row.get("bm25_rank");
                LexicalHit {
                    id: row.get("doc_key"),
                    score: -rank, // negate so higher = better
                }
            })
            .collect();
        sort_hits(&mut hits);
        Ok(hits)
    }

    async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM lexical_fts")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM lexical_fts")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }
}
