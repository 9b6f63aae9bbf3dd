//! Keyword, semantic and hybrid retrieval over the two indices.
//!
//! # Hybrid Scoring
//!
//! 1. Fetch `candidates` keyword hits (BM25) and `candidates` vector hits
//!    (backend similarity).
//! 2. Min-max normalize each set to `[0, 1]`.
//! 3. Merge per document: `score = (1 - α) × keyword + α × semantic`.
//! 4. Sort by score (desc), then key (asc), and truncate to `limit`.
//!
//! Vector hits carry numeric ids; they are mapped back to document keys
//! through the id registry. Ids the registry does not know are dropped.

use std::collections::HashMap;
use std::str::FromStr;

use anyhow::{bail, Result};
use serde::Serialize;
use tracing::warn;

use crate::app::App;
use crate::indexer::Indexer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Keyword,
    Semantic,
    Hybrid,
}

impl FromStr for SearchMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "keyword" => Ok(Self::Keyword),
            "semantic" => Ok(Self::Semantic),
            "hybrid" => Ok(Self::Hybrid),
            other => bail!(
                "Unknown search mode: {}. Use keyword, semantic, or hybrid.",
                other
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchParams {
    pub mode: SearchMode,
    /// Weight for semantic vs keyword in hybrid mode.
    pub alpha: f64,
    /// Candidates fetched from each index.
    pub candidates: usize,
    pub limit: usize,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            mode: SearchMode::Hybrid,
            alpha: 0.6,
            candidates: 50,
            limit: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    /// `"{source}:{id}"`.
    pub key: String,
    /// Merged score in `[0, 1]`.
    pub score: f64,
    pub keyword_score: f64,
    pub semantic_score: f64,
}

/// Run a query against the indexer's lexical and vector indices.
pub async fn search(indexer: &Indexer, query: &str, params: &SearchParams) -> Result<Vec<SearchHit>> {
    if query.trim().is_empty() || params.limit == 0 {
        return Ok(Vec::new());
    }

    let embeddings_on = indexer.embedder().dims() > 0;
    let mode = match params.mode {
        SearchMode::Semantic if !embeddings_on => {
            bail!("semantic search requires an embedding provider; set [embedding].provider")
        }
        SearchMode::Hybrid if !embeddings_on => {
            warn!("no embedding provider; falling back to keyword search");
            SearchMode::Keyword
        }
        mode => mode,
    };

    let keyword: Vec<(String, f64)> = if mode != SearchMode::Semantic {
        indexer
            .lexical()
            .search(query, params.candidates)
            .await?
            .into_iter()
            .map(|hit| (hit.id, hit.score))
            .collect()
    } else {
        Vec::new()
    };

    let semantic: Vec<(String, f64)> = if mode != SearchMode::Keyword {
        let query_vec = indexer.embedder().embed(query).await?;
        let matches = indexer
            .vectors()
            .search(&[query_vec], params.candidates)
            .await?
            .into_iter()
            .next()
            .unwrap_or_default();

        let mut resolved = Vec::with_capacity(matches.len());
        for m in matches {
            match indexer.ids().lookup(m.numeric_id).await? {
                Some(doc) => resolved.push((doc.key(), m.score as f64)),
                None => warn!(numeric_id = m.numeric_id, "vector hit with unknown id"),
            }
        }
        resolved
    } else {
        Vec::new()
    };

    let alpha = match mode {
        SearchMode::Keyword => 0.0,
        SearchMode::Semantic => 1.0,
        SearchMode::Hybrid => params.alpha.clamp(0.0, 1.0),
    };

    Ok(merge(&keyword, &semantic, alpha, params.limit))
}

/// Run the search command and print ranked results.
pub async fn run_search(
    app: &App,
    query: &str,
    mode: &str,
    limit: Option<usize>,
    alpha: Option<f64>,
) -> Result<()> {
    let defaults = SearchParams::default();
    let params = SearchParams {
        mode: mode.parse()?,
        alpha: alpha.unwrap_or(defaults.alpha),
        limit: limit.unwrap_or(defaults.limit),
        candidates: defaults.candidates.max(limit.unwrap_or(0)),
    };

    let results = search(&app.indexer, query, &params).await?;
    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in results.iter().enumerate() {
        println!("{}. [{:.2}] {}", i + 1, hit.score, hit.key);
        if params.mode == SearchMode::Hybrid {
            println!(
                "    scoring: keyword={:.3}  semantic={:.3}",
                hit.keyword_score, hit.semantic_score
            );
        }
    }

    Ok(())
}

fn merge(keyword: &[(String, f64)], semantic: &[(String, f64)], alpha: f64, limit: usize) -> Vec<SearchHit> {
    let mut hits: HashMap<&str, SearchHit> = HashMap::new();

    for (key, k) in normalize_scores(keyword) {
        hits.entry(key).or_insert_with(|| empty_hit(key)).keyword_score = k;
    }
    for (key, v) in normalize_scores(semantic) {
        hits.entry(key).or_insert_with(|| empty_hit(key)).semantic_score = v;
    }

    let mut results: Vec<SearchHit> = hits
        .into_values()
        .map(|mut hit| {
            hit.score = (1.0 - alpha) * hit.keyword_score + alpha * hit.semantic_score;
            hit
        })
        .collect();

    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.key.cmp(&b.key))
    });
    results.truncate(limit);
    results
}

fn empty_hit(key: &str) -> SearchHit {
    SearchHit {
        key: key.to_string(),
        score: 0.0,
        keyword_score: 0.0,
        semantic_score: 0.0,
    }
}

/// Min-max normalize raw scores to `[0.0, 1.0]`.
///
/// If all scores are equal, they are normalized to `1.0`. Duplicate keys
/// keep their best score.
pub fn normalize_scores(candidates: &[(String, f64)]) -> Vec<(&str, f64)> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let s_min = candidates.iter().map(|(_, s)| *s).fold(f64::INFINITY, f64::min);
    let s_max = candidates
        .iter()
        .map(|(_, s)| *s)
        .fold(f64::NEG_INFINITY, f64::max);

    let mut best: HashMap<&str, f64> = HashMap::new();
    let mut order = Vec::new();
    for (key, raw) in candidates {
        let norm = if (s_max - s_min).abs() < f64::EPSILON {
            1.0
        } else {
            (raw - s_min) / (s_max - s_min)
        };
        match best.get_mut(key.as_str()) {
            Some(existing) => *existing = existing.max(norm),
            None => {
                best.insert(key.as_str(), norm);
                order.push(key.as_str());
            }
        }
    }
    order.into_iter().map(|key| (key, best[key])).collect()
}
