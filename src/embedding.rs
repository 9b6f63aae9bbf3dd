//! Text-to-vector providers consumed by the indexer.
//!
//! Every provider emits vectors of the vector index's dimension, or fails
//! with [`IngestError::EmbeddingUnavailable`]. The indexer treats that
//! failure as local to one document.
//!
//! | `embedding.provider` | Provider | Network |
//! |----------------------|----------|---------|
//! | `disabled` | [`DisabledProvider`] (zero dims, lexical-only) | no |
//! | `hashing` | [`HashingProvider`] | no |
//! | `openai` | [`OpenAIProvider`] | yes |
//! | `ollama` | [`OllamaProvider`] | yes |
//!
//! The HTTP providers retry 429, 5xx and transport errors with a doubling
//! delay starting at one second and capped at 32s; other 4xx responses fail
//! straight away. The vector backends share [`cosine_similarity`] and the
//! BLOB codec ([`vec_to_blob`], [`blob_to_vec`]) defined here.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::EmbeddingConfig;
use crate::error::IngestError;
use crate::lexical::tokenize;

/// Converts text into a fixed-dimension vector.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model label for logs and `sift status`.
    fn model_name(&self) -> &str;
    /// Length of every vector this provider returns. Zero means the
    /// provider never embeds.
    fn dims(&self) -> usize;
    /// Embed one text. Failures are [`IngestError::EmbeddingUnavailable`].
    async fn embed(&self, text: &str) -> Result<Vec<f32>, IngestError>;
}

// ============ Disabled Provider ============

/// Provider for `embedding.provider = "disabled"`.
///
/// Reports zero dimensions, which the indexer takes as "lexical only".
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, IngestError> {
        Err(IngestError::embedding("embedding provider is disabled"))
    }
}

// ============ Hashing Provider ============

/// Feature-hashing embedder.
///
/// Each lowercased term is hashed with SHA-256; the first 8 bytes pick a
/// bucket and the 9th byte picks a sign. Term counts are accumulated and
/// the vector is L2-normalised. Texts sharing vocabulary end up close in
/// cosine space, which is enough for offline use and tests.
pub struct HashingProvider {
    dims: usize,
}

impl HashingProvider {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dims];
        for term in tokenize(text) {
            let digest = Sha256::digest(term.as_bytes());
            let mut bucket_bytes = [0u8; 8];
            bucket_bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bucket_bytes) % self.dims as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        normalize(&mut vector);
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashingProvider {
    fn model_name(&self) -> &str {
        "hashing"
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, text: &str) -> Result<Vec<f32>, IngestError> {
        let vector = self.embed_sync(text);
        if vector.iter().all(|v| *v == 0.0) {
            return Err(IngestError::embedding("text has no embeddable terms"));
        }
        Ok(vector)
    }
}

// ============ OpenAI Provider ============

/// `POST https://api.openai.com/v1/embeddings`, requesting `dims`-sized
/// vectors. The key comes from `OPENAI_API_KEY`.
pub struct OpenAIProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dims: usize,
    max_retries: u32,
}

impl OpenAIProvider {
    /// Fails without `embedding.model` or `OPENAI_API_KEY`.
    pub fn new(config: &EmbeddingConfig, dims: usize) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding.model required for OpenAI provider"))?;

        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            model,
            dims,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, text: &str) -> Result<Vec<f32>, IngestError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
            "dimensions": self.dims,
        });
        let request = self
            .client
            .post("https://api.openai.com/v1/embeddings")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body);

        let json = send_with_retry("OpenAI", request, self.max_retries).await?;
        parse_openai_response(&json)
            .and_then(first_vector)
            .map_err(|e| IngestError::embedding(e.to_string()))
    }
}

/// Extract the `data[].embedding` arrays from an OpenAI response.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing data array"))?;

    data.iter()
        .map(|item| {
            item.get("embedding")
                .and_then(|e| e.as_array())
                .ok_or_else(|| anyhow!("Invalid OpenAI response: missing embedding"))
                .map(|values| json_to_vector(values))
        })
        .collect()
}

// ============ Ollama Provider ============

/// `POST {url}/api/embed` against an Ollama server (`embedding.url`,
/// default `http://localhost:11434`). The model must already be pulled and
/// must produce `dims`-sized vectors.
pub struct OllamaProvider {
    client: reqwest::Client,
    url: String,
    model: String,
    dims: usize,
    max_retries: u32,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig, dims: usize) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding.model required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            url,
            model,
            dims,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, text: &str) -> Result<Vec<f32>, IngestError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
        });
        let request = self
            .client
            .post(format!("{}/api/embed", self.url.trim_end_matches('/')))
            .json(&body);

        let json = send_with_retry("Ollama", request, self.max_retries).await?;
        parse_ollama_response(&json)
            .and_then(first_vector)
            .map_err(|e| IngestError::embedding(e.to_string()))
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing embeddings array"))?;

    embeddings
        .iter()
        .map(|embedding| {
            embedding
                .as_array()
                .ok_or_else(|| anyhow!("Invalid Ollama response: embedding is not an array"))
                .map(|values| json_to_vector(values))
        })
        .collect()
}

// ============ Shared HTTP plumbing ============

/// POST a JSON request with exponential backoff on 429, 5xx, and transport
/// errors. Other 4xx responses fail immediately.
async fn send_with_retry(
    label: &str,
    request: reqwest::RequestBuilder,
    max_retries: u32,
) -> Result<serde_json::Value, IngestError> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = retry_delay(attempt);
            debug!(provider = label, attempt, ?delay, "retrying embedding request");
            tokio::time::sleep(delay).await;
        }

        let req = request
            .try_clone()
            .ok_or_else(|| IngestError::embedding(format!("{} request is not cloneable", label)))?;

        match req.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response
                        .json()
                        .await
                        .map_err(|e| IngestError::embedding(format!("{} response: {}", label, e)));
                }

                let body_text = response.text().await.unwrap_or_default();
                let message = format!("{} API error {}: {}", label, status, body_text);

                // Rate limited or server error: retry
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(message);
                    continue;
                }

                // Client error (not 429): don't retry
                return Err(IngestError::embedding(message));
            }
            Err(e) => {
                last_err = Some(format!("{} request failed: {}", label, e));
                continue;
            }
        }
    }

    Err(IngestError::embedding(last_err.unwrap_or_else(|| {
        format!("{} embedding failed after retries", label)
    })))
}

/// Backoff before retry number `attempt` (1-based): 1s doubling to 32s.
pub(crate) fn retry_delay(attempt: u32) -> Duration {
    Duration::from_secs(1 << attempt.saturating_sub(1).min(5))
}

fn json_to_vector(values: &[serde_json::Value]) -> Vec<f32> {
    values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect()
}

fn first_vector(vectors: Vec<Vec<f32>>) -> Result<Vec<f32>> {
    vectors
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("Empty embedding response"))
}

/// Build the provider named by `embedding.provider`, sized to `dims`.
pub fn create_provider(config: &EmbeddingConfig, dims: usize) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "hashing" => Ok(Arc::new(HashingProvider::new(dims))),
        "openai" => Ok(Arc::new(OpenAIProvider::new(config, dims)?)),
        "ollama" => Ok(Arc::new(OllamaProvider::new(config, dims)?)),
        other => anyhow::bail!("Unknown embedding provider: {}", other),
    }
}

// ============ Vector utilities ============

/// Scale `vector` to unit length in place. Zero vectors are left alone.
pub fn normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// ```rust
/// use docsift::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine of the angle between `a` and `b`; `0.0` when either is empty,
/// zero, or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
