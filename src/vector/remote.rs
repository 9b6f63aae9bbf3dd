//! Hosted vector database over HTTP.
//!
//! Speaks the Pinecone data-plane API: `POST /vectors/upsert`,
//! `POST /vectors/delete`, `POST /query` and `POST /describe_index_stats`
//! against the index host, authenticated with an `Api-Key` header. Ids are
//! sent as decimal strings. Calls are single-shot; retrying is left to
//! [`VectorIndex`](super::VectorIndex).

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};
use thiserror::Error;

use super::{VectorBackend, VectorMatch};
use crate::config::RemoteVectorConfig;
use crate::models::VectorEntry;

/// Most vectors or ids the service accepts per request.
pub const MAX_BATCH: usize = 1000;

/// A non-2xx answer from the service.
#[derive(Debug, Error)]
#[error("{path} returned {status}: {body}")]
pub struct ApiError {
    pub path: String,
    pub status: StatusCode,
    pub body: String,
}

/// True when `err` is the service answering 404.
fn is_not_found(err: &anyhow::Error) -> bool {
    err.downcast_ref::<ApiError>()
        .is_some_and(|api| api.status == StatusCode::NOT_FOUND)
}

pub struct RemoteVectorBackend {
    client: reqwest::Client,
    host: String,
    api_key: String,
}

impl RemoteVectorBackend {
    /// Build a client from `[vector.remote]`, reading the key from
    /// `api_key_env`.
    pub fn from_config(config: &RemoteVectorConfig, timeout: Duration) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| anyhow!("{} environment variable not set", config.api_key_env))?;
        Self::new(&config.host, api_key, timeout)
    }

    pub fn new(host: &str, api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let host = host.trim_end_matches('/');
        let host = if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("https://{}", host)
        };
        Ok(Self {
            client,
            host,
            api_key: api_key.into(),
        })
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        let response = self
            .client
            .post(format!("{}{}", self.host, path))
            .header("Api-Key", &self.api_key)
            .json(body)
            .send()
            .await
            .with_context(|| format!("request to {} failed", path))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError {
                path: path.to_string(),
                status,
                body,
            }
            .into());
        }

        // Some endpoints answer with an empty body.
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(json!({}));
        }
        Ok(serde_json::from_str(&text)?)
    }
}

fn upsert_body(namespace: &str, entries: &[VectorEntry]) -> Value {
    let vectors: Vec<Value> = entries
        .iter()
        .map(|e| json!({ "id": e.numeric_id.to_string(), "values": e.embedding }))
        .collect();
    json!({ "vectors": vectors, "namespace": namespace })
}

fn parse_matches(json: &Value) -> Result<Vec<VectorMatch>> {
    let Some(matches) = json.get("matches").and_then(|m| m.as_array()) else {
        return Ok(Vec::new());
    };
    matches
        .iter()
        .map(|m| {
            let id = m
                .get("id")
                .and_then(|v| v.as_str())
                .ok_or_else(|| anyhow!("query match without id"))?;
            let numeric_id = id
                .parse::<u64>()
                .with_context(|| format!("non-numeric vector id '{}'", id))?;
            let score = m.get("score").and_then(|v| v.as_f64()).unwrap_or(0.0) as f32;
            Ok(VectorMatch { numeric_id, score })
        })
        .collect()
}

fn parse_namespace_count(json: &Value, namespace: &str) -> usize {
    json.get("namespaces")
        .and_then(|n| n.get(namespace))
        .and_then(|n| n.get("vectorCount"))
        .and_then(|c| c.as_u64())
        .unwrap_or(0) as usize
}

#[async_trait]
impl VectorBackend for RemoteVectorBackend {
    fn name(&self) -> &str {
        "remote"
    }

    fn max_batch(&self) -> usize {
        MAX_BATCH
    }

    async fn upsert(&self, namespace: &str, entries: &[VectorEntry]) -> Result<()> {
        self.post("/vectors/upsert", &upsert_body(namespace, entries))
            .await?;
        Ok(())
    }

    async fn delete(&self, namespace: &str, ids: &[u64]) -> Result<()> {
        let ids: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
        self.post("/vectors/delete", &json!({ "ids": ids, "namespace": namespace }))
            .await?;
        Ok(())
    }

    async fn query(&self, namespace: &str, vector: &[f32], top_k: usize) -> Result<Vec<VectorMatch>> {
        let body = json!({
            "namespace": namespace,
            "vector": vector,
            "topK": top_k,
            "includeValues": false,
            "includeMetadata": false,
        });
        let json = self.post("/query", &body).await?;
        parse_matches(&json)
    }

    async fn delete_all(&self, namespace: &str) -> Result<()> {
        let body = json!({ "deleteAll": true, "namespace": namespace });
        match self.post("/vectors/delete", &body).await {
            Ok(_) => Ok(()),
            // Clearing a namespace that was never written answers 404.
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn count(&self, namespace: &str) -> Result<usize> {
        let json = self.post("/describe_index_stats", &json!({})).await?;
        Ok(parse_namespace_count(&json, namespace))
    }

    async fn ping(&self) -> Result<()> {
        self.post("/describe_index_stats", &json!({})).await?;
        Ok(())
    }
}
