//! Source connectors: where documents come from.
//!
//! A [`SourceConnector`] knows how to describe and check its configuration
//! and how to fetch every item modified at or after a watermark. Connectors
//! never write to the indices; a [`SourcePoller`](crate::poller::SourcePoller)
//! drives them and hands their output to the ingestion queue.
//!
//! ```text
//! ┌──────────────────────────────┐
//! │      ConnectorRegistry       │
//! │  ┌────────────┐ ┌─────────┐  │
//! │  │ filesystem │ │ custom  │  │
//! │  └────────────┘ └─────────┘  │
//! └──────────────┬───────────────┘
//!                ▼
//!     SourcePoller → IngestionQueue → Indexer
//! ```

pub mod filesystem;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::{Config, PollConfig};
use crate::error::IngestError;
use crate::models::Document;

/// How a configuration field should be collected from a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigFieldKind {
    Text,
    Password,
    Textarea,
    Boolean,
}

/// One configurable field a connector declares.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigField {
    pub name: String,
    pub label: String,
    pub kind: ConfigFieldKind,
    pub placeholder: Option<String>,
    pub required: bool,
}

impl ConfigField {
    pub fn new(name: &str, label: &str, kind: ConfigFieldKind) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            kind,
            placeholder: None,
            required: false,
        }
    }

    pub fn placeholder(mut self, placeholder: &str) -> Self {
        self.placeholder = Some(placeholder.to_string());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// A pollable source of documents.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use chrono::{DateTime, Utc};
/// use docsift::connector::{ConfigField, SourceConnector};
/// use docsift::error::IngestError;
/// use docsift::models::Document;
///
/// struct Inbox;
///
/// #[async_trait]
/// impl SourceConnector for Inbox {
///     fn name(&self) -> &str { "team" }
///     fn connector_type(&self) -> &str { "inbox" }
///     fn describe_config(&self) -> Vec<ConfigField> { Vec::new() }
///     async fn validate_config(&self) -> Result<(), IngestError> { Ok(()) }
///     async fn fetch_since(&self, _since: Option<DateTime<Utc>>) -> anyhow::Result<Vec<Document>> {
///         Ok(Vec::new())
///     }
/// }
///
/// assert_eq!(Inbox.source_id(), "inbox:team");
/// ```
#[async_trait]
pub trait SourceConnector: Send + Sync {
    /// Instance name from the config (e.g. `"docs"`).
    fn name(&self) -> &str;

    /// Connector type (e.g. `"filesystem"`).
    fn connector_type(&self) -> &str;

    /// Identifier stamped on every document this connector emits and used
    /// as the watermark key. Defaults to `"{type}:{name}"`.
    fn source_id(&self) -> String {
        format!("{}:{}", self.connector_type(), self.name())
    }

    /// Fields this connector can be configured with.
    fn describe_config(&self) -> Vec<ConfigField>;

    /// Check the configuration against the real source. Fails with
    /// [`IngestError::ConfigInvalid`] when it is unreachable, unauthorized
    /// or malformed.
    async fn validate_config(&self) -> Result<(), IngestError>;

    /// Every item modified at or after `since`, or everything when `since`
    /// is `None`. Calling twice with the same watermark is allowed to
    /// return the same items again.
    async fn fetch_since(&self, since: Option<DateTime<Utc>>) -> Result<Vec<Document>>;

    /// Polling cadence for this source.
    fn poll_config(&self) -> PollConfig {
        PollConfig::default()
    }
}

/// Registry of configured connectors.
#[derive(Default, Clone)]
pub struct ConnectorRegistry {
    connectors: Vec<Arc<dyn SourceConnector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding every source declared in the config.
    pub fn from_config(config: &Config) -> Self {
        use filesystem::FilesystemConnector;

        let mut registry = Self::new();
        for (name, cfg) in &config.sources.filesystem {
            registry.register(Arc::new(FilesystemConnector::new(name.clone(), cfg.clone())));
        }
        registry
    }

    pub fn register(&mut self, connector: Arc<dyn SourceConnector>) {
        self.connectors.push(connector);
    }

    pub fn connectors(&self) -> &[Arc<dyn SourceConnector>] {
        &self.connectors
    }

    /// Find a connector by source id (`"filesystem:docs"`) or bare name.
    pub fn find(&self, label: &str) -> Option<Arc<dyn SourceConnector>> {
        self.connectors
            .iter()
            .find(|c| c.source_id() == label || c.name() == label)
            .cloned()
    }

    /// Validate every connector, stopping at the first invalid one.
    pub async fn validate_all(&self) -> Result<(), IngestError> {
        for connector in &self.connectors {
            connector.validate_config().await?;
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.connectors.len()
    }
}
