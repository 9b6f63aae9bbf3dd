//! Construction of the full ingestion stack from a [`Config`].
//!
//! Every store is SQLite-backed except the vector backend, which follows
//! `[vector].backend`. Commands open an [`App`], do their work, and close it.

use std::sync::Arc;

use anyhow::Result;
use sqlx::SqlitePool;
use tracing::debug;

use crate::config::{Config, IndexerConfig};
use crate::connector::ConnectorRegistry;
use crate::embedding::create_provider;
use crate::identity::SqliteIdRegistry;
use crate::indexer::Indexer;
use crate::lexical::SqliteLexicalIndex;
use crate::pipeline::{Pipeline, PipelineOptions};
use crate::vector::{create_backend, VectorIndexOptions, VectorIndexRegistry};
use crate::watermark::{SqliteWatermarks, WatermarkStore};
use crate::{db, migrate};

pub struct App {
    pub config: Config,
    pub pool: SqlitePool,
    pub indexer: Arc<Indexer>,
    pub watermarks: Arc<dyn WatermarkStore>,
    pub connectors: ConnectorRegistry,
    pub vector_indexes: VectorIndexRegistry,
}

impl App {
    /// Connect to the database, apply migrations and wire every component.
    pub async fn open(config: Config) -> Result<Self> {
        let pool = db::connect(&config).await?;
        migrate::apply(&pool).await?;

        let vector_indexes = VectorIndexRegistry::new();
        let backend = create_backend(&config.vector, &pool)?;
        let vectors = vector_indexes.create(backend, VectorIndexOptions::from_config(&config.vector))?;

        let embedder = create_provider(&config.embedding, config.vector.dimension)?;
        let watermarks: Arc<dyn WatermarkStore> = Arc::new(SqliteWatermarks::new(pool.clone()));

        let indexer = Indexer::new(
            Arc::new(SqliteLexicalIndex::new(pool.clone())),
            vectors,
            embedder,
            Arc::new(SqliteIdRegistry::new(pool.clone())),
            Arc::clone(&watermarks),
            indexer_config(&config),
        )?;

        let connectors = ConnectorRegistry::from_config(&config);
        debug!(
            db = %config.db.path.display(),
            sources = connectors.len(),
            namespace = %config.vector.namespace,
            "app opened"
        );

        Ok(Self {
            pool,
            indexer: Arc::new(indexer),
            watermarks,
            connectors,
            vector_indexes,
            config,
        })
    }

    pub fn pipeline(&self) -> Pipeline {
        Pipeline::new(
            Arc::clone(&self.indexer),
            self.connectors.clone(),
            Arc::clone(&self.watermarks),
            PipelineOptions::from_config(&self.config),
        )
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

/// Indexer settings with the embedding deadline filled in from the
/// provider's retry budget when unset.
fn indexer_config(config: &Config) -> IndexerConfig {
    let mut indexer = config.indexer.clone();
    if indexer.embed_timeout_secs.is_none() && config.embedding.is_enabled() {
        indexer.embed_timeout_secs = Some(config.embedding.retry_budget().as_secs());
    }
    indexer
}
