//! End-to-end runs of the ingestion pipeline against in-memory stores.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use docsift::config::{FilesystemSourceConfig, IndexerConfig, PollConfig};
use docsift::connector::filesystem::FilesystemConnector;
use docsift::connector::{ConnectorRegistry, SourceConnector};
use docsift::embedding::HashingProvider;
use docsift::identity::InMemoryIdRegistry;
use docsift::indexer::Indexer;
use docsift::models::VectorEntry;
use docsift::lexical::{InMemoryLexicalIndex, LexicalIndex};
use docsift::pipeline::{Pipeline, PipelineOptions};
use docsift::search::{search, SearchMode, SearchParams};
use docsift::vector::memory::InMemoryVectorBackend;
use docsift::vector::{VectorBackend, VectorIndexOptions, VectorIndexRegistry, VectorMatch};
use docsift::watermark::{InMemoryWatermarks, WatermarkStore};
use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const DIMS: usize = 48;

struct Harness {
    _tmp: TempDir,
    root: std::path::PathBuf,
    lexical: Arc<InMemoryLexicalIndex>,
    watermarks: Arc<InMemoryWatermarks>,
    indexer: Arc<Indexer>,
    connector: Arc<dyn SourceConnector>,
}

fn write_corpus(root: &Path) {
    fs::write(root.join("rust.md"), "# Rust\n\nOwnership, borrowing and lifetimes.").unwrap();
    fs::write(root.join("python.md"), "# Python\n\nDecorators and generators.").unwrap();
    fs::write(root.join("ops.txt"), "Kubernetes deployments and Docker images.").unwrap();
    fs::write(root.join("skip.bin"), [0u8, 1, 2, 3]).unwrap();
}

/// Vector backend that is down for every write.
struct UnreachableBackend;

#[async_trait]
impl VectorBackend for UnreachableBackend {
    fn name(&self) -> &str {
        "unreachable"
    }
    fn max_batch(&self) -> usize {
        1000
    }
    async fn upsert(&self, _: &str, _: &[VectorEntry]) -> anyhow::Result<()> {
        anyhow::bail!("connection refused")
    }
    async fn delete(&self, _: &str, _: &[u64]) -> anyhow::Result<()> {
        anyhow::bail!("connection refused")
    }
    async fn query(&self, _: &str, _: &[f32], _: usize) -> anyhow::Result<Vec<VectorMatch>> {
        Ok(Vec::new())
    }
    async fn delete_all(&self, _: &str) -> anyhow::Result<()> {
        Ok(())
    }
    async fn count(&self, _: &str) -> anyhow::Result<usize> {
        Ok(0)
    }
    async fn ping(&self) -> anyhow::Result<()> {
        anyhow::bail!("connection refused")
    }
}

fn harness(poll_interval_secs: u64) -> Harness {
    harness_over(
        poll_interval_secs,
        Arc::new(InMemoryVectorBackend::new()),
        VectorIndexOptions::new("e2e", DIMS),
    )
}

fn harness_over(
    poll_interval_secs: u64,
    backend: Arc<dyn VectorBackend>,
    options: VectorIndexOptions,
) -> Harness {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("docs");
    fs::create_dir_all(&root).unwrap();
    write_corpus(&root);

    let lexical = Arc::new(InMemoryLexicalIndex::new());
    let watermarks = Arc::new(InMemoryWatermarks::new());
    let vectors = VectorIndexRegistry::new().create(backend, options).unwrap();
    let indexer = Arc::new(
        Indexer::new(
            lexical.clone(),
            vectors,
            Arc::new(HashingProvider::new(DIMS)),
            Arc::new(InMemoryIdRegistry::new()),
            watermarks.clone(),
            IndexerConfig::default(),
        )
        .unwrap(),
    );

    let connector: Arc<dyn SourceConnector> = Arc::new(FilesystemConnector::new(
        "docs".to_string(),
        FilesystemSourceConfig {
            root: root.clone(),
            include_globs: vec!["**/*.md".to_string(), "**/*.txt".to_string()],
            exclude_globs: Vec::new(),
            follow_symlinks: false,
            poll: PollConfig {
                poll_interval_secs,
                fetch_timeout_secs: 10,
            },
        },
    ));

    Harness {
        _tmp: tmp,
        root,
        lexical,
        watermarks,
        indexer,
        connector,
    }
}

fn pipeline(h: &Harness) -> Pipeline {
    let mut registry = ConnectorRegistry::new();
    registry.register(Arc::clone(&h.connector));
    Pipeline::new(
        Arc::clone(&h.indexer),
        registry,
        h.watermarks.clone(),
        PipelineOptions::default(),
    )
}

#[tokio::test]
async fn test_sync_populates_both_indices() {
    let h = harness(60);
    let summary = pipeline(&h).sync(&[Arc::clone(&h.connector)]).await.unwrap();

    assert!(summary.failures.is_empty());
    assert_eq!(summary.cycles.len(), 1);
    assert_eq!(summary.cycles[0].fetched, 3);
    assert_eq!(summary.indexed.lexical, 3);
    assert_eq!(summary.indexed.vectors, 3);
    assert_eq!(h.lexical.len().await.unwrap(), 3);
    assert_eq!(h.indexer.vectors().count().await.unwrap(), 3);
    assert!(h.watermarks.get("filesystem:docs").await.unwrap().is_some());
}

#[tokio::test]
async fn test_sync_reports_vector_backend_outage() {
    let options = VectorIndexOptions {
        max_retries: 1,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(2),
        ..VectorIndexOptions::new("e2e", DIMS)
    };
    let h = harness_over(60, Arc::new(UnreachableBackend), options);
    let summary = pipeline(&h).sync(&[Arc::clone(&h.connector)]).await.unwrap();

    assert!(summary.failures.is_empty());
    assert!(summary.is_degraded());
    assert!(summary.indexed.backend_unavailable);
    assert_eq!(summary.indexed.received, 3);
    assert_eq!(summary.indexed.lexical, 3);
    assert_eq!(summary.indexed.vectors, 0);
    assert_eq!(summary.indexed.vector_deferred, 3);
    assert_eq!(h.lexical.len().await.unwrap(), 3);
    assert!(h.indexer.vectors().is_paused());
    // Fetching moved the watermark, which is why the outage must be reported.
    assert!(h.watermarks.get("filesystem:docs").await.unwrap().is_some());
}

#[tokio::test]
async fn test_healthy_sync_is_not_degraded() {
    let h = harness(60);
    let summary = pipeline(&h).sync(&[Arc::clone(&h.connector)]).await.unwrap();
    assert!(!summary.is_degraded());
    assert!(!summary.indexed.backend_unavailable);
    assert_eq!(summary.indexed.vector_deferred, 0);
}

#[tokio::test]
async fn test_each_document_retrieves_itself() {
    let h = harness(60);
    pipeline(&h).sync(&[Arc::clone(&h.connector)]).await.unwrap();

    let params = SearchParams {
        mode: SearchMode::Semantic,
        ..SearchParams::default()
    };
    for (name, query) in [
        ("rust.md", "# Rust\n\nOwnership, borrowing and lifetimes."),
        ("ops.txt", "Kubernetes deployments and Docker images."),
    ] {
        let hits = search(&h.indexer, query, &params).await.unwrap();
        assert_eq!(hits[0].key, format!("filesystem:docs:{}", name));
    }
}

#[tokio::test]
async fn test_repeated_full_sync_is_idempotent() {
    let h = harness(60);
    let p = pipeline(&h);
    p.sync(&[Arc::clone(&h.connector)]).await.unwrap();

    h.watermarks.reset("filesystem:docs").await.unwrap();
    let again = p.sync(&[Arc::clone(&h.connector)]).await.unwrap();

    assert_eq!(again.indexed.lexical, 3);
    assert_eq!(h.lexical.len().await.unwrap(), 3);
    assert_eq!(h.indexer.vectors().count().await.unwrap(), 3);
}

#[tokio::test]
async fn test_hybrid_search_ranks_keyword_match_first() {
    let h = harness(60);
    pipeline(&h).sync(&[Arc::clone(&h.connector)]).await.unwrap();

    let hits = search(&h.indexer, "decorators generators", &SearchParams::default())
        .await
        .unwrap();
    assert_eq!(hits[0].key, "filesystem:docs:python.md");
    assert!(hits[0].keyword_score > 0.0);
}

#[tokio::test]
async fn test_run_picks_up_new_files_until_shutdown() {
    let h = harness(1);
    let p = pipeline(&h);
    let shutdown = CancellationToken::new();

    let running = {
        let shutdown = shutdown.clone();
        async move { p.run(shutdown).await }
    };
    let handle = tokio::spawn(running);

    wait_for(&h.lexical, 3).await;

    tokio::time::sleep(Duration::from_millis(20)).await;
    fs::write(h.root.join("new.md"), "# New\n\nFreshly written zeppelin notes.").unwrap();

    wait_for(&h.lexical, 4).await;
    shutdown.cancel();

    let totals = handle.await.unwrap().unwrap();
    assert!(totals.lexical >= 4);
    let hits = h.lexical.search("zeppelin", 5).await.unwrap();
    assert_eq!(hits[0].id, "filesystem:docs:new.md");
}

#[tokio::test]
async fn test_run_rejects_invalid_source_before_polling() {
    let h = harness(1);
    fs::remove_dir_all(&h.root).unwrap();

    let err = pipeline(&h).run(CancellationToken::new()).await.unwrap_err();
    assert!(err.to_string().contains("invalid configuration"));
    assert_eq!(h.lexical.len().await.unwrap(), 0);
}

async fn wait_for(lexical: &InMemoryLexicalIndex, expected: usize) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while lexical.len().await.unwrap() < expected {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {} documents", expected));
}
