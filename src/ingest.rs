//! Command handlers that move documents into (and out of) the indices.

use std::sync::Arc;

use anyhow::{bail, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::app::App;
use crate::connector::SourceConnector;

/// Resolve a selector: `all`, a connector type (`filesystem`), a source id
/// (`filesystem:docs`) or a bare instance name.
fn select_sources(app: &App, selector: &str) -> Result<Vec<Arc<dyn SourceConnector>>> {
    let all = app.connectors.connectors();
    let selected: Vec<Arc<dyn SourceConnector>> = if selector == "all" {
        all.to_vec()
    } else if let Some(found) = app.connectors.find(selector) {
        vec![found]
    } else {
        all.iter()
            .filter(|c| c.connector_type() == selector)
            .cloned()
            .collect()
    };

    if selected.is_empty() {
        bail!(
            "No source matches '{}'. Run `sift sources` to list configured sources.",
            selector
        );
    }
    Ok(selected)
}

/// Run one fetch cycle for the selected sources and index the results.
///
/// `full` forgets the watermarks first so every item is fetched again.
pub async fn run_sync(app: &App, selector: &str, full: bool) -> Result<()> {
    let sources = select_sources(app, selector)?;

    if full {
        for source in &sources {
            app.watermarks.reset(&source.source_id()).await?;
            info!(source = %source.source_id(), "watermark reset");
        }
    }

    let summary = app.pipeline().sync(&sources).await?;

    for cycle in &summary.cycles {
        println!("sync {}", cycle.source);
        println!("  fetched: {} items", cycle.fetched);
        println!("  enqueued: {}", cycle.enqueued);
        match cycle.watermark {
            Some(w) => println!("  watermark: {}", w.to_rfc3339()),
            None => println!("  watermark: (none)"),
        }
    }
    for (source, error) in &summary.failures {
        println!("sync {}", source);
        println!("  FAILED: {}", error);
    }

    let indexed = &summary.indexed;
    println!("indexed");
    println!("  lexical: {}", indexed.lexical);
    println!("  vectors: {}", indexed.vectors);
    if indexed.stale > 0 {
        println!("  stale (skipped): {}", indexed.stale);
    }
    if indexed.malformed > 0 {
        println!("  malformed (skipped): {}", indexed.malformed);
    }
    if indexed.embedding_failed > 0 {
        println!("  embedding failures: {}", indexed.embedding_failed);
    }
    if indexed.failed > 0 {
        println!("  storage failures: {}", indexed.failed);
    }
    if indexed.vector_deferred > 0 {
        println!(
            "  vector writes deferred: {} (backend unavailable; re-run with --full once it recovers)",
            indexed.vector_deferred
        );
    }

    if !summary.is_degraded() {
        println!("ok");
        return Ok(());
    }
    if indexed.backend_unavailable {
        bail!(
            "vector backend unavailable for namespace '{}'; {} document(s) indexed lexically only",
            app.indexer.vectors().namespace(),
            indexed.vector_deferred
        );
    }
    bail!("{} source(s) failed to sync", summary.failures.len())
}

/// Poll every source until Ctrl-C.
pub async fn run_daemon(app: &App) -> Result<()> {
    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested; finishing in-flight work");
            trigger.cancel();
        }
    });

    let totals = app.pipeline().run(shutdown).await?;
    println!(
        "stopped: {} received, {} indexed lexically, {} vectors written",
        totals.received, totals.lexical, totals.vectors
    );
    Ok(())
}

/// Remove documents of one source from both indices.
pub async fn run_remove(app: &App, source: &str, ids: &[String]) -> Result<()> {
    let source_id = match app.connectors.find(source) {
        Some(connector) => connector.source_id(),
        None => source.to_string(),
    };
    let removed = app.indexer.remove_documents(&source_id, ids).await?;
    println!("removed {} of {} documents from {}", removed, ids.len(), source_id);
    Ok(())
}

/// Empty both indices. Watermarks are reset too, so the next sync
/// re-fetches everything.
pub async fn run_clear(app: &App, yes: bool) -> Result<()> {
    if !yes {
        bail!(
            "Refusing to clear namespace '{}' without --yes (this cannot be undone).",
            app.indexer.vectors().namespace()
        );
    }

    app.indexer.clear().await?;
    for (source, _) in app.watermarks.list().await? {
        app.watermarks.reset(&source).await?;
    }
    println!(
        "Cleared lexical index and vector namespace '{}'.",
        app.indexer.vectors().namespace()
    );
    Ok(())
}
