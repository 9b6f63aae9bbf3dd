//! Index status overview for `sift status`.
//!
//! Summarizes what's indexed: lexical and vector counts, id registry size,
//! backend reachability, and per-source watermarks.

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::app::App;

/// Print a summary of the database and both indices.
pub async fn run_status(app: &App) -> Result<()> {
    let config = &app.config;
    let vectors = app.indexer.vectors();

    let lexical_count = app.indexer.lexical().len().await?;
    let healthy = vectors.health_check().await;
    let vector_count = if healthy {
        vectors.count().await?.to_string()
    } else {
        "unreachable".to_string()
    };
    let registered: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM id_registry")
        .fetch_one(&app.pool)
        .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("docsift status");
    println!("==============");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Lexical:     {} documents", lexical_count);
    println!(
        "  Vectors:     {} in namespace '{}' ({:?}, {} dims)",
        vector_count,
        vectors.namespace(),
        config.vector.backend,
        vectors.dimension()
    );
    println!("  Embeddings:  {}", app.indexer.embedder().model_name());
    println!("  Id registry: {} documents", registered);
    println!(
        "  Backend:     {}",
        if healthy { "reachable" } else { "unreachable" }
    );

    let marks = app.watermarks.list().await?;
    if !marks.is_empty() {
        println!();
        println!("  {:<28} {}", "SOURCE", "WATERMARK");
        println!("  {}", "-".repeat(50));
        for (source, mark) in &marks {
            println!("  {:<28} {}", source, format_relative(*mark, Utc::now()));
        }
    }
    println!();

    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a timestamp relative to `now` (e.g. "3 hours ago").
fn format_relative(ts: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = (now - ts).num_seconds();

    if delta < 0 {
        return ts.format("%Y-%m-%d %H:%M").to_string();
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        ts.format("%Y-%m-%d %H:%M").to_string()
    }
}
