use anyhow::Result;

use crate::app::App;

/// Print every configured source, whether its configuration validates,
/// and its current watermark.
pub async fn list_sources(app: &App) -> Result<()> {
    if app.connectors.is_empty() {
        println!("No sources configured. Add a [sources.filesystem.<name>] section.");
        return Ok(());
    }

    println!("{:<28} {:<8} {:<10} WATERMARK", "SOURCE", "STATUS", "INTERVAL");
    for connector in app.connectors.connectors() {
        let source = connector.source_id();
        let status = match connector.validate_config().await {
            Ok(()) => "OK".to_string(),
            Err(e) => format!("INVALID ({})", e),
        };
        let interval = format!("{}s", connector.poll_config().poll_interval_secs);
        let watermark = app
            .watermarks
            .get(&source)
            .await?
            .map(|w| w.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        println!("{:<28} {:<8} {:<10} {}", source, status, interval, watermark);

        for field in connector.describe_config() {
            println!(
                "    {:<18} {}{}",
                field.name,
                field.label,
                if field.required { " (required)" } else { "" }
            );
        }
    }

    Ok(())
}
