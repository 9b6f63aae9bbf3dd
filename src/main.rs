//! # docsift CLI (`sift`)
//!
//! ## Usage
//!
//! ```bash
//! sift --config ./config/sift.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `sift init` | Create the SQLite database and run schema migrations |
//! | `sift sources` | List sources, their validity and watermarks |
//! | `sift sync <source>` | Run one fetch cycle and index the results |
//! | `sift run` | Poll every source continuously until Ctrl-C |
//! | `sift search "<query>"` | Search indexed documents |
//! | `sift remove <source> <id>...` | Drop documents from both indices |
//! | `sift clear --yes` | Empty both indices |
//! | `sift status` | Show index counts and watermarks |

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use docsift::app::App;
use docsift::{config, ingest, logging, migrate, search, sources, stats};

/// docsift: incremental document ingestion into keyword and vector indices.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file.
#[derive(Parser)]
#[command(
    name = "sift",
    about = "docsift: incremental document ingestion into keyword and vector indices",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/sift.toml")]
    config: PathBuf,

    /// Log at debug level (overridden by `RUST_LOG`).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. Running it
    /// more than once is safe.
    Init,

    /// List configured sources and their status.
    Sources,

    /// Run one fetch cycle for the given sources and index the results.
    ///
    /// Source format: `all`, a type (`filesystem`), or `<type>:<name>`.
    Sync {
        source: String,

        /// Forget the watermark and re-fetch every item.
        #[arg(long)]
        full: bool,
    },

    /// Poll every source on its interval until interrupted.
    Run,

    /// Search indexed documents.
    Search {
        query: String,

        /// `keyword`, `semantic`, or `hybrid`. Semantic and hybrid modes
        /// need an embedding provider.
        #[arg(long, default_value = "hybrid")]
        mode: String,

        /// Maximum number of results.
        #[arg(long)]
        limit: Option<usize>,

        /// Semantic weight for hybrid mode, between 0 and 1.
        #[arg(long)]
        alpha: Option<f64>,
    },

    /// Remove documents from both indices.
    Remove {
        /// Source id (`filesystem:docs`) or name.
        source: String,
        /// Document ids within the source.
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Remove everything from the lexical index and the vector namespace.
    Clear {
        /// Confirm the irreversible clear.
        #[arg(long)]
        yes: bool,
    },

    /// Show index counts and per-source watermarks.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose)?;

    let cfg = config::load_config(&cli.config)?;

    if let Commands::Init = cli.command {
        migrate::run_migrations(&cfg).await?;
        println!("Database initialized successfully.");
        return Ok(());
    }

    let app = App::open(cfg).await?;

    let result = match cli.command {
        Commands::Init => Ok(()),
        Commands::Sources => sources::list_sources(&app).await,
        Commands::Sync { source, full } => ingest::run_sync(&app, &source, full).await,
        Commands::Run => ingest::run_daemon(&app).await,
        Commands::Search {
            query,
            mode,
            limit,
            alpha,
        } => search::run_search(&app, &query, &mode, limit, alpha).await,
        Commands::Remove { source, ids } => ingest::run_remove(&app, &source, &ids).await,
        Commands::Clear { yes } => ingest::run_clear(&app, yes).await,
        Commands::Status => stats::run_status(&app).await,
    };

    app.close().await;
    result
}
