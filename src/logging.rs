//! Tracing subscriber setup for the `sift` binary.
//!
//! Library code only emits `tracing` events; installing a subscriber is
//! the binary's job.

use anyhow::Result;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a global fmt subscriber.
///
/// `RUST_LOG` wins when set. Otherwise the filter is `docsift=info`, or
/// `docsift=debug` with `verbose`. Events go to stderr so command output on
/// stdout stays clean.
pub fn init(verbose: bool) -> Result<()> {
    let default_directive = if verbose {
        "docsift=debug"
    } else {
        "docsift=info"
    };
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default_directive))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .try_init()?;

    Ok(())
}
