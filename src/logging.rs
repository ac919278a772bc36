//! Console logging for the pipeline.
//!
//! Library code only emits `tracing` events. Binaries call [`init`] once at
//! startup to print them; `RUST_LOG` overrides the filter given here.

use anyhow::{Context as _, Result};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt as _, util::SubscriberInitExt as _};

/// Installs the global subscriber, writing to stderr.
///
/// `default_filter` applies when `RUST_LOG` is unset, e.g. `"info"` or
/// `"rusty_sheet_pipeline=debug"`.
///
/// # Errors
///
/// Returns error if the filter is invalid or a subscriber is already installed
pub fn init(default_filter: &str) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .context("Failed to create env filter")?;

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_line_number(true)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    Ok(())
}
