//! Tracing subscriber setup.
//!
//! `RUST_LOG` wins when set; otherwise the CLI verbosity count picks the
//! level. `VIGIL_LOG_JSON` swaps the human format for one-line JSON records.

use anyhow::Result;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Initialize the global subscriber.
///
/// # Errors
/// Returns an error if a global subscriber is already installed.
pub fn init(level: Option<Level>) -> Result<()> {
    init_with_format(level, std::env::var("VIGIL_LOG_JSON").is_ok())
}

fn init_with_format(level: Option<Level>, json: bool) -> Result<()> {
    let fallback = level.unwrap_or(Level::ERROR);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(fallback.to_string().to_lowercase()));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder
            .json()
            .flatten_event(true)
            .try_init()
            .map_err(|err| anyhow::anyhow!("failed to init telemetry: {err}"))?;
    } else {
        builder
            .try_init()
            .map_err(|err| anyhow::anyhow!("failed to init telemetry: {err}"))?;
    }
    Ok(())
}
