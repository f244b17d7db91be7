use anyhow::{Result, anyhow};
use tracing_subscriber::EnvFilter;

const DEFAULT_LEVEL: &str = "info";

/// Install the global `tracing` subscriber, writing to stderr. `RUST_LOG`
/// takes precedence over the default `info` level.
pub fn init() -> Result<()> {
    init_with_default_level(DEFAULT_LEVEL)
}

/// Like [`init`], but with a caller-chosen default level such as `"warn"`.
/// Errors if a global subscriber is already installed.
pub fn init_with_default_level(default_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid log level {default_level:?}: {e}"))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("init tracing subscriber: {e}"))
}
