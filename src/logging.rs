use anyhow::Result;
use tracing_subscriber::EnvFilter;

/// Installs the global `tracing` subscriber, writing to stderr so that
/// command output on stdout stays machine-readable. `RUST_LOG` overrides
/// the default `info` filter.
pub fn init() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("init tracing subscriber: {e}"))
}
