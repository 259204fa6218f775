use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Installs the process-wide `tracing` subscriber.
///
/// Filter defaults to `info` and can be overridden with `RUST_LOG`. Set
/// `LOG_FORMAT=json` to switch to structured JSON output for production
/// log aggregation; anything else (including unset) gets the compact
/// human-readable formatter, which is what every crate in this workspace
/// uses in its own test output.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);

    if json {
        let _ = registry.with(fmt::layer().json()).try_init();
    } else {
        let _ = registry.with(fmt::layer().compact()).try_init();
    }
}
