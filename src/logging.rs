//! Logging Initialisation

use tracing_subscriber::EnvFilter;

/// Initialise the global tracing subscriber. The CLI flag provides the
/// default level; `RUST_LOG` overrides it when set.
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
