//! Logging configuration using tracing.

use tracing_subscriber::EnvFilter;

/// Initialize logging. `RUST_LOG` wins over the configured level.
pub fn init(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string())),
        )
        .init();
}
