//! Logging setup.
//!
//! Installs the global `tracing` subscriber. `RUST_LOG` takes precedence over the configured
//! level, so `RUST_LOG=relay_hub=trace` works without touching the config file.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{RelayError, Result};

/// Initialize the global subscriber from `config`.
///
/// Fails if a subscriber has already been installed.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = filter_for(config);

    let installed = if config.json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(false))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false))
            .try_init()
    };

    installed.map_err(|e| RelayError::ConfigError(format!("Failed to initialize logging: {e}")))
}

fn filter_for(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str().to_ascii_lowercase()))
}
