//! Relay hub entry point.

use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;
use tracing::{info, warn, Level};

use relay_hub::config::RelayConfig;
use relay_hub::error::{RelayError, Result};
use relay_hub::transport::server::RelayServer;
use relay_hub::utils::logging;

/// Whitelist-gated TCP relay hub for game servers
#[derive(Parser, Debug)]
#[command(name = "relay-hub", version, about)]
struct Args {
    /// TOML configuration file. Without it, settings come from the environment.
    #[arg(short, long, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, e.g. 0.0.0.0:27200
    #[arg(short, long)]
    address: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

impl Args {
    fn load_config(&self) -> Result<RelayConfig> {
        let mut config = match &self.config {
            Some(path) => RelayConfig::from_file(path)?,
            None => RelayConfig::from_env()?,
        };

        if let Some(address) = &self.address {
            config.server.address = address.clone();
        }
        if let Some(level) = &self.log_level {
            config.logging.log_level = Level::from_str(level)
                .map_err(|_| RelayError::ConfigError(format!("Invalid log level: {level}")))?;
        }
        if self.json_logs {
            config.logging.json_format = true;
        }

        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = args.load_config()?;

    logging::init(&config.logging)?;
    info!(version = env!("CARGO_PKG_VERSION"), "Starting relay hub");

    config.validate_strict()?;

    let whitelist = config.load_whitelist()?;
    if whitelist.is_empty() {
        warn!("Whitelist is empty, only private addresses will be admitted");
    } else {
        info!(entries = whitelist.len(), "Whitelist loaded");
    }

    let server = RelayServer::new(config.server, whitelist);
    let listener = server.bind().await?;
    server.serve(listener).await?;

    info!("Relay hub stopped");
    Ok(())
}
