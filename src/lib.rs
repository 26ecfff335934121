//! # relay-hub
//!
//! A whitelist-gated TCP relay hub for game servers.
//!
//! Game servers connect over TCP, announce themselves with an identify handshake and then exchange
//! newline-delimited JSON messages through the hub: directly by identity, to every member of their
//! group, or to every identified server. The hub tells group members about each other as they
//! join and leave.
//!
//! ## Layout
//! - [`core`]: framing and message decoding
//! - [`protocol`]: client registry, handshake, routing
//! - [`transport`]: TCP server, whitelist, routing task
//! - [`config`], [`error`], [`utils`]: settings, error type, logging and metrics
//!
//! ## Example
//! ```no_run
//! use relay_hub::config::RelayConfig;
//! use relay_hub::transport::server::RelayServer;
//!
//! # async fn run() -> relay_hub::Result<()> {
//! let config = RelayConfig::from_env()?;
//! let whitelist = config.load_whitelist()?;
//! let server = RelayServer::new(config.server, whitelist);
//! let listener = server.bind().await?;
//! server.serve(listener).await
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod transport;
pub mod utils;

pub use crate::config::RelayConfig;
pub use crate::core::message::{Message, Target};
pub use crate::error::{RelayError, Result};
pub use crate::protocol::registry::{ClientId, ServerInfo};
pub use crate::transport::server::RelayServer;
pub use crate::transport::whitelist::{Whitelist, WhitelistEntry};
