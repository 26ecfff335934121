//! # Error Types
//!
//! Error handling for the relay hub.
//!
//! Every failure the hub can observe is a variant of [`RelayError`]. None of them is fatal to a
//! running server: a connection is either rejected before any state exists for it, or a single
//! frame is dropped while the registry stays consistent.
//!
//! ## Error Categories
//! - **Admission**: `ConnectionRejected` for peers outside the whitelist
//! - **Frame errors**: `MalformedFrame` (not JSON) and `SchemaViolation` (wrong shape)
//! - **Routing errors**: `SenderNotReady`, `ReceiverNotReady`, `UnknownReceiver`, `UnknownClient`
//! - **Handshake errors**: `AlreadyIdentified`
//! - **Transport errors**: socket-level failures, which lead to the normal close path
//! - **Configuration errors**: only surfaced at startup
//!
//! ## Example Usage
//! ```rust
//! use relay_hub::core::message::Message;
//! use relay_hub::error::RelayError;
//! use tracing::warn;
//!
//! match Message::decode(r#"{"context":"Chat","data":1,"target":"x"}"#) {
//!     Err(RelayError::SchemaViolation(reason)) => warn!(%reason, "Dropping frame"),
//!     other => panic!("unexpected: {other:?}"),
//! }
//! ```

use crate::protocol::registry::ClientId;
use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Error message constants for the common static cases.
pub mod constants {
    /// Schema validation messages
    pub const ERR_CONTEXT_REQUIRED: &str = "`context` must be a non-empty string";
    pub const ERR_DATA_REQUIRED: &str = "`data` is required";
    pub const ERR_SENDER_TYPE: &str = "`sender` must be an integer";
    pub const ERR_TARGET_REQUIRED: &str = "`target` is required";
    pub const ERR_TARGET_TYPE: &str = "`target` must be \"b\", \"g\", \"i\" or an integer";
    pub const ERR_NOT_AN_OBJECT: &str = "frame must be a JSON object";

    /// Identify payload messages
    pub const ERR_SERVER_INFO_NOT_OBJECT: &str = "identify payload must be a JSON object";
    pub const ERR_SERVER_INFO_PORT: &str = "`port` must be an integer";
    pub const ERR_SERVER_INFO_HIDDEN: &str = "`hidden` must be a boolean";

    /// Connection messages
    pub const ERR_HUB_UNAVAILABLE: &str = "Routing task is no longer running";
}

/// RelayError is the error type for all relay operations
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection from {0} rejected")]
    ConnectionRejected(SocketAddr),

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Schema violation: {0}")]
    SchemaViolation(String),

    #[error("Sender {0} has not identified yet")]
    SenderNotReady(ClientId),

    #[error("Receiver {0} has not identified yet")]
    ReceiverNotReady(ClientId),

    #[error("Unknown receiver: {0}")]
    UnknownReceiver(ClientId),

    #[error("Unknown client: {0}")]
    UnknownClient(ClientId),

    #[error("Client {0} is already identified")]
    AlreadyIdentified(ClientId),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl RelayError {
    /// Whether the error only costs the current frame (the connection survives).
    pub fn is_frame_local(&self) -> bool {
        matches!(
            self,
            RelayError::MalformedFrame(_)
                | RelayError::SchemaViolation(_)
                | RelayError::SenderNotReady(_)
                | RelayError::ReceiverNotReady(_)
                | RelayError::UnknownReceiver(_)
                | RelayError::AlreadyIdentified(_)
        )
    }
}

/// Type alias for Results using RelayError
pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_frame_problems_are_frame_local() {
        let id = ClientId::from(3);
        let frame_local = [
            RelayError::MalformedFrame("x".into()),
            RelayError::SchemaViolation("x".into()),
            RelayError::SenderNotReady(id),
            RelayError::ReceiverNotReady(id),
            RelayError::UnknownReceiver(id),
            RelayError::AlreadyIdentified(id),
        ];
        assert!(frame_local.iter().all(RelayError::is_frame_local));

        // A peer going away surfaces as an I/O or transport error
        let connection_level = [
            RelayError::Io(std::io::ErrorKind::UnexpectedEof.into()),
            RelayError::TransportError("hub gone".into()),
            RelayError::UnknownClient(id),
            RelayError::ConnectionRejected(([8, 8, 8, 8], 1).into()),
            RelayError::ConfigError("x".into()),
        ];
        assert!(!connection_level.iter().any(RelayError::is_frame_local));
    }
}
