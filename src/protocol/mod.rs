//! # Protocol Layer
//!
//! Everything that happens between "a frame was decoded" and "frames were queued for delivery".
//!
//! - [`registry`]: connected clients and identity allocation
//! - [`handshake`]: the identify exchange and group introductions
//! - [`router`]: direct, group and global delivery
//! - [`dispatcher`]: picks the right path for each message and handles departures

pub mod dispatcher;
pub mod handshake;
pub mod registry;
pub mod router;
