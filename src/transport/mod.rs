//! # Transport Layer
//!
//! TCP listener, per-connection tasks, admission control and the routing task they feed.

pub mod hub;
pub mod server;
pub mod whitelist;
