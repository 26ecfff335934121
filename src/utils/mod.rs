//! # Utility Modules
//!
//! - **Logging**: `tracing-subscriber` setup
//! - **Metrics**: thread-safe observability counters

pub mod logging;
pub mod metrics;
