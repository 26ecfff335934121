//! # Core Wire Components
//!
//! Framing and message decoding for the relay wire format.
//!
//! ## Components
//! - **Codec**: Tokio codec splitting the byte stream into newline-terminated frames
//! - **Message**: JSON message shape, target tokens and schema validation
//!
//! ## Wire Format
//! ```text
//! [JSON object] [\n]
//! ```
//! No length prefix and no maximum frame size.

pub mod codec;
pub mod message;
