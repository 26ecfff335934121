//! # Frame Codec
//!
//! Newline-delimited framing for relay traffic.
//!
//! Inbound bytes accumulate in the `FramedRead` buffer of each connection. Every complete
//! `\n`-terminated segment is yielded as one frame (without the delimiter); the unterminated tail
//! stays buffered until more bytes arrive. There is no maximum frame length, so a peer that never
//! sends a delimiter grows its buffer without bound.
//!
//! Bytes are split before they are decoded as text, so a multi-byte character cut in half by the
//! transport is reassembled before decoding. Invalid UTF-8 is replaced lossily.
//!
//! ## Wire Format
//! ```text
//! {"context":"Chat","data":"hi","target":"g"}\n
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

use crate::error::{RelayError, Result};

/// Frame delimiter on the wire
pub const FRAME_DELIMITER: u8 = b'\n';

/// Splits a byte stream into text frames and writes frames back with a trailing delimiter.
#[derive(Debug, Default, Clone)]
pub struct FrameCodec {
    /// Offset up to which the buffer is known not to contain a delimiter
    next_index: usize,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for FrameCodec {
    type Item = String;
    type Error = RelayError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let offset = src[self.next_index..]
            .iter()
            .position(|byte| *byte == FRAME_DELIMITER);

        match offset {
            Some(offset) => {
                let delimiter_index = self.next_index + offset;
                self.next_index = 0;

                let line = src.split_to(delimiter_index + 1);
                let frame = &line[..line.len() - 1];
                Ok(Some(String::from_utf8_lossy(frame).into_owned()))
            }
            None => {
                // Skip the already-scanned prefix on the next call
                self.next_index = src.len();
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }

        if !src.is_empty() {
            debug!(bytes = src.len(), "Discarding unterminated frame at end of stream");
            src.clear();
        }
        self.next_index = 0;
        Ok(None)
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = RelayError;

    fn encode(&mut self, frame: Bytes, dst: &mut BytesMut) -> Result<()> {
        dst.reserve(frame.len() + 1);
        dst.put_slice(&frame);
        dst.put_u8(FRAME_DELIMITER);
        Ok(())
    }
}
