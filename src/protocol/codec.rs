//! Protocol codec
//!
//! Encoding and decoding functions for the wire protocol.
//!
//! ## Wire Format
//! ```text
//! ┌───────────────┬─────┬───────────────┬─────┬──────
//! │  message (n)  │ SEP │  message (m)  │ SEP │ ...
//! └───────────────┴─────┴───────────────┴─────┴──────
//! ```
//!
//! A message is UTF-8 text that never contains the separator. There is no
//! length prefix and no escaping.

use bytes::{Buf, BytesMut};

use crate::config::Separator;
use crate::error::{CourierError, Result};

// =============================================================================
// Encoding
// =============================================================================

/// Encode a message to bytes
///
/// Format: message + separator
pub fn encode_message(message: &str, separator: Separator) -> Result<Vec<u8>> {
    if message.contains(separator.as_char()) {
        return Err(CourierError::SeparatorInMessage);
    }

    let sep = separator.as_bytes();
    let mut bytes = Vec::with_capacity(message.len() + sep.len());
    bytes.extend_from_slice(message.as_bytes());
    bytes.extend_from_slice(sep);
    Ok(bytes)
}

// =============================================================================
// Decoding
// =============================================================================

/// Incremental splitter for a separator-delimited byte stream
///
/// Bytes go in through [`extend`](Self::extend); complete messages come out of
/// [`drain_complete`](Self::drain_complete). Whatever follows the last
/// separator stays buffered until more data completes it.
#[derive(Debug)]
pub struct FrameDecoder {
    separator: Separator,
    buffer: BytesMut,
}

impl FrameDecoder {
    pub fn new(separator: Separator) -> Self {
        Self {
            separator,
            buffer: BytesMut::new(),
        }
    }

    pub fn separator(&self) -> Separator {
        self.separator
    }

    /// Append raw bytes read from the stream
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Number of buffered bytes not yet returned as messages
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// True when the buffer is empty or its last bytes are the separator
    pub fn ends_on_boundary(&self) -> bool {
        self.buffer.is_empty() || self.buffer.ends_with(self.separator.as_bytes())
    }

    /// Split off every complete message, in arrival order
    ///
    /// Empty fragments (two separators in a row) are skipped.
    pub fn drain_complete(&mut self) -> Vec<String> {
        let sep_len = self.separator.as_bytes().len();
        let mut messages = Vec::new();

        while let Some(pos) = find(&self.buffer, self.separator.as_bytes()) {
            let frame = self.buffer.split_to(pos);
            self.buffer.advance(sep_len);
            if !frame.is_empty() {
                messages.push(decode_frame(&frame));
            }
        }

        messages
    }

    /// Flush the trailing partial fragment, if any
    ///
    /// Used once the stream has ended and nothing can complete it.
    pub fn take_remainder(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let frame = self.buffer.split();
        Some(decode_frame(&frame))
    }
}

/// Position of the first occurrence of `needle` in `haystack`
fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() == 1 {
        return haystack.iter().position(|b| *b == needle[0]);
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn decode_frame(frame: &[u8]) -> String {
    match std::str::from_utf8(frame) {
        Ok(s) => s.to_string(),
        Err(e) => {
            tracing::warn!("Received message with invalid UTF-8 ({}), replacing bytes", e);
            String::from_utf8_lossy(frame).into_owned()
        }
    }
}
