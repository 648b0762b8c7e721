//! Line framing for the SmartSDR TCP stream.
//!
//! The radio speaks newline-terminated ASCII in both directions:
//!
//! ```text
//! S1F5C6BC|transmit vox_enable=1 vox_level=68\n
//! R13|0|\n
//! ```
//!
//! TCP delivers those bytes in arbitrary chunks, so [`LineFramer`] buffers the
//! tail after the last `\n` and prefixes it to the next chunk.

use bytes::BytesMut;

use crate::constants::MAX_LINE_LEN;
use crate::error::{ProtocolError, Result};

/// Incremental line splitter that handles partial reads.
///
/// Feed bytes via [`LineFramer::feed`] and collect complete lines. A trailing
/// `\r` is stripped and empty lines are skipped. Any line longer than
/// `max_line_len`, whether complete or still buffered, fails the stream, so
/// the outcome does not depend on how the bytes were chunked.
#[derive(Debug)]
pub struct LineFramer {
    buf: BytesMut,
    max_line_len: usize,
}

impl LineFramer {
    /// Create a framer with the given line limit.
    pub fn new(max_line_len: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_line_len,
        }
    }

    /// Feed bytes into the framer and append every complete line to `lines`.
    ///
    /// Incomplete data is buffered for the next call. Lines that precede an
    /// oversized one in the same chunk are still appended, so the caller sees
    /// the same lines however the stream was chunked.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedStream`] if a line exceeds the limit.
    /// The framer should be discarded (or [`reset`](Self::reset)) afterwards.
    pub fn feed(&mut self, bytes: &[u8], lines: &mut Vec<String>) -> Result<()> {
        // Only the new bytes can contain a terminator we haven't seen yet
        let mut scan_from = self.buf.len();
        self.buf.extend_from_slice(bytes);

        while let Some(offset) = self.buf[scan_from..].iter().position(|&b| b == b'\n') {
            let end = scan_from + offset;
            if end > self.max_line_len {
                return Err(ProtocolError::MalformedStream {
                    len: end,
                    max: self.max_line_len,
                });
            }

            let mut line = self.buf.split_to(end + 1);
            line.truncate(end);
            if line.last() == Some(&b'\r') {
                line.truncate(end - 1);
            }
            if !line.is_empty() {
                lines.push(String::from_utf8_lossy(&line).into_owned());
            }
            scan_from = 0;
        }

        if self.buf.len() > self.max_line_len {
            return Err(ProtocolError::MalformedStream {
                len: self.buf.len(),
                max: self.max_line_len,
            });
        }

        Ok(())
    }

    /// Returns true if the framer has buffered partial data.
    pub fn has_partial(&self) -> bool {
        !self.buf.is_empty()
    }

    /// Drop any buffered partial line, ready for a new connection.
    pub fn reset(&mut self) {
        self.buf.clear();
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new(MAX_LINE_LEN)
    }
}
