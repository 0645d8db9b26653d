//! zlib-stream decompression
//!
//! The gateway sends binary frames as one continuous zlib stream. Each
//! complete message ends with the zlib sync-flush suffix `00 00 FF FF`;
//! frames without it are partial and must be buffered. The decompression
//! context is shared across the whole connection, so it must never be reset
//! mid-session.

use crate::error::CompressionError;
use flate2::{Decompress, FlushDecompress, Status};

/// Marks the end of one complete compressed message
const SYNC_FLUSH_SUFFIX: [u8; 4] = [0x00, 0x00, 0xFF, 0xFF];

/// Initial output buffer size per message
const OUTPUT_CHUNK: usize = 16 * 1024;

/// Streaming inflater for one gateway connection
///
/// Feed every binary frame through [`Inflater::extend`]; a decompressed
/// message comes out once the sync-flush suffix arrives.
pub struct Inflater {
    decompress: Decompress,
    buffer: Vec<u8>,
}

impl Inflater {
    /// Create a fresh inflater with a new zlib context
    #[must_use]
    pub fn new() -> Self {
        Self {
            decompress: Decompress::new(true),
            buffer: Vec::with_capacity(OUTPUT_CHUNK),
        }
    }

    /// Feed one binary frame
    ///
    /// Returns `Ok(None)` while the message is still incomplete, or the
    /// decompressed JSON text once the suffix closes it out.
    pub fn extend(&mut self, frame: &[u8]) -> Result<Option<String>, CompressionError> {
        self.buffer.extend_from_slice(frame);

        if !self.buffer.ends_with(&SYNC_FLUSH_SUFFIX) {
            return Ok(None);
        }

        let message = self.inflate_buffered()?;
        self.buffer.clear();
        Ok(Some(message))
    }

    fn inflate_buffered(&mut self) -> Result<String, CompressionError> {
        let mut output = Vec::with_capacity(OUTPUT_CHUNK);
        let mut offset = 0usize;

        while offset < self.buffer.len() {
            let before = self.decompress.total_in();
            let status = self.decompress.decompress_vec(
                &self.buffer[offset..],
                &mut output,
                FlushDecompress::Sync,
            )?;
            offset += usize::try_from(self.decompress.total_in() - before).unwrap_or(usize::MAX);

            match status {
                Status::Ok | Status::BufError if output.len() == output.capacity() => {
                    output.reserve(OUTPUT_CHUNK);
                }
                Status::StreamEnd => break,
                _ => {
                    if offset >= self.buffer.len() {
                        break;
                    }
                }
            }
        }

        Ok(String::from_utf8(output)?)
    }

    /// Re-arm the context for a new connection
    ///
    /// The server starts a fresh zlib stream per connection, so the old
    /// context is useless after a reconnect.
    pub fn reset(&mut self) {
        self.decompress.reset(true);
        self.buffer.clear();
    }

    /// Bytes currently buffered for an incomplete message
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for Inflater {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Inflater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inflater")
            .field("pending", &self.buffer.len())
            .finish()
    }
}
