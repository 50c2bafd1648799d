//! Base-128 varint decoding over a byte cursor.
//!
//! Each byte contributes its low 7 bits, least significant group first.
//! A set high bit means another byte follows.

use crate::error::FormatError;

/// Longest encoding of a `u64`.
const MAX_VARINT_BYTES: usize = 10;

/// A read position over a borrowed byte slice.
///
/// Decoders advance `pos` by exactly the bytes they consume and never read
/// past the end of `buf`.
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current offset into the buffer.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Decode one unsigned varint and advance past it.
    pub fn read_varint(&mut self) -> Result<u64, FormatError> {
        let start = self.pos;
        let mut value = 0u64;

        for i in 0..MAX_VARINT_BYTES {
            let Some(&byte) = self.buf.get(self.pos) else {
                return Err(FormatError::Truncated {
                    what: "varint",
                    required: self.pos + 1,
                    actual: self.buf.len(),
                });
            };
            self.pos += 1;

            let shift = 7 * i as u32;
            let group = u64::from(byte & 0x7f);
            // the tenth byte may only carry the top bit of a u64
            if i == MAX_VARINT_BYTES - 1 && group > 1 {
                return Err(FormatError::VarintTooLong { position: start });
            }
            value |= group << shift;

            if byte < 0x80 {
                return Ok(value);
            }
        }

        Err(FormatError::VarintTooLong { position: start })
    }
}
