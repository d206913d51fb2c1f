//! Bounds-checked byte view
//!
//! Every structural read the parser and relocator perform goes through
//! [`Bytes`]. The image is attacker-adjacent input, so the "offset stays
//! inside the buffer" property is enforced here, once, instead of being
//! re-derived at every field access.

use crate::error::{ElfError, Result};

/// Immutable, bounds-checked view over a raw image buffer.
///
/// All offsets are `u64` because that is what ELF64 stores on disk; the
/// conversion to `usize` and every range computation is checked.
#[derive(Debug, Clone, Copy)]
pub struct Bytes<'a> {
    data: &'a [u8],
}

impl<'a> Bytes<'a> {
    /// Wrap a raw buffer.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// Total length of the underlying buffer.
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    /// Whether the underlying buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Borrow `len` bytes starting at `offset`, or fail without touching
    /// memory outside the buffer.
    pub fn range(&self, offset: u64, len: u64) -> Result<&'a [u8]> {
        let start = usize::try_from(offset).map_err(|_| ElfError::OutOfBounds)?;
        let len = usize::try_from(len).map_err(|_| ElfError::OutOfBounds)?;
        let end = start.checked_add(len).ok_or(ElfError::OutOfBounds)?;
        self.data.get(start..end).ok_or(ElfError::OutOfBounds)
    }

    /// Check that `[offset, offset + len)` lies inside the buffer.
    pub fn check_range(&self, offset: u64, len: u64) -> Result {
        self.range(offset, len).map(|_| ())
    }

    pub fn read_u8(&self, offset: u64) -> Result<u8> {
        Ok(self.range(offset, 1)?[0])
    }

    pub fn read_u16(&self, offset: u64) -> Result<u16> {
        let b = self.range(offset, 2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&self, offset: u64) -> Result<u32> {
        let b = self.range(offset, 4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u64(&self, offset: u64) -> Result<u64> {
        let b = self.range(offset, 8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    pub fn read_i64(&self, offset: u64) -> Result<i64> {
        Ok(self.read_u64(offset)? as i64)
    }

    /// Read a NUL-terminated name starting at `offset`, excluding the NUL.
    ///
    /// Fails if the string runs off the end of the buffer, which for a
    /// well-formed image cannot happen (string tables end with a NUL byte).
    pub fn cstr(&self, offset: u64) -> Result<&'a [u8]> {
        let start = usize::try_from(offset).map_err(|_| ElfError::BadStringTable)?;
        let tail = self.data.get(start..).ok_or(ElfError::BadStringTable)?;
        let nul = tail
            .iter()
            .position(|&b| b == 0)
            .ok_or(ElfError::BadStringTable)?;
        Ok(&tail[..nul])
    }
}
