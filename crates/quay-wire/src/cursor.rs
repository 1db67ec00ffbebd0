//! Bounds-checked reader over a borrowed byte slice.

use crate::errors::WireError;

/// Forward-only reader that never advances past the end of its buffer.
///
/// A failed read leaves the position untouched.
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> Cursor<'a> {
    /// Starts reading at the beginning of `bytes`.
    #[must_use]
    pub const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, position: 0 }
    }

    /// Bytes consumed so far.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.position
    }

    /// Unread bytes.
    #[must_use]
    pub fn remaining(&self) -> &'a [u8] {
        let bytes = self.bytes;
        bytes.get(self.position..).unwrap_or_default()
    }

    /// Number of unread bytes.
    #[must_use]
    pub fn remaining_len(&self) -> usize {
        self.bytes.len().saturating_sub(self.position)
    }

    /// Returns the next `len` bytes and advances past them.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Truncated`] when fewer than `len` bytes remain.
    pub fn take(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        let truncated = || WireError::Truncated {
            needed: len,
            available: self.remaining_len(),
        };
        let end = self.position.checked_add(len).ok_or_else(truncated)?;
        let bytes = self.bytes;
        let slice = bytes.get(self.position..end).ok_or_else(truncated)?;
        self.position = end;
        Ok(slice)
    }

    /// Reads a fixed-size array.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Truncated`] when fewer than `N` bytes remain.
    pub fn take_array<const N: usize>(&mut self) -> Result<[u8; N], WireError> {
        let slice = self.take(N)?;
        let mut out = [0_u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    /// Reads a big-endian `u16`.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Truncated`] when fewer than two bytes remain.
    pub fn read_u16(&mut self) -> Result<u16, WireError> {
        self.take_array().map(u16::from_be_bytes)
    }

    /// Reads a big-endian `u32`.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Truncated`] when fewer than four bytes remain.
    pub fn read_u32(&mut self) -> Result<u32, WireError> {
        self.take_array().map(u32::from_be_bytes)
    }
}
