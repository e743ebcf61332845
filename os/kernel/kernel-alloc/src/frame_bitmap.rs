//! # Frame Bitmap
//!
//! One bit per 4 KiB frame: `1` = allocated or reserved, `0` = free.
//! Bits are stored most-significant first within each byte, so frame `i`
//! lives at `byte[i / 8] & (0x80 >> (i % 8))`.

use core::fmt;

/// Bitmap over externally owned storage.
pub struct FrameBitmap<'m> {
    bytes: &'m mut [u8],
    len: usize,
}

impl<'m> FrameBitmap<'m> {
    /// Bytes needed to track `frames` frames.
    #[inline]
    #[must_use]
    pub const fn bytes_for(frames: usize) -> usize {
        frames.div_ceil(8)
    }

    /// Wrap `bytes` as a bitmap of `len` bits. Contents are left as found.
    ///
    /// # Panics
    /// If `bytes` is too short for `len` bits.
    #[must_use]
    pub fn new(bytes: &'m mut [u8], len: usize) -> Self {
        assert!(
            bytes.len() >= Self::bytes_for(len),
            "bitmap storage of {} bytes cannot hold {len} bits",
            bytes.len()
        );
        Self { bytes, len }
    }

    /// Number of tracked frames.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..Self::bytes_for(self.len)]
    }

    #[inline]
    const fn mask(bit: usize) -> u8 {
        0x80 >> (bit % 8)
    }

    /// Whether frame `bit` is used.
    #[inline]
    #[must_use]
    pub fn get(&self, bit: usize) -> bool {
        debug_assert!(bit < self.len);
        self.bytes[bit / 8] & Self::mask(bit) != 0
    }

    #[inline]
    pub fn set(&mut self, bit: usize, used: bool) {
        debug_assert!(bit < self.len);
        if used {
            self.bytes[bit / 8] |= Self::mask(bit);
        } else {
            self.bytes[bit / 8] &= !Self::mask(bit);
        }
    }

    /// Set `count` bits starting at `start`, writing whole bytes where
    /// possible.
    pub fn set_range(&mut self, start: usize, count: usize, used: bool) {
        debug_assert!(start + count <= self.len, "range {start}+{count} beyond {}", self.len);
        let mut bit = start;
        let end = start + count;

        while bit < end && bit % 8 != 0 {
            self.set(bit, used);
            bit += 1;
        }

        let whole = (end - bit) / 8;
        if whole > 0 {
            let fill = if used { 0xFF } else { 0x00 };
            self.bytes[bit / 8..bit / 8 + whole].fill(fill);
            bit += whole * 8;
        }

        while bit < end {
            self.set(bit, used);
            bit += 1;
        }
    }

    /// Set every bit, including the padding bits of the last byte.
    pub fn fill(&mut self, used: bool) {
        let n = Self::bytes_for(self.len);
        self.bytes[..n].fill(if used { 0xFF } else { 0x00 });
    }

    /// Number of used frames.
    #[must_use]
    pub fn count_used(&self) -> usize {
        (0..self.len).filter(|&bit| self.get(bit)).count()
    }
}

impl fmt::Debug for FrameBitmap<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameBitmap")
            .field("len", &self.len)
            .field("used", &self.count_used())
            .finish()
    }
}
