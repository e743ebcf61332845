use super::{BITMAP_BITS, BITMAP_BYTES, LAYERS};
use core::fmt;

/// The allocation tree of one heap page, stored in its first bytes.
///
/// Layer `l` holds `2^l` blocks; block `i` of layer `l` is bit
/// `2^l - 1 + i`, most significant bit first within each byte. A set bit
/// marks a block that is allocated or split into its two children.
pub struct LayerBitmap<B> {
    bits: B,
}

impl<B: AsRef<[u8]>> LayerBitmap<B> {
    #[must_use]
    pub fn new(bits: B) -> Self {
        debug_assert!(bits.as_ref().len() >= BITMAP_BYTES);
        Self { bits }
    }

    #[inline]
    const fn position(layer: usize, index: usize) -> usize {
        debug_assert!(layer < LAYERS && index < (1 << layer));
        (1 << layer) - 1 + index
    }

    #[inline]
    #[must_use]
    pub fn get(&self, layer: usize, index: usize) -> bool {
        let bit = Self::position(layer, index);
        self.bits.as_ref()[bit / 8] & (0x80 >> (bit % 8)) != 0
    }

    /// Whether block `index` of `layer` is free to hand out: clear, with its
    /// buddy in use. Layer 0 is never free.
    #[inline]
    #[must_use]
    pub fn is_free(&self, layer: usize, index: usize) -> bool {
        layer > 0 && !self.get(layer, index) && self.get(layer, index ^ 1)
    }

    /// Whether a set block is split rather than allocated.
    #[must_use]
    pub fn is_split(&self, layer: usize, index: usize) -> bool {
        layer + 1 < LAYERS && (self.get(layer + 1, 2 * index) || self.get(layer + 1, 2 * index + 1))
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> LayerBitmap<B> {
    #[inline]
    pub fn set(&mut self, layer: usize, index: usize) {
        let bit = Self::position(layer, index);
        self.bits.as_mut()[bit / 8] |= 0x80 >> (bit % 8);
    }

    #[inline]
    pub fn clear(&mut self, layer: usize, index: usize) {
        let bit = Self::position(layer, index);
        self.bits.as_mut()[bit / 8] &= !(0x80 >> (bit % 8));
    }

    /// Clear every bit, then mark block 0 of layers `0..=through` as taken.
    pub fn reset(&mut self, through: usize) {
        self.bits.as_mut()[..BITMAP_BYTES].fill(0);
        for layer in 0..=through {
            self.set(layer, 0);
        }
    }

    /// Take a block of `target`'s size.
    ///
    /// Layers from `target` up to 1 are searched for a free block; the
    /// first one found is marked and, if it is larger than needed, split
    /// down to `target` along its left children. Returns the block's index
    /// in `target`.
    pub fn claim(&mut self, target: usize) -> Option<usize> {
        for layer in (1..=target).rev() {
            let Some(mut index) = (0..1 << layer).find(|&i| self.is_free(layer, i)) else {
                continue;
            };
            self.set(layer, index);
            for child in layer + 1..=target {
                index *= 2;
                self.set(child, index);
            }
            return Some(index);
        }
        None
    }

    /// Clear block `index` of `layer` and merge it with its buddy for as
    /// long as the buddy is clear too.
    pub fn release(&mut self, mut layer: usize, mut index: usize) {
        self.clear(layer, index);
        while layer > 0 && !self.get(layer, index ^ 1) {
            layer -= 1;
            index /= 2;
            self.clear(layer, index);
        }
    }
}

/// One row per layer, `X` for set and `O` for clear bits.
impl<B: AsRef<[u8]>> fmt::Display for LayerBitmap<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for layer in 0..LAYERS {
            for index in 0..1 << layer {
                f.write_str(if self.get(layer, index) { "X" } else { "O" })?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

const _: () = assert!(BITMAP_BITS == (1 << LAYERS) - 1);
