//! # Buddy Heap
//!
//! A pool of 4 KiB pages, each managed as its own binary buddy tree of
//! blocks from 4096 down to 8 bytes.
//!
//! ```text
//! layer 0  [               4096               ]
//! layer 1  [       2048       ][      2048     ]
//! ...
//! layer 9  [8][8][8] ...                   [8]
//! ```
//!
//! The tree's bitmap (one bit per block, 1023 bits) is stored in the first
//! 128 bytes of the page it describes. Those bytes are a block of their own
//! and are taken at pool setup: block 0 of every layer down to the first
//! layer whose blocks are no larger than the bitmap. A fresh page thus
//! offers 3968 bytes, the largest single allocation being half a page.
//!
//! Allocations pick the first page, in pool order, with a fitting block.
//! Freed blocks are zeroed and merged with their buddy whenever it is free.

mod layer_bitmap;

pub use layer_bitmap::LayerBitmap;

use crate::BuddyError;
use kernel_memory_addresses::VirtualAddress;

/// Smallest block handed out.
pub const MIN_BLOCK: usize = 8;

/// Size of one pool page, the root block of its tree.
pub const POOL_PAGE: usize = 4096;

/// Number of layers in a page's tree.
#[allow(clippy::cast_possible_truncation)]
pub const LAYERS: usize = (POOL_PAGE / MIN_BLOCK).ilog2() as usize + 1;

/// Bits in a page's bitmap, one per block.
pub const BITMAP_BITS: usize = (1 << LAYERS) - 1;

/// Bytes at the start of each page holding its bitmap.
pub const BITMAP_BYTES: usize = BITMAP_BITS.div_ceil(8);

/// Deepest layer whose block 0 still covers the bitmap bytes.
pub const RESERVED_LAYER: usize = reserved_layer();

/// Largest request the heap serves.
pub const MAX_ALLOC: usize = POOL_PAGE / 2;

const fn reserved_layer() -> usize {
    let mut layer = LAYERS - 1;
    while block_size(layer) < BITMAP_BYTES {
        layer -= 1;
    }
    layer
}

/// Size of the blocks in `layer`.
#[inline]
#[must_use]
pub const fn block_size(layer: usize) -> usize {
    POOL_PAGE >> layer
}

/// The layer whose blocks are the smallest that hold `size` bytes.
#[must_use]
pub const fn layer_for(size: usize) -> usize {
    let mut layer = LAYERS - 1;
    while layer > 0 && block_size(layer) < size {
        layer -= 1;
    }
    layer
}

const _: () = {
    assert!(LAYERS == 10);
    assert!(BITMAP_BYTES == 128);
    assert!(RESERVED_LAYER == 5);
    assert!(block_size(RESERVED_LAYER) >= BITMAP_BYTES);
};

/// Buddy allocator over a pool of whole pages.
pub struct BuddyAllocator<'p> {
    pool: &'p mut [u8],
    base: VirtualAddress,
}

impl<'p> BuddyAllocator<'p> {
    /// Take over `pool` and set up the tree of every page.
    ///
    /// # Errors
    /// [`BuddyError::UnalignedPool`] unless `pool` is page aligned and a
    /// non-zero whole number of pages long.
    pub fn new(pool: &'p mut [u8]) -> Result<Self, BuddyError> {
        let base = VirtualAddress::from_ptr(pool.as_ptr());
        if pool.is_empty() || !pool.len().is_multiple_of(POOL_PAGE) || !base.is_page_aligned() {
            return Err(BuddyError::UnalignedPool);
        }

        for page in pool.chunks_exact_mut(POOL_PAGE) {
            LayerBitmap::new(&mut page[..BITMAP_BYTES]).reset(RESERVED_LAYER);
        }

        let heap = Self { pool, base };
        log::info!(
            "heap pool of {} pages at {base}, blocks of {MIN_BLOCK}..={MAX_ALLOC} bytes",
            heap.pages()
        );
        Ok(heap)
    }

    /// Number of pages in the pool.
    #[must_use]
    pub const fn pages(&self) -> usize {
        self.pool.len() / POOL_PAGE
    }

    /// Address of the first pool byte.
    #[must_use]
    pub const fn base(&self) -> VirtualAddress {
        self.base
    }

    fn bitmap(&self, page: usize) -> LayerBitmap<&[u8]> {
        let start = page * POOL_PAGE;
        LayerBitmap::new(&self.pool[start..start + BITMAP_BYTES])
    }

    fn bitmap_mut(&mut self, page: usize) -> LayerBitmap<&mut [u8]> {
        let start = page * POOL_PAGE;
        LayerBitmap::new(&mut self.pool[start..start + BITMAP_BYTES])
    }

    /// Allocate a block of at least `size` bytes.
    ///
    /// # Errors
    /// - [`BuddyError::TooLarge`] above [`MAX_ALLOC`].
    /// - [`BuddyError::OutOfMemory`] when no page has a fitting block.
    pub fn alloc(&mut self, size: usize) -> Result<VirtualAddress, BuddyError> {
        if size > MAX_ALLOC {
            return Err(BuddyError::TooLarge { size });
        }

        let layer = layer_for(size);
        for page in 0..self.pages() {
            if let Some(index) = self.bitmap_mut(page).claim(layer) {
                let offset = page * POOL_PAGE + index * block_size(layer);
                let addr = self.base + offset as u64;
                log::debug!("heap: {size} bytes at {addr} (page {page}, layer {layer})");
                return Ok(addr);
            }
        }

        Err(BuddyError::OutOfMemory { size })
    }

    /// Free the block at `addr`, zero it and merge it with free buddies.
    ///
    /// # Errors
    /// - [`BuddyError::OutsidePool`] if `addr` is not in the pool.
    /// - [`BuddyError::Reserved`] for the bitmap block of a page.
    /// - [`BuddyError::NotAllocated`] if no allocated block starts at `addr`.
    pub fn free(&mut self, addr: VirtualAddress) -> Result<(), BuddyError> {
        let offset = addr
            .checked_offset_from(self.base)
            .and_then(|o| usize::try_from(o).ok())
            .filter(|&o| o < self.pool.len())
            .ok_or(BuddyError::OutsidePool { addr })?;
        let page = offset / POOL_PAGE;
        let within = offset % POOL_PAGE;

        let (layer, index) = self
            .allocation_at(page, within)
            .ok_or(BuddyError::NotAllocated { addr })?;
        if layer <= RESERVED_LAYER && index == 0 {
            return Err(BuddyError::Reserved { addr });
        }

        let size = block_size(layer);
        self.pool[offset..offset + size].fill(0);
        self.bitmap_mut(page).release(layer, index);
        log::debug!("heap: freed {size} bytes at {addr}");
        Ok(())
    }

    /// The allocated block starting `within` bytes into `page`.
    ///
    /// Walks from the smallest blocks upward while `within` stays aligned
    /// to the block size; the first set bit is the block, provided it has
    /// not been split.
    fn allocation_at(&self, page: usize, within: usize) -> Option<(usize, usize)> {
        let bitmap = self.bitmap(page);
        let layer = (1..LAYERS)
            .rev()
            .take_while(|&layer| within.is_multiple_of(block_size(layer)))
            .find(|&layer| bitmap.get(layer, within / block_size(layer)))?;
        let index = within / block_size(layer);
        (!bitmap.is_split(layer, index)).then_some((layer, index))
    }

    /// Bytes still available in `page`.
    #[must_use]
    pub fn free_bytes(&self, page: usize) -> usize {
        let bitmap = self.bitmap(page);
        (1..LAYERS)
            .map(|layer| {
                let free = (0..1 << layer).filter(|&i| bitmap.is_free(layer, i)).count();
                free * block_size(layer)
            })
            .sum()
    }

    /// The tree of `page` for display: one row per layer, `X` for set bits.
    #[must_use]
    pub fn visualize(&self, page: usize) -> Option<LayerBitmap<&[u8]>> {
        (page < self.pages()).then(|| self.bitmap(page))
    }
}
