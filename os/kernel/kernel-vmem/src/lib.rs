//! # Virtual Memory Support
//!
//! x86-64 four-level paging for the kernel's memory core.
//!
//! ## What you get
//! - [`PageEntryBits`]: the bit-exact layout of one page-table entry.
//! - [`PageTable`] / [`PageTableEntry`]: a 4 KiB node of 512 typed entries.
//! - [`TableLevel`] / [`TableIndex`]: the per-level split of a virtual address.
//! - [`AddressSpace`]: walk, map, unmap and translate within one L4 tree.
//! - The seams to the rest of the kernel: [`PhysMapper`] (reach a physical
//!   frame), [`FrameAlloc`] (get frames for new tables) and [`RootLoader`]
//!   (make an L4 tree the active one).
//!
//! ## x86-64 Virtual Address → Physical Address Walk
//!
//! ```text
//! | 47‒39 | 38‒30 | 29‒21 | 20‒12 | 11‒0   |
//! |  L4   |  L3   |  L2   |  L1   | Offset |
//! ```
//!
//! ```text
//!  CR3 ─► L4 ─► L3 ─► L2 ─► L1 ─► 4 KiB frame
//! ```
//!
//! Each level holds 512 eight-byte entries. Entries at L4 to L2 link to the
//! next table; L1 entries map a frame. Intermediate tables are created on
//! demand and never reclaimed.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

#[cfg(test)]
extern crate alloc;

pub mod address_space;
mod error;
mod page_entry_bits;
pub mod page_table;

pub use crate::address_space::{AddressSpace, RootPage, Walk};
pub use crate::error::{MapError, UnmapError};
pub use crate::page_entry_bits::{FRAME_NUMBER_MASK, PageEntryBits};
pub use crate::page_table::{PageTable, PageTableEntry, TableIndex, TableLevel};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, VirtualAddress};

/// Source of **physical** 4 KiB frames for new page tables.
///
/// Returned frames must be zeroed and reachable through the
/// [`PhysMapper`] used by the [`AddressSpace`] that asked for them.
pub trait FrameAlloc {
    /// The allocator's failure type; must be able to carry mapping errors
    /// raised by the walk itself.
    type Error: From<MapError>;

    /// Allocate one zeroed frame for a page table.
    ///
    /// # Errors
    /// When no frame is available, or preparing the frame failed.
    fn alloc_table(&mut self) -> Result<PhysicalPage, Self::Error>;

    /// Give back a frame obtained from [`alloc_table`](Self::alloc_table)
    /// that ended up unused.
    ///
    /// # Errors
    /// When undoing the allocation failed.
    fn release_table(&mut self, frame: PhysicalPage) -> Result<(), Self::Error>;
}

/// Converts physical addresses to pointers usable in the current address
/// space.
///
/// The kernel reaches physical memory at a fixed offset (`pa + base`); host
/// tests back "physical memory" with a heap buffer.
pub trait PhysMapper {
    /// The virtual address at which `pa` is reachable right now.
    fn phys_to_virt(&self, pa: PhysicalAddress) -> VirtualAddress;

    /// Reinterpret the memory at `pa` as a `T`.
    ///
    /// # Safety
    /// - `pa` must be mapped writable in the current address space.
    /// - `pa` must be suitably aligned for `T` and hold a valid `T`.
    /// - No other live reference may alias the returned one for `'a`.
    #[inline]
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        unsafe { &mut *self.phys_to_virt(pa).as_mut_ptr::<T>() }
    }

    /// The `len` bytes starting at `pa`.
    ///
    /// # Safety
    /// Same contract as [`phys_to_mut`](Self::phys_to_mut) for the whole
    /// range.
    #[inline]
    unsafe fn phys_to_bytes_mut<'a>(&self, pa: PhysicalAddress, len: usize) -> &'a mut [u8] {
        unsafe { core::slice::from_raw_parts_mut(self.phys_to_virt(pa).as_mut_ptr::<u8>(), len) }
    }
}

/// Makes an L4 tree the one the MMU walks.
pub trait RootLoader {
    /// # Safety
    /// The tree rooted at `root` must map all code and data the CPU touches
    /// after the switch, including the caller's stack.
    unsafe fn load_root(&mut self, root: RootPage);
}

/// Switches address spaces by writing CR3.
#[cfg(target_arch = "x86_64")]
#[derive(Debug, Default, Copy, Clone)]
pub struct Cr3Loader;

#[cfg(target_arch = "x86_64")]
impl RootLoader for Cr3Loader {
    unsafe fn load_root(&mut self, root: RootPage) {
        use kernel_registers::cr3::Cr3;
        use kernel_registers::{LoadRegisterUnsafe, StoreRegisterUnsafe};

        let previous = unsafe { Cr3::load_unsafe() };
        log::debug!("loading CR3 with {} (was {})", root.base(), previous.root_phys());
        unsafe { Cr3::from_root(root).store_unsafe() }
    }
}
