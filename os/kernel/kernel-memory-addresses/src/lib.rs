//! # Virtual and Physical Memory Address Types
//!
//! Strongly typed wrappers for raw addresses and 4 KiB page/frame bases used
//! by the frame allocator, the page-table code and the heap.
//!
//! ## Overview
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`PhysicalAddress`] | A byte address in physical memory (RAM or MMIO). |
//! | [`PhysicalPage`] | A 4 KiB aligned physical frame, identified by its base. |
//! | [`VirtualAddress`] | A byte address as seen through the page tables. |
//! | [`VirtualPage`] | A 4 KiB aligned virtual page. |
//!
//! The kernel maps physical memory into its upper half at a fixed offset,
//! so converting between the two spaces is a plain addition; that policy
//! lives with the physical mapper, not here. These types only keep the two
//! spaces from being mixed up at compile time.
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let pa = PhysicalAddress::new(0x0010_1234);
//! assert_eq!(pa.page().base().as_u64(), 0x0010_1000);
//! assert_eq!(pa.offset_in_page(), 0x234);
//! assert_eq!(pa.page().number(), 0x101);
//!
//! let va = VirtualAddress::new(0xC010_1000);
//! assert!(va.is_page_aligned());
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(clippy::inline_always)]

mod physical_address;
mod physical_page;
mod virtual_address;
mod virtual_page;

pub use physical_address::PhysicalAddress;
pub use physical_page::PhysicalPage;
pub use virtual_address::VirtualAddress;
pub use virtual_page::VirtualPage;

/// Size of a base page (and of a physical frame) in bytes.
pub const PAGE_SIZE: u64 = 4096;

/// `log2(PAGE_SIZE)`; the number of in-page offset bits.
pub const PAGE_SHIFT: u32 = 12;

const _: () = assert!(1 << PAGE_SHIFT == PAGE_SIZE);

/// Align `x` down to the nearest multiple of `align`.
///
/// # Preconditions
/// - `align` must be a power of two.
///
/// ```rust
/// # use kernel_memory_addresses::align_down;
/// assert_eq!(align_down(0x9_FC00, 0x1000), 0x9_F000);
/// ```
#[inline(always)]
#[must_use]
pub const fn align_down(x: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two());
    x & !(align - 1)
}

/// Align `x` up to the nearest multiple of `align`.
///
/// # Preconditions
/// - `align` must be a power of two.
/// - `x + align - 1` must not overflow.
///
/// ```rust
/// # use kernel_memory_addresses::align_up;
/// assert_eq!(align_up(0x10_0001, 0x1000), 0x10_1000);
/// assert_eq!(align_up(0x10_0000, 0x1000), 0x10_0000);
/// ```
#[inline(always)]
#[must_use]
pub const fn align_up(x: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two());
    (x + align - 1) & !(align - 1)
}

/// Number of whole pages needed to cover `bytes`.
#[inline(always)]
#[must_use]
pub const fn pages_for(bytes: u64) -> u64 {
    bytes.div_ceil(PAGE_SIZE)
}
