//! # Kernel Memory Core
//!
//! Physical frame allocation, page-table management and the kernel heap,
//! from the boot loader's memory map to a running allocator.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                Memory Manager                       │
//! │    • Bootstrap order                                │
//! │    • Halts on any error                             │
//! └───────┬──────────────────┬───────────────────┬──────┘
//!         │                  │                   │
//! ┌───────▼────────┐ ┌───────▼────────┐ ┌────────▼───────┐
//! │  Buddy Heap    │ │  Virtual Memory │ │ Physical Frame │
//! │  • 8..2048 B   │ │  Manager        │ │ Allocator      │
//! │  • Per-page    │ │  • 4-level x86  │ │ • Bitmap       │
//! │    trees       │ │  • Kernel tree  │ │ • Next-fit     │
//! └────────────────┘ └───────┬─────────┘ └────────▲───────┘
//!                            │  table frames       │
//!                            └─────────────────────┘
//! ```
//!
//! ## Core Components
//!
//! ### Physical Frame Allocator ([`frame_alloc`])
//!
//! One bit per 4 KiB frame between the lowest and highest free address in the
//! boot memory map, searched next-fit. Frames handed out are mapped at
//! `kernel base + pa`, so the kernel can always reach them.
//!
//! ### Virtual Memory Manager ([`vmm`])
//!
//! Builds the kernel's own tree at boot (kernel image, VGA window, frame
//! bitmap, tables), then maps and unmaps pages in it and in further address
//! spaces that share the kernel window.
//!
//! ### Physical Mapper ([`phys_mapper`])
//!
//! The fixed `pa + base` translation used to touch page tables, the frame
//! bitmap and the heap.
//!
//! ### Buddy Heap ([`buddy`])
//!
//! Small kernel allocations out of a pool of pages, each page carrying its
//! own buddy tree.
//!
//! ## Errors
//!
//! Components return [`MemoryError`] and [`BuddyError`]. The
//! [`MemoryManager`] treats all of them as fatal; see [`fatal`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use kernel_alloc::{HhdmPhysMapper, MemoryManager};
//! use kernel_info::boot::BootInfo;
//! use kernel_info::memory::KERNEL_HEAP_PAGES;
//! use kernel_vmem::Cr3Loader;
//!
//! fn kernel_main(boot: &BootInfo<'_>) {
//!     let mapper = HhdmPhysMapper::from_boot_info(boot);
//!     let mut mm =
//!         unsafe { MemoryManager::bootstrap(&mapper, boot, &mut Cr3Loader, KERNEL_HEAP_PAGES) };
//!     let block = mm.heap_alloc(64);
//!     mm.heap_free(block);
//! }
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod buddy;
mod error;
pub mod fatal;
pub mod frame_alloc;
mod frame_bitmap;
mod memory_manager;
pub mod phys_mapper;
pub mod vmm;

#[cfg(test)]
mod test_support;

pub use crate::buddy::BuddyAllocator;
pub use crate::error::{BuddyError, MemoryError};
pub use crate::frame_alloc::PhysicalAllocator;
pub use crate::frame_bitmap::FrameBitmap;
pub use crate::memory_manager::MemoryManager;
pub use crate::phys_mapper::HhdmPhysMapper;
pub use crate::vmm::Vmm;
