//! # Memory Layout

pub use kernel_memory_addresses::{PAGE_SHIFT, PAGE_SIZE};

/// First byte of the legacy VGA memory window.
pub const VGA_WINDOW_START: u64 = 0x000A_0000;

/// Last byte (inclusive) of the legacy VGA memory window.
pub const VGA_WINDOW_END: u64 = 0x000B_FFFF;

/// Number of pages the VGA window spans.
pub const VGA_WINDOW_PAGES: u64 = (VGA_WINDOW_END - VGA_WINDOW_START + 1) / PAGE_SIZE;

/// Number of pages handed to the kernel heap at boot.
pub const KERNEL_HEAP_PAGES: usize = 20;

const _: () = {
    assert!(VGA_WINDOW_START.is_multiple_of(PAGE_SIZE));
    assert!(VGA_WINDOW_PAGES == 32);
    assert!(VGA_WINDOW_END < 0x10_0000);
    assert!(KERNEL_HEAP_PAGES > 0);
};
