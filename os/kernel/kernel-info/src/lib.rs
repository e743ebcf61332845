//! # Kernel Boot Interface and Memory Layout
//!
//! Data structures and layout constants shared between the boot stage and
//! the kernel's memory core (frame allocator, page tables, heap).
//!
//! ## Overview
//!
//! ### Boot Information ([`boot`])
//! The bootloader hands over a [`BootInfo`](boot::BootInfo) describing:
//! * **Memory Map**: a list of [`MemoryRegion`](boot::MemoryRegion)s with a
//!   firmware-reported [`RegionType`](boot::RegionType)
//! * **Kernel Image**: physical load address and size of the loaded image
//! * **Boot Mappings**: the identity window and the kernel window the loader
//!   installed before jumping to the kernel
//!
//! ### Memory Layout ([`memory`])
//! Compile-time constants for the kernel's address-space layout.
//!
//! ## Address Space Layout
//!
//! ```text
//! Virtual Address Space (default layout):
//!
//! 0x0000_0000_0000_0000 ┌─────────────────────────────────┐
//!                       │         User Space              │
//! kernel window base    ├─────────────────────────────────┤ 0x0000_0000_C000_0000
//!                       │  Physical memory at pa + base   │
//!                       │  (kernel image, frame bitmap,   │
//!                       │   page tables, heap pages, VGA) │
//!                       └─────────────────────────────────┘
//! ```
//!
//! Every frame the kernel touches after paging is enabled is reachable at
//! `pa + base`. The base is taken from the boot kernel mapping at runtime;
//! `0xC000_0000` is what the loader picks by default.
//!
//! ## Physical Memory Layout
//!
//! ```text
//! 0x0000_0000 ┌─────────────────────────────────┐
//!             │     Low Memory (< 1MiB)         │
//!             │  (BIOS, VGA window, ROMs)       │
//! load addr   ├─────────────────────────────────┤ 0x0010_0000 (1 MiB)
//!             │       Kernel Image              │
//!             ├─────────────────────────────────┤
//!             │       Frame Bitmap              │
//!             ├─────────────────────────────────┤
//!             │    Available RAM                │
//!             └─────────────────────────────────┘
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod boot;
pub mod memory;
