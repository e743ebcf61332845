//! # Fixed-Offset `PhysMapper` for the Kernel Window
//!
//! The kernel sees physical memory at `pa + base`, where `base` is the
//! virtual address of the boot loader's kernel mapping. Every frame the
//! frame allocator hands out gets mapped there, and page tables, the frame
//! bitmap and the heap are all accessed through that window.
//!
//! ## Example
//! ```rust
//! use kernel_alloc::phys_mapper::HhdmPhysMapper;
//! use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
//! use kernel_vmem::PhysMapper;
//!
//! let mapper = HhdmPhysMapper::new(VirtualAddress::new(0xC000_0000));
//! let va = mapper.phys_to_virt(PhysicalAddress::new(0x10_1000));
//! assert_eq!(va, VirtualAddress::new(0xC010_1000));
//! assert_eq!(mapper.virt_to_phys(va), Some(PhysicalAddress::new(0x10_1000)));
//! ```

use kernel_info::boot::BootInfo;
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_vmem::PhysMapper;

/// [`PhysMapper`] that adds a constant offset to physical addresses.
///
/// # Safety
/// - The window must be mapped and cover the referenced physical range.
/// - Returned pointers must only be used for valid, mapped, writable memory.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct HhdmPhysMapper {
    base: VirtualAddress,
}

impl HhdmPhysMapper {
    #[must_use]
    pub const fn new(base: VirtualAddress) -> Self {
        Self { base }
    }

    /// The window the boot loader set up for the kernel.
    #[must_use]
    pub const fn from_boot_info(boot: &BootInfo<'_>) -> Self {
        Self::new(VirtualAddress::new(boot.kernel_virtual_base()))
    }

    /// Virtual address of physical address zero.
    #[must_use]
    pub const fn base(&self) -> VirtualAddress {
        self.base
    }

    /// Inverse of [`phys_to_virt`](PhysMapper::phys_to_virt) for addresses
    /// inside the window.
    #[must_use]
    pub const fn virt_to_phys(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        match va.checked_offset_from(self.base) {
            Some(pa) => Some(PhysicalAddress::new(pa)),
            None => None,
        }
    }
}

impl PhysMapper for HhdmPhysMapper {
    #[inline]
    fn phys_to_virt(&self, pa: PhysicalAddress) -> VirtualAddress {
        self.base + pa.as_u64()
    }
}
