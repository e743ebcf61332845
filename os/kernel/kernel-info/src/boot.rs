//! # Kernel Boot Information

use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};

/// Firmware classification of a memory-map entry.
///
/// Discriminants follow the E820 numbering the loader passes through.
#[repr(u32)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RegionType {
    /// Usable RAM.
    Free = 1,
    /// Reserved by firmware or hardware.
    Reserved = 2,
    /// ACPI tables; usable once they have been parsed.
    AcpiReclaimable = 3,
    /// ACPI non-volatile storage.
    AcpiNvs = 4,
    /// Defective memory.
    Bad = 5,
}

impl RegionType {
    /// Decode a raw type field. Unknown values are treated as reserved.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        match raw {
            1 => Self::Free,
            3 => Self::AcpiReclaimable,
            4 => Self::AcpiNvs,
            5 => Self::Bad,
            _ => Self::Reserved,
        }
    }

    #[must_use]
    pub const fn is_free(self) -> bool {
        matches!(self, Self::Free)
    }
}

/// One entry of the boot memory map.
#[repr(C)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MemoryRegion {
    pub base: u64,
    pub length: u64,
    /// Raw [`RegionType`] discriminant.
    pub kind: u32,
    /// ACPI 3.0 extended attributes.
    pub acpi: u32,
}

impl MemoryRegion {
    #[must_use]
    pub const fn new(base: u64, length: u64, kind: RegionType) -> Self {
        Self {
            base,
            length,
            kind: kind as u32,
            acpi: 0,
        }
    }

    #[must_use]
    pub const fn region_type(&self) -> RegionType {
        RegionType::from_raw(self.kind)
    }

    #[must_use]
    pub const fn is_free(&self) -> bool {
        self.region_type().is_free()
    }

    /// One past the last byte of the region.
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.base + self.length
    }
}

/// A contiguous mapping the loader installed before entering the kernel.
#[repr(C)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BootMapping {
    pub phys: PhysicalAddress,
    pub virt: VirtualAddress,
    pub size: u64,
}

impl BootMapping {
    /// Whether `[start, start + len)` lies inside the mapped physical window.
    #[must_use]
    pub const fn covers(&self, start: PhysicalAddress, len: u64) -> bool {
        start.as_u64() >= self.phys.as_u64()
            && start.as_u64() + len <= self.phys.as_u64() + self.size
    }
}

/// Information the memory core needs right after the loader hands over.
#[derive(Debug, Copy, Clone)]
pub struct BootInfo<'a> {
    /// Physical address the kernel image was loaded at.
    pub kernel_load_addr: PhysicalAddress,

    /// Virtual address the kernel image executes at.
    pub kernel_load_vaddr: VirtualAddress,

    /// Size of the loaded kernel image in bytes.
    pub kernel_size: u64,

    /// Low identity window used while switching page tables.
    pub identity_map: BootMapping,

    /// The kernel window; its `virt` is the kernel virtual base.
    pub kernel_map: BootMapping,

    /// Firmware memory map.
    pub regions: &'a [MemoryRegion],
}

impl BootInfo<'_> {
    /// Offset at which physical memory appears in the kernel window.
    #[must_use]
    pub const fn kernel_virtual_base(&self) -> u64 {
        self.kernel_map.virt.as_u64() - self.kernel_map.phys.as_u64()
    }

    /// One past the last byte of the loaded kernel image.
    #[must_use]
    pub const fn kernel_end(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.kernel_load_addr.as_u64() + self.kernel_size)
    }

    pub fn free_regions(&self) -> impl Iterator<Item = &MemoryRegion> {
        self.regions.iter().filter(|r| r.is_free())
    }
}
