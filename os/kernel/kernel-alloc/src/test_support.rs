//! Host stand-ins for physical memory and the boot loader.

use crate::HhdmPhysMapper;
use kernel_info::boot::{BootInfo, BootMapping, MemoryRegion};
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_vmem::{RootLoader, RootPage};
use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::ptr::NonNull;

/// A zeroed, page-aligned host buffer playing physical memory from
/// address 0 upward.
pub struct SimulatedRam {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl SimulatedRam {
    pub fn new(bytes: u64) -> Self {
        let layout = Layout::from_size_align(usize::try_from(bytes).expect("size"), 4096)
            .expect("layout");
        let ptr = NonNull::new(unsafe { alloc_zeroed(layout) }).expect("host allocation");
        Self { ptr, layout }
    }

    pub fn len(&self) -> u64 {
        self.layout.size() as u64
    }

    /// Where physical address 0 lives on the host.
    pub fn base(&self) -> VirtualAddress {
        VirtualAddress::from_ptr(self.ptr.as_ptr())
    }

    pub fn mapper(&self) -> HhdmPhysMapper {
        HhdmPhysMapper::new(self.base())
    }
}

impl Drop for SimulatedRam {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

/// Boot info whose kernel window covers all of `ram`.
pub fn boot_info<'a>(
    ram: &SimulatedRam,
    regions: &'a [MemoryRegion],
    kernel_load: u64,
    kernel_size: u64,
) -> BootInfo<'a> {
    BootInfo {
        kernel_load_addr: PhysicalAddress::new(kernel_load),
        kernel_load_vaddr: ram.base() + kernel_load,
        kernel_size,
        identity_map: BootMapping {
            phys: PhysicalAddress::zero(),
            virt: VirtualAddress::new(0),
            size: 0x40_0000,
        },
        kernel_map: BootMapping {
            phys: PhysicalAddress::zero(),
            virt: ram.base(),
            size: ram.len(),
        },
        regions,
    }
}

/// Remembers every root it was asked to load.
#[derive(Debug, Default)]
pub struct RecordingLoader {
    pub loaded: Vec<RootPage>,
}

impl RootLoader for RecordingLoader {
    unsafe fn load_root(&mut self, root: RootPage) {
        self.loaded.push(root);
    }
}
