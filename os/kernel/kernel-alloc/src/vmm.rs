//! # Kernel Virtual Memory Manager
//!
//! Owns the kernel's L4 tree and maps, unmaps and translates pages in it
//! and in any other address space, with page-table frames coming from the
//! [`PhysicalAllocator`].
//!
//! ## Two kinds of table frames
//!
//! - **Mapped** (the normal path): a new table frame is taken with
//!   [`PhysicalAllocator::alloc_clean`], which maps it into the kernel tree
//!   at `kernel base + pa` before it is zeroed and linked.
//! - **Raw** (bootstrap only): frames come from
//!   [`PhysicalAllocator::alloc_raw`] and are touched through the boot
//!   loader's window. Used while the kernel tree itself is being built.
//!
//! ## Bootstrap
//!
//! ```text
//! raw root ─► L3/L2/L1 for the whole kernel window
//!          ─► low memory and kernel image, VGA window
//!          ─► frame bitmap and every raw frame (tables included)
//!          ─► load CR3
//! ```
//!
//! Because every L1 table the kernel window needs exists before the first
//! mapped allocation, mapping a fresh table frame into the kernel tree never
//! needs yet another table, and the mapped path always terminates.

use crate::MemoryError;
use crate::frame_alloc::PhysicalAllocator;
use kernel_info::boot::BootInfo;
use kernel_info::memory::{VGA_WINDOW_PAGES, VGA_WINDOW_START};
use kernel_memory_addresses::{
    PAGE_SIZE, PhysicalAddress, PhysicalPage, VirtualAddress, align_down,
};
use kernel_vmem::{
    AddressSpace, FrameAlloc, PageEntryBits, PageTableEntry, PhysMapper, RootLoader, RootPage,
    TableLevel,
};

/// Span of virtual memory covered by one L1 table.
const L1_SPAN: u64 = 512 * PAGE_SIZE;

/// Span of virtual memory covered by one L3 entry.
const L3_ENTRY_SPAN: u64 = 512 * L1_SPAN;

/// The kernel's page-table manager.
pub struct Vmm<'m, M: PhysMapper> {
    mapper: &'m M,
    kernel_root: RootPage,
}

impl<M: PhysMapper> Clone for Vmm<'_, M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M: PhysMapper> Copy for Vmm<'_, M> {}

/// Table frames from the mapped allocator.
struct MappedTables<'a, 'm, M: PhysMapper> {
    pmm: &'a mut PhysicalAllocator<'m, M>,
    vmm: &'a Vmm<'m, M>,
}

impl<M: PhysMapper> FrameAlloc for MappedTables<'_, '_, M> {
    type Error = MemoryError;

    fn alloc_table(&mut self) -> Result<PhysicalPage, MemoryError> {
        // Table frames always live in the kernel tree, whichever space the
        // table itself belongs to.
        let pa = self.pmm.alloc_clean(self.vmm, self.vmm.kernel_root, 1)?;
        Ok(pa.page())
    }

    fn release_table(&mut self, frame: PhysicalPage) -> Result<(), MemoryError> {
        self.pmm.free(self.vmm, self.vmm.kernel_root, frame.base(), 1)
    }
}

/// Table frames from the raw allocator.
struct RawTables<'a, 'm, M: PhysMapper> {
    pmm: &'a mut PhysicalAllocator<'m, M>,
}

impl<M: PhysMapper> FrameAlloc for RawTables<'_, '_, M> {
    type Error = MemoryError;

    fn alloc_table(&mut self) -> Result<PhysicalPage, MemoryError> {
        Ok(self.pmm.alloc_raw(1)?.page())
    }

    fn release_table(&mut self, frame: PhysicalPage) -> Result<(), MemoryError> {
        self.pmm.release_raw(frame)
    }
}

impl<'m, M: PhysMapper> Vmm<'m, M> {
    /// Build the kernel tree and make it the active one.
    ///
    /// # Errors
    /// Running out of raw frames, or raw frames outside the boot window.
    ///
    /// # Safety
    /// See [`activate`](Self::activate).
    pub unsafe fn init(
        mapper: &'m M,
        pmm: &mut PhysicalAllocator<'m, M>,
        boot: &BootInfo<'_>,
        loader: &mut impl RootLoader,
    ) -> Result<Self, MemoryError> {
        let vmm = Self::build(mapper, pmm, boot)?;
        unsafe { vmm.activate(loader) };
        Ok(vmm)
    }

    /// Build the kernel tree without activating it.
    ///
    /// # Errors
    /// Running out of raw frames, or raw frames outside the boot window.
    pub fn build(
        mapper: &'m M,
        pmm: &mut PhysicalAllocator<'m, M>,
        boot: &BootInfo<'_>,
    ) -> Result<Self, MemoryError> {
        let kernel_root = pmm.alloc_raw(1)?.page();
        let vmm = Self {
            mapper,
            kernel_root,
        };
        log::info!("kernel root table at {}", kernel_root.base());

        let space = vmm.address_space(kernel_root);
        let window_start = align_down(
            mapper.phys_to_virt(PhysicalAddress::zero()).as_u64(),
            L1_SPAN,
        );
        let window_end = mapper.phys_to_virt(pmm.mem_end()).as_u64();
        let mut va = window_start;
        while va < window_end {
            space.ensure_leaf_table(&mut RawTables { pmm }, VirtualAddress::new(va))?;
            va += L1_SPAN;
        }
        log::debug!(
            "kernel window tables ready for {:#x}..{window_end:#x} ({} raw frames)",
            window_start,
            pmm.raw_span().len()
        );

        // Everything below the kernel end: BIOS data, the boot stack and
        // boot info as well as the image itself.
        let low = PhysicalAddress::zero();
        vmm.map_region_raw(
            pmm,
            kernel_root,
            mapper.phys_to_virt(low),
            low,
            pmm.kernel_end().as_u64() / PAGE_SIZE,
            PageEntryBits::kernel_rw_global(),
        )?;
        log::debug!(
            "mapped low memory and the kernel image at {} up to {}",
            boot.kernel_load_addr,
            pmm.kernel_end()
        );

        let vga = PhysicalAddress::new(VGA_WINDOW_START);
        vmm.map_missing_raw(pmm, vga.page(), VGA_WINDOW_PAGES)?;

        let bitmap = pmm.bitmap_frames();
        vmm.map_missing_raw(pmm, bitmap.start, bitmap.end.number() - bitmap.start.number())?;

        // Mapping may create further raw tables, which need mapping in turn.
        loop {
            let span = pmm.raw_span();
            for frame in span.clone() {
                if pmm.is_used(frame) {
                    let page = pmm.frame_address(frame).page();
                    vmm.map_missing_raw(pmm, page, 1)?;
                }
            }
            if pmm.raw_span() == span {
                break;
            }
        }

        Ok(vmm)
    }

    /// Raw-map `pages` frames from `first` at `kernel base + pa`, skipping
    /// pages that are already mapped.
    fn map_missing_raw(
        &self,
        pmm: &mut PhysicalAllocator<'m, M>,
        first: PhysicalPage,
        pages: u64,
    ) -> Result<(), MemoryError> {
        let space = self.address_space(self.kernel_root);
        for i in 0..pages {
            let frame = first + i;
            let va = self.mapper.phys_to_virt(frame.base());
            if !space.is_mapped(va) {
                space.map_one(&mut RawTables { pmm }, va, frame, PageEntryBits::kernel_rw())?;
            }
        }
        Ok(())
    }

    /// Make the kernel tree the one the MMU walks.
    ///
    /// # Safety
    /// The kernel tree must map everything the CPU touches after the
    /// switch. With the kernel executing from the kernel window, that is
    /// what [`build`](Self::build) sets up.
    pub unsafe fn activate(&self, loader: &mut impl RootLoader) {
        log::info!("switching to kernel root {}", self.kernel_root.base());
        unsafe { loader.load_root(self.kernel_root) };
    }

    /// The kernel's L4 frame.
    #[inline]
    #[must_use]
    pub const fn kernel_root(&self) -> RootPage {
        self.kernel_root
    }

    #[inline]
    #[must_use]
    pub const fn mapper(&self) -> &'m M {
        self.mapper
    }

    /// A handle on the tree rooted at `root`.
    #[inline]
    #[must_use]
    pub const fn address_space(&self, root: RootPage) -> AddressSpace<'m, M> {
        AddressSpace::from_root(self.mapper, root)
    }

    /// Map the page at `va` to the frame containing `pa` in `root`.
    ///
    /// # Errors
    /// [`MapError::AlreadyMapped`](kernel_vmem::MapError::AlreadyMapped) if
    /// `va` is mapped; errors of the table allocation.
    pub fn map(
        &self,
        pmm: &mut PhysicalAllocator<'m, M>,
        root: RootPage,
        va: VirtualAddress,
        pa: PhysicalAddress,
        flags: PageEntryBits,
    ) -> Result<(), MemoryError> {
        let mut tables = MappedTables { pmm, vmm: self };
        self.address_space(root)
            .map_one(&mut tables, va, pa.page(), flags)
    }

    /// Like [`map`](Self::map), with tables from the raw allocator.
    ///
    /// # Errors
    /// See [`map`](Self::map).
    pub fn map_raw(
        &self,
        pmm: &mut PhysicalAllocator<'m, M>,
        root: RootPage,
        va: VirtualAddress,
        pa: PhysicalAddress,
        flags: PageEntryBits,
    ) -> Result<(), MemoryError> {
        self.address_space(root)
            .map_one(&mut RawTables { pmm }, va, pa.page(), flags)
    }

    /// Clear the mapping of `va` in `root` and return the frame it pointed at.
    ///
    /// # Errors
    /// [`UnmapError::NotMapped`](kernel_vmem::UnmapError::NotMapped).
    pub fn unmap(&self, root: RootPage, va: VirtualAddress) -> Result<PhysicalPage, MemoryError> {
        Ok(self.address_space(root).unmap_one(va)?)
    }

    /// Map `pages` consecutive pages, one at a time.
    ///
    /// # Errors
    /// The first failing [`map`](Self::map); earlier pages stay mapped.
    pub fn map_region(
        &self,
        pmm: &mut PhysicalAllocator<'m, M>,
        root: RootPage,
        va: VirtualAddress,
        pa: PhysicalAddress,
        pages: usize,
        flags: PageEntryBits,
    ) -> Result<(), MemoryError> {
        for (va, pa) in page_pairs(va, pa, pages as u64) {
            self.map(pmm, root, va, pa, flags)?;
        }
        Ok(())
    }

    /// Raw counterpart of [`map_region`](Self::map_region).
    ///
    /// # Errors
    /// See [`map_region`](Self::map_region).
    pub fn map_region_raw(
        &self,
        pmm: &mut PhysicalAllocator<'m, M>,
        root: RootPage,
        va: VirtualAddress,
        pa: PhysicalAddress,
        pages: u64,
        flags: PageEntryBits,
    ) -> Result<(), MemoryError> {
        for (va, pa) in page_pairs(va, pa, pages) {
            self.map_raw(pmm, root, va, pa, flags)?;
        }
        Ok(())
    }

    /// Unmap `pages` consecutive pages, one at a time.
    ///
    /// # Errors
    /// The first page that is not mapped; earlier pages stay unmapped.
    pub fn unmap_region(
        &self,
        root: RootPage,
        va: VirtualAddress,
        pages: usize,
    ) -> Result<(), MemoryError> {
        let first = va.page();
        for i in 0..pages as u64 {
            self.unmap(root, (first + i).base())?;
        }
        Ok(())
    }

    /// The physical address `va` maps to in `root`, if any.
    #[must_use]
    pub fn translate(&self, root: RootPage, va: VirtualAddress) -> Option<PhysicalAddress> {
        self.address_space(root).translate(va)
    }

    /// A fresh address space that shares the kernel window with the kernel
    /// tree.
    ///
    /// The new L3 table behind the kernel base's L4 slot receives copies of
    /// the kernel's L3 entries for the window, so the L2 tables below are
    /// shared by reference. Should the window reach into further L4 slots,
    /// those link the kernel's own L3 tables.
    ///
    /// # Errors
    /// Running out of frames for the two new tables.
    pub fn create_address_space(
        &self,
        pmm: &mut PhysicalAllocator<'m, M>,
    ) -> Result<RootPage, MemoryError> {
        let root = pmm.alloc_clean(self, self.kernel_root, 1)?.page();
        let l3 = pmm.alloc_clean(self, self.kernel_root, 1)?.page();

        let kernel = self.address_space(self.kernel_root);
        let space = self.address_space(root);

        let window_start = self.mapper.phys_to_virt(PhysicalAddress::zero());
        let window_end = self.mapper.phys_to_virt(pmm.mem_end());
        let base_slot = TableLevel::L4.index_of(window_start);
        space.set_entry(root, base_slot, PageTableEntry::table(l3));

        let mut va = align_down(window_start.as_u64(), L3_ENTRY_SPAN);
        while va < window_end.as_u64() {
            let at = VirtualAddress::new(va);
            let slot = TableLevel::L4.index_of(at);
            if slot == base_slot {
                copy_entry(&kernel, &space, TableLevel::L3, at, l3);
            } else {
                copy_entry(&kernel, &space, TableLevel::L4, at, root);
            }
            va += L3_ENTRY_SPAN;
        }

        log::debug!(
            "new address space at {} sharing the kernel window through L4[{}]",
            root.base(),
            base_slot.as_usize()
        );
        Ok(root)
    }
}

/// Copy the kernel's `level` entry for `va` into `table` of `space`.
fn copy_entry<M: PhysMapper>(
    kernel: &AddressSpace<'_, M>,
    space: &AddressSpace<'_, M>,
    level: TableLevel,
    va: VirtualAddress,
    table: PhysicalPage,
) {
    let index = level.index_of(va);
    if let Some(kernel_table) = kernel.table_for(level, va) {
        space.set_entry(table, index, kernel.entry(kernel_table, index));
    }
}

fn page_pairs(
    va: VirtualAddress,
    pa: PhysicalAddress,
    pages: u64,
) -> impl Iterator<Item = (VirtualAddress, PhysicalAddress)> {
    (0..pages).map(move |i| (va + i * PAGE_SIZE, pa + i * PAGE_SIZE))
}
