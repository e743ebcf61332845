//! # Kernel Memory Manager
//!
//! The kernel-facing surface of the memory core. Owns the frame allocator,
//! the page-table manager and the heap, brings them up in order and halts
//! on any error they report (see [`fatal`](crate::fatal)).

use crate::MemoryError;
use crate::buddy::{BuddyAllocator, LayerBitmap};
use crate::fatal::OrHalt;
use crate::frame_alloc::PhysicalAllocator;
use crate::vmm::Vmm;
use kernel_info::boot::BootInfo;
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, VirtualAddress};
use kernel_vmem::{PageEntryBits, PhysMapper, RootLoader, RootPage};

pub struct MemoryManager<'m, M: PhysMapper> {
    pmm: PhysicalAllocator<'m, M>,
    vmm: Vmm<'m, M>,
    heap: BuddyAllocator<'m>,
}

impl<'m, M: PhysMapper> MemoryManager<'m, M> {
    /// Bring up the memory core:
    ///
    /// 1. the frame bitmap from the boot memory map,
    /// 2. the kernel's page tables, which then become active,
    /// 3. a heap of `heap_pages` zeroed pages in the kernel window.
    ///
    /// Halts if any step fails.
    ///
    /// # Safety
    /// - `boot` must describe the machine's memory and the loader's mappings.
    /// - `mapper` must reach physical memory both through the loader's
    ///   kernel window and, once loaded, through the kernel's own tables.
    /// - Must run once, before anything else uses physical memory.
    pub unsafe fn bootstrap(
        mapper: &'m M,
        boot: &BootInfo<'_>,
        loader: &mut impl RootLoader,
        heap_pages: usize,
    ) -> Self {
        let mut pmm = unsafe { PhysicalAllocator::init(mapper, boot) }.or_halt();
        let vmm = unsafe { Vmm::init(mapper, &mut pmm, boot, loader) }.or_halt();

        let heap_base = pmm
            .alloc_clean(&vmm, vmm.kernel_root(), heap_pages)
            .or_halt();
        #[allow(clippy::cast_possible_truncation)]
        let heap_len = heap_pages * PAGE_SIZE as usize;
        // SAFETY: the frames were just allocated, mapped and zeroed, and the
        // heap owns them from here on.
        let pool = unsafe { mapper.phys_to_bytes_mut(heap_base, heap_len) };
        let heap = BuddyAllocator::new(pool)
            .map_err(MemoryError::from)
            .or_halt();

        log::info!(
            "memory core up: {} of {} frames free",
            pmm.frames_free(),
            pmm.frames_total()
        );
        Self { pmm, vmm, heap }
    }

    #[must_use]
    pub const fn kernel_root(&self) -> RootPage {
        self.vmm.kernel_root()
    }

    #[must_use]
    pub const fn pmm(&self) -> &PhysicalAllocator<'m, M> {
        &self.pmm
    }

    /// Direct bitmap access; mappings are not kept in step.
    #[must_use]
    pub const fn pmm_mut(&mut self) -> &mut PhysicalAllocator<'m, M> {
        &mut self.pmm
    }

    #[must_use]
    pub const fn vmm(&self) -> &Vmm<'m, M> {
        &self.vmm
    }

    #[must_use]
    pub const fn heap(&self) -> &BuddyAllocator<'m> {
        &self.heap
    }

    /// Allocate `frames` frames, mapped at `kernel base + pa` in `space`.
    pub fn alloc_frames(&mut self, space: RootPage, frames: usize) -> PhysicalAddress {
        self.pmm.alloc(&self.vmm, space, frames).or_halt()
    }

    /// Like [`alloc_frames`](Self::alloc_frames), zeroed.
    pub fn alloc_frames_clean(&mut self, space: RootPage, frames: usize) -> PhysicalAddress {
        self.pmm.alloc_clean(&self.vmm, space, frames).or_halt()
    }

    pub fn free_frames(&mut self, space: RootPage, base: PhysicalAddress, frames: usize) {
        self.pmm.free(&self.vmm, space, base, frames).or_halt();
    }

    /// Set or clear `frames` bits from the frame containing `base`, leaving
    /// page tables alone. Halts if the run is not tracked.
    pub fn mark_frames(&mut self, base: PhysicalAddress, frames: usize, used: bool) {
        let first = self
            .pmm
            .frame_index(base)
            .filter(|first| first + frames <= self.pmm.frames_total())
            .ok_or(MemoryError::UnmanagedFrame { addr: base })
            .or_halt();
        self.pmm.mark_frames(first, frames, used);
    }

    /// Bitmap state of the frame containing `pa`, if tracked.
    #[must_use]
    pub fn is_frame_used(&self, pa: PhysicalAddress) -> Option<bool> {
        self.pmm.frame_index(pa).map(|frame| self.pmm.is_used(frame))
    }

    pub fn map(
        &mut self,
        space: RootPage,
        va: VirtualAddress,
        pa: PhysicalAddress,
        flags: PageEntryBits,
    ) {
        self.vmm.map(&mut self.pmm, space, va, pa, flags).or_halt();
    }

    pub fn map_region(
        &mut self,
        space: RootPage,
        va: VirtualAddress,
        pa: PhysicalAddress,
        pages: usize,
        flags: PageEntryBits,
    ) {
        self.vmm
            .map_region(&mut self.pmm, space, va, pa, pages, flags)
            .or_halt();
    }

    pub fn unmap(&mut self, space: RootPage, va: VirtualAddress) {
        self.vmm.unmap(space, va).or_halt();
    }

    pub fn unmap_region(&mut self, space: RootPage, va: VirtualAddress, pages: usize) {
        self.vmm.unmap_region(space, va, pages).or_halt();
    }

    #[must_use]
    pub fn translate(&self, space: RootPage, va: VirtualAddress) -> Option<PhysicalAddress> {
        self.vmm.translate(space, va)
    }

    /// A new address space sharing the kernel window.
    pub fn create_address_space(&mut self) -> RootPage {
        self.vmm.create_address_space(&mut self.pmm).or_halt()
    }

    pub fn heap_alloc(&mut self, size: usize) -> VirtualAddress {
        self.heap.alloc(size).map_err(MemoryError::from).or_halt()
    }

    pub fn heap_free(&mut self, addr: VirtualAddress) {
        self.heap.free(addr).map_err(MemoryError::from).or_halt();
    }

    /// Bitmap of heap page `page`, for display.
    #[must_use]
    pub fn heap_view(&self, page: usize) -> Option<LayerBitmap<&[u8]>> {
        self.heap.visualize(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HhdmPhysMapper;
    use crate::test_support::{RecordingLoader, SimulatedRam, boot_info};
    use kernel_info::boot::{MemoryRegion, RegionType};
    use kernel_info::memory::KERNEL_HEAP_PAGES;

    const MIB: u64 = 1024 * 1024;

    fn regions() -> [MemoryRegion; 3] {
        [
            MemoryRegion::new(0, 0x9_FC00, RegionType::Free),
            MemoryRegion::new(0xF_0000, 0x1_0000, RegionType::Reserved),
            MemoryRegion::new(0x10_0000, 0xF0_0000, RegionType::Free),
        ]
    }

    fn with_manager(test: impl FnOnce(&mut MemoryManager<'_, HhdmPhysMapper>)) {
        let ram = SimulatedRam::new(16 * MIB);
        let mapper = ram.mapper();
        let regions = regions();
        let boot = boot_info(&ram, &regions, 0x10_0000, 0x4000);
        let mut loader = RecordingLoader::default();
        let mut mm =
            unsafe { MemoryManager::bootstrap(&mapper, &boot, &mut loader, KERNEL_HEAP_PAGES) };
        assert_eq!(loader.loaded, [mm.kernel_root()]);
        test(&mut mm);
    }

    #[test]
    fn bootstrap_sets_up_a_mapped_heap() {
        with_manager(|mm| {
            assert_eq!(mm.heap().pages(), KERNEL_HEAP_PAGES);
            let base = mm.heap().base();
            let pa = mm.vmm().mapper().virt_to_phys(base).expect("in window");
            assert_eq!(mm.translate(mm.kernel_root(), base), Some(pa));
            for page in 0..KERNEL_HEAP_PAGES as u64 {
                let frame = mm.pmm().frame_index(pa + page * PAGE_SIZE).expect("tracked");
                assert!(mm.pmm().is_used(frame));
            }

            let a = mm.heap_alloc(100);
            assert_eq!(a, base + 128);
            mm.heap_free(a);
            let view = mm.heap_view(0).expect("page").to_string();
            assert!(view.lines().nth(6).is_some_and(|row| !row.contains('X')));
        });
    }

    #[test]
    fn frames_round_trip_through_the_manager() {
        with_manager(|mm| {
            let root = mm.kernel_root();
            let free = mm.pmm().frames_free();
            let pa = mm.alloc_frames_clean(root, 2);
            assert_eq!(mm.pmm().frames_free(), free - 2);
            mm.free_frames(root, pa, 2);
            assert_eq!(mm.pmm().frames_free(), free);
        });
    }

    #[test]
    fn frames_can_be_reserved_and_released_by_address() {
        with_manager(|mm| {
            let free = mm.pmm().frames_free();
            let pa = PhysicalAddress::new(0xC0_0000);
            assert_eq!(mm.is_frame_used(pa), Some(false));

            mm.mark_frames(pa, 4, true);
            assert_eq!(mm.pmm().frames_free(), free - 4);
            assert_eq!(mm.is_frame_used(pa + 3 * PAGE_SIZE), Some(true));
            assert_eq!(mm.is_frame_used(pa + 4 * PAGE_SIZE), Some(false));

            mm.mark_frames(pa + PAGE_SIZE, 1, false);
            assert_eq!(mm.is_frame_used(pa + PAGE_SIZE), Some(false));
            let first = mm.pmm().frame_index(pa).expect("tracked");
            mm.pmm_mut().mark_frame(first, false);
            mm.mark_frames(pa + 2 * PAGE_SIZE, 2, false);
            assert_eq!(mm.pmm().frames_free(), free);

            // Past the last free region nothing is tracked.
            assert_eq!(mm.is_frame_used(PhysicalAddress::new(0x1000_0000)), None);
        });
    }

    #[test]
    #[should_panic(expected = "is not managed by the frame bitmap")]
    fn marking_untracked_frames_halts() {
        with_manager(|mm| {
            mm.mark_frames(PhysicalAddress::new(0xFF_F000), 2, true);
        });
    }

    #[test]
    #[should_panic(expected = "already mapped")]
    fn mapping_twice_halts() {
        with_manager(|mm| {
            let root = mm.kernel_root();
            let va = VirtualAddress::new(0x4000_0000);
            mm.map(root, va, PhysicalAddress::new(0x80_0000), PageEntryBits::kernel_rw());
            mm.map(root, va, PhysicalAddress::new(0x80_0000), PageEntryBits::kernel_rw());
        });
    }

    #[test]
    #[should_panic(expected = "has not been mapped")]
    fn unmapping_an_absent_page_halts() {
        with_manager(|mm| {
            let root = mm.kernel_root();
            mm.unmap(root, VirtualAddress::new(0x4000_0000));
        });
    }

    #[test]
    #[should_panic(expected = "heap: out of heap memory for 8 bytes")]
    fn heap_exhaustion_halts() {
        with_manager(|mm| {
            for _ in 0..496 * KERNEL_HEAP_PAGES {
                mm.heap_alloc(8);
            }
            mm.heap_alloc(8);
        });
    }

    #[test]
    #[should_panic(expected = "exceeds the largest heap block")]
    fn oversized_heap_request_halts() {
        with_manager(|mm| {
            mm.heap_alloc(4000);
        });
    }

    #[test]
    #[should_panic(expected = "is not an allocated heap block")]
    fn heap_double_free_halts() {
        with_manager(|mm| {
            let a = mm.heap_alloc(64);
            mm.heap_free(a);
            mm.heap_free(a);
        });
    }

    #[test]
    #[should_panic(expected = "out of memory: no run of")]
    fn frame_exhaustion_halts() {
        with_manager(|mm| {
            let root = mm.kernel_root();
            let frames = mm.pmm().frames_free();
            mm.alloc_frames(root, frames + 1);
        });
    }

    #[test]
    fn user_space_sees_the_kernel_window() {
        with_manager(|mm| {
            let space = mm.create_address_space();
            let heap = mm.heap().base();
            assert_eq!(mm.translate(space, heap), mm.translate(mm.kernel_root(), heap));

            let va = VirtualAddress::new(0x4000_0000);
            let pa = mm.alloc_frames_clean(mm.kernel_root(), 1);
            mm.map(space, va, pa, PageEntryBits::user_rw());
            assert_eq!(mm.translate(space, va), Some(pa));
            mm.unmap(space, va);
            assert_eq!(mm.translate(space, va), None);
        });
    }
}
