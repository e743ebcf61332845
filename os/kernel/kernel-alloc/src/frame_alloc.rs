//! # Physical Frame Allocator
//!
//! Bitmap-based, next-fit allocator for 4 KiB physical frames.
//!
//! ## Layout
//!
//! ```text
//! mem_base                                                   mem_end
//!    │ frame 0 │ frame 1 │ ... │ frame i │ ... │ frame len-1 │
//!    └─ bit 0 ─┴─ bit 1 ─┴─────┴─ bit i ─┴─────┴─ bit len-1 ─┘
//! ```
//!
//! The tracked range spans from the lowest free region's base to the highest
//! free region's end in the boot memory map. Frame index `i` denotes physical
//! address `mem_base + i * 4096`. The bitmap itself is placed in the first
//! free region at or above the kernel load address, just past the kernel
//! image, and stays there for the kernel's lifetime.
//!
//! ## Initial state
//!
//! Everything starts out used. Free regions are then cleared (start rounded
//! up, end rounded down to frame boundaries) and non-free regions set again
//! (start rounded down, end rounded up). Finally, all frames below the end of
//! the kernel image and the bitmap's own frames are set. Holes between free
//! regions thus stay used.
//!
//! ## Allocation flavours
//!
//! | Call | Maps at `kernel base + pa` | Zeroes |
//! |------|----------------------------|--------|
//! | [`alloc`](PhysicalAllocator::alloc) | yes | no |
//! | [`alloc_clean`](PhysicalAllocator::alloc_clean) | yes | yes |
//! | [`alloc_raw`](PhysicalAllocator::alloc_raw) | no | yes |
//!
//! The raw flavour exists for building the kernel's own page tables, before
//! any mapping can be made; it only hands out frames inside the boot
//! loader's kernel window.

use crate::MemoryError;
use crate::frame_bitmap::FrameBitmap;
use crate::vmm::Vmm;
use core::ops::Range;
use kernel_info::boot::{BootInfo, BootMapping};
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, PhysicalPage, pages_for};
use kernel_vmem::{PageEntryBits, PhysMapper, RootPage};

/// The kernel's physical frame allocator.
pub struct PhysicalAllocator<'m, M: PhysMapper> {
    mapper: &'m M,
    bitmap: FrameBitmap<'m>,
    /// Physical address of frame index 0.
    mem_base: PhysicalAddress,
    /// Where the bitmap's own storage starts.
    bitmap_start: PhysicalPage,
    /// First frame boundary at or above the end of the kernel image.
    kernel_end: PhysicalAddress,
    /// Window the boot loader mapped; bounds raw allocations.
    boot_window: BootMapping,
    /// Next-fit cursor: frame index just past the last allocation.
    next: usize,
    /// Frame indices handed out by [`alloc_raw`](Self::alloc_raw) so far.
    raw_span: Option<Range<usize>>,
}

impl<'m, M: PhysMapper> PhysicalAllocator<'m, M> {
    /// Build the frame bitmap from the boot memory map.
    ///
    /// # Errors
    /// - [`MemoryError::NoUsableMemory`] if the map has no free region.
    /// - [`MemoryError::NoBitmapLocation`] if no free region at or above the
    ///   kernel can hold the bitmap inside the boot kernel window.
    ///
    /// # Safety
    /// The memory map must describe RAM that is reachable through `mapper`;
    /// the bitmap is written in place before any of it is reserved.
    pub unsafe fn init(mapper: &'m M, boot: &BootInfo<'_>) -> Result<Self, MemoryError> {
        let usable = usable_range(boot).ok_or(MemoryError::NoUsableMemory)?;
        let mem_base = PhysicalAddress::new(usable.start).align_up(PAGE_SIZE);
        let mem_end = PhysicalAddress::new(usable.end).align_down(PAGE_SIZE);
        let frames = frame_count(mem_end.as_u64().saturating_sub(mem_base.as_u64()));
        let bitmap_bytes = FrameBitmap::bytes_for(frames) as u64;
        let kernel_end = boot.kernel_end().align_up(PAGE_SIZE);

        let bitmap_start = bitmap_location(boot, kernel_end, bitmap_bytes).ok_or(
            MemoryError::NoBitmapLocation {
                bytes: bitmap_bytes,
            },
        )?;

        log::info!(
            "usable physical memory {mem_base}..{mem_end}: {frames} frames, bitmap of {bitmap_bytes} bytes at {bitmap_start}"
        );

        // SAFETY: the location lies in a free region inside the boot kernel
        // window, past the kernel image, and nothing else refers to it yet.
        #[allow(clippy::cast_possible_truncation)]
        let storage =
            unsafe { mapper.phys_to_bytes_mut(bitmap_start.base(), bitmap_bytes as usize) };
        let mut bitmap = FrameBitmap::new(storage, frames);
        bitmap.fill(true);

        let mut pmm = Self {
            mapper,
            bitmap,
            mem_base,
            bitmap_start,
            kernel_end,
            boot_window: boot.kernel_map,
            next: 0,
            raw_span: None,
        };

        for region in boot.free_regions() {
            let start = PhysicalAddress::new(region.base).align_up(PAGE_SIZE);
            let end = PhysicalAddress::new(region.end()).align_down(PAGE_SIZE);
            pmm.mark_address_range(start, end, false);
        }

        for region in boot.regions.iter().filter(|r| !r.is_free()) {
            let start = PhysicalAddress::new(region.base).align_down(PAGE_SIZE);
            let end = PhysicalAddress::new(region.end()).align_up(PAGE_SIZE);
            if frame_count(end.as_u64().saturating_sub(mem_base.as_u64())) > frames {
                log::debug!(
                    "ignoring {:?} region {start}..{end} beyond tracked memory",
                    region.region_type()
                );
                continue;
            }
            pmm.mark_address_range(start, end, true);
        }

        pmm.mark_address_range(PhysicalAddress::zero(), kernel_end, true);
        pmm.mark_address_range(
            bitmap_start.base(),
            bitmap_start.base() + pages_for(bitmap_bytes) * PAGE_SIZE,
            true,
        );

        log::info!(
            "frame allocator ready: {} of {} frames free",
            pmm.frames_free(),
            pmm.frames_total()
        );
        Ok(pmm)
    }

    /// Set or clear every tracked frame inside `[start, end)`.
    fn mark_address_range(&mut self, start: PhysicalAddress, end: PhysicalAddress, used: bool) {
        let lo = start.max(self.mem_base);
        let hi = end.min(self.mem_end());
        if lo >= hi {
            return;
        }
        let first = frame_count(lo - self.mem_base);
        let last = frame_count(hi - self.mem_base);
        self.bitmap.set_range(first, last - first, used);
    }

    /// Physical address of frame index 0.
    #[inline]
    #[must_use]
    pub const fn mem_base(&self) -> PhysicalAddress {
        self.mem_base
    }

    /// One past the last tracked byte.
    #[inline]
    #[must_use]
    pub fn mem_end(&self) -> PhysicalAddress {
        self.frame_address(self.bitmap.len())
    }

    /// First frame boundary at or above the end of the kernel image.
    #[inline]
    #[must_use]
    pub const fn kernel_end(&self) -> PhysicalAddress {
        self.kernel_end
    }

    /// Frames occupied by the bitmap itself.
    #[must_use]
    pub fn bitmap_frames(&self) -> Range<PhysicalPage> {
        let pages = pages_for(self.bitmap.as_bytes().len() as u64);
        self.bitmap_start..self.bitmap_start + pages
    }

    /// Frame indices handed out by the raw allocator so far.
    #[must_use]
    pub fn raw_span(&self) -> Range<usize> {
        self.raw_span.clone().unwrap_or(0..0)
    }

    #[must_use]
    pub const fn mapper(&self) -> &'m M {
        self.mapper
    }

    #[must_use]
    pub fn bitmap(&self) -> &FrameBitmap<'m> {
        &self.bitmap
    }

    /// Physical address of frame index `frame`.
    #[inline]
    #[must_use]
    pub fn frame_address(&self, frame: usize) -> PhysicalAddress {
        self.mem_base + frame as u64 * PAGE_SIZE
    }

    /// Frame index of the frame containing `addr`, if tracked.
    #[must_use]
    pub fn frame_index(&self, addr: PhysicalAddress) -> Option<usize> {
        if addr < self.mem_base {
            return None;
        }
        let frame = frame_count(addr - self.mem_base);
        (frame < self.bitmap.len()).then_some(frame)
    }

    /// Whether frame index `frame` is used.
    #[inline]
    #[must_use]
    pub fn is_used(&self, frame: usize) -> bool {
        self.bitmap.get(frame)
    }

    /// Set or clear one frame.
    #[inline]
    pub fn mark_frame(&mut self, frame: usize, used: bool) {
        self.bitmap.set(frame, used);
    }

    /// Set or clear `count` frames starting at index `frame`.
    #[inline]
    pub fn mark_frames(&mut self, frame: usize, count: usize, used: bool) {
        self.bitmap.set_range(frame, count, used);
    }

    #[must_use]
    pub const fn frames_total(&self) -> usize {
        self.bitmap.len()
    }

    #[must_use]
    pub fn frames_used(&self) -> usize {
        self.bitmap.count_used()
    }

    #[must_use]
    pub fn frames_free(&self) -> usize {
        self.frames_total() - self.frames_used()
    }

    /// Next-fit search for `frames` consecutive free frames.
    ///
    /// The scan starts at the cursor and wraps around once. Runs never wrap:
    /// reaching index 0 starts a new run. The scan continues `frames - 1`
    /// positions past its starting point, so a run straddling the cursor is
    /// found too. If the frame just below the cursor has been freed since the
    /// last search, the cursor is reset to 0 first.
    ///
    /// On success the cursor moves just past the run and its first index is
    /// returned. Nothing is marked.
    pub fn find_free_region(&mut self, frames: usize) -> Option<usize> {
        let len = self.bitmap.len();
        if frames == 0 || frames > len {
            return None;
        }

        if self.next > 0 && !self.bitmap.get(self.next - 1) {
            self.next = 0;
        }

        let origin = self.next % len;
        let mut run = 0;
        let mut run_start = origin;

        for step in 0..len + frames - 1 {
            let frame = (origin + step) % len;
            if frame == 0 {
                run = 0;
                run_start = 0;
            }

            if self.bitmap.get(frame) {
                run = 0;
                run_start = frame + 1;
                continue;
            }

            run += 1;
            if run == frames {
                self.next = run_start + frames;
                return Some(run_start);
            }
        }

        None
    }

    /// Find and mark `frames` frames.
    fn take(&mut self, frames: usize) -> Result<PhysicalAddress, MemoryError> {
        if frames == 0 {
            return Err(MemoryError::EmptyRequest);
        }
        let first = self
            .find_free_region(frames)
            .ok_or(MemoryError::OutOfMemory { frames })?;
        self.bitmap.set_range(first, frames, true);
        Ok(self.frame_address(first))
    }

    fn zero(&self, base: PhysicalAddress, frames: usize) {
        #[allow(clippy::cast_possible_truncation)]
        let len = frames * PAGE_SIZE as usize;
        // SAFETY: the frames were just taken from the bitmap, so nothing else
        // refers to them, and the caller made them reachable through the
        // mapper (mapped, or inside the boot window).
        unsafe { self.mapper.phys_to_bytes_mut(base, len) }.fill(0);
    }

    /// Allocate `frames` contiguous frames and map them writable at
    /// `kernel base + pa` in `space`. Contents are left as found.
    ///
    /// The frames are marked used before they are mapped, so page tables
    /// the mapping needs are never carved out of the same run.
    ///
    /// # Errors
    /// [`MemoryError::OutOfMemory`] if no run is free; mapping errors.
    pub fn alloc(
        &mut self,
        vmm: &Vmm<'m, M>,
        space: RootPage,
        frames: usize,
    ) -> Result<PhysicalAddress, MemoryError> {
        let base = self.take(frames)?;
        log::debug!("allocated {frames} frame(s) at {base}");
        let va = self.mapper.phys_to_virt(base);
        vmm.map_region(self, space, va, base, frames, PageEntryBits::kernel_rw())?;
        Ok(base)
    }

    /// Like [`alloc`](Self::alloc), but zeroes the frames.
    ///
    /// # Errors
    /// See [`alloc`](Self::alloc).
    pub fn alloc_clean(
        &mut self,
        vmm: &Vmm<'m, M>,
        space: RootPage,
        frames: usize,
    ) -> Result<PhysicalAddress, MemoryError> {
        let base = self.alloc(vmm, space, frames)?;
        self.zero(base, frames);
        Ok(base)
    }

    /// Allocate and zero `frames` frames without mapping them.
    ///
    /// Only for bootstrapping the kernel's page tables: the frames are
    /// touched through the boot loader's kernel window.
    ///
    /// # Errors
    /// [`MemoryError::OutOfMemory`], or [`MemoryError::OutsideBootWindow`] if
    /// the run found is not covered by the boot window.
    ///
    /// Nothing is marked and the cursor stays put when the run is rejected.
    pub fn alloc_raw(&mut self, frames: usize) -> Result<PhysicalAddress, MemoryError> {
        if frames == 0 {
            return Err(MemoryError::EmptyRequest);
        }
        let cursor = self.next;
        let first = self
            .find_free_region(frames)
            .ok_or(MemoryError::OutOfMemory { frames })?;
        let base = self.frame_address(first);
        if !self.boot_window.covers(base, frames as u64 * PAGE_SIZE) {
            self.next = cursor;
            return Err(MemoryError::OutsideBootWindow { addr: base });
        }

        self.bitmap.set_range(first, frames, true);
        self.zero(base, frames);

        let span = first..first + frames;
        self.raw_span = Some(match self.raw_span.take() {
            Some(r) => r.start.min(span.start)..r.end.max(span.end),
            None => span,
        });
        log::debug!("raw-allocated {frames} frame(s) at {base}");
        Ok(base)
    }

    /// Return a raw frame that was never mapped.
    ///
    /// # Errors
    /// [`MemoryError::UnmanagedFrame`] if `frame` is not tracked.
    pub fn release_raw(&mut self, frame: PhysicalPage) -> Result<(), MemoryError> {
        let index = self
            .frame_index(frame.base())
            .ok_or(MemoryError::UnmanagedFrame { addr: frame.base() })?;
        self.bitmap.set(index, false);
        Ok(())
    }

    /// Unmap `frames` frames at `kernel base + base` in `space` and mark
    /// them free. Freeing an already free run is not detected.
    ///
    /// # Errors
    /// [`MemoryError::UnmanagedFrame`] if the run is not tracked; unmap
    /// errors if a page of the run is not mapped.
    pub fn free(
        &mut self,
        vmm: &Vmm<'m, M>,
        space: RootPage,
        base: PhysicalAddress,
        frames: usize,
    ) -> Result<(), MemoryError> {
        let first = self
            .frame_index(base)
            .filter(|first| first + frames <= self.bitmap.len())
            .ok_or(MemoryError::UnmanagedFrame { addr: base })?;

        vmm.unmap_region(space, self.mapper.phys_to_virt(base), frames)?;
        self.bitmap.set_range(first, frames, false);
        log::debug!("freed {frames} frame(s) at {base}");
        Ok(())
    }
}

/// `[lowest free base, highest free end)` over the memory map.
fn usable_range(boot: &BootInfo<'_>) -> Option<Range<u64>> {
    boot.free_regions().fold(None, |acc, region| {
        Some(match acc {
            None => region.base..region.end(),
            Some(r) => r.start.min(region.base)..r.end.max(region.end()),
        })
    })
}

/// The lowest frame boundary in a free region at or above the kernel load
/// address where `bytes` fit without overlapping the kernel image and inside
/// the boot kernel window.
fn bitmap_location(
    boot: &BootInfo<'_>,
    kernel_end: PhysicalAddress,
    bytes: u64,
) -> Option<PhysicalPage> {
    boot.free_regions()
        .filter(|region| region.base >= boot.kernel_load_addr.as_u64())
        .filter_map(|region| {
            let start = PhysicalAddress::new(region.base)
                .max(kernel_end)
                .align_up(PAGE_SIZE);
            let fits = start.as_u64() + bytes <= region.end();
            (fits && boot.kernel_map.covers(start, bytes)).then(|| start.page())
        })
        .min()
}

#[inline]
#[allow(clippy::cast_possible_truncation)]
const fn frame_count(bytes: u64) -> usize {
    (bytes / PAGE_SIZE) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{SimulatedRam, boot_info};
    use kernel_info::boot::{MemoryRegion, RegionType};

    const MIB: u64 = 1024 * 1024;

    fn two_region_map() -> [MemoryRegion; 2] {
        [
            MemoryRegion::new(0, 0x9_FC00, RegionType::Free),
            MemoryRegion::new(0x10_0000, 0x7F0_0000, RegionType::Free),
        ]
    }

    #[test]
    fn example_two_region_map() {
        let ram = SimulatedRam::new(128 * MIB);
        let mapper = ram.mapper();
        let regions = two_region_map();
        let boot = boot_info(&ram, &regions, 0x10_0000, 0);
        let mut pmm = unsafe { PhysicalAllocator::init(&mapper, &boot) }.expect("init");

        assert_eq!(pmm.mem_base(), PhysicalAddress::zero());
        assert_eq!(pmm.frames_total(), 0x8000);
        assert_eq!(pmm.bitmap_frames().start.base(), PhysicalAddress::new(0x10_0000));
        assert_eq!(pmm.bitmap_frames().end.base(), PhysicalAddress::new(0x10_1000));

        assert!(pmm.is_used(0), "frame 0 is below the kernel");
        assert!(pmm.is_used(0x9F), "hole between regions");
        assert!(pmm.is_used(0x100), "bitmap storage");
        assert!(!pmm.is_used(0x101));
        assert_eq!(pmm.find_free_region(1), Some(0x101));
        assert_eq!(pmm.frames_free(), 0x8000 - 0x101);
    }

    #[test]
    fn bit_state_after_init_follows_the_map() {
        let ram = SimulatedRam::new(8 * MIB);
        let mapper = ram.mapper();
        let regions = [
            MemoryRegion::new(0, 0x9_FC00, RegionType::Free),
            MemoryRegion::new(0x9_FC00, 0x400, RegionType::Reserved),
            MemoryRegion::new(0xF_0000, 0x1_0000, RegionType::Reserved),
            MemoryRegion::new(0x10_0000, 0x30_0000, RegionType::Free),
            MemoryRegion::new(0x40_0000, 0x800, RegionType::AcpiNvs),
            MemoryRegion::new(0x40_1000, 0x3F_F000, RegionType::Free),
            MemoryRegion::new(0xFEC0_0000, 0x1000, RegionType::Reserved),
        ];
        let boot = boot_info(&ram, &regions, 0x10_0000, 0x2_3456);
        let pmm = unsafe { PhysicalAllocator::init(&mapper, &boot) }.expect("init");

        // Kernel image ends at 0x123456, rounded up; the bitmap follows it.
        assert_eq!(pmm.kernel_end(), PhysicalAddress::new(0x12_4000));
        let bitmap = pmm.bitmap_frames();
        assert_eq!(bitmap.start.base(), PhysicalAddress::new(0x12_4000));
        assert_eq!(bitmap.end.base(), PhysicalAddress::new(0x12_5000));

        for frame in 0..pmm.frames_total() {
            let addr = pmm.frame_address(frame).as_u64();
            let expect_used = addr < 0x12_5000 || (0x40_0000..0x40_1000).contains(&addr);
            assert_eq!(pmm.is_used(frame), expect_used, "frame at {addr:#x}");
        }
    }

    #[test]
    fn usable_range_need_not_start_at_zero() {
        let ram = SimulatedRam::new(4 * MIB);
        let mapper = ram.mapper();
        let regions = [
            MemoryRegion::new(0, 0x10_0000, RegionType::Reserved),
            MemoryRegion::new(0x10_0000, 0x30_0000, RegionType::Free),
        ];
        let boot = boot_info(&ram, &regions, 0x10_0000, 0x1000);
        let mut pmm = unsafe { PhysicalAllocator::init(&mapper, &boot) }.expect("init");

        assert_eq!(pmm.mem_base(), PhysicalAddress::new(0x10_0000));
        assert_eq!(pmm.frames_total(), 0x300);
        // Kernel frame, then the bitmap frame.
        assert!(pmm.is_used(0));
        assert!(pmm.is_used(1));
        assert_eq!(pmm.find_free_region(1), Some(2));
        assert_eq!(pmm.frame_address(2), PhysicalAddress::new(0x10_2000));
        assert_eq!(pmm.frame_index(PhysicalAddress::new(0x10_2FFF)), Some(2));
        assert_eq!(pmm.frame_index(PhysicalAddress::new(0xF_F000)), None);
    }

    #[test]
    fn no_free_region_is_rejected() {
        let ram = SimulatedRam::new(MIB);
        let mapper = ram.mapper();
        let regions = [MemoryRegion::new(0, 0x10_0000, RegionType::Reserved)];
        let boot = boot_info(&ram, &regions, 0x10_0000, 0);
        let err = unsafe { PhysicalAllocator::init(&mapper, &boot) }.err().expect("init must fail");
        assert_eq!(err, MemoryError::NoUsableMemory);
    }

    #[test]
    fn bitmap_must_fit_above_the_kernel() {
        let ram = SimulatedRam::new(2 * MIB);
        let mapper = ram.mapper();
        let regions = [MemoryRegion::new(0, 0x9_F000, RegionType::Free)];
        let boot = boot_info(&ram, &regions, 0x10_0000, 0);
        let err = unsafe { PhysicalAllocator::init(&mapper, &boot) }.err().expect("init must fail");
        assert_eq!(err, MemoryError::NoBitmapLocation { bytes: 20 });
    }

    #[test]
    fn bitmap_must_lie_inside_the_boot_window() {
        let ram = SimulatedRam::new(4 * MIB);
        let mapper = ram.mapper();
        let regions = [MemoryRegion::new(0x10_0000, 0x30_0000, RegionType::Free)];
        let mut boot = boot_info(&ram, &regions, 0x10_0000, 0x1000);
        boot.kernel_map.size = 0x10_1000;
        let err = unsafe { PhysicalAllocator::init(&mapper, &boot) }.err().expect("init must fail");
        assert_eq!(err, MemoryError::NoBitmapLocation { bytes: 96 });
    }

    fn small_pmm<'m>(
        ram: &SimulatedRam,
        mapper: &'m crate::HhdmPhysMapper,
    ) -> PhysicalAllocator<'m, crate::HhdmPhysMapper> {
        // 64 frames at 1 MiB; frame 0 holds the kernel, frame 1 the bitmap.
        let regions = [MemoryRegion::new(0x10_0000, 0x4_0000, RegionType::Free)];
        let boot = boot_info(ram, &regions, 0x10_0000, 0x1000);
        unsafe { PhysicalAllocator::init(mapper, &boot) }.expect("init")
    }

    #[test]
    fn next_fit_moves_past_each_match() {
        let ram = SimulatedRam::new(2 * MIB);
        let mapper = ram.mapper();
        let mut pmm = small_pmm(&ram, &mapper);

        assert_eq!(pmm.find_free_region(3), Some(2));
        pmm.mark_frames(2, 3, true);
        assert_eq!(pmm.find_free_region(2), Some(5));
        pmm.mark_frames(5, 2, true);
        assert_eq!(pmm.find_free_region(1), Some(7));
    }

    #[test]
    fn cursor_resets_when_the_frame_below_it_is_freed() {
        let ram = SimulatedRam::new(2 * MIB);
        let mapper = ram.mapper();
        let mut pmm = small_pmm(&ram, &mapper);

        assert_eq!(pmm.find_free_region(4), Some(2));
        pmm.mark_frames(2, 4, true);
        // Cursor is at 6; frame 5 gets freed again.
        pmm.mark_frame(5, false);
        assert_eq!(pmm.find_free_region(1), Some(5));
    }

    #[test]
    fn search_wraps_around() {
        let ram = SimulatedRam::new(2 * MIB);
        let mapper = ram.mapper();
        let mut pmm = small_pmm(&ram, &mapper);

        // Fill everything except frames 10..12 and the last two frames.
        pmm.mark_frames(2, 62, true);
        pmm.mark_frames(10, 2, false);
        pmm.mark_frames(62, 2, false);

        assert_eq!(pmm.find_free_region(2), Some(10));
        pmm.mark_frames(10, 2, true);
        assert_eq!(pmm.find_free_region(2), Some(62));
        pmm.mark_frames(62, 2, true);
        pmm.mark_frames(3, 2, false);
        // The cursor sits at the end; the search wraps to the start.
        assert_eq!(pmm.find_free_region(2), Some(3));
    }

    #[test]
    fn runs_do_not_wrap_past_the_end() {
        let ram = SimulatedRam::new(2 * MIB);
        let mapper = ram.mapper();
        let mut pmm = small_pmm(&ram, &mapper);
        pmm.mark_frames(2, 62, true);
        pmm.mark_frame(63, false);
        pmm.mark_frame(0, false);
        assert_eq!(pmm.find_free_region(2), None);
        assert_eq!(pmm.find_free_region(1), Some(0));
    }

    #[test]
    fn freed_run_below_the_cursor_is_found() {
        let ram = SimulatedRam::new(2 * MIB);
        let mapper = ram.mapper();
        let mut pmm = small_pmm(&ram, &mapper);

        pmm.mark_frames(2, 62, true);
        pmm.mark_frames(20, 4, false);
        assert_eq!(pmm.find_free_region(1), Some(20));
        // Frame 20 was never marked, so the cursor at 21 resets to 0.
        assert_eq!(pmm.find_free_region(4), Some(20));
    }

    #[test]
    fn found_runs_are_always_free() {
        let ram = SimulatedRam::new(2 * MIB);
        let mapper = ram.mapper();
        let mut pmm = small_pmm(&ram, &mapper);

        // A fragmented pattern: every third frame used.
        for frame in (2..64).step_by(3) {
            pmm.mark_frame(frame, true);
        }
        for n in [1, 2, 3] {
            for _ in 0..8 {
                match pmm.find_free_region(n) {
                    Some(first) => {
                        assert!(first + n <= pmm.frames_total());
                        assert!((first..first + n).all(|f| !pmm.is_used(f)), "n={n} at {first}");
                        pmm.mark_frames(first, n, true);
                    }
                    None => assert_eq!(n, 3, "runs of {n} exist"),
                }
            }
        }
    }

    #[test]
    fn empty_and_oversized_requests() {
        let ram = SimulatedRam::new(2 * MIB);
        let mapper = ram.mapper();
        let mut pmm = small_pmm(&ram, &mapper);
        assert_eq!(pmm.find_free_region(0), None);
        assert_eq!(pmm.find_free_region(65), None);
        assert_eq!(pmm.find_free_region(62), Some(2));
        assert_eq!(pmm.alloc_raw(0), Err(MemoryError::EmptyRequest));
    }

    #[test]
    fn raw_allocations_are_zeroed_and_tracked() {
        let ram = SimulatedRam::new(2 * MIB);
        let mapper = ram.mapper();
        let mut pmm = small_pmm(&ram, &mapper);

        let frame_bytes =
            unsafe { mapper.phys_to_bytes_mut(PhysicalAddress::new(0x10_3000), 4096) };
        frame_bytes.fill(0xAB);

        let a = pmm.alloc_raw(1).expect("raw");
        let b = pmm.alloc_raw(2).expect("raw");
        assert_eq!(a, PhysicalAddress::new(0x10_2000));
        assert_eq!(b, PhysicalAddress::new(0x10_3000));
        assert_eq!(pmm.raw_span(), 2..5);

        let bytes = unsafe { mapper.phys_to_bytes_mut(b, 2 * 4096) };
        assert!(bytes.iter().all(|&x| x == 0));

        pmm.release_raw(a.page()).expect("release");
        assert!(!pmm.is_used(2));
    }

    #[test]
    fn raw_allocation_outside_the_boot_window_fails() {
        let ram = SimulatedRam::new(2 * MIB);
        let mapper = ram.mapper();
        let regions = [MemoryRegion::new(0x10_0000, 0x4_0000, RegionType::Free)];
        let mut boot = boot_info(&ram, &regions, 0x10_0000, 0x1000);
        boot.kernel_map.size = 0x10_3000;
        let mut pmm = unsafe { PhysicalAllocator::init(&mapper, &boot) }.expect("init");

        assert!(pmm.alloc_raw(1).is_ok());
        assert_eq!(
            pmm.alloc_raw(1),
            Err(MemoryError::OutsideBootWindow {
                addr: PhysicalAddress::new(0x10_3000)
            })
        );
        // The rejected run stays free and the next search lands on it again.
        assert!(!pmm.is_used(3));
        assert_eq!(pmm.frames_free(), 64 - 3);
        assert_eq!(pmm.find_free_region(1), Some(3));
    }

    #[test]
    fn exhaustion_reports_out_of_memory() {
        let ram = SimulatedRam::new(2 * MIB);
        let mapper = ram.mapper();
        let mut pmm = small_pmm(&ram, &mapper);
        assert!(pmm.alloc_raw(62).is_ok());
        assert_eq!(pmm.alloc_raw(1), Err(MemoryError::OutOfMemory { frames: 1 }));
    }
}
