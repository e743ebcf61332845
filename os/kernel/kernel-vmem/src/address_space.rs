//! # Address Space (x86-64, L4-rooted)
//!
//! A handle on one virtual address space: the tree of page tables rooted at
//! an L4 frame, reached through a [`PhysMapper`].
//!
//! ## Highlights
//!
//! - [`AddressSpace::walk`] follows L4 → L1 for a virtual address and reports
//!   either the leaf slot or the level at which the walk hit an absent entry.
//! - [`AddressSpace::map_one`] installs one 4 KiB mapping, creating missing
//!   intermediate tables with frames from a [`FrameAlloc`].
//! - [`AddressSpace::unmap_one`] clears one leaf.
//! - [`AddressSpace::translate`] resolves a virtual address to physical.
//!
//! ## Re-entrant table allocation
//!
//! The frame allocator backing `map_one` may itself map memory into this
//! very address space (the kernel maps every frame it hands out). Such a
//! nested call can install the same intermediate slot the outer walk is about
//! to fill. After every allocation the slot is therefore read again; if it
//! became present in the meantime, the outer walk continues through the
//! nested table and returns its own frame to the allocator.
//!
//! ## Safety
//!
//! - Mutating active mappings requires appropriate **TLB maintenance**.
//! - The `PhysMapper` must yield **writable** references to table frames.

use crate::page_table::{PageTable, PageTableEntry, TableIndex, TableLevel};
use crate::{FrameAlloc, MapError, PageEntryBits, PhysMapper, UnmapError};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, VirtualAddress};

/// The L4 root frame of an [`AddressSpace`].
pub type RootPage = PhysicalPage;

/// Outcome of walking the tables for one virtual address.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Walk {
    /// The leaf entry is present.
    Mapped {
        /// The L1 table holding the leaf.
        table: PhysicalPage,
        index: TableIndex,
        entry: PageTableEntry,
    },
    /// The entry at this level is absent; nothing below it exists.
    AbsentAtLevel(TableLevel),
}

/// Handle to a single, concrete address space.
pub struct AddressSpace<'m, M: PhysMapper> {
    root: RootPage,
    mapper: &'m M,
}

impl<M: PhysMapper> Clone for AddressSpace<'_, M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M: PhysMapper> Copy for AddressSpace<'_, M> {}

impl<'m, M: PhysMapper> AddressSpace<'m, M> {
    /// View the address space whose L4 table lives in `root`.
    ///
    /// `root` must be a zeroed or valid L4 table reachable through `mapper`.
    #[inline]
    pub const fn from_root(mapper: &'m M, root: RootPage) -> Self {
        Self { root, mapper }
    }

    #[inline]
    pub const fn root_page(&self) -> RootPage {
        self.root
    }

    #[inline]
    fn table(&self, frame: PhysicalPage) -> &'m mut PageTable {
        // SAFETY: every frame reachable from `root` was handed out as a zeroed
        // page-table frame and stays reachable through the mapper.
        unsafe { self.mapper.phys_to_mut::<PageTable>(frame.base()) }
    }

    /// Read entry `index` of the table in `table`.
    #[inline]
    #[must_use]
    pub fn entry(&self, table: PhysicalPage, index: TableIndex) -> PageTableEntry {
        self.table(table).get(index)
    }

    /// Overwrite entry `index` of the table in `table`.
    #[inline]
    pub fn set_entry(&self, table: PhysicalPage, index: TableIndex, entry: PageTableEntry) {
        self.table(table).set(index, entry);
    }

    /// The frame of the `level` table on the path to `va`, if the walk gets
    /// that far.
    #[must_use]
    pub fn table_for(&self, level: TableLevel, va: VirtualAddress) -> Option<PhysicalPage> {
        let mut table = self.root;
        for current in TableLevel::WALK {
            if current == level {
                return Some(table);
            }
            table = self.entry(table, current.index_of(va)).frame()?;
        }
        None
    }

    /// Follow the tables for `va` down to its leaf.
    #[must_use]
    pub fn walk(&self, va: VirtualAddress) -> Walk {
        let mut table = self.root;
        for level in TableLevel::WALK {
            let index = level.index_of(va);
            let entry = self.entry(table, index);
            let Some(next) = entry.frame() else {
                return Walk::AbsentAtLevel(level);
            };
            if level == TableLevel::L1 {
                return Walk::Mapped {
                    table,
                    index,
                    entry,
                };
            }
            table = next;
        }
        unreachable!("the walk ends at L1")
    }

    /// Map **one** 4 KiB page `va → frame` with `flags`.
    ///
    /// Missing L3/L2/L1 tables are allocated from `alloc` and linked as
    /// present + writable + user.
    ///
    /// # Errors
    /// - [`MapError::AlreadyMapped`] if the leaf is already present.
    /// - Any error `alloc` reports while providing table frames.
    pub fn map_one<A: FrameAlloc>(
        &self,
        alloc: &mut A,
        va: VirtualAddress,
        frame: PhysicalPage,
        flags: PageEntryBits,
    ) -> Result<(), A::Error> {
        let table = self.ensure_leaf_table(alloc, va)?;
        let index = TableLevel::L1.index_of(va);
        let existing = self.entry(table, index);
        if let Some(existing) = existing.address() {
            return Err(MapError::AlreadyMapped { va, existing }.into());
        }

        log::trace!("map {va} -> {}", frame.base());
        self.set_entry(table, index, PageTableEntry::leaf(frame, flags));
        Ok(())
    }

    /// The L1 table covering `va`, creating any missing L3/L2/L1 table.
    ///
    /// # Errors
    /// Any error `alloc` reports while providing table frames.
    pub fn ensure_leaf_table<A: FrameAlloc>(
        &self,
        alloc: &mut A,
        va: VirtualAddress,
    ) -> Result<PhysicalPage, A::Error> {
        let mut table = self.root;
        for level in [TableLevel::L4, TableLevel::L3, TableLevel::L2] {
            table = self.ensure_next(alloc, table, level.index_of(va))?;
        }
        Ok(table)
    }

    /// The next-level table behind `table[index]`, allocating it if absent.
    fn ensure_next<A: FrameAlloc>(
        &self,
        alloc: &mut A,
        table: PhysicalPage,
        index: TableIndex,
    ) -> Result<PhysicalPage, A::Error> {
        if let Some(next) = self.entry(table, index).frame() {
            return Ok(next);
        }

        let fresh = alloc.alloc_table()?;

        // The allocation may have filled the slot through a nested mapping.
        if let Some(next) = self.entry(table, index).frame() {
            log::debug!("table slot filled during allocation; releasing {fresh:?}");
            alloc.release_table(fresh)?;
            return Ok(next);
        }

        log::debug!("new page table at {}", fresh.base());
        self.set_entry(table, index, PageTableEntry::table(fresh));
        Ok(fresh)
    }

    /// Clear the leaf mapping of `va` and return the frame it pointed at.
    ///
    /// Intermediate tables are left in place even when they become empty.
    ///
    /// # Errors
    /// [`UnmapError::NotMapped`] naming the first level with an absent entry.
    pub fn unmap_one(&self, va: VirtualAddress) -> Result<PhysicalPage, UnmapError> {
        match self.walk(va) {
            Walk::Mapped {
                table,
                index,
                entry,
            } => {
                log::trace!("unmap {va}");
                self.set_entry(table, index, PageTableEntry::absent());
                Ok(entry.bits().frame())
            }
            Walk::AbsentAtLevel(level) => Err(UnmapError::NotMapped { va, level }),
        }
    }

    /// Translate `va` to the physical address it is mapped to, if any.
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        match self.walk(va) {
            Walk::Mapped { entry, .. } => entry.address().map(|base| base + va.offset_in_page()),
            Walk::AbsentAtLevel(_) => None,
        }
    }

    #[must_use]
    pub fn is_mapped(&self, va: VirtualAddress) -> bool {
        matches!(self.walk(va), Walk::Mapped { .. })
    }
}
