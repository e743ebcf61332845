//! # Page Table Nodes
//!
//! One 4 KiB table of 512 entries, the typed entry view on top of
//! [`PageEntryBits`], and the per-level index split of a virtual address.

use crate::PageEntryBits;
use core::fmt;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, VirtualAddress};

/// Number of entries in one table at any level.
pub const ENTRIES_PER_TABLE: usize = 512;

/// The four levels of the x86-64 walk, root first.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum TableLevel {
    /// Root table (bits 39–47), referenced by CR3.
    L4,
    /// Bits 30–38.
    L3,
    /// Bits 21–29.
    L2,
    /// Leaf table (bits 12–20); its entries map 4 KiB pages.
    L1,
}

impl TableLevel {
    /// All levels in walk order.
    pub const WALK: [Self; 4] = [Self::L4, Self::L3, Self::L2, Self::L1];

    /// Position of the lowest VA bit that indexes this level.
    #[inline]
    #[must_use]
    pub const fn shift(self) -> u32 {
        match self {
            Self::L4 => 39,
            Self::L3 => 30,
            Self::L2 => 21,
            Self::L1 => 12,
        }
    }

    #[inline]
    #[must_use]
    pub const fn index_of(self, va: VirtualAddress) -> TableIndex {
        TableIndex::from_va(va, self)
    }

    /// The level below this one, or `None` for the leaf level.
    #[inline]
    #[must_use]
    pub const fn next_lower(self) -> Option<Self> {
        match self {
            Self::L4 => Some(Self::L3),
            Self::L3 => Some(Self::L2),
            Self::L2 => Some(Self::L1),
            Self::L1 => None,
        }
    }
}

impl fmt::Display for TableLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::L4 => "L4",
            Self::L3 => "L3",
            Self::L2 => "L2",
            Self::L1 => "L1",
        };
        f.write_str(name)
    }
}

/// Index (0..512) into a table at some level.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TableIndex(u16);

impl TableIndex {
    /// Build an index from a raw value.
    ///
    /// # Panics
    /// Debug-asserts `v < 512`.
    #[inline]
    #[must_use]
    pub const fn new(v: u16) -> Self {
        debug_assert!((v as usize) < ENTRIES_PER_TABLE);
        Self(v)
    }

    /// Extract the 9 index bits for `level` from `va`.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn from_va(va: VirtualAddress, level: TableLevel) -> Self {
        Self(((va.as_u64() >> level.shift()) & 0x1FF) as u16)
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// Split a virtual address into its four table indices (L4, L3, L2, L1).
#[inline]
#[must_use]
pub const fn split_indices(va: VirtualAddress) -> (TableIndex, TableIndex, TableIndex, TableIndex) {
    (
        TableLevel::L4.index_of(va),
        TableLevel::L3.index_of(va),
        TableLevel::L2.index_of(va),
        TableLevel::L1.index_of(va),
    )
}

/// Typed view of one entry.
///
/// An entry is either absent or refers to a frame: the next-level table for
/// L4 to L2, the mapped page for L1.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct PageTableEntry(PageEntryBits);

impl PageTableEntry {
    #[inline]
    #[must_use]
    pub const fn absent() -> Self {
        Self(PageEntryBits::new())
    }

    /// A link to the next-level table at `table`.
    #[inline]
    #[must_use]
    pub fn table(table: PhysicalPage) -> Self {
        Self(PageEntryBits::table_link().with_frame_of(table))
    }

    /// A leaf mapping of `frame` with `flags`; the present bit is forced on.
    #[inline]
    #[must_use]
    pub fn leaf(frame: PhysicalPage, flags: PageEntryBits) -> Self {
        Self(flags.with_present(true).with_frame_of(frame))
    }

    #[inline]
    #[must_use]
    pub const fn from_bits(bits: PageEntryBits) -> Self {
        Self(bits)
    }

    #[inline]
    #[must_use]
    pub const fn bits(self) -> PageEntryBits {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn is_present(self) -> bool {
        self.0.present()
    }

    #[inline]
    #[must_use]
    pub const fn is_writable(self) -> bool {
        self.0.writable()
    }

    #[inline]
    #[must_use]
    pub const fn is_user(self) -> bool {
        self.0.user()
    }

    /// The referenced frame, if present.
    #[inline]
    #[must_use]
    pub fn frame(self) -> Option<PhysicalPage> {
        if self.is_present() {
            Some(self.0.frame())
        } else {
            None
        }
    }

    /// The physical address of the referenced frame, if present.
    #[inline]
    #[must_use]
    pub fn address(self) -> Option<PhysicalAddress> {
        self.frame().map(PhysicalPage::base)
    }
}

impl fmt::Debug for PageTableEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_present() {
            return f.write_str("PageTableEntry(absent)");
        }
        f.debug_struct("PageTableEntry")
            .field("frame", &self.0.frame())
            .field("writable", &self.is_writable())
            .field("user", &self.is_user())
            .finish_non_exhaustive()
    }
}

/// One 4 KiB page-table node.
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PageTableEntry; ENTRIES_PER_TABLE],
}

const _: () = assert!(size_of::<PageTable>() == 4096);

impl PageTable {
    /// Clear all entries.
    #[inline]
    pub fn zero(&mut self) {
        self.entries = [PageTableEntry::absent(); ENTRIES_PER_TABLE];
    }

    #[inline]
    #[must_use]
    pub const fn get(&self, i: TableIndex) -> PageTableEntry {
        self.entries[i.as_usize()]
    }

    #[inline]
    pub const fn set(&mut self, i: TableIndex, e: PageTableEntry) {
        self.entries[i.as_usize()] = e;
    }

    /// Number of present entries.
    #[must_use]
    pub fn present_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_present()).count()
    }
}
