use bitfield_struct::bitfield;
use kernel_memory_addresses::PhysicalPage;

/// Mask for the frame-number field; frames above 1 TiB are not addressable.
pub const FRAME_NUMBER_MASK: u64 = (1 << 28) - 1;

/// A single 64-bit page-table entry in its raw bitfield form.
///
/// The same layout is used at every level (L4 through L1). The bit positions
/// are a hardware contract and must not move.
///
/// ### Bit layout
///
/// | Bits      | Name / Mnemonic   | Meaning |
/// |-----------|-------------------|----------|
/// | 0         | `P` (present)     | Valid entry if set |
/// | 1         | `RW`              | Writable if set |
/// | 2         | `US`              | User-mode accessible if set |
/// | 3         | `PWT`             | Write-through caching |
/// | 4         | `PCD`             | Disable caching |
/// | 5         | `A`               | Accessed |
/// | 6         | `D`               | Dirty (leaf only) |
/// | 7         | `PS`              | Huge page |
/// | 8         | `G`               | Global (leaf only) |
/// | 9–11      | OS available      | Bit 9 marks allocator-owned frames |
/// | 12–39     | `frame`           | Physical frame number (address >> 12) |
/// | 40–51     | reserved          | Must be zero |
/// | 52–62     | ignored           | Free for software |
/// | 63        | `NX`              | Execute disable |
///
/// The frame field is 28 bits wide, which bounds the physical address space
/// reachable through these tables to 1 TiB.
///
/// ### Example
/// ```rust
/// # use kernel_vmem::PageEntryBits;
/// # use kernel_memory_addresses::PhysicalPage;
/// let e = PageEntryBits::new()
///     .with_present(true)
///     .with_writable(true)
///     .with_frame_of(PhysicalPage::from_number(0x101));
/// assert_eq!(e.into_bits(), 0x10_1003);
/// ```
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct PageEntryBits {
    /// Present (P, bit 0).
    pub present: bool,

    /// Writable (RW, bit 1).
    pub writable: bool,

    /// User/Supervisor (US, bit 2).
    pub user: bool,

    /// Page Write-Through (PWT, bit 3).
    pub write_through: bool,

    /// Page Cache Disable (PCD, bit 4).
    pub cache_disabled: bool,

    /// Accessed (A, bit 5). Set by the CPU.
    pub accessed: bool,

    /// Dirty (D, bit 6), **leaf only**. Set by the CPU on first write.
    pub dirty: bool,

    /// Page Size (PS, bit 7).
    ///
    /// Never set by this crate; every mapping is a 4 KiB leaf at L1.
    pub huge_page: bool,

    /// Global (G, bit 8), **leaf only**. Survives CR3 reloads.
    pub global: bool,

    /// Bit 9: frame handed out by the frame allocator.
    pub allocated: bool,

    /// OS-available (bits 10..=11).
    #[bits(2)]
    pub os_available: u8,

    /// Physical frame number (bits 12..=39).
    #[bits(28)]
    frame_number: u32,

    /// Bits 40..=51, must be zero.
    #[bits(12)]
    __: u16,

    /// Bits 52..=62, ignored by hardware.
    #[bits(11)]
    pub ignored: u16,

    /// No-Execute (NX, bit 63).
    pub no_execute: bool,
}

impl PageEntryBits {
    /// The frame this entry refers to, regardless of the present bit.
    #[inline]
    #[must_use]
    pub fn frame(&self) -> PhysicalPage {
        PhysicalPage::from_number(u64::from(self.frame_number()))
    }

    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn with_frame_of(self, frame: PhysicalPage) -> Self {
        debug_assert!(
            frame.number() <= FRAME_NUMBER_MASK,
            "frame {frame:?} beyond the addressable range"
        );
        self.with_frame_number((frame.number() & FRAME_NUMBER_MASK) as u32)
    }

    /// Only the permission and caching bits, without frame and present bit.
    #[inline]
    #[must_use]
    pub fn flags_only(self) -> Self {
        self.with_present(false).with_frame_number(0)
    }

    /// Flags for intermediate (non-leaf) links: present, writable, user.
    ///
    /// Permissions are the intersection over the walk, so links stay
    /// permissive and the leaf decides.
    #[inline]
    #[must_use]
    pub const fn table_link() -> Self {
        Self::new()
            .with_present(true)
            .with_writable(true)
            .with_user(true)
    }

    /// Kernel read/write data.
    #[inline]
    #[must_use]
    pub const fn kernel_rw() -> Self {
        Self::new().with_writable(true)
    }

    /// Kernel read/write data that survives address-space switches.
    #[inline]
    #[must_use]
    pub const fn kernel_rw_global() -> Self {
        Self::new().with_writable(true).with_global(true)
    }

    /// User read/write data.
    #[inline]
    #[must_use]
    pub const fn user_rw() -> Self {
        Self::new().with_writable(true).with_user(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_bit_positions() {
        assert_eq!(PageEntryBits::new().with_present(true).into_bits(), 1 << 0);
        assert_eq!(PageEntryBits::new().with_writable(true).into_bits(), 1 << 1);
        assert_eq!(PageEntryBits::new().with_user(true).into_bits(), 1 << 2);
        assert_eq!(PageEntryBits::new().with_write_through(true).into_bits(), 1 << 3);
        assert_eq!(PageEntryBits::new().with_cache_disabled(true).into_bits(), 1 << 4);
        assert_eq!(PageEntryBits::new().with_accessed(true).into_bits(), 1 << 5);
        assert_eq!(PageEntryBits::new().with_dirty(true).into_bits(), 1 << 6);
        assert_eq!(PageEntryBits::new().with_huge_page(true).into_bits(), 1 << 7);
        assert_eq!(PageEntryBits::new().with_global(true).into_bits(), 1 << 8);
        assert_eq!(PageEntryBits::new().with_allocated(true).into_bits(), 1 << 9);
        assert_eq!(PageEntryBits::new().with_no_execute(true).into_bits(), 1 << 63);
    }

    #[test]
    fn frame_field_covers_bits_12_to_39() {
        let top = PhysicalPage::from_number(FRAME_NUMBER_MASK);
        let e = PageEntryBits::new().with_frame_of(top);
        assert_eq!(e.into_bits(), 0x0000_00FF_FFFF_F000);
        assert_eq!(e.frame(), top);
    }

    #[test]
    fn flags_only_strips_frame_and_present() {
        let e = PageEntryBits::kernel_rw_global()
            .with_present(true)
            .with_frame_of(PhysicalPage::from_number(0xA0));
        let f = e.flags_only();
        assert!(!f.present());
        assert!(f.writable());
        assert!(f.global());
        assert_eq!(f.frame().number(), 0);
    }
}
