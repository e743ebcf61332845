use bitfield_struct::bitfield;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage};

/// CR3: Page-Map Level-4 Base Register (IA-32e, PCID disabled).
///
/// Holds the frame of the L4 table the MMU walks, plus cache-control flags
/// for that walk. Writing it switches the active address space and flushes
/// all non-global TLB entries.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct Cr3 {
    /// Bits 0–2: Reserved (must be 0).
    #[bits(3)]
    reserved0: u8,

    /// Bit 3: PWT: Page-level Write-Through for the L4 table.
    pub pwt: bool,

    /// Bit 4: PCD: Page-level Cache Disable for the L4 table.
    pub pcd: bool,

    /// Bits 5–11: Reserved (must be 0 when written).
    #[bits(7)]
    reserved1: u8,

    /// Bits 12–51: L4 frame number.
    #[bits(40)]
    root_frame: u64,

    /// Bits 52–63: Reserved.
    #[bits(12)]
    reserved2: u16,
}

impl Cr3 {
    /// A write-back, cacheable root pointing at `root`.
    #[must_use]
    pub fn from_root(root: PhysicalPage) -> Self {
        Self::new().with_root_frame(root.number())
    }

    /// The L4 frame this value points at.
    #[must_use]
    pub fn root(&self) -> PhysicalPage {
        let bits = self.into_bits();
        debug_assert_eq!(bits >> 52, 0, "CR3 has nonzero high bits: {bits:#018x}");
        PhysicalPage::from_number(self.root_frame())
    }

    #[must_use]
    pub fn root_phys(&self) -> PhysicalAddress {
        self.root().base()
    }
}

#[cfg(all(feature = "asm", target_arch = "x86_64"))]
impl crate::LoadRegisterUnsafe for Cr3 {
    unsafe fn load_unsafe() -> Self {
        let mut cr3: u64;
        unsafe {
            core::arch::asm!("mov {}, cr3", out(reg) cr3, options(nomem, nostack, preserves_flags));
        }
        Self::from_bits(cr3)
    }
}

#[cfg(all(feature = "asm", target_arch = "x86_64"))]
impl crate::StoreRegisterUnsafe for Cr3 {
    unsafe fn store_unsafe(self) {
        let cr3 = self.into_bits();
        unsafe {
            core::arch::asm!("mov cr3, {}", in(reg) cr3, options(nostack, preserves_flags));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_frame_encoding() {
        let cr3 = Cr3::from_root(PhysicalPage::from_number(0x123));
        assert_eq!(cr3.into_bits(), 0x12_3000);
        assert_eq!(cr3.root_phys(), PhysicalAddress::new(0x12_3000));
        assert!(!cr3.pwt());
        assert!(!cr3.pcd());
    }

    #[test]
    fn cache_flags_do_not_disturb_root() {
        let cr3 = Cr3::from_bits(0x0000_0007_FFFF_F018);
        assert!(cr3.pwt());
        assert!(cr3.pcd());
        assert_eq!(cr3.root().number(), 0x7_FFFF_F);
    }
}
