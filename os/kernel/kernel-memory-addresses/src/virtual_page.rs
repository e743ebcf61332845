use crate::{PAGE_SIZE, VirtualAddress};
use core::fmt;
use core::ops::Add;

/// A 4 KiB aligned virtual page.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualPage(VirtualAddress);

impl VirtualPage {
    #[inline]
    #[must_use]
    pub const fn containing(addr: VirtualAddress) -> Self {
        Self(VirtualAddress::new(addr.as_u64() & !(PAGE_SIZE - 1)))
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> VirtualAddress {
        self.0
    }
}

impl fmt::Debug for VirtualPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtualPage({:?})", self.0)
    }
}

/// Advances by whole pages.
impl Add<u64> for VirtualPage {
    type Output = Self;
    #[inline]
    fn add(self, pages: u64) -> Self::Output {
        Self(self.0 + pages * PAGE_SIZE)
    }
}
