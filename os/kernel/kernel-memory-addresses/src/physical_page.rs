use crate::{PAGE_SHIFT, PAGE_SIZE, PhysicalAddress};
use core::fmt;
use core::ops::Add;

/// A 4 KiB physical frame, identified by its aligned base address.
///
/// The frame *number* is `base >> 12`; page-table entries store exactly that
/// number, and the frame bitmap indexes frames by it (relative to the start
/// of usable memory).
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalPage(PhysicalAddress);

impl PhysicalPage {
    /// The frame that contains `addr`.
    #[inline]
    #[must_use]
    pub const fn containing(addr: PhysicalAddress) -> Self {
        Self(addr.align_down(PAGE_SIZE))
    }

    /// The frame starting exactly at `addr`, or `None` if `addr` is not
    /// frame aligned.
    #[inline]
    #[must_use]
    pub const fn from_addr(addr: PhysicalAddress) -> Option<Self> {
        if addr.is_page_aligned() {
            Some(Self(addr))
        } else {
            None
        }
    }

    #[inline]
    #[must_use]
    pub const fn from_number(number: u64) -> Self {
        Self(PhysicalAddress::new(number << PAGE_SHIFT))
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysicalAddress {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn number(self) -> u64 {
        self.0.as_u64() >> PAGE_SHIFT
    }
}

impl fmt::Debug for PhysicalPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysicalPage(#{:#X} @ {:?})", self.number(), self.0)
    }
}

impl fmt::Display for PhysicalPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Advances by whole frames.
impl Add<u64> for PhysicalPage {
    type Output = Self;
    #[inline]
    fn add(self, frames: u64) -> Self::Output {
        Self::from_number(self.number() + frames)
    }
}
