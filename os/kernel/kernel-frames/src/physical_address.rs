use crate::{Mfn, PAGE_SHIFT, PAGE_SIZE};
use core::fmt;
use core::ops::{Add, AddAssign};

/// Physical (machine) memory address.
///
/// A plain `u64` with physical-address intent. Allocator interfaces that take
/// byte ranges (boot memory map, hypervisor heap donation) use this type;
/// everything past the boundary is expressed in [`Mfn`]s.
///
/// ### Examples
/// ```rust
/// # use kernel_frames::*;
/// let pa = PhysicalAddress::new(0x1001);
/// assert_eq!(pa.round_down(), PhysicalAddress::new(0x1000));
/// assert_eq!(pa.round_up(), PhysicalAddress::new(0x2000));
/// assert!(!pa.is_page_aligned());
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalAddress(u64);

impl PhysicalAddress {
    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self::new(0)
    }

    #[inline]
    #[must_use]
    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Align down to the containing page boundary.
    #[inline]
    #[must_use]
    pub const fn round_down(self) -> Self {
        Self(self.0 & !(PAGE_SIZE - 1))
    }

    /// Align up to the next page boundary (identity when already aligned).
    #[inline]
    #[must_use]
    pub const fn round_up(self) -> Self {
        Self((self.0 + (PAGE_SIZE - 1)) & !(PAGE_SIZE - 1))
    }

    #[inline]
    #[must_use]
    pub const fn is_page_aligned(self) -> bool {
        self.0 & (PAGE_SIZE - 1) == 0
    }

    /// The frame containing this address.
    #[inline]
    #[must_use]
    pub const fn frame_down(self) -> Mfn {
        Mfn::new(self.0 >> PAGE_SHIFT)
    }

    /// The first frame starting at or above this address.
    #[inline]
    #[must_use]
    pub const fn frame_up(self) -> Mfn {
        Mfn::new(self.round_up().0 >> PAGE_SHIFT)
    }
}

impl fmt::Debug for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PA(0x{:016X})", self.as_u64())
    }
}

impl fmt::Display for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.as_u64())
    }
}

impl From<u64> for PhysicalAddress {
    #[inline]
    fn from(v: u64) -> Self {
        Self::new(v)
    }
}

impl From<Mfn> for PhysicalAddress {
    #[inline]
    fn from(value: Mfn) -> Self {
        value.base()
    }
}

impl Add<u64> for PhysicalAddress {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl AddAssign<u64> for PhysicalAddress {
    #[inline]
    fn add_assign(&mut self, rhs: u64) {
        self.0 += rhs;
    }
}
