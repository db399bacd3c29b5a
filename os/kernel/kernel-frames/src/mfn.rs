use crate::{PAGE_SHIFT, PhysicalAddress, fls, order_pages};
use core::fmt;
use core::ops::{Add, AddAssign, Sub};

/// Machine frame number.
///
/// Index of one physical page. Frame `n` covers the physical range
/// `[n << PAGE_SHIFT, (n + 1) << PAGE_SHIFT)`.
///
/// ### Invariants
/// - A block of order `o` is identified by its head frame, which is always a
///   multiple of `2^o` ([`Mfn::is_aligned`]).
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Mfn(u64);

impl Mfn {
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

    /// Frame number as a table index.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// First byte of the frame.
    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysicalAddress {
        PhysicalAddress::new(self.0 << PAGE_SHIFT)
    }

    /// Number of significant bits in the frame number.
    ///
    /// A frame with `width() == w` is addressable with `w + PAGE_SHIFT`
    /// physical address bits.
    #[inline]
    #[must_use]
    pub const fn width(self) -> u32 {
        fls(self.0)
    }

    /// Whether this frame can head a block of `order`.
    #[inline]
    #[must_use]
    pub const fn is_aligned(self, order: u32) -> bool {
        self.0 & (order_pages(order) - 1) == 0
    }

    /// The head of the buddy block of `order`.
    #[inline]
    #[must_use]
    pub const fn buddy(self, order: u32) -> Self {
        debug_assert!(self.is_aligned(order));
        Self(self.0 ^ order_pages(order))
    }

    /// Round down to a multiple of `2^order`.
    #[inline]
    #[must_use]
    pub const fn align_down(self, order: u32) -> Self {
        Self(self.0 & !(order_pages(order) - 1))
    }
}

impl fmt::Debug for Mfn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MFN({:#x})", self.0)
    }
}

impl fmt::Display for Mfn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<u64> for Mfn {
    #[inline]
    fn from(v: u64) -> Self {
        Self::new(v)
    }
}

impl From<Mfn> for u64 {
    #[inline]
    fn from(m: Mfn) -> Self {
        m.as_u64()
    }
}

impl Add<u64> for Mfn {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl AddAssign<u64> for Mfn {
    #[inline]
    fn add_assign(&mut self, rhs: u64) {
        self.0 += rhs;
    }
}

impl Sub<u64> for Mfn {
    type Output = Self;
    #[inline]
    fn sub(self, rhs: u64) -> Self::Output {
        Self(self.0 - rhs)
    }
}

impl Sub for Mfn {
    type Output = u64;
    #[inline]
    fn sub(self, rhs: Self) -> u64 {
        self.0 - rhs.0
    }
}
