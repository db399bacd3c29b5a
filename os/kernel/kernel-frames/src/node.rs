use core::fmt;

/// A NUMA locality domain.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct NodeId(u8);

impl NodeId {
    /// Highest number of nodes a [`NodeMask`] can describe.
    pub const MAX: usize = 64;

    #[inline]
    #[must_use]
    pub const fn new(v: u8) -> Self {
        debug_assert!((v as usize) < Self::MAX);
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A set of NUMA nodes.
///
/// Allocation fallback walks the online set in ring order starting at the
/// preferred node:
///
/// ```rust
/// # use kernel_frames::*;
/// let online = NodeMask::empty().with(NodeId::new(0)).with(NodeId::new(2));
/// assert_eq!(online.next_ring(NodeId::new(0)), Some(NodeId::new(2)));
/// assert_eq!(online.next_ring(NodeId::new(2)), Some(NodeId::new(0)));
/// assert_eq!(online.weight(), 2);
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Hash)]
pub struct NodeMask(u64);

impl NodeMask {
    #[inline]
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    #[inline]
    #[must_use]
    pub const fn bits(self) -> u64 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn with(self, node: NodeId) -> Self {
        Self(self.0 | (1 << node.0))
    }

    #[inline]
    #[must_use]
    pub const fn contains(self, node: NodeId) -> bool {
        self.0 & (1 << node.0) != 0
    }

    #[inline]
    #[must_use]
    pub const fn weight(self) -> u32 {
        self.0.count_ones()
    }

    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn first(self) -> Option<NodeId> {
        if self.0 == 0 {
            None
        } else {
            Some(NodeId(self.0.trailing_zeros() as u8))
        }
    }

    /// The next member strictly after `node`, wrapping to the first member.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn next_ring(self, node: NodeId) -> Option<NodeId> {
        let shift = node.0 as u32 + 1;
        let above = if shift >= u64::BITS {
            0
        } else {
            self.0 & !((1u64 << shift) - 1)
        };
        if above != 0 {
            Some(NodeId(above.trailing_zeros() as u8))
        } else {
            self.first()
        }
    }

    /// Members in ascending order.
    pub fn iter(self) -> impl Iterator<Item = NodeId> {
        let mut rest = self.0;
        core::iter::from_fn(move || {
            if rest == 0 {
                return None;
            }
            #[allow(clippy::cast_possible_truncation)]
            let bit = rest.trailing_zeros() as u8;
            rest &= rest - 1;
            Some(NodeId(bit))
        })
    }
}

impl fmt::Debug for NodeMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}
