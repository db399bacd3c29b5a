use bitfield_struct::bitfield;
use kernel_frames::NodeId;

/// Options for owner-heap allocations.
///
/// ```rust
/// # use kernel_page_alloc::MemFlags;
/// # use kernel_frames::NodeId;
/// let flags = MemFlags::new().with_bits(32).with_node(Some(NodeId::new(1)));
/// assert_eq!(flags.bits(), 32);
/// assert_eq!(flags.node(), Some(NodeId::new(1)));
/// assert_eq!(MemFlags::new().node(), None);
/// ```
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct MemFlags {
    /// Assign without charging the owner's quota or taking a reference.
    pub no_refcount: bool,
    #[bits(7)]
    __: u8,
    /// Highest usable physical address width; `0` means unrestricted.
    #[bits(8)]
    pub bits: u8,
    /// Preferred node plus one; `0` means no preference.
    #[bits(8)]
    node_plus_one: u8,
    #[bits(8)]
    __: u8,
}

impl MemFlags {
    #[must_use]
    pub const fn with_node(self, node: Option<NodeId>) -> Self {
        match node {
            Some(node) => self.with_node_plus_one(node.as_u8() + 1),
            None => self.with_node_plus_one(0),
        }
    }

    #[must_use]
    pub const fn node(self) -> Option<NodeId> {
        match self.node_plus_one() {
            0 => None,
            n => Some(NodeId::new(n - 1)),
        }
    }
}
