//! Page owners and their accounting.

use alloc::collections::BTreeSet;
use core::fmt;

use kernel_frames::{Mfn, NodeId};
use kernel_sync::SpinLock;

/// Identifier of a page owner (a guest domain or the hypervisor).
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct OwnerId(u16);

impl OwnerId {
    /// Pages owned by the hypervisor itself.
    pub const HYPERVISOR: Self = Self(0x7FF2);
    /// No owner could be determined.
    pub const INVALID: Self = Self(0x7FF4);

    #[inline]
    #[must_use]
    pub const fn new(v: u16) -> Self {
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }
}

impl fmt::Debug for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::HYPERVISOR => f.write_str("Owner(hypervisor)"),
            Self::INVALID => f.write_str("Owner(invalid)"),
            Self(id) => write!(f, "Owner({id})"),
        }
    }
}

/// Page accounting of one owner, kept under the owner's lock.
#[derive(Debug, Default)]
pub struct OwnerPages {
    /// Pages currently charged to the owner.
    pub tot_pages: u64,
    /// Quota for `tot_pages`.
    pub max_pages: u64,
    list: BTreeSet<Mfn>,
}

impl OwnerPages {
    #[must_use]
    pub const fn with_limit(max_pages: u64) -> Self {
        Self {
            tot_pages: 0,
            max_pages,
            list: BTreeSet::new(),
        }
    }

    /// Frames on the owner's page list.
    pub fn frames(&self) -> impl Iterator<Item = Mfn> + '_ {
        self.list.iter().copied()
    }

    #[must_use]
    pub fn holds(&self, mfn: Mfn) -> bool {
        self.list.contains(&mfn)
    }

    pub(crate) fn insert(&mut self, mfn: Mfn) {
        let fresh = self.list.insert(mfn);
        debug_assert!(fresh, "{mfn} already on the owner's page list");
    }

    pub(crate) fn remove(&mut self, mfn: Mfn) {
        let present = self.list.remove(&mfn);
        assert!(present, "{mfn} missing from its owner's page list");
    }
}

/// An entity that pages can be assigned to.
///
/// The allocator never keeps an owner alive on its own; it takes a reference
/// with [`get`](Owner::get) when the first page is charged and drops it with
/// [`put`](Owner::put) when the last one is released.
pub trait Owner: Send + Sync {
    fn id(&self) -> OwnerId;

    /// The owner is being torn down. Its freed pages are scrubbed before reuse.
    fn is_dying(&self) -> bool;

    fn get(&self);

    fn put(&self);

    fn pages(&self) -> &SpinLock<OwnerPages>;

    /// Node to allocate from when the caller has no preference.
    fn node_affinity(&self) -> Option<NodeId> {
        None
    }
}
