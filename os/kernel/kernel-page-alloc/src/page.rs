//! Per-frame descriptors.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use bitfield_struct::bitfield;
use kernel_frames::Mfn;

use crate::owner::OwnerId;

/// The packed count word of a frame.
///
/// Lifecycle flags share the word with the reference count so that the
/// offline transitions can be made with a single compare-and-swap.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct PageCount {
    /// General references held by the owner.
    #[bits(32)]
    pub refs: u32,
    /// The frame is assigned to an owner.
    pub allocated: bool,
    /// Assigned without being charged to the owner's quota.
    pub extra: bool,
    /// The frame belongs to the hypervisor heap.
    pub xen_heap: bool,
    /// The frame was taken by the boot allocator for the hypervisor itself.
    pub reserved: bool,
    /// Offline requested while in use; completes when the frame is freed.
    pub offlining: bool,
    /// Withheld from allocation.
    pub offlined: bool,
    /// Hardware reported the frame faulty. Never onlined again.
    pub broken: bool,
    #[bits(25)]
    __: u32,
}

impl PageCount {
    /// Bits that survive the frame being returned to the heap.
    #[must_use]
    pub const fn sticky(self) -> Self {
        Self::new()
            .with_xen_heap(self.xen_heap())
            .with_offlining(self.offlining())
            .with_broken(self.broken())
    }

    #[must_use]
    pub const fn is_offline_pending_or_done(self) -> bool {
        self.offlining() || self.offlined()
    }
}

const NO_OWNER: u32 = u32::MAX;

/// Descriptor of one physical frame.
pub struct PageInfo {
    count: AtomicU64,
    owner: AtomicU32,
    ram: AtomicBool,
    need_tlbflush: AtomicBool,
    tlbflush_timestamp: AtomicU32,
}

impl PageInfo {
    fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            owner: AtomicU32::new(NO_OWNER),
            ram: AtomicBool::new(false),
            need_tlbflush: AtomicBool::new(false),
            tlbflush_timestamp: AtomicU32::new(0),
        }
    }

    #[must_use]
    pub fn count(&self) -> PageCount {
        PageCount::from_bits(self.count.load(Ordering::Acquire))
    }

    /// Compare-and-swap loop over the count word.
    ///
    /// `f` returns the new value, or `None` to leave the word alone. Returns
    /// the value observed before the successful swap (or the value that made
    /// `f` decline) together with whether a swap happened.
    pub fn update_count(&self, mut f: impl FnMut(PageCount) -> Option<PageCount>) -> (PageCount, bool) {
        let mut current = self.count.load(Ordering::Acquire);
        loop {
            let old = PageCount::from_bits(current);
            let Some(new) = f(old) else {
                return (old, false);
            };
            match self.count.compare_exchange_weak(
                current,
                new.into_bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return (old, true),
                Err(seen) => current = seen,
            }
        }
    }

    #[must_use]
    pub fn owner(&self) -> Option<OwnerId> {
        match self.owner.load(Ordering::Acquire) {
            NO_OWNER => None,
            #[allow(clippy::cast_possible_truncation)]
            raw => Some(OwnerId::new(raw as u16)),
        }
    }

    pub(crate) fn set_owner(&self, owner: Option<OwnerId>) {
        let raw = owner.map_or(NO_OWNER, |o| u32::from(o.as_u16()));
        self.owner.store(raw, Ordering::Release);
    }

    /// The frame was registered as conventional RAM.
    #[must_use]
    pub fn is_ram(&self) -> bool {
        self.ram.load(Ordering::Relaxed)
    }

    pub(crate) fn set_ram(&self) {
        self.ram.store(true, Ordering::Relaxed);
    }

    /// Pending TLB shootdown requirement recorded when the frame was freed.
    #[must_use]
    pub fn tlbflush_stamp(&self) -> Option<u32> {
        self.need_tlbflush
            .load(Ordering::Acquire)
            .then(|| self.tlbflush_timestamp.load(Ordering::Acquire))
    }

    pub(crate) fn set_tlbflush(&self, stamp: Option<u32>) {
        if let Some(stamp) = stamp {
            self.tlbflush_timestamp.store(stamp, Ordering::Release);
        }
        self.need_tlbflush.store(stamp.is_some(), Ordering::Release);
    }
}

/// Descriptors for every frame below `max_page`.
pub struct FrameTable {
    pages: Box<[PageInfo]>,
}

impl FrameTable {
    #[must_use]
    pub fn new(max_page: u64) -> Self {
        let len = usize::try_from(max_page).unwrap_or(usize::MAX);
        let pages: Vec<PageInfo> = (0..len).map(|_| PageInfo::new()).collect();
        Self {
            pages: pages.into_boxed_slice(),
        }
    }

    #[must_use]
    pub fn max_page(&self) -> u64 {
        self.pages.len() as u64
    }

    #[must_use]
    pub fn contains(&self, mfn: Mfn) -> bool {
        mfn.as_u64() < self.max_page()
    }

    /// # Panics
    /// If `mfn` lies beyond the table.
    #[must_use]
    pub fn page(&self, mfn: Mfn) -> &PageInfo {
        &self.pages[mfn.index()]
    }

    #[must_use]
    pub fn try_page(&self, mfn: Mfn) -> Option<&PageInfo> {
        self.pages.get(mfn.index())
    }

    /// Descriptors of `[first, first + count)`.
    pub fn range(&self, first: Mfn, count: u64) -> impl Iterator<Item = (Mfn, &PageInfo)> {
        (0..count).map(move |i| {
            let mfn = first + i;
            (mfn, self.page(mfn))
        })
    }
}
