//! Frame offlining.
//!
//! A frame reported faulty (or retired by an operator) is taken out of
//! service. A free frame is withheld at once; an allocated frame is only
//! flagged and is withheld when it is eventually freed.
//!
//! ```text
//!   online ──(free)────────────▶ offlined ──mark_online──▶ online
//!   online ──(allocated)──▶ offlining ──freed──▶ offlined
//!   offlining ──mark_online──▶ online
//! ```
//!
//! `broken` may be added in any state and pins the frame offline for good.

use kernel_frames::Mfn;
use log::{debug, info, warn};

use crate::PageAllocator;
use crate::config::MAX_ORDER;
use crate::error::FrameError;
use crate::heap::HeapState;
use crate::owner::OwnerId;
use crate::page::PageCount;
use crate::platform::Platform;
use crate::status::PageStatus;

/// The count word after an offline request, or `None` if nothing changes.
const fn offline_transition(c: PageCount, allocated: bool, broken: bool) -> Option<PageCount> {
    if c.offlined() {
        return if broken && !c.broken() {
            Some(c.with_broken(true))
        } else {
            None
        };
    }
    let mut next = if allocated {
        c.with_offlining(true)
    } else {
        c.with_offlined(true)
    };
    if broken {
        next = next.with_broken(true);
    }
    if next.into_bits() == c.into_bits() {
        None
    } else {
        Some(next)
    }
}

impl<P: Platform> PageAllocator<P> {
    /// Take `mfn` out of service, `broken` if hardware reported it faulty.
    ///
    /// Repeating a request is harmless and reports the same status.
    ///
    /// # Errors
    /// [`FrameError::OutOfRange`] if `mfn` is beyond the frame table.
    pub fn mark_offline(&self, mfn: Mfn, broken: bool) -> Result<PageStatus, FrameError> {
        let page = self.frames.try_page(mfn).ok_or_else(|| {
            warn!("offline request for {mfn} beyond the frame table");
            FrameError::OutOfRange(mfn)
        })?;

        let current = page.count();
        if current.reserved() {
            debug!("{mfn} holds the hypervisor itself, not offlining");
            return Ok(PageStatus::new()
                .with_xen_page(true)
                .with_failed(true)
                .with_owner(OwnerId::HYPERVISOR));
        }
        if !page.is_ram() {
            return Ok(PageStatus::new().with_failed(true).with_not_ram(true));
        }

        let mut guard = self.heap.lock();
        let heap = &mut *guard;

        let allocated = self.bitmap.is_allocated(mfn);
        let (old, _) = page.update_count(|c| offline_transition(c, allocated, broken));
        let now = page.count();

        let mut status = if !allocated {
            self.reserve_heap_page(heap, mfn);
            PageStatus::new().with_offlined(true)
        } else if now.offlined() {
            if old.offlined() && !old.broken() && now.broken() {
                heap.unpark(mfn, false);
                heap.park(mfn, true);
            }
            PageStatus::new().with_offlined(true)
        } else if let Some(owner) = page.owner() {
            PageStatus::new()
                .with_owned(true)
                .with_pending(true)
                .with_owner(owner)
        } else if now.xen_heap() {
            PageStatus::new()
                .with_xen_page(true)
                .with_pending(true)
                .with_owner(OwnerId::HYPERVISOR)
        } else {
            PageStatus::new()
                .with_anonymous(true)
                .with_failed(true)
                .with_owner(OwnerId::INVALID)
        };
        drop(guard);

        if broken {
            status.set_broken(true);
        }
        if !old.is_offline_pending_or_done() {
            info!("{mfn} going offline: {status:?}");
        }
        Ok(status)
    }

    /// Withhold the free frame `mfn` from the block that contains it.
    fn reserve_heap_page(&self, heap: &mut HeapState, mfn: Mfn) {
        let found = (0..=MAX_ORDER).find_map(|order| {
            let head = mfn.align_down(order);
            (heap.free_order(head) == Some(order)).then_some((head, order))
        });
        let Some((head, order)) = found else {
            panic!("free frame {mfn} is not inside any free block");
        };
        let node = self.platform.frame_to_node(head);
        let zone = self.zone_of(head);
        self.withhold_offlined(heap, node, zone, head, order);
    }

    /// Return `mfn` to service. Broken frames stay out.
    ///
    /// # Errors
    /// [`FrameError::OutOfRange`] if `mfn` is beyond the frame table.
    pub fn mark_online(&self, mfn: Mfn) -> Result<PageStatus, FrameError> {
        let page = self.frames.try_page(mfn).ok_or(FrameError::OutOfRange(mfn))?;

        let mut guard = self.heap.lock();
        let c = page.count();
        let mut release = false;
        let status = if c.broken() {
            PageStatus::new().with_failed(true).with_broken(true)
        } else if c.offlined() {
            page.update_count(|c| Some(c.with_offlined(false)));
            guard.unpark(mfn, false);
            release = true;
            PageStatus::new().with_onlined(true)
        } else if c.offlining() {
            page.update_count(|c| Some(c.with_offlining(false)));
            PageStatus::new().with_onlined(true)
        } else {
            PageStatus::new()
        };
        drop(guard);

        if release {
            self.free_block(mfn, 0);
            info!("{mfn} back online");
        }
        Ok(status)
    }

    /// Offline state of `mfn`, without changing it.
    ///
    /// # Errors
    /// [`FrameError::OutOfRange`] if `mfn` is beyond the frame table.
    pub fn query_status(&self, mfn: Mfn) -> Result<PageStatus, FrameError> {
        let page = self.frames.try_page(mfn).ok_or(FrameError::OutOfRange(mfn))?;
        let c = page.count();
        Ok(PageStatus::new()
            .with_pending(c.offlining())
            .with_broken(c.broken())
            .with_offlined(c.offlined()))
    }
}
