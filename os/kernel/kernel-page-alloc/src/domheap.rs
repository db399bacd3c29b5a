//! The owner heap: every zone above the hypervisor zone, with pages charged
//! to owners.

use alloc::sync::Arc;
use alloc::vec::Vec;

use kernel_frames::{Mfn, NodeId, order_pages};
use log::{debug, warn};

use crate::PageAllocator;
use crate::config::{MEMZONE_XEN, NR_ZONES, UNRESTRICTED_BITS};
use crate::error::{AllocError, AssignError};
use crate::memflags::MemFlags;
use crate::owner::Owner;
use crate::platform::Platform;
use crate::zone::{bits_to_zone, clamp_zone};

impl<P: Platform> PageAllocator<P> {
    /// Charge the block `mfn`/`order` to `owner`.
    ///
    /// Unless `flags` asks for [`no_refcount`](MemFlags::no_refcount) the
    /// owner's quota is enforced, and its first page takes a reference on it.
    ///
    /// # Errors
    /// - [`AssignError::OwnerDying`] if the owner is being torn down.
    /// - [`AssignError::QuotaExceeded`] if the block would exceed its quota.
    pub fn assign_pages(
        &self,
        owner: &dyn Owner,
        mfn: Mfn,
        order: u32,
        flags: MemFlags,
    ) -> Result<(), AssignError> {
        let count = order_pages(order);
        let mut pages = owner.pages().lock();

        if owner.is_dying() {
            debug!("{:?} is dying, refusing {mfn}+{count}", owner.id());
            return Err(AssignError::OwnerDying(owner.id()));
        }

        if !flags.no_refcount() {
            let wanted = pages.tot_pages + count;
            if wanted > pages.max_pages {
                debug!(
                    "over-allocation for {:?}: {wanted} > {}",
                    owner.id(),
                    pages.max_pages
                );
                return Err(AssignError::QuotaExceeded {
                    owner: owner.id(),
                    wanted,
                    limit: pages.max_pages,
                });
            }
            if pages.tot_pages == 0 {
                owner.get();
            }
            pages.tot_pages = wanted;
        }

        for (frame, page) in self.frames.range(mfn, count) {
            assert!(page.owner().is_none(), "{frame} already has an owner");
            page.update_count(|c| {
                assert!(c.refs() == 0 && !c.allocated(), "{frame} assigned while in use: {c:?}");
                Some(c.with_allocated(true).with_refs(1).with_extra(flags.no_refcount()))
            });
            page.set_owner(Some(owner.id()));
            pages.insert(frame);
        }
        Ok(())
    }

    /// Allocate a block for `owner` (or an anonymous one when `None`).
    ///
    /// Zones above the DMA region are tried first; the DMA zones are only
    /// used when nothing else fits under the address limit in `flags`.
    ///
    /// # Errors
    /// Allocation errors from the heap, or [`AllocError::Assign`] when the
    /// owner refuses the block, in which case it goes straight back.
    pub fn alloc_domheap_pages(
        &self,
        owner: Option<&dyn Owner>,
        order: u32,
        flags: MemFlags,
    ) -> Result<Mfn, AllocError> {
        let bits = match flags.bits() {
            0 => UNRESTRICTED_BITS,
            b => u32::from(b),
        };
        let zone_hi = clamp_zone(bits_to_zone(bits));
        if zone_hi <= MEMZONE_XEN {
            return Err(AllocError::BadZoneRange {
                lo: MEMZONE_XEN + 1,
                hi: zone_hi,
            });
        }
        let node = flags.node().or_else(|| owner.and_then(|o| o.node_affinity()));

        let above_dma = match self.dma_zone() {
            Some(dma) if dma < zone_hi => self.allocate_block(dma + 1, zone_hi, node, order).ok(),
            _ => None,
        };
        let mfn = match above_dma {
            Some(mfn) => mfn,
            None => self.allocate_block(MEMZONE_XEN + 1, zone_hi, node, order)?,
        };

        if let Some(owner) = owner
            && let Err(e) = self.assign_pages(owner, mfn, order, flags)
        {
            self.free_block(mfn, order);
            return Err(e.into());
        }
        Ok(mfn)
    }

    /// Release a block obtained from [`alloc_domheap_pages`](Self::alloc_domheap_pages).
    ///
    /// Pages of a dying owner are queued for scrubbing rather than freed.
    pub fn free_domheap_pages(&self, mfn: Mfn, order: u32) {
        match self.detach_from_owner(mfn, order) {
            Some(owner) if owner.is_dying() => {
                for (frame, page) in self.frames.range(mfn, order_pages(order)) {
                    page.set_owner(None);
                    self.scrub.push(frame);
                }
            }
            _ => self.free_block(mfn, order),
        }
    }

    /// Take the block `mfn`/`order` off its owner's page list and uncharge
    /// it. The owner reference taken by [`assign_pages`](Self::assign_pages)
    /// is dropped with the last charged page.
    ///
    /// Returns the former owner, or `None` for an anonymous block. The frames
    /// keep their owner tag until reallocated so that stale TLB entries can
    /// be flushed.
    ///
    /// # Panics
    /// If the owner is unknown to the registry or does not hold the block.
    pub fn detach_from_owner(&self, mfn: Mfn, order: u32) -> Option<Arc<dyn Owner>> {
        let id = self.frames.page(mfn).owner()?;
        let Some(owner) = self.platform.lookup(id) else {
            panic!("{mfn} belongs to unknown {id:?}");
        };

        let mut pages = owner.pages().lock();
        let mut charged = 0;
        for (frame, page) in self.frames.range(mfn, order_pages(order)) {
            assert_eq!(page.owner(), Some(id), "{frame} is not owned by {id:?}");
            pages.remove(frame);
            if !page.count().extra() {
                charged += 1;
            }
        }
        let drop_ref = charged > 0 && {
            let Some(left) = pages.tot_pages.checked_sub(charged) else {
                panic!("{id:?} releases {charged} pages but holds {}", pages.tot_pages);
            };
            pages.tot_pages = left;
            left == 0
        };
        drop(pages);

        if drop_ref {
            owner.put();
        }
        Some(owner)
    }

    /// Release every page of `owner`, typically during its teardown.
    ///
    /// The page list is snapshotted under the owner's lock and each page is
    /// released after the lock is dropped, since releasing takes it again.
    pub fn relinquish_owner_pages(&self, owner: &dyn Owner) -> u64 {
        let frames: Vec<Mfn> = owner.pages().with_lock(|p| p.frames().collect());
        if frames.is_empty() {
            return 0;
        }
        if !owner.is_dying() {
            warn!("relinquishing pages of live {:?}", owner.id());
        }
        for &mfn in &frames {
            self.free_domheap_pages(mfn, 0);
        }
        frames.len() as u64
    }

    /// Free frames in the owner heap.
    pub fn avail_domheap_pages(&self) -> u64 {
        self.available_pages(None, MEMZONE_XEN + 1, NR_ZONES - 1)
    }

    /// Free owner-heap frames between `min_width` and `max_width` address
    /// bits (`0` meaning unbounded) on `node` or everywhere.
    pub fn avail_domheap_pages_region(
        &self,
        node: Option<NodeId>,
        min_width: u32,
        max_width: u32,
    ) -> u64 {
        let lo = if min_width == 0 {
            MEMZONE_XEN + 1
        } else {
            bits_to_zone(min_width)
        };
        let hi = if max_width == 0 {
            NR_ZONES - 1
        } else {
            bits_to_zone(max_width)
        };
        let lo = clamp_zone(lo).max(MEMZONE_XEN + 1);
        let hi = clamp_zone(hi).max(MEMZONE_XEN + 1);
        self.available_pages(node, lo, hi)
    }
}
