//! The hypervisor heap, living in zone [`MEMZONE_XEN`], and runtime
//! hand-over of memory to either heap.

use kernel_frames::{Mfn, PhysicalAddress};
use log::{debug, info};

use crate::PageAllocator;
use crate::config::MEMZONE_XEN;
use crate::error::AllocError;
use crate::platform::Platform;

impl<P: Platform> PageAllocator<P> {
    /// Give the page-aligned interior of `[start, end)` to the hypervisor heap.
    ///
    /// The range must still be allocated, e.g. obtained from the boot
    /// allocator. A frame is kept back at either end unless the neighbour is
    /// hypervisor heap too, so its blocks never touch owner-heap frames.
    /// Adjacent ranges handed over one after the other share a single guard.
    ///
    /// # Panics
    /// If a frame of the range is already free.
    pub fn init_xenheap_pages(&self, start: PhysicalAddress, end: PhysicalAddress) {
        let start = start.frame_up();
        let end = end.frame_down();
        if end <= start {
            return;
        }

        let mut first = start;
        let mut last = end;
        if first.as_u64() > 0 && !self.is_xen_heap(first - 1) {
            first += 1;
        }
        if !self.is_xen_heap(last) {
            last = last - 1;
        }

        // Guard frames join the zone too but are never freed.
        for (_, page) in self.frames.range(start, end - start) {
            page.update_count(|c| Some(c.with_xen_heap(true)));
        }
        if last <= first {
            return;
        }
        let count = last - first;
        for (_, page) in self.frames.range(first, count) {
            page.update_count(|c| Some(c.with_reserved(false)));
        }
        info!("hypervisor heap: {first}..{last} ({count} frames)");
        self.init_heap_pages(first, count);
    }

    fn is_xen_heap(&self, mfn: Mfn) -> bool {
        self.frames.try_page(mfn).is_some_and(|p| p.count().xen_heap())
    }

    /// Allocate `2^order` frames for the hypervisor's own use.
    ///
    /// # Errors
    /// See [`allocate_block`](Self::allocate_block).
    pub fn alloc_xenheap_pages(&self, order: u32) -> Result<Mfn, AllocError> {
        self.allocate_block(MEMZONE_XEN, MEMZONE_XEN, None, order)
    }

    /// # Panics
    /// If the block is not hypervisor heap.
    pub fn free_xenheap_pages(&self, mfn: Mfn, order: u32) {
        assert!(self.is_xen_heap(mfn), "{mfn} is not hypervisor heap");
        self.free_block(mfn, order);
    }

    /// Give the page-aligned interior of `[start, end)` to the owner heap
    /// after boot. The range must still be allocated.
    pub fn init_domheap_pages(&self, start: PhysicalAddress, end: PhysicalAddress) {
        let first = start.frame_up();
        let last = end.frame_down();
        if last <= first {
            return;
        }
        let count = last - first;
        for (_, page) in self.frames.range(first, count) {
            page.update_count(|c| Some(c.with_reserved(false)));
        }
        debug!("owner heap grows by {first}..{last}");
        self.init_heap_pages(first, count);
    }
}
