use kernel_frames::PAGE_SHIFT;
use log::info;

use crate::PageAllocator;
use crate::config::{MEMZONE_XEN, NR_ZONES};
use crate::platform::Platform;

/// Free memory by heap, in frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemorySummary {
    pub xen_heap: u64,
    /// Free frames at or below the DMA zone. Zero without a DMA region.
    pub dma_heap: u64,
    /// Free owner-heap frames above the DMA zone.
    pub dom_heap: u64,
    pub scrub_pending: u64,
}

const fn kib(frames: u64) -> u64 {
    frames << (PAGE_SHIFT - 10)
}

impl<P: Platform> PageAllocator<P> {
    /// Free frames per heap, read in one pass under the heap lock.
    pub fn memory_summary(&self) -> MemorySummary {
        let dma_top = self.dma_zone().filter(|&z| z > MEMZONE_XEN);
        let (xen_heap, dma_heap, dom_heap) = self.heap.with_lock(|h| {
            let xen = h.avail_range(None, MEMZONE_XEN, MEMZONE_XEN);
            let (dma, dom) = match dma_top {
                Some(z) => (
                    h.avail_range(None, MEMZONE_XEN + 1, z),
                    h.avail_range(None, z + 1, NR_ZONES - 1),
                ),
                None => (0, h.avail_range(None, MEMZONE_XEN + 1, NR_ZONES - 1)),
            };
            (xen, dma, dom)
        });
        MemorySummary {
            xen_heap,
            dma_heap,
            dom_heap,
            scrub_pending: self.avail_scrub_pages(),
        }
    }

    /// Log free memory per heap.
    pub fn log_memory_info(&self) {
        let s = self.memory_summary();
        info!("Physical memory information:");
        info!("    Xen heap: {}kB free", kib(s.xen_heap));
        if self.dma_bits != 0 {
            info!("    DMA heap: {}kB free", kib(s.dma_heap));
        }
        info!("    Dom heap: {}kB free", kib(s.dom_heap));
        if s.scrub_pending != 0 {
            info!("    Scrub queue: {}kB", kib(s.scrub_pending));
        }
    }

    /// Log the free frame count of every non-empty node/zone pair.
    pub fn dump_heap(&self) {
        for node in self.heap_nodes() {
            for zone in 0..NR_ZONES {
                let avail = self.available_pages(Some(node), zone, zone);
                if avail != 0 {
                    info!("heap[node={node}][zone={zone}] -> {avail} pages");
                }
            }
        }
    }
}
