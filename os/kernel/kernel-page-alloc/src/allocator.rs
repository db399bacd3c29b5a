use alloc::vec::Vec;

use kernel_frames::{Mfn, NodeId};
use kernel_sync::SpinLock;

use crate::bitmap::AllocationBitmap;
use crate::heap::HeapState;
use crate::page::FrameTable;
use crate::scrub::ScrubQueue;
use crate::zone::{bits_to_zone, frame_zone};

/// The physical page allocator.
///
/// Created from a [`BootAllocator`](crate::BootAllocator) once early boot is
/// over. All operations take `&self`; the buddy heap is guarded by a single
/// spin lock and per-frame state is kept in atomics.
pub struct PageAllocator<P> {
    pub(crate) platform: P,
    pub(crate) frames: FrameTable,
    pub(crate) bitmap: AllocationBitmap,
    pub(crate) heap: SpinLock<HeapState>,
    pub(crate) scrub: ScrubQueue,
    pub(crate) first_valid: Mfn,
    pub(crate) dma_bits: u32,
}

impl<P> PageAllocator<P> {
    pub(crate) fn from_parts(
        platform: P,
        frames: FrameTable,
        bitmap: AllocationBitmap,
        first_valid: Mfn,
    ) -> Self {
        let heap = HeapState::new(frames.max_page());
        Self {
            platform,
            frames,
            bitmap,
            heap: SpinLock::new(heap),
            scrub: ScrubQueue::new(),
            first_valid,
            dma_bits: 0,
        }
    }

    pub const fn platform(&self) -> &P {
        &self.platform
    }

    pub const fn frames(&self) -> &FrameTable {
        &self.frames
    }

    pub const fn bitmap(&self) -> &AllocationBitmap {
        &self.bitmap
    }

    pub fn max_page(&self) -> u64 {
        self.frames.max_page()
    }

    /// Lowest frame ever registered as RAM.
    pub const fn first_valid_mfn(&self) -> Mfn {
        self.first_valid
    }

    /// Width of the DMA-capable region, `0` if none is set aside.
    pub const fn dma_bits(&self) -> u32 {
        self.dma_bits
    }

    /// Highest zone reserved for DMA, if any.
    pub const fn dma_zone(&self) -> Option<usize> {
        if self.dma_bits == 0 {
            None
        } else {
            Some(bits_to_zone(self.dma_bits))
        }
    }

    pub(crate) fn zone_of(&self, mfn: Mfn) -> usize {
        frame_zone(mfn, self.frames.page(mfn).count().xen_heap())
    }

    /// Nodes that own a heap.
    pub fn heap_nodes(&self) -> Vec<NodeId> {
        self.heap.with_lock(|h| h.present_nodes())
    }
}
