//! Early-boot frame allocation.
//!
//! Before the heap exists, memory is tracked by the allocation bitmap alone.
//! Firmware-reported RAM is registered with [`BootAllocator::register_range`],
//! the hypervisor carves out what it needs with [`BootAllocator::reserve`],
//! and [`BootAllocator::finish`] hands everything still free to the heap.
//! Consuming the boot allocator makes boot-time reservations impossible once
//! the heap is live.

use alloc::vec::Vec;

use kernel_frames::{Mfn, NodeId, PAGE_SHIFT, PhysicalAddress, fls};
use log::{debug, info};

use crate::PageAllocator;
use crate::bitmap::AllocationBitmap;
use crate::config::{DEFAULT_DMA_BITS_CAP, HeapConfig};
use crate::page::FrameTable;
use crate::platform::Platform;

pub struct BootAllocator {
    frames: FrameTable,
    bitmap: AllocationBitmap,
    first_valid: Option<Mfn>,
    config: HeapConfig,
}

impl BootAllocator {
    /// A boot allocator for a machine with `max_page` frames, all of them
    /// initially unavailable.
    #[must_use]
    pub fn new(max_page: u64, config: HeapConfig) -> Self {
        Self {
            frames: FrameTable::new(max_page),
            bitmap: AllocationBitmap::new(max_page),
            first_valid: None,
            config,
        }
    }

    #[must_use]
    pub fn max_page(&self) -> u64 {
        self.frames.max_page()
    }

    #[must_use]
    pub const fn first_valid_mfn(&self) -> Option<Mfn> {
        self.first_valid
    }

    #[must_use]
    pub fn is_allocated(&self, mfn: Mfn) -> bool {
        self.bitmap.is_allocated(mfn)
    }

    /// Register the whole frames inside `[start, end)` as usable RAM.
    ///
    /// Configured bad pages inside the range stay unavailable.
    ///
    /// # Panics
    /// If the range reaches past the frame table or overlaps a range
    /// registered before (the latter only checked in debug builds).
    pub fn register_range(&mut self, start: PhysicalAddress, end: PhysicalAddress) {
        let first = start.frame_up();
        let last = end.frame_down();
        if last <= first {
            return;
        }
        assert!(
            last.as_u64() <= self.max_page(),
            "{start}..{end} reaches past frame {}",
            self.max_page()
        );

        self.first_valid = Some(self.first_valid.map_or(first, |f| f.min(first)));
        for (_, page) in self.frames.range(first, last - first) {
            page.set_ram();
        }
        self.bitmap.mark_free(first, last - first);

        for bad in self.config.badpages.ranges() {
            let lo = bad.first.max(first);
            let hi = Mfn::new(bad.last.as_u64().saturating_add(1)).min(last);
            let mut withheld = 0;
            let mut mfn = lo;
            while mfn < hi {
                if !self.bitmap.is_allocated(mfn) {
                    self.bitmap.mark_allocated(mfn, 1);
                    withheld += 1;
                }
                mfn += 1;
            }
            if withheld > 0 {
                info!("Marked {withheld} page(s) starting at {lo} as bad");
            }
        }
    }

    /// Take `nr` frames aligned to `align` frames for the hypervisor.
    ///
    /// The highest suitable run is chosen. Returns `None` when no run of
    /// free frames above the first valid frame fits.
    ///
    /// # Panics
    /// If `align` is not a power of two.
    pub fn reserve(&mut self, nr: u64, align: u64) -> Option<Mfn> {
        assert!(align.is_power_of_two(), "alignment {align} is not a power of two");
        let first_valid = self.first_valid?.as_u64();
        let max_page = self.max_page();
        if nr == 0 || nr > max_page {
            return None;
        }
        let mask = !(align - 1);

        let mut pg = (max_page - nr) & mask;
        while pg >= first_valid {
            let busy = (0..nr).find(|&i| self.bitmap.is_allocated(Mfn::new(pg + i)));
            let Some(i) = busy else {
                let found = Mfn::new(pg);
                self.bitmap.mark_allocated(found, nr);
                for (_, page) in self.frames.range(found, nr) {
                    page.update_count(|c| Some(c.with_reserved(true)));
                }
                debug!("boot reserved {found}+{nr}");
                return Some(found);
            };
            // Next candidate must end below the busy frame.
            pg = (pg + i).checked_sub(nr)? & mask;
        }
        None
    }

    /// End of boot: move every free frame into the heap.
    ///
    /// Without a configured DMA width one is derived from the size of node 0
    /// on multi-node machines. Free memory is scrubbed if the configuration
    /// asks for it.
    pub fn finish<P: Platform>(self, platform: P) -> PageAllocator<P> {
        let max_page = self.frames.max_page();
        let first_valid = self.first_valid.unwrap_or(Mfn::new(max_page));
        let mut alloc = PageAllocator::from_parts(platform, self.frames, self.bitmap, first_valid);

        let runs: Vec<(Mfn, u64)> = alloc
            .bitmap
            .free_runs(first_valid, Mfn::new(max_page))
            .collect();
        for (first, count) in runs {
            alloc.bitmap.mark_allocated(first, count);
            alloc.init_heap_pages(first, count);
        }

        alloc.dma_bits = match self.config.dma_bits {
            Some(bits) => bits,
            None if alloc.platform.online_nodes().weight() > 1 => {
                let spanned = alloc.platform.node_spanned_pages(NodeId::new(0));
                (fls(spanned).saturating_sub(1) + PAGE_SHIFT)
                    .saturating_sub(2)
                    .min(DEFAULT_DMA_BITS_CAP)
            }
            None => 0,
        };
        info!("Domain heap initialised: DMA width {} bits", alloc.dma_bits);

        if self.config.bootscrub {
            alloc.scrub_free_pages();
        }
        alloc
    }
}
