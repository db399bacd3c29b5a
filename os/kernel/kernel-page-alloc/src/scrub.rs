//! Scrubbing.
//!
//! Pages released by an owner that is being torn down may still hold its
//! data. They are queued here instead of going back to the heap, and a
//! timer-driven pass zeroes and frees them in small batches.

use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::time::Duration;

use kernel_frames::Mfn;
use kernel_sync::SpinLock;
use log::{debug, info, trace};

use crate::PageAllocator;
use crate::platform::Platform;

/// Frames taken off the queue per lock acquisition.
pub const SCRUB_BATCH: usize = 16;

/// Time a single pass may spend before yielding.
pub const SCRUB_BUDGET: Duration = Duration::from_millis(1);

/// Delay before the next pass when work remains.
pub const SCRUB_INTERVAL: Duration = Duration::from_millis(10);

/// Delay before retrying when another CPU is already scrubbing.
pub const SCRUB_RETRY: Duration = Duration::from_millis(1);

/// Frames between progress messages of the boot scrub (100 MiB).
const BOOT_SCRUB_PROGRESS: u64 = 100 << (20 - kernel_frames::PAGE_SHIFT);

pub(crate) struct ScrubQueue {
    pending: SpinLock<VecDeque<Mfn>>,
    /// Held for the duration of a pass.
    serialise: SpinLock<()>,
}

impl ScrubQueue {
    pub(crate) const fn new() -> Self {
        Self {
            pending: SpinLock::new(VecDeque::new()),
            serialise: SpinLock::new(()),
        }
    }

    pub(crate) fn push(&self, mfn: Mfn) {
        self.pending.with_lock(|q| q.push_back(mfn));
    }

    fn take_batch(&self) -> Vec<Mfn> {
        self.pending.with_lock(|q| {
            let n = q.len().min(SCRUB_BATCH);
            q.drain(..n).collect()
        })
    }
}

/// Result of one [`PageAllocator::scrub_pass`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrubPass {
    /// Another pass was running; retry scheduled.
    Busy,
    /// The queue ran dry. No new pass is scheduled.
    Drained { scrubbed: u64 },
    /// The time budget ran out with work possibly left; next pass scheduled.
    Yielded { scrubbed: u64 },
}

impl<P: Platform> PageAllocator<P> {
    /// Frames waiting to be scrubbed.
    pub fn avail_scrub_pages(&self) -> u64 {
        self.scrub.pending.with_lock(|q| q.len() as u64)
    }

    /// Frames waiting to be scrubbed, in queue order.
    pub fn scrub_queue(&self) -> Vec<Mfn> {
        self.scrub.pending.with_lock(|q| q.iter().copied().collect())
    }

    /// Run one background scrub pass.
    ///
    /// Only one pass runs at a time. Frames are scrubbed and freed at order 0
    /// in batches of [`SCRUB_BATCH`] until the queue is empty or
    /// [`SCRUB_BUDGET`] is used up.
    pub fn scrub_pass(&self) -> ScrubPass {
        let Some(_serialise) = self.scrub.serialise.try_lock() else {
            self.platform.rearm(SCRUB_RETRY);
            return ScrubPass::Busy;
        };

        let start = self.platform.now();
        let mut scrubbed = 0;
        loop {
            let batch = self.scrub.take_batch();
            if batch.is_empty() {
                trace!("scrub queue drained after {scrubbed} frame(s)");
                return ScrubPass::Drained { scrubbed };
            }
            for mfn in batch {
                self.platform.scrub_page(mfn);
                self.free_block(mfn, 0);
                scrubbed += 1;
            }
            if self.platform.now().saturating_sub(start) >= SCRUB_BUDGET {
                break;
            }
        }

        self.platform.rearm(SCRUB_INTERVAL);
        ScrubPass::Yielded { scrubbed }
    }

    /// Scrub every free frame once, at boot.
    ///
    /// Allocated frames are skipped without the heap lock; a frame found free
    /// is checked again with the lock held and scrubbed before release.
    pub fn scrub_free_pages(&self) -> u64 {
        info!("Scrubbing free RAM");
        let mut scrubbed = 0;
        for n in self.first_valid.as_u64()..self.max_page() {
            let mfn = Mfn::new(n);
            if n % BOOT_SCRUB_PROGRESS == 0 {
                debug!("boot scrub at {mfn}");
            }
            if self.bitmap.is_allocated(mfn) {
                continue;
            }
            let _heap = self.heap.lock();
            if !self.bitmap.is_allocated(mfn) {
                self.platform.scrub_page(mfn);
                scrubbed += 1;
            }
        }
        info!("Scrubbed {scrubbed} free frame(s)");
        scrubbed
    }
}
