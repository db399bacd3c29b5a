//! Services the allocator consumes from the rest of the hypervisor.
//!
//! Each concern is its own trait so tests can fake them independently;
//! [`Platform`] bundles them for the allocator's type parameter.

use alloc::sync::Arc;
use core::time::Duration;

use kernel_frames::{CpuMask, Mfn, NodeId, NodeMask};

use crate::owner::{Owner, OwnerId};

/// NUMA layout of the machine.
pub trait NumaTopology {
    /// Node the frame's memory is attached to.
    fn frame_to_node(&self, mfn: Mfn) -> NodeId;

    /// Node of the calling CPU.
    fn current_node(&self) -> NodeId;

    fn online_nodes(&self) -> NodeMask;

    /// Frames spanned by `node`, holes included.
    fn node_spanned_pages(&self, node: NodeId) -> u64;
}

/// TLB shootdown support.
pub trait TlbControl {
    /// Current value of the global flush clock.
    fn current_time(&self) -> u32;

    fn online_cpus(&self) -> CpuMask;

    /// Drop from `mask` every CPU that has flushed since `stamp`.
    fn filter(&self, mask: CpuMask, stamp: u32) -> CpuMask;

    fn flush(&self, mask: CpuMask);
}

/// Access to frame contents.
pub trait FrameMemory {
    /// Overwrite the whole frame so no previous contents can leak.
    fn scrub_page(&self, mfn: Mfn);
}

/// Lookup of owners by identifier.
pub trait OwnerRegistry {
    fn lookup(&self, id: OwnerId) -> Option<Arc<dyn Owner>>;
}

/// Clock and one-shot timer driving the background scrubber.
pub trait ScrubTimer {
    /// Monotonic time.
    fn now(&self) -> Duration;

    /// Run the scrubber again after `after`.
    fn rearm(&self, after: Duration);
}

/// Everything the allocator needs from its environment.
pub trait Platform: NumaTopology + TlbControl + FrameMemory + OwnerRegistry + ScrubTimer {}

impl<T> Platform for T where T: NumaTopology + TlbControl + FrameMemory + OwnerRegistry + ScrubTimer {}
