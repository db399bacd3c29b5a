//! # Physical Page Allocation
//!
//! This crate owns every physical frame of the machine from the moment the
//! firmware memory map is known. It serves the hypervisor's own heap and the
//! heap that backs guest memory, keeps memory NUMA-local where it can, and
//! retires frames that hardware reports as faulty.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │       Hypervisor heap          Owner heap           │
//! │    • zone 0 only            • zones 1..NR_ZONES     │
//! │    • alloc/free_xenheap     • quota + page lists    │
//! │                             • DMA zones last        │
//! └─────────────────┬─────────────────┬─────────────────┘
//!                   │                 │
//! ┌─────────────────▼─────────────────▼─────────────────┐
//! │                  Buddy heap                         │
//! │    • per node, per zone, per order free lists       │
//! │    • split on allocation, merge on free             │
//! │    • offline/online, scrub queue                    │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │        Allocation bitmap + frame table              │
//! │    • one bit and one descriptor per frame           │
//! │    • the only state during early boot               │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Lifecycle
//!
//! 1. [`BootAllocator::new`] starts with every frame unavailable.
//! 2. [`BootAllocator::register_range`] adds RAM; [`BootAllocator::reserve`]
//!    carves out hypervisor memory.
//! 3. [`BootAllocator::finish`] builds the [`PageAllocator`], handing all
//!    remaining free frames to the buddy heap.
//! 4. The hypervisor heap is seeded with
//!    [`PageAllocator::init_xenheap_pages`].
//!
//! ## Collaborators
//!
//! The allocator does not know how to find NUMA nodes, flush TLBs, write
//! to frames, look up owners or arm timers. It is generic over a
//! [`Platform`] that does.
//!
//! ## Locking
//!
//! One spin lock guards all free lists and the per-zone counters. Owner
//! accounting is guarded by each owner's own lock. Neither is ever taken
//! while the other is held, except that freeing an owner's pages takes the
//! heap lock after the owner lock has been released.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

mod allocator;
mod bitmap;
mod boot;
pub mod config;
mod direct_map;
mod domheap;
mod error;
mod heap;
mod list;
mod memflags;
mod offline;
mod owner;
mod page;
mod platform;
mod report;
mod scrub;
mod status;
mod xenheap;
pub mod zone;

pub use allocator::PageAllocator;
pub use bitmap::AllocationBitmap;
pub use boot::BootAllocator;
pub use config::{BadPages, BadRange, HeapConfig, MAX_ORDER, MEMZONE_XEN, NR_ZONES};
pub use direct_map::DirectMap;
pub use error::{AllocError, AssignError, BadPageParseError, FrameError};
pub use memflags::MemFlags;
pub use owner::{Owner, OwnerId, OwnerPages};
pub use page::{FrameTable, PageCount, PageInfo};
pub use platform::{FrameMemory, NumaTopology, OwnerRegistry, Platform, ScrubTimer, TlbControl};
pub use report::MemorySummary;
pub use scrub::{SCRUB_BATCH, SCRUB_BUDGET, SCRUB_INTERVAL, SCRUB_RETRY, ScrubPass};
pub use status::PageStatus;
