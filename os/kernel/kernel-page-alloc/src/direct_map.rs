//! # Direct-map frame access
//!
//! With a direct map every physical address `pa` is visible at
//! `offset + pa` in the hypervisor's address space. [`DirectMap`] uses that
//! window to scrub frames in place.
//!
//! ## Example
//! ```rust
//! use kernel_frames::{Mfn, PAGE_SIZE};
//! use kernel_page_alloc::{DirectMap, FrameMemory};
//!
//! let mut backing = vec![0xAAu8; 2 * PAGE_SIZE as usize];
//! let offset = backing.as_mut_ptr() as u64;
//! // Frame 0 and 1 of this "machine" live in `backing`.
//! let map = unsafe { DirectMap::new(offset) };
//! map.scrub_page(Mfn::new(1));
//! assert!(backing[..PAGE_SIZE as usize].iter().all(|&b| b == 0xAA));
//! assert!(backing[PAGE_SIZE as usize..].iter().all(|&b| b == DirectMap::SCRUB_PATTERN));
//! ```

use kernel_frames::{Mfn, PAGE_SIZE};

use crate::platform::FrameMemory;

/// [`FrameMemory`] over a direct-mapped window.
#[derive(Debug, Clone, Copy)]
pub struct DirectMap {
    offset: u64,
}

impl DirectMap {
    /// Fill byte for scrubbed frames. Debug builds use a recognisable
    /// pattern so use of stale memory stands out.
    pub const SCRUB_PATTERN: u8 = if cfg!(debug_assertions) { 0xC2 } else { 0 };

    /// # Safety
    /// Every frame later passed to [`FrameMemory::scrub_page`] must be mapped
    /// writable at `offset + mfn * PAGE_SIZE`, and nothing else may hold a
    /// reference into it while it is scrubbed.
    #[must_use]
    pub const unsafe fn new(offset: u64) -> Self {
        Self { offset }
    }

    /// Virtual address of the frame's first byte.
    #[must_use]
    pub const fn virt(&self, mfn: Mfn) -> u64 {
        self.offset + mfn.base().as_u64()
    }
}

impl FrameMemory for DirectMap {
    #[allow(clippy::cast_possible_truncation)]
    fn scrub_page(&self, mfn: Mfn) {
        let va = self.virt(mfn) as usize as *mut u8;
        // SAFETY: guaranteed by the contract of `DirectMap::new`.
        unsafe { core::ptr::write_bytes(va, Self::SCRUB_PATTERN, PAGE_SIZE as usize) };
    }
}
