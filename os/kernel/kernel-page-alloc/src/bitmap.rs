//! One bit per frame: set means allocated, clear means free.
//!
//! Mutation happens under the heap lock. Reads are plain atomic loads so that
//! the boot scrubber can skip allocated frames without taking the lock; such
//! readers must re-check once they hold it.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use kernel_frames::Mfn;

const BITS: u64 = u64::BITS as u64;

/// The frame allocation bitmap.
pub struct AllocationBitmap {
    words: Box<[AtomicU64]>,
    frames: u64,
}

impl AllocationBitmap {
    /// A bitmap for `frames` frames with every frame marked allocated.
    ///
    /// One spare word past the end keeps the mask arithmetic for ranges ending
    /// exactly on a word boundary in bounds.
    #[must_use]
    pub fn new(frames: u64) -> Self {
        let len = usize::try_from(frames / BITS + 1).unwrap_or(usize::MAX);
        let words: Vec<AtomicU64> = (0..len).map(|_| AtomicU64::new(u64::MAX)).collect();
        Self {
            words: words.into_boxed_slice(),
            frames,
        }
    }

    /// Number of frames described.
    #[must_use]
    pub const fn frames(&self) -> u64 {
        self.frames
    }

    /// Frames beyond the table read as allocated so they never look like a
    /// free buddy.
    #[must_use]
    pub fn is_allocated(&self, mfn: Mfn) -> bool {
        let n = mfn.as_u64();
        if n >= self.frames {
            return true;
        }
        self.word(n).load(Ordering::Acquire) & (1 << (n % BITS)) != 0
    }

    /// Set the bits for `[first, first + count)`. Every bit must be clear.
    pub fn mark_allocated(&self, first: Mfn, count: u64) {
        if count == 0 {
            return;
        }
        self.check_range(first, count);
        debug_assert!(
            (0..count).all(|i| !self.is_allocated(first + i)),
            "allocating already allocated frames in {first}+{count}"
        );

        let start = first.as_u64();
        let end = start + count;
        let (start_word, start_off) = (start / BITS, start % BITS);
        let (end_word, end_off) = (end / BITS, end % BITS);

        if start_word == end_word {
            let mask = ((1u64 << end_off) - 1) & !((1u64 << start_off) - 1);
            self.word(start).fetch_or(mask, Ordering::Release);
        } else {
            self.word(start)
                .fetch_or((1u64 << start_off).wrapping_neg(), Ordering::Release);
            for w in (start_word + 1)..end_word {
                self.word(w * BITS).store(u64::MAX, Ordering::Release);
            }
            self.word(end)
                .fetch_or((1u64 << end_off) - 1, Ordering::Release);
        }
    }

    /// Clear the bits for `[first, first + count)`. Every bit must be set.
    pub fn mark_free(&self, first: Mfn, count: u64) {
        if count == 0 {
            return;
        }
        self.check_range(first, count);
        debug_assert!(
            (0..count).all(|i| self.is_allocated(first + i)),
            "freeing already free frames in {first}+{count}"
        );

        let start = first.as_u64();
        let end = start + count;
        let (start_word, start_off) = (start / BITS, start % BITS);
        let (end_word, end_off) = (end / BITS, end % BITS);

        if start_word == end_word {
            let keep = (1u64 << end_off).wrapping_neg() | ((1u64 << start_off) - 1);
            self.word(start).fetch_and(keep, Ordering::Release);
        } else {
            self.word(start)
                .fetch_and((1u64 << start_off) - 1, Ordering::Release);
            for w in (start_word + 1)..end_word {
                self.word(w * BITS).store(0, Ordering::Release);
            }
            self.word(end)
                .fetch_and((1u64 << end_off).wrapping_neg(), Ordering::Release);
        }
    }

    /// Free frames in `[from, to)`, as maximal runs.
    pub fn free_runs(&self, from: Mfn, to: Mfn) -> impl Iterator<Item = (Mfn, u64)> + '_ {
        let end = to.as_u64().min(self.frames);
        let mut cursor = from.as_u64();
        core::iter::from_fn(move || {
            while cursor < end && self.is_allocated(Mfn::new(cursor)) {
                cursor += 1;
            }
            if cursor >= end {
                return None;
            }
            let first = cursor;
            while cursor < end && !self.is_allocated(Mfn::new(cursor)) {
                cursor += 1;
            }
            Some((Mfn::new(first), cursor - first))
        })
    }

    fn check_range(&self, first: Mfn, count: u64) {
        assert!(
            first.as_u64().checked_add(count).is_some_and(|end| end <= self.frames),
            "{first}+{count} exceeds the {} frames in the bitmap",
            self.frames
        );
    }

    #[allow(clippy::cast_possible_truncation)]
    fn word(&self, bit: u64) -> &AtomicU64 {
        &self.words[(bit / BITS) as usize]
    }
}
