//! # Machine Frame Numbers and Locality Masks
//!
//! Strongly typed wrappers for the handful of integers the page allocator
//! juggles all day: physical addresses, machine frame numbers, NUMA node ids
//! and the node/CPU bit masks used for fallback and TLB shootdown.
//!
//! ## Overview
//!
//! | Type | Description |
//! |------|-------------|
//! | [`PhysicalAddress`] | A raw 64-bit physical (machine) address. |
//! | [`Mfn`] | Index of one 4 KiB machine frame, i.e. `address >> PAGE_SHIFT`. |
//! | [`NodeId`] / [`NodeMask`] | A NUMA node and a set of nodes, iterated in ring order. |
//! | [`CpuId`] / [`CpuMask`] | A physical processor and a set of processors. |
//!
//! Frame numbers are the universal key for all allocator metadata. Keeping
//! them distinct from addresses means a shift can never be forgotten or
//! applied twice:
//!
//! ```rust
//! # use kernel_frames::*;
//! let pa = PhysicalAddress::new(0x0000_0000_8123_4567);
//! let mfn = pa.frame_down();
//! assert_eq!(mfn, Mfn::new(0x81234));
//! assert_eq!(mfn.base().as_u64(), 0x8123_4000);
//! assert_eq!(pa.frame_up(), Mfn::new(0x81235));
//! ```
//!
//! ## Buddies
//!
//! A block of order `o` spans `2^o` frames and starts on a multiple of `2^o`.
//! Its buddy is the unique other block of the same order that completes the
//! next larger aligned block:
//!
//! ```rust
//! # use kernel_frames::*;
//! let mfn = Mfn::new(0x40);
//! assert_eq!(mfn.buddy(4), Mfn::new(0x50));
//! assert_eq!(Mfn::new(0x50).buddy(4), mfn);
//! assert!(mfn.is_aligned(6));
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(clippy::inline_always)]

mod cpu;
mod mfn;
mod node;
mod physical_address;

pub use cpu::{CpuId, CpuMask};
pub use mfn::Mfn;
pub use node::{NodeId, NodeMask};
pub use physical_address::PhysicalAddress;

/// log2 of the machine page size.
pub const PAGE_SHIFT: u32 = 12;

/// The machine page size in bytes.
pub const PAGE_SIZE: u64 = 1 << PAGE_SHIFT;

/// Number of frames in a block of the given order.
#[inline]
#[must_use]
pub const fn order_pages(order: u32) -> u64 {
    1 << order
}

/// Find-last-set: the 1-based index of the most significant set bit, or `0`.
///
/// ```rust
/// # use kernel_frames::fls;
/// assert_eq!(fls(0), 0);
/// assert_eq!(fls(1), 1);
/// assert_eq!(fls(0x400), 11);
/// ```
#[inline]
#[must_use]
pub const fn fls(value: u64) -> u32 {
    u64::BITS - value.leading_zeros()
}
