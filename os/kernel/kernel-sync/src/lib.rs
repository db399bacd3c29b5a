//! # Kernel synchronization primitives
//!
//! The page allocator needs exactly one kind of lock: a short-held,
//! non-reentrant spin lock. It guards the heap's free lists, the scrub queue,
//! the scrub pass serialization and each owner's page accounting.
//!
//! [`SpinLock::try_lock`] is the non-blocking acquisition used by background
//! work that would rather reschedule itself than wait, and
//! [`SpinLock::is_locked`] backs "caller must hold the lock" assertions.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod spin_lock;

pub use spin_lock::{SpinLock, SpinLockGuard};
