use kernel_sync::SpinLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::{panic, thread};

#[test]
fn guard_releases_on_drop() {
    let l = SpinLock::new(0_u32);
    {
        let mut g = l.lock();
        *g = 41;
        assert!(l.is_locked());
    }
    assert!(!l.is_locked());
    l.with_lock(|v| *v += 1);
    assert_eq!(l.with_lock(|v| *v), 42);
}

#[test]
fn try_lock_fails_while_held() {
    let l = SpinLock::new(1u8);

    let g1 = l.try_lock();
    assert!(g1.is_some());
    assert!(l.try_lock().is_none());
    assert!(l.try_lock().map(|g| *g).is_none());

    drop(g1);
    assert_eq!(l.try_lock().map(|g| *g), Some(1));
}

#[test]
fn try_lock_backoff_pattern_skips_busy_work() {
    // One worker holds the serialization lock; everyone else must give up
    // immediately instead of waiting.
    let serialise = Arc::new(SpinLock::new(()));
    let skipped = Arc::new(AtomicUsize::new(0));
    let held = serialise.lock();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let serialise = Arc::clone(&serialise);
        let skipped = Arc::clone(&skipped);
        handles.push(thread::spawn(move || {
            if serialise.try_lock().is_none() {
                skipped.fetch_add(1, Ordering::SeqCst);
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }
    drop(held);

    assert_eq!(skipped.load(Ordering::SeqCst), 4);
    assert!(serialise.try_lock().is_some());
}

#[test]
fn contended_counters_stay_exact() {
    let threads = 8;
    let iters = 5_000;

    let lock = Arc::new(SpinLock::new(0usize));
    let in_cs = Arc::new(AtomicUsize::new(0));
    let start = Arc::new(Barrier::new(threads));

    let mut handles = Vec::with_capacity(threads);
    for _ in 0..threads {
        let lock = Arc::clone(&lock);
        let in_cs = Arc::clone(&in_cs);
        let start = Arc::clone(&start);
        handles.push(thread::spawn(move || {
            start.wait();
            for _ in 0..iters {
                lock.with_lock(|v| {
                    let prev = in_cs.fetch_add(1, Ordering::SeqCst);
                    assert_eq!(prev, 0, "mutual exclusion violated");
                    *v += 1;
                    in_cs.fetch_sub(1, Ordering::SeqCst);
                });
                thread::yield_now();
            }
        }));
    }

    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(lock.with_lock(|v| *v), threads * iters);
}

#[test]
fn lock_is_released_on_panic() {
    let l = SpinLock::new(0u32);

    let res = panic::catch_unwind(panic::AssertUnwindSafe(|| {
        l.with_lock(|v| {
            *v = 123;
            panic!("boom");
        });
    }));
    assert!(res.is_err(), "expected panic");
    assert_eq!(l.with_lock(|v| *v), 123);
}
