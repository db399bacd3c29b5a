mod common;

use std::collections::BTreeSet;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use common::*;
use kernel_frames::Mfn;
use kernel_page_alloc::{
    BootAllocator, HeapConfig, MemFlags, NR_ZONES, SCRUB_BATCH, SCRUB_BUDGET, SCRUB_INTERVAL,
    SCRUB_RETRY, ScrubPass,
};

const TOP: usize = NR_ZONES - 1;

/// Allocate `2^order` frames for a fresh owner, kill it and free them.
fn release_dying(alloc: &kernel_page_alloc::PageAllocator<TestMachine>, order: u32) -> Vec<Mfn> {
    let owner = TestOwner::new(42, 1 << order);
    alloc.platform().register(&owner);
    let mfn = alloc
        .alloc_domheap_pages(Some(&*owner), order, MemFlags::new())
        .unwrap();
    let frames = owner.held();
    owner.kill();
    alloc.free_domheap_pages(mfn, order);
    assert_eq!(owner.tot_pages(), 0);
    assert_eq!(owner.refs(), 0);
    frames
}

#[test]
fn dying_owner_pages_are_scrubbed_before_reuse() {
    let alloc = boot(0x400..0x800);
    let dirty = release_dying(&alloc, 2);

    assert_eq!(alloc.avail_scrub_pages(), 4);
    assert_eq!(alloc.scrub_queue(), dirty);
    assert_eq!(total_free(&alloc), 1020);
    for &mfn in &dirty {
        assert!(alloc.bitmap().is_allocated(mfn));
        assert!(alloc.frames().page(mfn).owner().is_none());
    }

    // Drain the heap: queued frames are never handed out.
    let mut taken = Vec::new();
    while let Ok(mfn) = alloc.allocate_block(1, TOP, None, 0) {
        assert!(!dirty.contains(&mfn), "{mfn:?} reused before scrubbing");
        taken.push(mfn);
    }
    assert_eq!(taken.len(), 1020);

    assert_eq!(alloc.scrub_pass(), ScrubPass::Drained { scrubbed: 4 });
    assert_eq!(alloc.platform().scrubbed(), dirty);
    assert!(alloc.platform().rearms().is_empty());
    assert_eq!(alloc.avail_scrub_pages(), 0);
    assert_eq!(total_free(&alloc), 4);

    for mfn in taken {
        alloc.free_block(mfn, 0);
    }
    assert_eq!(alloc.free_blocks(kernel_frames::NodeId::new(0), 10), vec![(Mfn::new(0x400), 10)]);
    alloc.check_heap();
}

#[test]
fn pass_yields_when_budget_is_spent() {
    let alloc = boot(0x400..0x800);
    release_dying(&alloc, 5);
    alloc.platform().set_tick(SCRUB_BUDGET);

    let batch = SCRUB_BATCH as u64;
    assert_eq!(alloc.scrub_pass(), ScrubPass::Yielded { scrubbed: batch });
    assert_eq!(alloc.avail_scrub_pages(), 32 - batch);
    assert_eq!(alloc.platform().rearms(), vec![SCRUB_INTERVAL]);

    assert_eq!(alloc.scrub_pass(), ScrubPass::Yielded { scrubbed: batch });
    assert_eq!(alloc.scrub_pass(), ScrubPass::Drained { scrubbed: 0 });
    assert_eq!(alloc.platform().rearms(), vec![SCRUB_INTERVAL, SCRUB_INTERVAL]);
    assert_eq!(total_free(&alloc), 1024);
    alloc.check_heap();
}

#[test]
fn unhurried_pass_empties_the_queue() {
    let alloc = boot(0x400..0x800);
    release_dying(&alloc, 6);
    alloc.platform().set_tick(Duration::from_micros(10));

    assert_eq!(alloc.scrub_pass(), ScrubPass::Drained { scrubbed: 64 });
    let unique: BTreeSet<_> = alloc.platform().scrubbed().into_iter().collect();
    assert_eq!(unique.len(), 64);
    assert_eq!(total_free(&alloc), 1024);
}

#[test]
fn concurrent_pass_backs_off() {
    let alloc = Arc::new(boot(0x400..0x800));
    release_dying(&alloc, 1);

    let entered = Arc::new(Barrier::new(2));
    let release = Arc::new(Barrier::new(2));
    alloc
        .platform()
        .gate_next_scrub(Arc::clone(&entered), Arc::clone(&release));

    let worker = {
        let alloc = Arc::clone(&alloc);
        thread::spawn(move || alloc.scrub_pass())
    };

    entered.wait();
    assert_eq!(alloc.scrub_pass(), ScrubPass::Busy);
    assert_eq!(alloc.platform().rearms(), vec![SCRUB_RETRY]);
    release.wait();

    assert_eq!(worker.join().unwrap(), ScrubPass::Drained { scrubbed: 2 });
    assert_eq!(total_free(&alloc), 1024);
}

#[test]
fn empty_queue_drains_immediately() {
    let alloc = boot(0x400..0x800);
    assert_eq!(alloc.scrub_pass(), ScrubPass::Drained { scrubbed: 0 });
    assert!(alloc.platform().scrubbed().is_empty());
    assert!(alloc.platform().rearms().is_empty());
}

#[test]
fn boot_scrub_touches_only_free_frames() {
    let mut boot = BootAllocator::new(0x801, HeapConfig::new());
    boot.register_range(addr(0x400), addr(0x800));
    let reserved = boot.reserve(0x10, 0x10).unwrap();
    assert_eq!(reserved, Mfn::new(0x7f0));

    let alloc = boot.finish(TestMachine::single_node());
    let scrubbed = alloc.platform().scrubbed();
    assert_eq!(scrubbed.len(), 0x3f0);
    assert_eq!(scrubbed.first(), Some(&Mfn::new(0x400)));
    assert_eq!(scrubbed.last(), Some(&Mfn::new(0x7ef)));
    assert_eq!(total_free(&alloc), 0x3f0);
}

#[test]
fn boot_scrub_can_be_turned_off() {
    let alloc = boot(0x400..0x800);
    assert!(alloc.platform().scrubbed().is_empty());
    assert_eq!(alloc.scrub_free_pages(), 1024);
    assert_eq!(alloc.platform().scrubbed().len(), 1024);
}
