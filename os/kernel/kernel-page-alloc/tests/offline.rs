mod common;

use common::*;
use kernel_frames::{Mfn, NodeId};
use kernel_page_alloc::{FrameError, MemFlags, NR_ZONES, OwnerId, PageStatus};

const TOP: usize = NR_ZONES - 1;

fn offlined() -> PageStatus {
    PageStatus::new().with_offlined(true)
}

#[test]
fn offlining_owned_page_completes_when_owner_frees_it() {
    let alloc = boot(0x400..0x800);
    let owner = TestOwner::new(7, 64);
    alloc.platform().register(&owner);

    let mfn = alloc
        .alloc_domheap_pages(Some(&*owner), 0, MemFlags::new())
        .unwrap();
    let status = alloc.mark_offline(mfn, false).unwrap();
    assert!(status.owned() && status.pending());
    assert!(!status.offlined());
    assert_eq!(status.owner(), Some(OwnerId::new(7)));
    assert_eq!(
        alloc.query_status(mfn).unwrap(),
        PageStatus::new().with_pending(true)
    );

    let before = total_free(&alloc);
    alloc.free_domheap_pages(mfn, 0);

    assert_eq!(total_free(&alloc), before, "withheld frame counted as free");
    assert_eq!(alloc.offlined_frames(), vec![mfn]);
    assert!(alloc.bitmap().is_allocated(mfn));
    assert!(
        alloc
            .free_blocks(NodeId::new(0), 10)
            .iter()
            .all(|&(head, order)| !(head.as_u64()..head.as_u64() + (1 << order)).contains(&mfn.as_u64()))
    );
    assert_eq!(alloc.query_status(mfn).unwrap(), offlined());
    alloc.check_heap();
}

#[test]
fn free_page_is_withheld_immediately_and_onlining_merges_it_back() {
    let alloc = boot(0x400..0x800);
    let victim = Mfn::new(0x455);

    assert_eq!(alloc.mark_offline(victim, false).unwrap(), offlined());
    assert_eq!(total_free(&alloc), 1023);
    assert_eq!(alloc.offlined_frames(), vec![victim]);
    alloc.check_heap();

    // The rest of the former order-10 block is still usable.
    let blocks = alloc.free_blocks(NodeId::new(0), 10);
    assert!(blocks.contains(&(Mfn::new(0x454), 0)));
    assert!(blocks.contains(&(Mfn::new(0x600), 9)));

    assert_eq!(
        alloc.mark_online(victim).unwrap(),
        PageStatus::new().with_onlined(true)
    );
    assert_eq!(total_free(&alloc), 1024);
    assert!(alloc.offlined_frames().is_empty());
    assert_eq!(alloc.free_blocks(NodeId::new(0), 10), vec![(Mfn::new(0x400), 10)]);
    assert_eq!(alloc.query_status(victim).unwrap(), PageStatus::new());
}

#[test]
fn repeated_broken_offline_is_a_no_op() {
    let alloc = boot(0x400..0x800);
    let victim = Mfn::new(0x7ff);
    let expected = offlined().with_broken(true);

    assert_eq!(alloc.mark_offline(victim, true).unwrap(), expected);
    let free = total_free(&alloc);
    let blocks = alloc.free_blocks(NodeId::new(0), 10);

    assert_eq!(alloc.mark_offline(victim, true).unwrap(), expected);
    assert_eq!(total_free(&alloc), free);
    assert_eq!(alloc.free_blocks(NodeId::new(0), 10), blocks);
    assert_eq!(alloc.broken_frames(), vec![victim]);
    assert_eq!(alloc.query_status(victim).unwrap(), expected);
}

#[test]
fn broken_frames_never_come_back() {
    let alloc = boot(0x400..0x800);
    let victim = Mfn::new(0x500);
    alloc.mark_offline(victim, false).unwrap();
    assert_eq!(alloc.offlined_frames(), vec![victim]);

    // Escalating to broken moves the frame to the broken list.
    alloc.mark_offline(victim, true).unwrap();
    assert!(alloc.offlined_frames().is_empty());
    assert_eq!(alloc.broken_frames(), vec![victim]);

    assert_eq!(
        alloc.mark_online(victim).unwrap(),
        PageStatus::new().with_failed(true).with_broken(true)
    );
    assert_eq!(total_free(&alloc), 1023);
    alloc.check_heap();
}

#[test]
fn offline_then_online_restores_allocated_page() {
    let alloc = boot(0x400..0x800);
    let mfn = alloc.allocate_block(1, TOP, None, 0).unwrap();
    assert_eq!(alloc.query_status(mfn).unwrap(), PageStatus::new());

    let status = alloc.mark_offline(mfn, false).unwrap();
    assert!(status.anonymous() && status.failed());
    assert_eq!(status.owner(), Some(OwnerId::INVALID));

    assert_eq!(
        alloc.mark_online(mfn).unwrap(),
        PageStatus::new().with_onlined(true)
    );
    assert_eq!(alloc.query_status(mfn).unwrap(), PageStatus::new());
    assert!(alloc.bitmap().is_allocated(mfn));

    alloc.free_block(mfn, 0);
    assert!(alloc.offlined_frames().is_empty());
    assert_eq!(total_free(&alloc), 1024);
}

#[test]
fn withholding_splits_block_into_aligned_runs() {
    let alloc = boot(0x400..0x800);
    let mfn = alloc.allocate_block(10, 10, None, 3).unwrap();
    assert_eq!(mfn, Mfn::new(0x400));

    alloc.mark_offline(mfn + 2, false).unwrap();
    alloc.mark_offline(mfn + 5, true).unwrap();
    alloc.free_block(mfn, 3);

    let mut small: Vec<_> = alloc
        .free_blocks(NodeId::new(0), 10)
        .into_iter()
        .filter(|&(head, _)| head.as_u64() < 0x408)
        .collect();
    small.sort();
    assert_eq!(
        small,
        vec![
            (Mfn::new(0x400), 1),
            (Mfn::new(0x403), 0),
            (Mfn::new(0x404), 0),
            (Mfn::new(0x406), 1),
        ]
    );
    assert_eq!(alloc.offlined_frames(), vec![mfn + 2]);
    assert_eq!(alloc.broken_frames(), vec![mfn + 5]);
    assert_eq!(total_free(&alloc), 1022);
    alloc.check_heap();
}

#[test]
fn non_ram_and_out_of_range_frames() {
    let alloc = boot(0x400..0x800);
    assert_eq!(
        alloc.mark_offline(Mfn::new(0x800), false).unwrap(),
        PageStatus::new().with_failed(true).with_not_ram(true)
    );
    assert_eq!(
        alloc.mark_offline(Mfn::new(0x900), false),
        Err(FrameError::OutOfRange(Mfn::new(0x900)))
    );
    assert_eq!(
        alloc.mark_online(Mfn::new(0x900)),
        Err(FrameError::OutOfRange(Mfn::new(0x900)))
    );
    assert!(alloc.query_status(Mfn::new(0x900)).is_err());
}

#[test]
fn online_of_healthy_frame_reports_nothing() {
    let alloc = boot(0x400..0x800);
    assert_eq!(alloc.mark_online(Mfn::new(0x400)).unwrap(), PageStatus::new());
    assert_eq!(total_free(&alloc), 1024);
}
