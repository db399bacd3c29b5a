use kernel_frames::{CpuId, CpuMask, Mfn, NodeId, NodeMask, PhysicalAddress, fls};

#[test]
fn address_frame_conversions() {
    let pa = PhysicalAddress::new(0x0010_0000);
    assert!(pa.is_page_aligned());
    assert_eq!(pa.frame_down(), Mfn::new(0x100));
    assert_eq!(pa.frame_up(), Mfn::new(0x100));

    let odd = PhysicalAddress::new(0x0010_0010);
    assert_eq!(odd.frame_down(), Mfn::new(0x100));
    assert_eq!(odd.frame_up(), Mfn::new(0x101));
    assert_eq!(PhysicalAddress::from(Mfn::new(0x101)), PhysicalAddress::new(0x0010_1000));
}

#[test]
fn buddy_is_symmetric_for_every_order() {
    for order in 0..12 {
        let head = Mfn::new(0x10_0000);
        let buddy = head.buddy(order);
        assert_eq!(buddy.buddy(order), head);
        assert_eq!(buddy - head, 1 << order);
        assert_eq!(head.align_down(order + 1), buddy.align_down(order + 1));
    }
}

#[test]
fn width_matches_fls() {
    assert_eq!(Mfn::new(0).width(), 0);
    assert_eq!(Mfn::new(1).width(), 1);
    assert_eq!(Mfn::new(0x7ff).width(), 11);
    assert_eq!(Mfn::new(0x800).width(), 12);
    assert_eq!(fls(u64::MAX), 64);
}

#[test]
fn node_ring_visits_every_online_node_once() {
    let online = NodeMask::empty()
        .with(NodeId::new(1))
        .with(NodeId::new(3))
        .with(NodeId::new(63));

    let mut node = NodeId::new(3);
    let mut seen = Vec::new();
    for _ in 0..online.weight() {
        seen.push(node);
        node = online.next_ring(node).unwrap();
    }
    assert_eq!(seen, vec![NodeId::new(3), NodeId::new(63), NodeId::new(1)]);
    assert_eq!(node, NodeId::new(3));
    assert_eq!(online.iter().count(), 3);
    assert_eq!(NodeMask::empty().next_ring(NodeId::new(0)), None);
}

#[test]
fn cpu_mask_union() {
    let mut mask = CpuMask::empty();
    assert!(mask.is_empty());
    mask |= CpuMask::empty().with(CpuId::new(2));
    mask = mask | CpuMask::from_bits(0b1);
    assert!(mask.contains(CpuId::new(2)));
    assert!(mask.contains(CpuId::new(0)));
    assert_eq!(mask.and(CpuMask::from_bits(0b100)).bits(), 0b100);
}
