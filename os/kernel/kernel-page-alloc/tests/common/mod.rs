#![allow(dead_code)]

use std::collections::HashMap;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::time::Duration;

use kernel_frames::{CpuMask, Mfn, NodeId, NodeMask, PhysicalAddress};
use kernel_page_alloc::{
    BootAllocator, FrameMemory, HeapConfig, NumaTopology, Owner, OwnerId, OwnerPages,
    OwnerRegistry, PageAllocator, ScrubTimer, TlbControl,
};
use kernel_sync::SpinLock;

pub struct TestOwner {
    id: OwnerId,
    dying: AtomicBool,
    refs: AtomicUsize,
    pages: SpinLock<OwnerPages>,
    node: Option<NodeId>,
}

impl TestOwner {
    pub fn new(id: u16, max_pages: u64) -> Arc<Self> {
        Arc::new(Self {
            id: OwnerId::new(id),
            dying: AtomicBool::new(false),
            refs: AtomicUsize::new(0),
            pages: SpinLock::new(OwnerPages::with_limit(max_pages)),
            node: None,
        })
    }

    pub fn on_node(id: u16, max_pages: u64, node: u8) -> Arc<Self> {
        Arc::new(Self {
            id: OwnerId::new(id),
            dying: AtomicBool::new(false),
            refs: AtomicUsize::new(0),
            pages: SpinLock::new(OwnerPages::with_limit(max_pages)),
            node: Some(NodeId::new(node)),
        })
    }

    pub fn kill(&self) {
        self.dying.store(true, Ordering::SeqCst);
    }

    pub fn refs(&self) -> usize {
        self.refs.load(Ordering::SeqCst)
    }

    pub fn tot_pages(&self) -> u64 {
        self.pages.with_lock(|p| p.tot_pages)
    }

    pub fn held(&self) -> Vec<Mfn> {
        self.pages.with_lock(|p| p.frames().collect())
    }
}

impl Owner for TestOwner {
    fn id(&self) -> OwnerId {
        self.id
    }

    fn is_dying(&self) -> bool {
        self.dying.load(Ordering::SeqCst)
    }

    fn get(&self) {
        self.refs.fetch_add(1, Ordering::SeqCst);
    }

    fn put(&self) {
        let prev = self.refs.fetch_sub(1, Ordering::SeqCst);
        assert!(prev > 0, "owner reference underflow");
    }

    fn pages(&self) -> &SpinLock<OwnerPages> {
        &self.pages
    }

    fn node_affinity(&self) -> Option<NodeId> {
        self.node
    }
}

/// A fake machine: frame ranges per node, a TLB clock, a scrub log and a
/// manual clock for the scrubber.
pub struct TestMachine {
    nodes: Vec<(Range<u64>, NodeId)>,
    current: NodeId,
    cpus: CpuMask,
    tlb_clock: AtomicU32,
    last_flush: AtomicU32,
    flushes: Mutex<Vec<CpuMask>>,
    scrubbed: Mutex<Vec<Mfn>>,
    owners: Mutex<HashMap<OwnerId, Arc<TestOwner>>>,
    clock_ns: AtomicU64,
    tick_ns: AtomicU64,
    rearms: Mutex<Vec<Duration>>,
    scrub_gate: Mutex<Option<(Arc<Barrier>, Arc<Barrier>)>>,
}

impl TestMachine {
    /// Every frame on node 0.
    pub fn single_node() -> Self {
        Self::with_nodes(&[])
    }

    /// Frames in each range belong to the given node; all others to node 0.
    pub fn with_nodes(nodes: &[(Range<u64>, u8)]) -> Self {
        Self {
            nodes: nodes
                .iter()
                .map(|(r, n)| (r.clone(), NodeId::new(*n)))
                .collect(),
            current: NodeId::new(0),
            cpus: CpuMask::from_bits(0b1111),
            tlb_clock: AtomicU32::new(1),
            last_flush: AtomicU32::new(0),
            flushes: Mutex::new(Vec::new()),
            scrubbed: Mutex::new(Vec::new()),
            owners: Mutex::new(HashMap::new()),
            clock_ns: AtomicU64::new(0),
            tick_ns: AtomicU64::new(0),
            rearms: Mutex::new(Vec::new()),
            scrub_gate: Mutex::new(None),
        }
    }

    pub fn register(&self, owner: &Arc<TestOwner>) {
        self.owners
            .lock()
            .unwrap()
            .insert(owner.id(), Arc::clone(owner));
    }

    /// Advance the scrubber clock by `tick` on every reading.
    pub fn set_tick(&self, tick: Duration) {
        self.tick_ns
            .store(u64::try_from(tick.as_nanos()).unwrap(), Ordering::SeqCst);
    }

    /// Make the next `scrub_page` wait on `entered`, then on `release`.
    pub fn gate_next_scrub(&self, entered: Arc<Barrier>, release: Arc<Barrier>) {
        *self.scrub_gate.lock().unwrap() = Some((entered, release));
    }

    pub fn scrubbed(&self) -> Vec<Mfn> {
        self.scrubbed.lock().unwrap().clone()
    }

    pub fn flushes(&self) -> Vec<CpuMask> {
        self.flushes.lock().unwrap().clone()
    }

    pub fn rearms(&self) -> Vec<Duration> {
        self.rearms.lock().unwrap().clone()
    }
}

impl NumaTopology for TestMachine {
    fn frame_to_node(&self, mfn: Mfn) -> NodeId {
        self.nodes
            .iter()
            .find(|(r, _)| r.contains(&mfn.as_u64()))
            .map_or(NodeId::new(0), |(_, n)| *n)
    }

    fn current_node(&self) -> NodeId {
        self.current
    }

    fn online_nodes(&self) -> NodeMask {
        self.nodes
            .iter()
            .fold(NodeMask::empty().with(NodeId::new(0)), |m, (_, n)| m.with(*n))
    }

    fn node_spanned_pages(&self, node: NodeId) -> u64 {
        self.nodes
            .iter()
            .filter(|(_, n)| *n == node)
            .map(|(r, _)| r.end - r.start)
            .sum()
    }
}

impl TlbControl for TestMachine {
    fn current_time(&self) -> u32 {
        self.tlb_clock.load(Ordering::SeqCst)
    }

    fn online_cpus(&self) -> CpuMask {
        self.cpus
    }

    fn filter(&self, mask: CpuMask, stamp: u32) -> CpuMask {
        if stamp < self.last_flush.load(Ordering::SeqCst) {
            CpuMask::empty()
        } else {
            mask
        }
    }

    fn flush(&self, mask: CpuMask) {
        let now = self.tlb_clock.fetch_add(1, Ordering::SeqCst) + 1;
        self.last_flush.store(now, Ordering::SeqCst);
        self.flushes.lock().unwrap().push(mask);
    }
}

impl FrameMemory for TestMachine {
    fn scrub_page(&self, mfn: Mfn) {
        let gate = self.scrub_gate.lock().unwrap().take();
        if let Some((entered, release)) = gate {
            entered.wait();
            release.wait();
        }
        self.scrubbed.lock().unwrap().push(mfn);
    }
}

impl OwnerRegistry for TestMachine {
    fn lookup(&self, id: OwnerId) -> Option<Arc<dyn Owner>> {
        self.owners
            .lock()
            .unwrap()
            .get(&id)
            .map(|o| Arc::clone(o) as Arc<dyn Owner>)
    }
}

impl ScrubTimer for TestMachine {
    fn now(&self) -> Duration {
        let tick = self.tick_ns.load(Ordering::SeqCst);
        Duration::from_nanos(self.clock_ns.fetch_add(tick, Ordering::SeqCst))
    }

    fn rearm(&self, after: Duration) {
        self.rearms.lock().unwrap().push(after);
    }
}

pub fn addr(mfn: u64) -> PhysicalAddress {
    PhysicalAddress::from(Mfn::new(mfn))
}

/// Configuration without the boot scrub.
pub fn quiet() -> HeapConfig {
    HeapConfig::new().with_bootscrub(false)
}

/// Boot a heap over the given frame ranges.
pub fn boot_with(
    machine: TestMachine,
    max_page: u64,
    ram: &[Range<u64>],
    config: HeapConfig,
) -> PageAllocator<TestMachine> {
    let mut boot = BootAllocator::new(max_page, config);
    for r in ram {
        boot.register_range(addr(r.start), addr(r.end));
    }
    boot.finish(machine)
}

/// Single-node heap over `ram`, no boot scrub.
pub fn boot(ram: Range<u64>) -> PageAllocator<TestMachine> {
    boot_with(TestMachine::single_node(), ram.end + 1, &[ram], quiet())
}

pub fn total_free(alloc: &PageAllocator<TestMachine>) -> u64 {
    alloc.available_pages(None, 0, kernel_page_alloc::NR_ZONES - 1)
}
