//! The buddy heap.
//!
//! Free memory is kept per node and per zone as lists of naturally aligned
//! blocks of `2^order` frames, `order` in `0..=MAX_ORDER`. Only the head
//! frame of a free block is linked into a list and carries the block order.
//!
//! ```text
//!  node ─┬─ zone 0 (hypervisor) ─┬─ order 0:  [head] ⇄ [head] ⇄ …
//!        │                       ├─ order 1:  …
//!        │                       └─ order MAX_ORDER
//!        ├─ zone 1 …
//!        └─ zone NR_ZONES-1 …
//! ```
//!
//! ### Invariants (with the heap lock held)
//! - A frame is free in the bitmap iff it lies inside exactly one listed block.
//! - `avail[zone]` equals the frames held in that zone's lists.
//! - A listed block never spans two zones or two nodes.
//! - No two free buddies of the same order coexist; freeing always merges.

use alloc::boxed::Box;
use alloc::vec::Vec;

use kernel_frames::{CpuMask, Mfn, NodeId, NodeMask, order_pages};
use log::{debug, trace, warn};

use crate::config::{MAX_NUMNODES, MAX_ORDER, NR_ZONES};
use crate::error::AllocError;
use crate::list::{LinkArena, PageList};
use crate::platform::Platform;
use crate::zone::clamp_zone;
use crate::PageAllocator;

const ORDERS: usize = MAX_ORDER as usize + 1;

pub(crate) struct NodeHeap {
    free: [[PageList; ORDERS]; NR_ZONES],
    avail: [u64; NR_ZONES],
}

impl NodeHeap {
    fn new() -> Box<Self> {
        Box::new(Self {
            free: [[PageList::EMPTY; ORDERS]; NR_ZONES],
            avail: [0; NR_ZONES],
        })
    }

    /// Lowest order `>= order` with a block in `zone`.
    fn first_order_at_least(&self, zone: usize, order: u32) -> Option<u32> {
        (order..=MAX_ORDER).find(|&j| !self.free[zone][j as usize].is_empty())
    }
}

/// Everything guarded by the heap lock.
pub(crate) struct HeapState {
    links: LinkArena,
    nodes: Vec<Option<Box<NodeHeap>>>,
    offlined: PageList,
    broken: PageList,
}

impl HeapState {
    pub(crate) fn new(frames: u64) -> Self {
        Self {
            links: LinkArena::new(frames),
            nodes: (0..MAX_NUMNODES).map(|_| None).collect(),
            offlined: PageList::EMPTY,
            broken: PageList::EMPTY,
        }
    }

    /// Create the heap of `node` if it does not exist yet.
    pub(crate) fn ensure_node(&mut self, node: NodeId) -> bool {
        let slot = &mut self.nodes[node.index()];
        if slot.is_some() {
            return false;
        }
        *slot = Some(NodeHeap::new());
        true
    }

    pub(crate) fn present_nodes(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, heap)| heap.is_some())
            .filter_map(|(i, _)| u8::try_from(i).ok().map(NodeId::new))
            .collect()
    }

    fn node(&self, node: NodeId) -> Option<&NodeHeap> {
        self.nodes.get(node.index()).and_then(|n| n.as_deref())
    }

    fn node_mut(&mut self, node: NodeId) -> &mut NodeHeap {
        match self.nodes.get_mut(node.index()).and_then(|n| n.as_deref_mut()) {
            Some(heap) => heap,
            None => panic!("node {node} has no heap"),
        }
    }

    /// Order of the free block headed by `mfn`, if it heads one.
    pub(crate) fn free_order(&self, mfn: Mfn) -> Option<u32> {
        self.links
            .get(mfn)
            .and_then(|l| l.order)
            .map(u32::from)
    }

    pub(crate) fn avail(&self, node: NodeId, zone: usize) -> u64 {
        self.node(node).map_or(0, |h| h.avail[zone])
    }

    /// Free frames in zones `lo..=hi` of `node`, or of every present node.
    pub(crate) fn avail_range(&self, node: Option<NodeId>, lo: usize, hi: usize) -> u64 {
        let hi = clamp_zone(hi);
        let sum = |n: NodeId| (lo..=hi).map(|z| self.avail(n, z)).sum::<u64>();
        match node {
            Some(n) => sum(n),
            None => self.present_nodes().into_iter().map(sum).sum(),
        }
    }

    fn adjust_avail(&mut self, node: NodeId, zone: usize, add: u64, sub: u64) {
        let avail = &mut self.node_mut(node).avail[zone];
        *avail = avail
            .checked_add(add)
            .and_then(|a| a.checked_sub(sub))
            .unwrap_or_else(|| panic!("avail counter of node {node} zone {zone} out of range"));
    }

    #[allow(clippy::cast_possible_truncation)]
    fn insert_free(&mut self, node: NodeId, zone: usize, mfn: Mfn, order: u32) {
        debug_assert!(mfn.is_aligned(order));
        let Self { links, nodes, .. } = self;
        links.at(mfn).order = Some(order as u8);
        let Some(heap) = nodes[node.index()].as_deref_mut() else {
            panic!("node {node} has no heap");
        };
        heap.free[zone][order as usize].push_tail(links, mfn);
    }

    fn remove_free(&mut self, node: NodeId, zone: usize, mfn: Mfn, order: u32) {
        let Self { links, nodes, .. } = self;
        let Some(heap) = nodes[node.index()].as_deref_mut() else {
            panic!("node {node} has no heap");
        };
        heap.free[zone][order as usize].unlink(links, mfn);
        links.at(mfn).order = None;
    }

    fn pop_free(&mut self, node: NodeId, zone: usize, order: u32) -> Option<Mfn> {
        let Self { links, nodes, .. } = self;
        let heap = nodes[node.index()].as_deref_mut()?;
        let mfn = heap.free[zone][order as usize].pop_head(links)?;
        links.at(mfn).order = None;
        Some(mfn)
    }

    /// Park a withheld frame on the offlined or broken list.
    pub(crate) fn park(&mut self, mfn: Mfn, broken: bool) {
        let list = if broken { &mut self.broken } else { &mut self.offlined };
        list.push_tail(&mut self.links, mfn);
    }

    pub(crate) fn unpark(&mut self, mfn: Mfn, broken: bool) {
        let list = if broken { &mut self.broken } else { &mut self.offlined };
        list.unlink(&mut self.links, mfn);
    }

    pub(crate) fn parked(&self, broken: bool) -> Vec<Mfn> {
        let list = if broken { &self.broken } else { &self.offlined };
        list.iter(&self.links).collect()
    }

    fn blocks(&self, node: NodeId, zone: usize) -> Vec<(Mfn, u32)> {
        let Some(heap) = self.node(node) else {
            return Vec::new();
        };
        (0..=MAX_ORDER)
            .flat_map(|order| {
                heap.free[zone][order as usize]
                    .iter(&self.links)
                    .map(move |mfn| (mfn, order))
            })
            .collect()
    }

    fn listed_frames(&self, node: NodeId, zone: usize) -> u64 {
        self.node(node).map_or(0, |heap| {
            (0..=MAX_ORDER)
                .map(|order| heap.free[zone][order as usize].len() * order_pages(order))
                .sum()
        })
    }
}

impl<P: Platform> PageAllocator<P> {
    /// Allocate a block of `2^order` frames from zones `zone_lo..=zone_hi`.
    ///
    /// The preferred node (or the calling CPU's node) is searched first, highest
    /// zone first; the remaining online nodes follow in ring order. A larger
    /// block is split when no block of the exact order is free, and the unused
    /// upper halves go back to the free lists.
    ///
    /// # Errors
    /// - [`AllocError::OrderTooLarge`] for `order > MAX_ORDER`.
    /// - [`AllocError::BadZoneRange`] for an empty or out of bounds zone range.
    /// - [`AllocError::Exhausted`] when no node can satisfy the request.
    pub fn allocate_block(
        &self,
        zone_lo: usize,
        zone_hi: usize,
        node: Option<NodeId>,
        order: u32,
    ) -> Result<Mfn, AllocError> {
        if order > MAX_ORDER {
            return Err(AllocError::OrderTooLarge(order));
        }
        if zone_lo > zone_hi || zone_hi >= NR_ZONES {
            return Err(AllocError::BadZoneRange {
                lo: zone_lo,
                hi: zone_hi,
            });
        }

        let request = order_pages(order);
        let online = self.platform.online_nodes();
        let start = node.unwrap_or_else(|| self.platform.current_node());

        let mut guard = self.heap.lock();
        let heap = &mut *guard;

        let Some((node, zone, found)) = Self::find_block(heap, online, start, zone_lo, zone_hi, order, request)
        else {
            drop(guard);
            trace!("no order {order} block in zones {zone_lo}..={zone_hi}");
            return Err(AllocError::Exhausted {
                order,
                lo: zone_lo,
                hi: zone_hi,
            });
        };

        let Some(head) = heap.pop_free(node, zone, found) else {
            panic!("free list of node {node} zone {zone} order {found} emptied under the lock");
        };

        // Keep the lower half, return the upper halves.
        let mut split = found;
        while split > order {
            split -= 1;
            heap.insert_free(node, zone, head + order_pages(split), split);
        }

        self.bitmap.mark_allocated(head, request);
        heap.adjust_avail(node, zone, 0, request);
        drop(guard);

        self.flush_stale_mappings(head, request);
        Ok(head)
    }

    fn find_block(
        heap: &HeapState,
        online: NodeMask,
        start: NodeId,
        zone_lo: usize,
        zone_hi: usize,
        order: u32,
        request: u64,
    ) -> Option<(NodeId, usize, u32)> {
        let mut node = start;
        for _ in 0..online.weight().max(1) {
            if let Some(nh) = heap.node(node) {
                for zone in (zone_lo..=zone_hi).rev() {
                    if nh.avail[zone] < request {
                        continue;
                    }
                    if let Some(found) = nh.first_order_at_least(zone, order) {
                        return Some((node, zone, found));
                    }
                }
            }
            node = online.next_ring(node)?;
        }
        None
    }

    /// Shoot down TLB entries that may still map the frames of a fresh block.
    fn flush_stale_mappings(&self, head: Mfn, count: u64) {
        let online = self.platform.online_cpus();
        let mut mask = CpuMask::empty();
        for (mfn, page) in self.frames.range(head, count) {
            let c = page.count();
            assert!(
                c.refs() == 0 && !c.allocated(),
                "{mfn} handed out while still referenced: {c:?}"
            );
            if let Some(stamp) = page.tlbflush_stamp() {
                let extra = online.and_not(mask);
                mask |= self.platform.filter(extra, stamp);
                page.set_tlbflush(None);
            }
            page.set_owner(None);
        }
        if !mask.is_empty() {
            trace!("flushing {mask:?} before reuse of {head}+{count}");
            self.platform.flush(mask);
        }
    }

    /// Return a block of `2^order` frames headed by `head` to the heap.
    ///
    /// The block is merged with its free buddy as long as one exists in the
    /// same zone. Frames whose offline was pending are withheld afterwards.
    ///
    /// # Panics
    /// If the block is misaligned, lies outside the frame table, or contains
    /// a frame that is already free or offlined.
    pub fn free_block(&self, head: Mfn, order: u32) {
        assert!(order <= MAX_ORDER, "order {order} too large");
        assert!(head.is_aligned(order), "{head} is not aligned to order {order}");
        let count = order_pages(order);
        assert!(
            self.frames.contains(head + (count - 1)),
            "{head}+{count} lies beyond the frame table"
        );

        let node = self.platform.frame_to_node(head);
        let zone = self.zone_of(head);

        let mut guard = self.heap.lock();
        let heap = &mut *guard;

        let mut tainted = false;
        for (mfn, page) in self.frames.range(head, count) {
            let (old, _) = page.update_count(|c| {
                assert!(!c.offlined(), "{mfn} freed while offlined");
                let mut next = c.sticky();
                if next.offlining() {
                    next = next.with_offlining(false).with_offlined(true);
                }
                Some(next)
            });
            tainted |= old.offlining();
            let stamp = page.owner().map(|_| self.platform.current_time());
            page.set_tlbflush(stamp);
        }

        self.bitmap.mark_free(head, count);
        heap.adjust_avail(node, zone, count, 0);

        let mut head = head;
        let mut order = order;
        while order < MAX_ORDER {
            let buddy = head.buddy(order);
            if self.bitmap.is_allocated(buddy)
                || heap.free_order(buddy) != Some(order)
                || self.zone_of(buddy) != zone
            {
                break;
            }
            let buddy_node = self.platform.frame_to_node(buddy);
            assert_eq!(buddy_node, node, "free buddy {buddy} of {head} lives on another node");
            heap.remove_free(node, zone, buddy, order);
            head = head.align_down(order + 1);
            order += 1;
        }
        heap.insert_free(node, zone, head, order);

        let withheld = if tainted {
            self.withhold_offlined(heap, node, zone, head, order)
        } else {
            0
        };
        drop(guard);

        if withheld > 0 {
            debug!("withheld {withheld} offlined frame(s) from {head}+{}", order_pages(order));
        }
    }

    /// Break up the free block `head`/`order`, withholding its offlined
    /// frames and relisting the rest as maximal aligned blocks.
    pub(crate) fn withhold_offlined(
        &self,
        heap: &mut HeapState,
        node: NodeId,
        zone: usize,
        head: Mfn,
        order: u32,
    ) -> u64 {
        debug_assert!(self.heap.is_locked(), "heap lock not held");
        heap.remove_free(node, zone, head, order);
        let end = head + order_pages(order);
        let clean = |from: Mfn, n: u64| {
            self.frames
                .range(from, n)
                .all(|(_, page)| !page.count().offlined())
        };

        let mut withheld = 0;
        let mut cur = head;
        while cur < end {
            let c = self.frames.page(cur).count();
            if c.offlined() {
                heap.adjust_avail(node, zone, 0, 1);
                self.bitmap.mark_allocated(cur, 1);
                heap.park(cur, c.broken());
                withheld += 1;
                cur += 1;
                continue;
            }

            let mut k = 0;
            while k < order
                && cur.is_aligned(k + 1)
                && cur + order_pages(k + 1) <= end
                && clean(cur, order_pages(k + 1))
            {
                k += 1;
            }
            heap.insert_free(node, zone, cur, k);
            cur += order_pages(k);
        }
        withheld
    }

    /// Give `[first, first + count)` to the heap one frame at a time.
    ///
    /// Node heaps are created on first use. A frame that starts a new node
    /// without being `MAX_ORDER` aligned is kept back so that no buddy block
    /// can ever cover two nodes. The frames must be allocated in the bitmap.
    pub(crate) fn init_heap_pages(&self, first: Mfn, count: u64) {
        let mut prev = (first.as_u64() > 0).then(|| self.platform.frame_to_node(first - 1));

        for (mfn, page) in self.frames.range(first, count) {
            let node = self.platform.frame_to_node(mfn);
            if self.heap.with_lock(|h| h.ensure_node(node)) {
                debug!("node {node}: heap created");
            }
            page.set_ram();

            if prev == Some(node) || mfn.is_aligned(MAX_ORDER) {
                self.free_block(mfn, 0);
            } else {
                warn!("Reserving non-aligned node boundary @ {mfn}");
            }
            prev = Some(node);
        }
    }

    /// Free frames in zones `zone_lo..=zone_hi` of `node`, or of every node.
    ///
    /// `zone_hi` is clamped into the zone table.
    pub fn available_pages(&self, node: Option<NodeId>, zone_lo: usize, zone_hi: usize) -> u64 {
        self.heap
            .with_lock(|h| h.avail_range(node, zone_lo, zone_hi))
    }

    /// Free blocks of `node`/`zone` as `(head, order)`, lowest order first.
    pub fn free_blocks(&self, node: NodeId, zone: usize) -> Vec<(Mfn, u32)> {
        self.heap.with_lock(|h| h.blocks(node, zone))
    }

    /// Frames withheld after going offline, excluding broken ones.
    pub fn offlined_frames(&self) -> Vec<Mfn> {
        self.heap.with_lock(|h| h.parked(false))
    }

    /// Frames withheld as broken.
    pub fn broken_frames(&self) -> Vec<Mfn> {
        self.heap.with_lock(|h| h.parked(true))
    }

    /// Cross-check the heap against the bitmap and the counters.
    ///
    /// # Panics
    /// On the first inconsistency found.
    pub fn check_heap(&self) {
        let heap = self.heap.lock();
        let mut listed = 0u64;
        for node in heap.present_nodes() {
            for zone in 0..NR_ZONES {
                assert_eq!(
                    heap.avail(node, zone),
                    heap.listed_frames(node, zone),
                    "avail of node {node} zone {zone} disagrees with its lists"
                );
                for (head, order) in heap.blocks(node, zone) {
                    assert!(head.is_aligned(order), "{head} misaligned for order {order}");
                    for (mfn, _) in self.frames.range(head, order_pages(order)) {
                        assert!(!self.bitmap.is_allocated(mfn), "{mfn} listed but allocated");
                        assert_eq!(self.zone_of(mfn), zone, "{mfn} listed in the wrong zone");
                        assert_eq!(self.platform.frame_to_node(mfn), node, "{mfn} listed on the wrong node");
                    }
                    if order < MAX_ORDER {
                        let buddy = head.buddy(order);
                        assert!(
                            self.bitmap.is_allocated(buddy)
                                || heap.free_order(buddy) != Some(order)
                                || self.zone_of(buddy) != zone,
                            "{head} and {buddy} should have merged at order {order}"
                        );
                    }
                    listed += order_pages(order);
                }
            }
        }
        let free = self
            .bitmap
            .free_runs(Mfn::new(0), Mfn::new(self.max_page()))
            .map(|(_, n)| n)
            .sum::<u64>();
        assert_eq!(free, listed, "bitmap and free lists disagree");
    }
}
