//! Process Control Block — the single external mutable-state parameter
//! threaded through every collector operation (§6, §9 "global mutable
//! state"). No process-wide singleton exists; tests construct a `Pcb`
//! directly.

use crate::config::GcConfig;
use crate::tag::TaggedPtr;
use parking_lot::{Mutex, RwLock};
use std::time::Duration;

/// Heap-layout fields: nursery bounds and the retired-page chain.
#[derive(Debug, Default)]
pub struct HeapFields {
    pub heap_base: usize,
    pub heap_size: usize,
    pub allocation_pointer: usize,
    pub allocation_redline: usize,
    /// Retired nursery blocks awaiting release, oldest first.
    pub heap_pages: Vec<usize>,
}

/// Stack-layout fields describing the live Scheme stack segment.
#[derive(Debug, Default)]
pub struct StackFields {
    pub frame_pointer: usize,
    pub frame_base: usize,
    pub stack_base: usize,
}

/// Side-table fields: segment/dirty vectors and the memory region they
/// describe. Lives behind its own lock because the page manager may grow
/// these vectors independently of a collection (§4.1).
///
/// Per §4.1's contract, growth may reallocate `segment_vector`/
/// `dirty_vector`; any caller holding a page index (not a raw pointer into
/// these `Vec`s) is unaffected, but nothing outside this module should
/// cache a reference into them across a page-manager call.
#[derive(Debug, Default)]
pub struct TableFields {
    pub memory_base: usize,
    pub memory_end: usize,
    pub segment_vector: Vec<crate::heap::page::SegmentEntry>,
    pub dirty_vector: Vec<u32>,
}

/// Root fields the collector scans directly (§4.9 step 4, last).
#[derive(Debug)]
pub struct RootFields {
    pub next_k: TaggedPtr,
    pub symbol_table: TaggedPtr,
    pub gensym_table: TaggedPtr,
    pub arg_list: TaggedPtr,
    pub base_rtd: TaggedPtr,
    pub scratch_roots: [TaggedPtr; 10],
}

impl Default for RootFields {
    fn default() -> Self {
        Self {
            next_k: TaggedPtr::default(),
            symbol_table: TaggedPtr::default(),
            gensym_table: TaggedPtr::default(),
            arg_list: TaggedPtr::default(),
            base_rtd: TaggedPtr::default(),
            scratch_roots: [TaggedPtr::default(); 10],
        }
    }
}

/// A `(tconc, obj)` pair on a generation's protected list (§4.8).
#[derive(Debug, Clone, Copy)]
pub struct GuardianEntry {
    pub tconc: TaggedPtr,
    pub obj: TaggedPtr,
}

/// Guardian/finalization fields (§4.8).
#[derive(Debug)]
pub struct GuardianFields {
    pub protected_list: [Vec<GuardianEntry>; 5],
    /// C-callback locatives, scanned as roots.
    pub callbacks: Vec<usize>,
    /// Objects pinned against collection regardless of reachability.
    pub not_to_be_collected: Vec<TaggedPtr>,
}

impl Default for GuardianFields {
    fn default() -> Self {
        Self {
            protected_list: [Vec::new(), Vec::new(), Vec::new(), Vec::new(), Vec::new()],
            callbacks: Vec::new(),
            not_to_be_collected: Vec::new(),
        }
    }
}

/// Collection counters (§6).
#[derive(Debug, Default)]
pub struct CounterFields {
    pub collection_id: u64,
    pub collect_utime: Duration,
    pub collect_stime: Duration,
    pub collect_rtime: Duration,
    pub allocation_count_minor: u64,
    pub allocation_count_major: u64,
}

/// Page-cache and per-cycle scratch fields (§6).
#[derive(Debug, Default)]
pub struct CacheFields {
    pub cached_pages: Vec<usize>,
    pub uncached_pages: u64,
    pub weak_pairs_ap: usize,
    pub weak_pairs_ep: usize,
    pub collect_key: u64,
    /// Tcbuckets discovered this cycle whose key is in the collection set
    /// (§4.3), pending the tconc push [`crate::runtime::guardian::flush_tcbucket_queue`]
    /// performs at the end of the cycle (§4.8). Emptied by that flush; never
    /// holds anything between cycles.
    pub tcbucket_push_queue: Vec<TaggedPtr>,
}

/// The Process Control Block. Every collector operation takes a `&Pcb` (or
/// `&mut Pcb` during a cycle); nothing in the crate reaches for global
/// state. Field groups that the page manager or guardian engine may touch
/// between full collections are individually lock-guarded per §5; the
/// cycle driver otherwise treats the whole structure as exclusively owned
/// for the duration of a `collect`/`collect_check` call.
pub struct Pcb {
    pub heap: Mutex<HeapFields>,
    pub stack: Mutex<StackFields>,
    pub tables: RwLock<TableFields>,
    pub roots: Mutex<RootFields>,
    pub guardians: Mutex<GuardianFields>,
    pub counters: Mutex<CounterFields>,
    pub caches: Mutex<CacheFields>,
    pub config: GcConfig,
}

impl Pcb {
    pub fn new(config: GcConfig) -> Self {
        Self {
            heap: Mutex::new(HeapFields::default()),
            stack: Mutex::new(StackFields::default()),
            tables: RwLock::new(TableFields::default()),
            roots: Mutex::new(RootFields::default()),
            guardians: Mutex::new(GuardianFields::default()),
            counters: Mutex::new(CounterFields::default()),
            caches: Mutex::new(CacheFields::default()),
            config,
        }
    }

    /// Bytes of headroom left before the allocation redline, given the
    /// current nursery state.
    pub fn headroom(&self) -> usize {
        let heap = self.heap.lock();
        heap.allocation_redline.saturating_sub(heap.allocation_pointer)
    }

    pub fn next_collection_id(&self) -> u64 {
        let mut counters = self.counters.lock();
        let id = counters.collection_id;
        counters.collection_id += 1;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_pcb_has_zero_headroom() {
        let pcb = Pcb::new(GcConfig::default());
        assert_eq!(pcb.headroom(), 0);
    }

    #[test]
    fn collection_ids_increment() {
        let pcb = Pcb::new(GcConfig::default());
        assert_eq!(pcb.next_collection_id(), 0);
        assert_eq!(pcb.next_collection_id(), 1);
    }

    #[test]
    fn headroom_reflects_nursery_state() {
        let pcb = Pcb::new(GcConfig::default());
        {
            let mut heap = pcb.heap.lock();
            heap.allocation_pointer = 100;
            heap.allocation_redline = 500;
        }
        assert_eq!(pcb.headroom(), 400);
    }
}
