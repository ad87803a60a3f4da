//! Large-object allocation (§4.3, §4.5): objects whose aligned size is ≥ one
//! page get dedicated pages straight from the page manager rather than a
//! meta region, and are tagged large-object so a later cycle recognizes them
//! as already pinned in place.

use crate::error::Result;
use crate::heap::page::{self, PageKind, PAGE_SIZE};
use crate::heap::Heap;
use crate::pcb::Pcb;

/// Threshold, in bytes, above which an object is placed on dedicated large
/// pages rather than in a meta region (§4.3: "aligned size ≥ P").
pub const LARGE_OBJECT_THRESHOLD: usize = PAGE_SIZE;

/// True if an object of `size_bytes` must go through the large-object path.
pub fn is_large(size_bytes: usize) -> bool {
    size_bytes >= LARGE_OBJECT_THRESHOLD
}

/// Map fresh pages for a large object of `size_bytes`, tagged `kind` at
/// `generation` with the large-object bit set, and return the base address.
pub fn allocate_large(
    heap: &Heap,
    pcb: &Pcb,
    size_bytes: usize,
    kind: PageKind,
    generation: u8,
) -> Result<usize> {
    let page_count = page::pages_for_bytes(size_bytes).max(1);
    heap.acquire_run(pcb, page_count, kind, generation)
}

/// Whether the large object at `addr` was already large-object-tagged
/// *before* this cycle began copying anything — i.e. it is pinned in place
/// rather than freshly evacuated (§4.3: "if the page already carries the
/// large-object bit the object is pinned").
pub fn is_pinned(pcb: &Pcb, addr: usize) -> bool {
    let tables = pcb.tables.read();
    let idx = page::page_index(addr, tables.memory_base);
    tables.segment_vector[idx].is_large_object()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GcConfig;

    #[test]
    fn threshold_matches_one_page() {
        assert!(!is_large(PAGE_SIZE - 1));
        assert!(is_large(PAGE_SIZE));
    }

    #[test]
    fn allocate_large_spans_enough_pages() {
        let mut config = GcConfig::default();
        config.max_heap_size = 64 * PAGE_SIZE;
        let pcb = Pcb::new(config);
        let heap = Heap::new(&pcb).unwrap();
        let addr = allocate_large(&heap, &pcb, 3 * PAGE_SIZE, PageKind::Pointers, 0).unwrap();
        let tables = pcb.tables.read();
        let idx = page::page_index(addr, tables.memory_base);
        assert!(tables.segment_vector[idx].is_large_object());
        assert_eq!(tables.segment_vector[idx + 1].kind(), PageKind::RawData);
        assert_eq!(tables.segment_vector[idx + 2].kind(), PageKind::RawData);
    }
}
