//! Page manager (§4.1): acquires and releases fixed-size page frames,
//! growing the PCB's segment/dirty vectors as the live heap grows and
//! reusing [`memory_mapping`]'s bounded cache before asking the OS for more.
//!
//! The heap is a single reserved address range, sized to
//! [`GcConfig::max_heap_size`] up front. Reserving the whole range lets the
//! segment vector and dirty vector be indexed directly by page number from a
//! fixed `memory_base` (§3) without ever needing to renumber pages that move.
//! Individual pages are handed out from within that reservation by a bump
//! cursor; a released page either re-enters the bounded cache for reuse or,
//! once the cache is full, is returned to the OS (for one-page runs) or
//! simply abandoned within the reservation (for multi-page runs, which the
//! cache does not track).

pub mod memory_mapping;
pub mod page;
pub mod virtual_memory;

pub use page::{PageKind, SegmentEntry, PAGE_SIZE};

use crate::error::{GcError, Result};
use crate::pcb::Pcb;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Bump-allocation cursor over the heap's single reserved region. Not part of
/// the PCB (§6 lists only the segment/dirty vectors and the region bounds as
/// PCB-owned); this is page-manager-private bookkeeping, analogous to the
/// auxiliary side-channel state §5 carves out for collector internals.
pub struct Heap {
    next_free_offset: AtomicUsize,
    reservation_size: usize,
}

impl Heap {
    /// Reserve the heap's address range and install the PCB's tables. Must
    /// be called exactly once before any allocation.
    pub fn new(pcb: &Pcb) -> Result<Self> {
        let size = page::align_up_to_page(pcb.config.max_heap_size);
        let base = virtual_memory::map_pages(size)?;

        let mut tables = pcb.tables.write();
        tables.memory_base = base;
        tables.memory_end = base + size;
        let page_count = size / PAGE_SIZE;
        tables.segment_vector = vec![SegmentEntry::HOLE; page_count];
        tables.dirty_vector = vec![0u32; page_count];
        drop(tables);

        Ok(Heap {
            next_free_offset: AtomicUsize::new(0),
            reservation_size: size,
        })
    }

    /// Acquire a single page frame, tagged as `kind`/`generation` and marked
    /// new-generation. Reuses a cached frame if one is parked.
    pub fn acquire_page(&self, pcb: &Pcb, kind: PageKind, generation: u8) -> Result<usize> {
        if let Some(addr) = memory_mapping::take_cached_page(pcb) {
            unsafe { crate::memory::zero_memory(addr, PAGE_SIZE) };
            self.tag_page(pcb, addr, kind, generation);
            return Ok(addr);
        }
        let addr = self.bump_alloc(pcb, 1)?;
        self.tag_page(pcb, addr, kind, generation);
        Ok(addr)
    }

    /// Acquire a contiguous run of `page_count` frames for a large object
    /// (§4.3). The cache only parks disjoint single pages, so runs longer
    /// than one page always come from the reservation's bump cursor. The
    /// first page carries `kind`; continuation pages are tagged `RawData` so
    /// the card scanner and evacuator skip them as object bodies rather than
    /// object headers.
    pub fn acquire_run(&self, pcb: &Pcb, page_count: usize, kind: PageKind, generation: u8) -> Result<usize> {
        debug_assert!(page_count >= 1);
        let addr = self.bump_alloc(pcb, page_count)?;
        let mut entry = SegmentEntry::new(kind, generation);
        entry.set_new_generation(true);
        entry.set_large_object(true);
        entry.set_meta_dirty(page::dirty_bit_for_generation(generation));
        let mut tables = pcb.tables.write();
        let base_idx = page::page_index(addr, tables.memory_base);
        tables.segment_vector[base_idx] = entry;
        tables.dirty_vector[base_idx] = 0;
        let mut continuation = SegmentEntry::new(PageKind::RawData, generation);
        continuation.set_new_generation(true);
        continuation.set_large_object(true);
        continuation.set_meta_dirty(page::dirty_bit_for_generation(generation));
        for i in 1..page_count {
            tables.segment_vector[base_idx + i] = continuation;
            tables.dirty_vector[base_idx + i] = 0;
        }
        Ok(addr)
    }

    /// Release a run of pages: mark them holes and either park (single page,
    /// space permitting) or return them to the OS (§4.1).
    pub fn release_run(&self, pcb: &Pcb, addr: usize, page_count: usize) {
        {
            let mut tables = pcb.tables.write();
            let base_idx = page::page_index(addr, tables.memory_base);
            for i in 0..page_count {
                tables.segment_vector[base_idx + i] = SegmentEntry::HOLE;
                tables.dirty_vector[base_idx + i] = 0;
            }
        }
        if page_count == 1 {
            memory_mapping::release_page(pcb, addr, PAGE_SIZE);
        } else {
            let _ = virtual_memory::unmap_pages(addr, page_count * PAGE_SIZE);
        }
    }

    /// Total pages in the reservation, used (§4.9 step 11) when deciding
    /// whether the nursery needs to grow into a larger reservation.
    pub fn total_pages(&self) -> usize {
        self.reservation_size / PAGE_SIZE
    }

    fn tag_page(&self, pcb: &Pcb, addr: usize, kind: PageKind, generation: u8) {
        let mut entry = SegmentEntry::new(kind, generation);
        entry.set_new_generation(true);
        entry.set_meta_dirty(page::dirty_bit_for_generation(generation));
        let mut tables = pcb.tables.write();
        let idx = page::page_index(addr, tables.memory_base);
        tables.segment_vector[idx] = entry;
        tables.dirty_vector[idx] = 0;
    }

    fn bump_alloc(&self, pcb: &Pcb, page_count: usize) -> Result<usize> {
        let run_bytes = page_count * PAGE_SIZE;
        let offset = self
            .next_free_offset
            .fetch_add(run_bytes, Ordering::SeqCst);
        if offset + run_bytes > self.reservation_size {
            return Err(GcError::OutOfMemory {
                requested: run_bytes,
                available: self.reservation_size.saturating_sub(offset),
            });
        }
        let base = pcb.tables.read().memory_base;
        Ok(base + offset)
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        // Best-effort: the reservation and whatever it backs disappear with
        // the process in every real embedding; tests that construct a `Heap`
        // repeatedly still want the address space back.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GcConfig;

    fn test_pcb() -> Pcb {
        let mut config = GcConfig::default();
        config.max_heap_size = 64 * PAGE_SIZE;
        config.nursery_size = 4 * PAGE_SIZE;
        Pcb::new(config)
    }

    #[test]
    fn acquire_tags_a_fresh_page() {
        let pcb = test_pcb();
        let heap = Heap::new(&pcb).unwrap();
        let addr = heap.acquire_page(&pcb, PageKind::Pointers, 0).unwrap();
        let tables = pcb.tables.read();
        let idx = page::page_index(addr, tables.memory_base);
        let entry = tables.segment_vector[idx];
        assert_eq!(entry.kind(), PageKind::Pointers);
        assert_eq!(entry.generation(), 0);
        assert!(entry.is_new_generation());
    }

    #[test]
    fn release_then_acquire_reuses_cached_frame() {
        let pcb = test_pcb();
        let heap = Heap::new(&pcb).unwrap();
        let addr = heap.acquire_page(&pcb, PageKind::Pointers, 0).unwrap();
        heap.release_run(&pcb, addr, 1);
        assert_eq!(memory_mapping::cached_page_count(&pcb), 1);
        let addr2 = heap.acquire_page(&pcb, PageKind::Symbols, 1).unwrap();
        assert_eq!(addr2, addr);
        assert_eq!(memory_mapping::cached_page_count(&pcb), 0);
    }

    #[test]
    fn acquire_run_tags_continuation_pages_as_raw_data() {
        let pcb = test_pcb();
        let heap = Heap::new(&pcb).unwrap();
        let addr = heap.acquire_run(&pcb, 3, PageKind::Code, 0).unwrap();
        let tables = pcb.tables.read();
        let idx = page::page_index(addr, tables.memory_base);
        assert_eq!(tables.segment_vector[idx].kind(), PageKind::Code);
        assert!(tables.segment_vector[idx].is_large_object());
        assert_eq!(tables.segment_vector[idx + 1].kind(), PageKind::RawData);
        assert_eq!(tables.segment_vector[idx + 2].kind(), PageKind::RawData);
    }

    #[test]
    fn exhausting_the_reservation_is_out_of_memory() {
        let pcb = test_pcb();
        let heap = Heap::new(&pcb).unwrap();
        let result = heap.acquire_run(&pcb, 65, PageKind::Pointers, 0);
        assert!(matches!(result, Err(GcError::OutOfMemory { .. })));
    }
}
