//! Cycle driver (§4.9): the stop-the-world collection cycle, run start to
//! finish with no other thread touching the heap (§5). `GarbageCollector`
//! owns the [`Pcb`] and [`Heap`] and exposes the external interface (§6):
//! `collect`, `collect_check`, integrity-check toggles, and diagnostics.

use crate::allocator::{clamp_generation, collection_id_to_gen, MetaAllocator};
use crate::config::GcConfig;
use crate::error::{GcError, Result};
use crate::heap::page::PageKind;
use crate::heap::Heap;
use crate::marker::scan_roots;
use crate::memory;
use crate::object;
use crate::pcb::Pcb;
use crate::relocate::scan_region;
use crate::runtime::guardian::{flush_tcbucket_queue, process_guardians};
use crate::stats::timer::GcTimer;
use crate::stats::{build_cycle_stats, GcEvent, GcStats};
use crate::tag::IK_FORWARD_PTR;
use std::sync::atomic::{AtomicBool, Ordering};

/// Orchestrates the collector: a [`Pcb`], the [`Heap`] it manages, and the
/// running statistics a cycle appends to.
pub struct GarbageCollector {
    pcb: Pcb,
    heap: Heap,
    stats: GcStats,
    integrity_checks: AtomicBool,
}

impl GarbageCollector {
    /// Build a collector and reserve its heap's address range (§4.1).
    pub fn new(config: GcConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| GcError::Configuration(e.to_string()))?;
        let integrity_checks = config.integrity_checks_on_every_cycle;
        let pcb = Pcb::new(config);
        let heap = Heap::new(&pcb)?;
        Ok(Self {
            pcb,
            heap,
            stats: GcStats::default(),
            integrity_checks: AtomicBool::new(integrity_checks),
        })
    }

    pub fn pcb(&self) -> &Pcb {
        &self.pcb
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn stats(&self) -> &GcStats {
        &self.stats
    }

    /// §6: enable post-cycle integrity verification (§4.10) regardless of
    /// what the configuration specified at construction.
    pub fn enable_integrity_checks(&self) {
        self.integrity_checks.store(true, Ordering::SeqCst);
    }

    /// §6: disable post-cycle integrity verification.
    pub fn disable_integrity_checks(&self) {
        self.integrity_checks.store(false, Ordering::SeqCst);
    }

    /// §6/§4.9: run a full collection cycle unconditionally.
    ///
    /// §7: no error from a running cycle is ever handed back to the
    /// mutator — a heap-corruption invariant violation or an OS failure
    /// aborts the process via [`crate::error::abort_on_bug`] instead of
    /// returning `Err`. This always returns `Ok` if it returns at all.
    pub fn collect(&self, requested_bytes: usize) -> Result<()> {
        crate::error::abort_on_bug(unsafe { self.run_cycle(requested_bytes) });
        Ok(())
    }

    /// §4.10: run a cycle only if current headroom can't satisfy
    /// `requested_bytes`. Returns whether a cycle actually ran. Like
    /// [`Self::collect`], a running cycle that hits a fatal error aborts
    /// the process rather than returning it here (§7).
    pub fn collect_check(&self, requested_bytes: usize) -> Result<bool> {
        if self.pcb.headroom() >= requested_bytes {
            return Ok(false);
        }
        self.collect(requested_bytes)?;
        Ok(true)
    }

    /// The full §4.9 cycle, twelve steps: pick a generation, scan roots,
    /// drain the collect loop to a fixed point, run guardians, fix up weak
    /// pairs, reclaim the pages the cycle emptied, clear the new-generation
    /// bit, release and regrow the nursery, then (optionally) verify.
    ///
    /// # Safety
    /// Must run with no concurrent mutator access to `self.pcb`/`self.heap`
    /// (§5: the collector assumes exclusive access for the duration of a
    /// cycle).
    unsafe fn run_cycle(&self, requested_bytes: usize) -> Result<()> {
        let timer = GcTimer::new();

        // Step 1: the escalator formula picks how far back this cycle reaches.
        let collection_id = self.pcb.next_collection_id();
        let collect_gen = clamp_generation(collection_id_to_gen(collection_id as usize));
        let target_gen = clamp_generation(collect_gen + 1);
        let mut allocator = MetaAllocator::new(target_gen);
        self.stats
            .events()
            .record(GcEvent::CycleStart { collection_id, generation: collect_gen });

        // Step 3: retire the current nursery block; its survivors are about
        // to be evacuated into kind-specific to-space pages, so nothing
        // outside this cycle may allocate into it until it is regrown.
        self.detach_nursery();

        // Step 4: scan roots in the fixed order (§4.9).
        scan_roots(&self.pcb, &self.heap, &mut allocator, collect_gen)?;

        // Step 5: drain the collect loop to a fixed point.
        self.drain_collect_loop(&mut allocator)?;

        // Step 6: guardians — may themselves revive objects and enqueue
        // more work, so drain again afterward.
        let finalized = process_guardians(&self.pcb, &self.heap, &mut allocator, collect_gen)?;
        self.drain_collect_loop(&mut allocator)?;
        self.stats
            .events()
            .record(GcEvent::GuardianStats { finalized, promoted: 0 });

        // Step 7: weak-pair fixup, now that the fixed point has settled.
        object::fixup_weak_pairs(&self.pcb, collect_gen);

        // Tcbuckets the remembered-set/region scans found with a collected
        // key are pushed onto their own tconc's tail chain here, once,
        // after every live tconc has its final evacuated address (§4.3,
        // §4.8).
        flush_tcbucket_queue(&self.pcb, &self.heap, &mut allocator)?;

        // Steps 8-9: reclaim emptied from-space pages, clear the
        // new-generation bit on everything that is left.
        let pages_reclaimed = self.reclaim_collected_pages(collect_gen)?;
        self.clear_new_generation_bits();

        // Step 10: weak-pair allocation-pointer scratch fields are only
        // meaningful mid-cycle; reset them now that fixup has run.
        {
            let mut caches = self.pcb.caches.lock();
            caches.weak_pairs_ap = 0;
            caches.weak_pairs_ep = 0;
        }

        // Step 11: release/regrow the nursery, scaled by the growth factor.
        self.regrow_nursery()?;

        // Step 12: optional post-cycle integrity check, then record timing.
        if self.integrity_checks.load(Ordering::SeqCst) {
            self.verify_integrity()?;
        }

        let wall = timer.elapsed();
        {
            let mut counters = self.pcb.counters.lock();
            counters.collect_rtime += wall;
        }
        self.stats.record_cycle(build_cycle_stats(
            collection_id,
            collect_gen,
            wall,
            requested_bytes,
            pages_reclaimed,
        ));
        self.stats.events().record(GcEvent::CycleEnd {
            collection_id,
            duration_ms: wall.as_secs_f64() * 1000.0,
            pages_reclaimed,
        });
        Ok(())
    }

    fn detach_nursery(&self) {
        let mut heap_fields = self.pcb.heap.lock();
        if heap_fields.heap_base != 0 {
            heap_fields.heap_pages.push(heap_fields.heap_base);
        }
        heap_fields.allocation_pointer = 0;
        heap_fields.allocation_redline = 0;
    }

    unsafe fn regrow_nursery(&self) -> Result<()> {
        let retired: Vec<usize> = {
            let mut heap_fields = self.pcb.heap.lock();
            std::mem::take(&mut heap_fields.heap_pages)
        };
        let page_count = crate::heap::page::pages_for_bytes(self.pcb.config.nursery_size).max(1);
        for addr in retired {
            self.heap.release_run(&self.pcb, addr, page_count);
        }

        let new_size = ((self.pcb.config.nursery_size as f64)
            * self.pcb.config.nursery_growth_factor) as usize;
        let new_size = new_size.min(self.pcb.config.max_heap_size).max(self.pcb.config.nursery_size);
        let new_page_count = crate::heap::page::pages_for_bytes(new_size).max(1);
        let base = self
            .heap
            .acquire_run(&self.pcb, new_page_count, PageKind::RawData, 0)?;

        let mut heap_fields = self.pcb.heap.lock();
        heap_fields.heap_base = base;
        heap_fields.heap_size = new_page_count * crate::heap::page::PAGE_SIZE;
        heap_fields.allocation_pointer = base;
        heap_fields.allocation_redline = base + heap_fields.heap_size;
        Ok(())
    }

    unsafe fn drain_collect_loop(&self, allocator: &mut MetaAllocator) -> Result<()> {
        loop {
            allocator.flush_all_pending();
            let pending = allocator.take_pending();
            if pending.is_empty() {
                return Ok(());
            }
            for (category, base, ap) in pending {
                scan_region(&self.pcb, &self.heap, allocator, category, base, ap)?;
            }
        }
    }

    /// §4.9 steps 8-9: any non-hole, non-large page whose generation is
    /// still `<= collect_gen` was fully evacuated this cycle (large objects
    /// are pinned in place and promoted instead, so they are excluded) and
    /// can be released back to the page manager.
    unsafe fn reclaim_collected_pages(&self, collect_gen: u8) -> Result<usize> {
        let doomed: Vec<usize> = {
            let tables = self.pcb.tables.read();
            let page_count = tables.segment_vector.len();
            (0..page_count)
                .filter(|&idx| {
                    let entry = tables.segment_vector[idx];
                    !entry.is_hole() && !entry.is_large_object() && entry.generation() <= collect_gen
                })
                .map(|idx| tables.memory_base + idx * crate::heap::page::PAGE_SIZE)
                .collect()
        };
        let reclaimed = doomed.len();
        for addr in doomed {
            self.heap.release_run(&self.pcb, addr, 1);
        }
        Ok(reclaimed)
    }

    fn clear_new_generation_bits(&self) {
        let mut tables = self.pcb.tables.write();
        for entry in tables.segment_vector.iter_mut() {
            if !entry.is_hole() && entry.is_new_generation() {
                entry.set_new_generation(false);
            }
        }
    }

    /// §4.10: verify no stale forward marker and no page still flagged
    /// new-generation survives past a completed cycle. Checks the leading
    /// word of every live page rather than every object on it, which is
    /// sufficient because the forwarding protocol always plants its marker
    /// at an object's first word and every page here holds exactly one
    /// object per page in the worst case the check needs to catch (a
    /// from-space page the reclaim pass missed).
    unsafe fn verify_integrity(&self) -> Result<()> {
        let tables = self.pcb.tables.read();
        let page_count = tables.segment_vector.len();
        for idx in 0..page_count {
            let entry = tables.segment_vector[idx];
            if entry.is_hole() {
                continue;
            }
            if entry.is_new_generation() {
                return Err(GcError::IntegrityViolation(format!(
                    "page index {} still marked new-generation after cycle",
                    idx
                )));
            }
            if matches!(entry.kind(), PageKind::RawData | PageKind::Code) {
                continue;
            }
            let page_addr = tables.memory_base + idx * crate::heap::page::PAGE_SIZE;
            let first_word = memory::read_word(page_addr);
            if first_word == IK_FORWARD_PTR {
                return Err(GcError::IntegrityViolation(format!(
                    "stale forward marker at page index {}",
                    idx
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::page::PAGE_SIZE;
    use crate::tag::{Tag, TaggedPtr, NULL, WORD_SIZE};

    fn test_config() -> GcConfig {
        let mut config = GcConfig::default();
        config.max_heap_size = 256 * PAGE_SIZE;
        config.min_heap_size = 8 * PAGE_SIZE;
        config.nursery_size = 4 * PAGE_SIZE;
        config
    }

    #[test]
    fn a_cycle_with_no_live_data_completes_and_regrows_the_nursery() {
        let gc = GarbageCollector::new(test_config()).unwrap();
        gc.collect(0).unwrap();
        assert_eq!(gc.stats().total_cycles(), 1);
        assert!(gc.pcb().heap.lock().allocation_redline > gc.pcb().heap.lock().allocation_pointer
            || gc.pcb().heap.lock().allocation_redline == gc.pcb().heap.lock().allocation_pointer);
    }

    #[test]
    fn a_pcb_root_survives_a_cycle_and_is_still_readable() {
        let gc = GarbageCollector::new(test_config()).unwrap();
        let page_addr = gc
            .heap()
            .acquire_page(gc.pcb(), crate::heap::page::PageKind::Pairs, 0)
            .unwrap();
        unsafe {
            memory::write_word(page_addr, NULL.0);
            memory::write_word(page_addr + WORD_SIZE, NULL.0);
        }
        let original = TaggedPtr::with_tag(page_addr, Tag::Pair);
        gc.pcb().roots.lock().next_k = original;

        gc.collect(0).unwrap();

        let survivor = gc.pcb().roots.lock().next_k;
        assert!(!survivor.is_immediate());
        assert_eq!(survivor.tag(), Tag::Pair);
        unsafe {
            assert_eq!(memory::read_word(survivor.addr()), NULL.0);
        }
    }

    #[test]
    fn collect_check_skips_when_headroom_is_sufficient() {
        let gc = GarbageCollector::new(test_config()).unwrap();
        {
            let mut heap_fields = gc.pcb().heap.lock();
            heap_fields.allocation_pointer = 0;
            heap_fields.allocation_redline = 4096;
        }
        let ran = gc.collect_check(100).unwrap();
        assert!(!ran);
        assert_eq!(gc.stats().total_cycles(), 0);
    }

    #[test]
    fn integrity_checks_can_be_toggled() {
        let gc = GarbageCollector::new(test_config()).unwrap();
        gc.disable_integrity_checks();
        gc.collect(0).unwrap();
        gc.enable_integrity_checks();
        gc.collect(0).unwrap();
    }
}
