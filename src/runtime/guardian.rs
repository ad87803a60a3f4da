//! Guardian/finalizer engine (§4.8). Runs synchronously as part of a
//! cycle, right after the collect loop reaches its fixed point: an object a
//! guardian protects either survived independently of the guardian (it was
//! already evacuated while tracing ordinary roots, so it is re-registered
//! one generation up) or it did not (so it is about to die), in which case
//! the guardian revives it onto the tconc queue instead of letting it be
//! reclaimed.

use crate::allocator::{clamp_generation, Category, MetaAllocator};
use crate::barrier::mark_card;
use crate::error::Result;
use crate::heap::Heap;
use crate::memory;
use crate::object;
use crate::pcb::{GuardianEntry, Pcb};
use crate::relocate::evacuate;
use crate::tag::{Tag, TaggedPtr, NULL, WORD_SIZE};

/// Partition every guarded entry up to `collect_gen`, keyed on whether each
/// entry's *tconc* is live (§4.8 steps 3-4), not on whether the guarded
/// object itself is: a `PEND_HOLD` entry (`entry.obj` already forwarded by
/// the ordinary trace) is re-registered a generation up only if its tconc
/// is independently live too, and otherwise dropped (step 4, "others are
/// dropped"); a `PEND_FINAL` entry is revived and pushed onto its tconc
/// queue only if the tconc is live, and otherwise discarded along with it
/// (step 3, "unreachable together with their tconcs"). A dead tconc is
/// never evacuated — reviving it would resurrect queue storage nothing can
/// still observe. Returns the number of objects finalized this cycle.
///
/// # Safety
/// Must run after the collect loop (§4.9 step 5) reaches its fixed point
/// but before weak-pair fixup, so `object::is_forwarded` reflects whether
/// the ordinary trace reached an entry's object or tconc independent of
/// the guardian.
pub unsafe fn process_guardians(
    pcb: &Pcb,
    heap: &Heap,
    allocator: &mut MetaAllocator,
    collect_gen: u8,
) -> Result<usize> {
    let next_gen = clamp_generation(collect_gen + 1) as usize;
    let mut to_finalize = Vec::new();

    {
        let mut guardians = pcb.guardians.lock();
        for gen in 0..=collect_gen as usize {
            let entries = std::mem::take(&mut guardians.protected_list[gen]);
            for entry in entries {
                if entry.obj.is_immediate() {
                    continue;
                }
                if !tconc_is_live(pcb, allocator, entry.tconc) {
                    // Dead tconc: dropped either way (step 3 for a dying
                    // object, step 4 for a surviving one) rather than
                    // resurrected just to hold an entry no one can reach.
                    continue;
                }
                if object::is_forwarded(entry.obj) {
                    let survivor = object::forwarding_target(entry.obj);
                    let tconc = evacuate(pcb, heap, allocator, entry.tconc)?;
                    guardians.protected_list[next_gen].push(GuardianEntry {
                        tconc,
                        obj: survivor,
                    });
                } else {
                    to_finalize.push(entry);
                }
            }
        }
    }

    let finalized = to_finalize.len();
    for entry in to_finalize {
        let revived = evacuate(pcb, heap, allocator, entry.obj)?;
        let tconc = evacuate(pcb, heap, allocator, entry.tconc)?;
        push_tconc(pcb, heap, allocator, tconc, revived)?;
    }

    Ok(finalized)
}

/// Whether `tconc` is reachable without evacuating it: an immediate, a
/// pointer outside this cycle's collection set (its page generation is
/// already `>= target_generation`, including a pinned object `promote_in_place`
/// already touched this cycle), or an object the ordinary trace already
/// forwarded. Checking the page generation rather than calling `evacuate`
/// itself is what lets step 3/4's partitioning observe a tconc nothing else
/// reached as dead instead of reviving it as a side effect of asking.
unsafe fn tconc_is_live(pcb: &Pcb, allocator: &MetaAllocator, tconc: TaggedPtr) -> bool {
    if tconc.is_immediate() {
        return true;
    }
    let gen = {
        let tables = pcb.tables.read();
        let idx = crate::heap::page::page_index(tconc.addr(), tables.memory_base);
        tables.segment_vector[idx].generation()
    };
    if gen >= allocator.target_generation() {
        return true;
    }
    object::is_forwarded(tconc)
}

/// Enqueue `obj` onto a `(head . tail)` tconc queue: the current tail pair's
/// car becomes `obj`, a fresh empty pair becomes the new tail, and the
/// tconc's cdr is repointed at it. Mirrors the tail-conc protocol Scheme
/// guardians use so a consumer can drain the queue by repeatedly taking the
/// head pair's car.
pub(crate) unsafe fn push_tconc(
    pcb: &Pcb,
    heap: &Heap,
    allocator: &mut MetaAllocator,
    tconc: TaggedPtr,
    obj: TaggedPtr,
) -> Result<()> {
    if tconc.is_immediate() {
        return Ok(());
    }
    let target_gen = allocator.target_generation();
    let tail_slot = tconc.addr() + WORD_SIZE;
    let tail = TaggedPtr::new(memory::read_word(tail_slot));

    let new_pair_addr = allocator.alloc(pcb, heap, Category::Pairs, 2)?;
    memory::write_word(new_pair_addr, NULL.0);
    memory::write_word(new_pair_addr + WORD_SIZE, NULL.0);
    let new_tail = TaggedPtr::with_tag(new_pair_addr, Tag::Pair);

    if !tail.is_immediate() {
        memory::write_word(tail.addr(), obj.0);
        memory::write_word(tail.addr() + WORD_SIZE, new_tail.0);
        mark_card(pcb, tail.addr(), target_gen);
        mark_card(pcb, tail.addr() + WORD_SIZE, target_gen);
    }

    memory::write_word(tail_slot, new_tail.0);
    mark_card(pcb, tail_slot, target_gen);
    Ok(())
}

/// Flush the tcbuckets the card scanner queued this cycle (§4.3) onto their
/// own embedded tconc's tail chain. A tcbucket's first word holds the tconc
/// it belongs to; pushing the bucket itself there is what lets a live hash
/// table notice, after a collection, which of its entries had a key that
/// died (§4.8).
///
/// # Safety
/// Must run after the collect loop's fixed point (so every live tconc has
/// already been evacuated to its final address) and before the collected
/// generation's pages are reclaimed.
pub(crate) unsafe fn flush_tcbucket_queue(pcb: &Pcb, heap: &Heap, allocator: &mut MetaAllocator) -> Result<()> {
    let pending: Vec<TaggedPtr> = std::mem::take(&mut pcb.caches.lock().tcbucket_push_queue);
    for bucket in pending {
        let tconc_raw = TaggedPtr::new(memory::read_word(bucket.addr()));
        let tconc = evacuate(pcb, heap, allocator, tconc_raw)?;
        if tconc != tconc_raw {
            memory::write_word(bucket.addr(), tconc.0);
        }
        push_tconc(pcb, heap, allocator, tconc, bucket)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GcConfig;
    use crate::heap::page::{PageKind, PAGE_SIZE};

    fn test_pcb_and_heap() -> (Pcb, Heap) {
        let mut config = GcConfig::default();
        config.max_heap_size = 64 * PAGE_SIZE;
        let pcb = Pcb::new(config);
        let heap = Heap::new(&pcb).unwrap();
        (pcb, heap)
    }

    fn make_pair(heap: &Heap, pcb: &Pcb, gen: u8) -> TaggedPtr {
        unsafe {
            let addr = heap.acquire_page(pcb, PageKind::Pairs, gen).unwrap();
            memory::write_word(addr, NULL.0);
            memory::write_word(addr + WORD_SIZE, NULL.0);
            TaggedPtr::with_tag(addr, Tag::Pair)
        }
    }

    #[test]
    fn unreached_guarded_object_is_finalized_and_enqueued() {
        let (pcb, heap) = test_pcb_and_heap();
        let obj = make_pair(&heap, &pcb, 0);
        let tail = make_pair(&heap, &pcb, 0);
        let tconc = make_pair(&heap, &pcb, 0);
        unsafe {
            memory::write_word(tconc.addr() + WORD_SIZE, tail.0);
        }

        let mut allocator = MetaAllocator::new(1);
        // The tconc is independently reachable (e.g. the guardian binding
        // itself is a mutator root) and already reached by the ordinary
        // trace before guardians run, leaving a forward marker at its old
        // address — only `obj` is unreached.
        unsafe { evacuate(&pcb, &heap, &mut allocator, tconc).unwrap() };
        pcb.guardians.lock().protected_list[0].push(GuardianEntry { tconc, obj });

        let finalized = unsafe { process_guardians(&pcb, &heap, &mut allocator, 0).unwrap() };
        assert_eq!(finalized, 1);
        assert!(pcb.guardians.lock().protected_list[0].is_empty());
        assert!(pcb.guardians.lock().protected_list[1].is_empty());
    }

    #[test]
    fn dead_tconc_drops_the_entry_without_reviving_it() {
        let (pcb, heap) = test_pcb_and_heap();
        let obj = make_pair(&heap, &pcb, 0);
        let tconc = make_pair(&heap, &pcb, 0);
        // Nothing besides this entry references `tconc`: it is unreachable
        // together with `obj` (§4.8 step 3), so it must never be evacuated.
        pcb.guardians.lock().protected_list[0].push(GuardianEntry { tconc, obj });

        let mut allocator = MetaAllocator::new(1);
        let finalized = unsafe { process_guardians(&pcb, &heap, &mut allocator, 0).unwrap() };
        assert_eq!(finalized, 0);
        assert!(pcb.guardians.lock().protected_list[0].is_empty());
        assert!(pcb.guardians.lock().protected_list[1].is_empty());
        assert!(!object::is_forwarded(tconc));
    }

    #[test]
    fn reached_guarded_object_is_reregistered_one_generation_up() {
        let (pcb, heap) = test_pcb_and_heap();
        let obj = make_pair(&heap, &pcb, 0);
        let tconc = make_pair(&heap, &pcb, 0);
        let tail = make_pair(&heap, &pcb, 0);
        unsafe {
            memory::write_word(tconc.addr() + WORD_SIZE, tail.0);
        }

        let mut allocator = MetaAllocator::new(1);
        let moved = unsafe { evacuate(&pcb, &heap, &mut allocator, obj).unwrap() };
        assert_ne!(moved, obj);
        // The tconc must also be independently reachable for this entry to
        // be promoted rather than dropped (§4.8 step 4).
        unsafe { evacuate(&pcb, &heap, &mut allocator, tconc).unwrap() };

        pcb.guardians.lock().protected_list[0].push(GuardianEntry { tconc, obj });
        let finalized = unsafe { process_guardians(&pcb, &heap, &mut allocator, 0).unwrap() };
        assert_eq!(finalized, 0);
        assert_eq!(pcb.guardians.lock().protected_list[1].len(), 1);
    }
}
