//! Weak-pair fixup (§4.7): after tracing, every weak-pair page tagged
//! new-generation is visited and dead cars are replaced with the **BWP**
//! sentinel. Visits all such pages unconditionally, resolving the original's
//! `if (1)`-guarded branch in favor of the always-visit path (§9 Design
//! Notes, Open Question).

use crate::heap::page::{self, PageKind, PAGE_SIZE};
use crate::memory;
use crate::object::header;
use crate::pcb::Pcb;
use crate::tag::{TaggedPtr, BWP, WORD_SIZE};

const PAIR_WORDS: usize = 2;

/// Fix up every weak pair on a new-generation weak-pair page. Returns the
/// number of cars replaced with `BWP`.
///
/// # Safety
/// Must run after the collect loop (§4.9 step 7) has reached quiescence, so
/// that every survivor is already forwarded.
pub unsafe fn fixup_weak_pairs(pcb: &Pcb, collect_gen: u8) -> usize {
    let (memory_base, page_count) = {
        let tables = pcb.tables.read();
        (tables.memory_base, tables.segment_vector.len())
    };
    let pairs_per_page = PAGE_SIZE / (PAIR_WORDS * WORD_SIZE);
    let mut fixed = 0;

    for page_idx in 0..page_count {
        let entry = pcb.tables.read().segment_vector[page_idx];
        if entry.kind() != PageKind::WeakPairs || !entry.is_new_generation() {
            continue;
        }
        let page_addr = memory_base + page_idx * PAGE_SIZE;
        for slot in 0..pairs_per_page {
            let pair_addr = page_addr + slot * PAIR_WORDS * WORD_SIZE;
            let car = TaggedPtr::new(memory::read_word(pair_addr));
            if car.is_immediate() {
                continue;
            }
            if header::is_forwarded(car) {
                let forwarded = header::forwarding_target(car);
                memory::write_word(pair_addr, forwarded.0);
                continue;
            }
            let car_page_idx = page::page_index(car.addr(), memory_base);
            let car_gen = pcb.tables.read().segment_vector[car_page_idx].generation();
            if car_gen <= collect_gen {
                memory::write_word(pair_addr, BWP.0);
                fixed += 1;
            }
        }
    }

    fixed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GcConfig;
    use crate::heap::page::SegmentEntry;
    use crate::object::header::install_forward;
    use crate::tag::{Tag, NULL};

    fn alloc_page() -> usize {
        let layout = std::alloc::Layout::from_size_align(PAGE_SIZE, PAGE_SIZE).unwrap();
        unsafe { std::alloc::alloc_zeroed(layout) as usize }
    }

    fn test_pcb_with_page(page_addr: usize, kind: PageKind, gen: u8, new_gen: bool) -> Pcb {
        let pcb = Pcb::new(GcConfig::default());
        let mut entry = SegmentEntry::new(kind, gen);
        entry.set_new_generation(new_gen);
        let mut tables = pcb.tables.write();
        tables.memory_base = page_addr;
        tables.memory_end = page_addr + PAGE_SIZE;
        tables.segment_vector = vec![entry];
        tables.dirty_vector = vec![0];
        drop(tables);
        pcb
    }

    #[test]
    fn dead_weak_car_becomes_bwp() {
        let page_addr = alloc_page();
        let pcb = test_pcb_with_page(page_addr, PageKind::WeakPairs, 1, true);
        // The referent lives on a gen-0 page (collected, not forwarded): dead.
        let dead_referent = TaggedPtr::with_tag(page_addr + 64, Tag::Pair);
        unsafe {
            memory::write_word(page_addr, dead_referent.0);
            memory::write_word(page_addr + WORD_SIZE, NULL.0);
            let fixed = fixup_weak_pairs(&pcb, 0);
            assert_eq!(fixed, 1);
            assert_eq!(memory::read_word(page_addr), BWP.0);
        }
    }

    #[test]
    fn forwarded_weak_car_is_rewritten_to_new_location() {
        let page_addr = alloc_page();
        let pcb = test_pcb_with_page(page_addr, PageKind::WeakPairs, 1, true);
        let old_referent = TaggedPtr::with_tag(page_addr + 64, Tag::Pair);
        let new_referent = TaggedPtr::with_tag(page_addr + 128, Tag::Pair);
        unsafe {
            memory::write_word(page_addr, old_referent.0);
            memory::write_word(page_addr + WORD_SIZE, NULL.0);
            install_forward(old_referent, new_referent);
            let fixed = fixup_weak_pairs(&pcb, 0);
            assert_eq!(fixed, 0);
            assert_eq!(
                TaggedPtr::new(memory::read_word(page_addr)),
                new_referent
            );
        }
    }

    #[test]
    fn immediate_car_is_left_alone() {
        let page_addr = alloc_page();
        let pcb = test_pcb_with_page(page_addr, PageKind::WeakPairs, 1, true);
        unsafe {
            memory::write_word(page_addr, crate::tag::BOOL_TRUE.0);
            memory::write_word(page_addr + WORD_SIZE, NULL.0);
            let fixed = fixup_weak_pairs(&pcb, 0);
            assert_eq!(fixed, 0);
            assert_eq!(memory::read_word(page_addr), crate::tag::BOOL_TRUE.0);
        }
    }
}
