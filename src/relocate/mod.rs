//! Relocation (§4.3–§4.5): the object evacuator, the code relocation-vector
//! processor, and the collect loop's to-space region scanner that traces
//! everything they copy to a fixed point (§4.9 step 5).

pub mod evacuator;
pub mod reloc_vector;

pub use evacuator::evacuate;
pub use reloc_vector::{is_large_code_object, process_relocation_vector};

use crate::allocator::{Category, MetaAllocator};
use crate::barrier::card_scan;
use crate::error::Result;
use crate::heap::Heap;
use crate::memory;
use crate::object::header::code_object_words;
use crate::pcb::Pcb;
use crate::tag::{Tag, TaggedPtr, WORD_SIZE};

/// Trace a freshly evacuated to-space range `[base, ap)` belonging to
/// `category`, evacuating every object it references and rewriting the
/// pointer in place. Code regions are additionally run through the
/// relocation-vector processor (§4.5); every other category is walked with
/// the same per-kind shape the card scanner uses to find outgoing pointer
/// slots ([`card_scan::scan_object_at`], documented there as shared between
/// the two passes).
///
/// Revisiting a pair's cdr slot here even though the evacuator already
/// copied it verbatim is harmless: `evacuate` is idempotent (§8 "forwarding
/// idempotence"), so tracing a slot a second time after it already points
/// at a to-space address is a no-op.
///
/// # Safety
/// `[base, ap)` must be a to-space range this cycle allocated, already
/// filled with copied object bytes (never a partially-written tail).
pub unsafe fn scan_region(
    pcb: &Pcb,
    heap: &Heap,
    allocator: &mut MetaAllocator,
    category: Category,
    base: usize,
    ap: usize,
) -> Result<()> {
    let kind = category.page_kind();
    let target_generation = allocator.target_generation();
    let mut offset = base;
    while offset < ap {
        if category == Category::Code {
            let code = TaggedPtr::with_tag(offset, Tag::HeaderLed);
            process_relocation_vector(pcb, heap, allocator, code)?;
            offset += code_object_words(code) * WORD_SIZE;
            continue;
        }

        let mut pending_err = None;
        let words = card_scan::scan_object_at(pcb, target_generation, offset, kind, &mut |slot_addr| {
            if pending_err.is_some() {
                return;
            }
            let value = TaggedPtr::new(memory::read_word(slot_addr));
            if value.is_immediate() {
                return;
            }
            match evacuate(pcb, heap, allocator, value) {
                Ok(new_value) => {
                    if new_value != value {
                        memory::write_word(slot_addr, new_value.0);
                    }
                }
                Err(e) => pending_err = Some(e),
            }
        });
        if let Some(e) = pending_err {
            return Err(e);
        }
        offset += words.max(1) * WORD_SIZE;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GcConfig;
    use crate::heap::page::PAGE_SIZE;
    use crate::tag::NULL;

    fn test_pcb_and_heap() -> (Pcb, Heap) {
        let mut config = GcConfig::default();
        config.max_heap_size = 64 * PAGE_SIZE;
        let pcb = Pcb::new(config);
        let heap = Heap::new(&pcb).unwrap();
        (pcb, heap)
    }

    #[test]
    fn scan_region_traces_a_pair_pointing_into_the_collection_set() {
        let (pcb, heap) = test_pcb_and_heap();
        let mut allocator = MetaAllocator::new(1);

        let young_page = heap.acquire_page(&pcb, crate::heap::page::PageKind::Pairs, 0).unwrap();
        unsafe {
            memory::write_word(young_page, NULL.0);
            memory::write_word(young_page + WORD_SIZE, NULL.0);
        }
        let referent = TaggedPtr::with_tag(young_page, Tag::Pair);

        let to_space_page = heap.acquire_page(&pcb, crate::heap::page::PageKind::Pairs, 1).unwrap();
        unsafe {
            memory::write_word(to_space_page, referent.0);
            memory::write_word(to_space_page + WORD_SIZE, NULL.0);
            scan_region(
                &pcb,
                &heap,
                &mut allocator,
                Category::Pairs,
                to_space_page,
                to_space_page + 2 * WORD_SIZE,
            )
            .unwrap();

            let rewritten = TaggedPtr::new(memory::read_word(to_space_page));
            assert_ne!(rewritten, referent);
            assert_eq!(rewritten.tag(), Tag::Pair);
        }
    }
}
