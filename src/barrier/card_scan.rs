//! Card scanner (§4.6): after the stop-the-world trace reaches a fixed
//! point, every older-generation page whose dirty vector still records a
//! pointer into the just-collected range is walked, treating each live
//! outgoing pointer as an additional root. The dirty-bit/cleanup-mask
//! machinery (`heap::page`) gates which *pages* qualify at 512-byte-card
//! granularity; the walk itself proceeds object-by-object across the whole
//! page, since a generation-surviving page carries no separate record of
//! how far it was filled (§9: old pages are segment-vector state only).

use crate::allocator::clamp_generation;
use crate::heap::page::{self, PageKind, CARDS_PER_PAGE, PAGE_SIZE};
use crate::memory;
use crate::object::header::{
    self, CONTINUATION_NEXT_WORD, CONTINUATION_STACK_ADDR_WORD, CONTINUATION_WORDS, SYMBOL_NAME_WORD,
    SYMBOL_PLIST_WORD, SYMBOL_PROC_WORD, SYMBOL_VALUE_WORD, SYMBOL_WORDS, TCBUCKET_KEY_WORD,
    TCBUCKET_VALUE_WORD, TCBUCKET_WORDS,
};
use crate::pcb::Pcb;
use crate::tag::{HeaderKind, Tag, TaggedPtr, CODE_TAG, WORD_SIZE};

const PAIR_WORDS: usize = 2;

/// Write barrier (§4.6): called whenever a pointer-bearing slot at
/// `slot_addr` is stored with a reference to an object living in
/// `referent_gen`. Marks the card's nibble so a later cycle collecting
/// `referent_gen` or younger knows to re-scan this slot as a root.
pub fn mark_card(pcb: &Pcb, slot_addr: usize, referent_gen: u8) {
    let bit = page::dirty_bit_for_generation(referent_gen);
    if bit == 0 {
        return;
    }
    let mut tables = pcb.tables.write();
    let page_idx = page::page_index(page::page_base(slot_addr), tables.memory_base);
    let page_addr = tables.memory_base + page_idx * PAGE_SIZE;
    let card_idx = page::card_of_offset(slot_addr - page_addr);
    let dirty_word = &mut tables.dirty_vector[page_idx];
    page::or_card_nibble(dirty_word, card_idx, bit);
}

/// Walk every dirty, scannable, older-than-`collect_gen` page, handing each
/// outgoing pointer slot's address to `root`. Returns the number of slots
/// visited. `root` is responsible for reading the slot, evacuating the
/// referent if it lives at a generation within the collection set, and
/// writing the (possibly forwarded) pointer back.
///
/// # Safety
/// The heap outside the collection set must be in a consistent,
/// non-forwarded state (true throughout §4.9 step 4's root scan).
pub unsafe fn scan_dirty_cards<F: FnMut(usize)>(pcb: &Pcb, collect_gen: u8, mut root: F) -> usize {
    let full_mask = page::dirty_mask(collect_gen);
    if full_mask == 0 {
        return 0;
    }
    let target_generation = clamp_generation(collect_gen + 1);
    let card_test = (full_mask & 0xF) as u8;
    let (memory_base, page_count) = {
        let tables = pcb.tables.read();
        (tables.memory_base, tables.segment_vector.len())
    };
    let mut visited = 0;

    for page_idx in 0..page_count {
        let (entry, dirty_word) = {
            let tables = pcb.tables.read();
            (tables.segment_vector[page_idx], tables.dirty_vector[page_idx])
        };
        if entry.is_hole() || entry.kind() == PageKind::RawData || entry.kind() == PageKind::Code {
            continue;
        }
        if entry.generation() <= collect_gen || dirty_word == 0 {
            continue;
        }
        let any_dirty_card = (0..CARDS_PER_PAGE)
            .any(|card_idx| page::read_card_nibble(dirty_word, card_idx) & card_test != 0);
        if !any_dirty_card {
            continue;
        }

        let page_addr = memory_base + page_idx * PAGE_SIZE;
        // Recomputed from the destination page of every outgoing pointer
        // this walk rewrites, rather than just narrowed from what was
        // already there (§4.6: "the OR of the meta-dirty bits of the
        // destination pages determines the new nibble value for that
        // card").
        let mut card_meta = [0u8; CARDS_PER_PAGE];
        let mut offset = 0usize;
        while offset < PAGE_SIZE {
            let slot_addr = page_addr + offset;
            let words = scan_object_at(pcb, target_generation, slot_addr, entry.kind(), &mut |addr| {
                root(addr);
                let card_idx = page::card_of_offset(addr - page_addr);
                let bit = unsafe { destination_meta_dirty(pcb, addr) };
                card_meta[card_idx] |= bit;
            });
            offset += words.max(1) * WORD_SIZE;
            visited += 1;
        }

        let mut new_word = 0u32;
        for (card_idx, bit) in card_meta.into_iter().enumerate() {
            page::or_card_nibble(&mut new_word, card_idx, bit);
        }
        let mut tables = pcb.tables.write();
        tables.dirty_vector[page_idx] = new_word & page::cleanup_mask(entry.generation());
    }

    visited
}

/// The meta-dirty nibble of whatever page `slot_addr` currently points at,
/// after evacuation has run. 0 for an immediate or an address past the
/// live segment vector.
unsafe fn destination_meta_dirty(pcb: &Pcb, slot_addr: usize) -> u8 {
    let value = TaggedPtr::new(memory::read_word(slot_addr));
    if value.is_immediate() {
        return 0;
    }
    let tables = pcb.tables.read();
    let idx = page::page_index(value.addr(), tables.memory_base);
    if idx >= tables.segment_vector.len() {
        return 0;
    }
    tables.segment_vector[idx].meta_dirty()
}

/// Whether `ptr` lives on a page strictly older (lower-generation) than
/// `target_generation` — this cycle's collection set (§4.9 step 1).
fn is_in_collection_set(pcb: &Pcb, target_generation: u8, ptr: TaggedPtr) -> bool {
    if ptr.is_immediate() {
        return false;
    }
    let tables = pcb.tables.read();
    let idx = page::page_index(ptr.addr(), tables.memory_base);
    if idx >= tables.segment_vector.len() {
        return false;
    }
    tables.segment_vector[idx].generation() < target_generation
}

/// Scan one object at `addr` on a page of the given `kind`, handing each
/// outgoing pointer slot to `root`. Returns the object's size in words, so
/// the caller can advance to the next object.
///
/// # Safety
/// `addr` must be the start of a live (or zero-filled unused tail) object
/// matching `kind`'s shape.
///
/// Shared with the collect loop's to-space region scanner
/// ([`crate::relocate::scan_region`]): tracing a freshly evacuated region and
/// re-scanning a remembered-set page visit the same per-kind shapes, just
/// with a different callback for each outgoing slot.
pub(crate) unsafe fn scan_object_at<F: FnMut(usize)>(
    pcb: &Pcb,
    target_generation: u8,
    addr: usize,
    kind: PageKind,
    root: &mut F,
) -> usize {
    match kind {
        PageKind::Pairs => {
            root(addr);
            root(addr + WORD_SIZE);
            PAIR_WORDS
        }
        PageKind::WeakPairs => {
            // The car is the weak slot, fixed up separately (§4.7) — it
            // must never be traced here. Only the cdr, the strong spine,
            // is rooted.
            root(addr + WORD_SIZE);
            PAIR_WORDS
        }
        PageKind::Symbols => {
            root(addr + SYMBOL_NAME_WORD * WORD_SIZE);
            root(addr + SYMBOL_VALUE_WORD * WORD_SIZE);
            root(addr + SYMBOL_PROC_WORD * WORD_SIZE);
            root(addr + SYMBOL_PLIST_WORD * WORD_SIZE);
            SYMBOL_WORDS
        }
        PageKind::Pointers => scan_generic_pointer_object(pcb, target_generation, addr, root),
        PageKind::Code | PageKind::RawData | PageKind::Hole => PAGE_SIZE / WORD_SIZE,
    }
}

/// Every shape that can land in the generic `Pointers` category: vectors,
/// closures, records, continuations, and the boxed-number/port kinds.
/// Closures and records both start with a single outgoing tagged pointer
/// and are otherwise indistinguishable from the first word's tag bits
/// alone, so disambiguation peeks one level further: a closure's first
/// word points at a code object (first word `CODE_TAG`); a record's first
/// word points at an RTD (a plain vector).
///
/// # Safety
/// `addr` must be the start of a live `Pointers`-page object, or a
/// zero-filled unused tail word (classified as a zero-length vector).
unsafe fn scan_generic_pointer_object<F: FnMut(usize)>(
    pcb: &Pcb,
    target_generation: u8,
    addr: usize,
    root: &mut F,
) -> usize {
    let first_word = memory::read_word(addr);
    let first = TaggedPtr::new(first_word);
    if first.is_fixnum() {
        let len = first.fixnum_value().unwrap_or(0) as usize;
        for i in 0..len {
            root(addr + (1 + i) * WORD_SIZE);
        }
        return 1 + len;
    }

    match HeaderKind::classify(first_word) {
        Some(HeaderKind::Continuation) => {
            root(addr + CONTINUATION_STACK_ADDR_WORD * WORD_SIZE);
            root(addr + CONTINUATION_NEXT_WORD * WORD_SIZE);
            CONTINUATION_WORDS
        }
        Some(HeaderKind::Ratnum) | Some(HeaderKind::Compnum) | Some(HeaderKind::Cflonum) => {
            root(addr + WORD_SIZE);
            root(addr + 2 * WORD_SIZE);
            3
        }
        Some(HeaderKind::Flonum) | Some(HeaderKind::ForeignPointer) => 2,
        Some(HeaderKind::Bignum) => {
            let digits = TaggedPtr::new(memory::read_word(addr + WORD_SIZE))
                .fixnum_value()
                .unwrap_or(0) as usize;
            2 + digits
        }
        Some(HeaderKind::Port) => {
            let field_count = TaggedPtr::new(memory::read_word(addr + WORD_SIZE))
                .fixnum_value()
                .unwrap_or(0) as usize;
            for i in 0..field_count {
                root(addr + (2 + i) * WORD_SIZE);
            }
            2 + field_count
        }
        Some(HeaderKind::SystemContinuation) => {
            let len = TaggedPtr::new(memory::read_word(addr + WORD_SIZE))
                .fixnum_value()
                .unwrap_or(0) as usize;
            2 + (len + WORD_SIZE - 1) / WORD_SIZE
        }
        Some(HeaderKind::TcBucket) => {
            root(addr);
            let key_before = TaggedPtr::new(memory::read_word(addr + TCBUCKET_KEY_WORD * WORD_SIZE));
            let key_collected = is_in_collection_set(pcb, target_generation, key_before);
            root(addr + TCBUCKET_KEY_WORD * WORD_SIZE);
            root(addr + TCBUCKET_VALUE_WORD * WORD_SIZE);
            if key_collected {
                pcb.caches
                    .lock()
                    .tcbucket_push_queue
                    .push(TaggedPtr::with_tag(addr, Tag::HeaderLed));
            }
            TCBUCKET_WORDS
        }
        Some(HeaderKind::Record) => {
            let target_first_word = memory::read_word(first.addr());
            if target_first_word == CODE_TAG {
                let code = first;
                root(addr);
                let free_vars = header::code_header(code).free_vars;
                for i in 0..free_vars {
                    root(addr + (1 + i) * WORD_SIZE);
                }
                1 + free_vars
            } else {
                root(addr);
                let n = header::rtd_field_count(first);
                for i in 0..n {
                    root(addr + (1 + i) * WORD_SIZE);
                }
                1 + n
            }
        }
        // Symbols and Code never land on a Pointers-kind page by
        // construction (§4.2); reaching either sentinel here, or an
        // unclassifiable word, means heap corruption. The card scanner
        // has no recovery path of its own; advance by one word so the
        // rest of the page is still visited, leaving the mismatch for
        // `verify_integrity` (§4.10) to catch.
        Some(HeaderKind::Symbol) | Some(HeaderKind::Code) | None => 1,
    }
}
