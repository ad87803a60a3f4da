//! Object evacuator (§4.3): copies a single live object out of a collected
//! generation into this cycle's to-space, installing a forwarding marker in
//! its old location so every other reference converges on one new address.
//!
//! # Minimum object size
//!
//! Installing a forward marker overwrites an object's first two words.
//! Every heap object is therefore assumed to occupy at least two words —
//! an invariant the (out-of-scope, §1 Non-goals) mutator-side allocator
//! upholds the same way real Scheme compilers pad small objects (a
//! zero-free-variable closure, for instance) to an even word count, so a
//! forwarded object never clobbers its next neighbor in from-space.

use crate::allocator::{allocate_large, category_for_page_kind, is_large, MetaAllocator};
use crate::error::{GcError, Result};
use crate::heap::page::{self, PageKind};
use crate::heap::Heap;
use crate::object;
use crate::pcb::Pcb;
use crate::relocate::reloc_vector::process_relocation_vector;
use crate::tag::{TaggedPtr, WORD_SIZE};

/// Evacuate `x` if it lives in this cycle's collection set, returning its
/// (possibly unchanged) new tagged pointer. Idempotent: calling this twice
/// on the same from-space address returns the same new pointer both times,
/// since the second call finds the forwarding marker the first call left
/// behind.
///
/// # Safety
/// `x` must be a tagged pointer into memory covered by `pcb`'s segment
/// vector — either an immediate (handled trivially) or the address of a
/// live, non-corrupt object.
pub unsafe fn evacuate(
    pcb: &Pcb,
    heap: &Heap,
    allocator: &mut MetaAllocator,
    x: TaggedPtr,
) -> Result<TaggedPtr> {
    if x.is_immediate() {
        return Ok(x);
    }

    let addr = x.addr();
    let (kind, page_generation, already_pinned) = {
        let tables = pcb.tables.read();
        let idx = page::page_index(addr, tables.memory_base);
        let entry = tables.segment_vector[idx];
        (entry.kind(), entry.generation(), entry.is_large_object())
    };

    if page_generation >= allocator.target_generation() {
        // Already as old as (or older than) this cycle reaches; not in the
        // collection set, left exactly where it is.
        return Ok(x);
    }

    if already_pinned {
        promote_in_place(pcb, heap, allocator, x, kind)?;
        return Ok(x);
    }

    if object::is_forwarded(x) {
        return Ok(object::forwarding_target(x));
    }

    let words = object::object_size_words(x);
    let category = category_for_page_kind(kind).ok_or_else(|| {
        GcError::Internal(format!("object at {addr:#x} lives on an unmapped (Hole) page"))
    })?;
    let size_bytes = words * WORD_SIZE;

    let new_addr = if is_large(size_bytes) {
        // Not yet tagged large (the from-space page predates this object
        // crossing the threshold, or the mutator-side allocator never
        // pinned it): the one-page meta region could never fit it, so it
        // gets its own freshly mapped large-object run instead and is
        // queued for the collect loop to trace like any other category
        // member (§4.3, §4.5).
        let dest = allocate_large(heap, pcb, size_bytes, kind, allocator.target_generation())?;
        allocator.push_pending(category, dest, dest + size_bytes);
        dest
    } else {
        allocator.alloc(pcb, heap, category, words)?
    };
    crate::memory::copy_memory(addr, new_addr, size_bytes);
    let new_ptr = TaggedPtr::with_tag(new_addr, x.tag());
    object::install_forward(x, new_ptr);
    Ok(new_ptr)
}

/// Promote a pinned large object's generation in place and, the first time
/// this cycle reaches it, follow its outgoing references the way a copy
/// would have: its data area is enqueued for the collect loop to trace
/// (§4.3), or, for large code, processed through the relocation-vector
/// protocol directly (§4.5). The new-generation bit doubles as "already
/// handled this cycle" — every prior cycle's step 9 clears it, so finding
/// it already set here means an earlier reference already queued this
/// object and a second reference must not queue it again.
unsafe fn promote_in_place(
    pcb: &Pcb,
    heap: &Heap,
    allocator: &mut MetaAllocator,
    x: TaggedPtr,
    kind: PageKind,
) -> Result<()> {
    let addr = x.addr();
    let new_generation = allocator.target_generation();
    let already_handled = {
        let mut tables = pcb.tables.write();
        let idx = page::page_index(addr, tables.memory_base);
        let handled = tables.segment_vector[idx].is_new_generation();
        tables.segment_vector[idx].set_generation(new_generation);
        tables.segment_vector[idx].set_meta_dirty(page::dirty_bit_for_generation(new_generation));
        tables.segment_vector[idx].set_new_generation(true);
        handled
    };
    if already_handled {
        return Ok(());
    }

    if kind == PageKind::Code {
        return process_relocation_vector(pcb, heap, allocator, x);
    }

    let words = object::object_size_words(x);
    let category = category_for_page_kind(kind).ok_or_else(|| {
        GcError::Internal(format!("pinned object at {addr:#x} lives on an unmapped (Hole) page"))
    })?;
    allocator.push_pending(category, addr, addr + words * WORD_SIZE);
    Ok(())
}
