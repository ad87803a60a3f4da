//! Root scan (§4.9 step 4): the entry point into the object graph for a
//! cycle. Visits, in the order the design fixes, the remembered set, the
//! live Scheme stack, C-callback locatives, the explicit pin table, and
//! finally the PCB's own root slots — evacuating whatever each one points
//! at and rewriting the slot in place.

use crate::allocator::MetaAllocator;
use crate::barrier::scan_dirty_cards;
use crate::error::Result;
use crate::heap::Heap;
use crate::marker::stack_scan;
use crate::memory;
use crate::pcb::Pcb;
use crate::relocate::evacuate;
use crate::tag::TaggedPtr;

/// Evacuate every root the collector does not discover by tracing an
/// already-evacuated object: the remembered set, the mutator's own stack,
/// C-callback locatives, the pin table, and the PCB's named root slots.
///
/// # Safety
/// Must run before the collect loop (§4.9 step 5): the heap outside the
/// collection set must still be in its pre-cycle, non-forwarded state.
pub unsafe fn scan_roots(
    pcb: &Pcb,
    heap: &Heap,
    allocator: &mut MetaAllocator,
    collect_gen: u8,
) -> Result<()> {
    scan_remembered_set(pcb, heap, allocator, collect_gen)?;
    scan_current_stack(pcb, heap, allocator)?;
    scan_callback_locatives(pcb, heap, allocator)?;
    scan_pin_table(pcb, heap, allocator)?;
    scan_pcb_roots(pcb, heap, allocator)?;
    Ok(())
}

unsafe fn scan_remembered_set(
    pcb: &Pcb,
    heap: &Heap,
    allocator: &mut MetaAllocator,
    collect_gen: u8,
) -> Result<()> {
    let mut first_err = None;
    scan_dirty_cards(pcb, collect_gen, |slot_addr| {
        if first_err.is_some() {
            return;
        }
        if let Err(e) = evacuate_slot_in_place(pcb, heap, allocator, slot_addr) {
            first_err = Some(e);
        }
    });
    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

unsafe fn scan_current_stack(pcb: &Pcb, heap: &Heap, allocator: &mut MetaAllocator) -> Result<()> {
    let (top, end) = {
        let stack = pcb.stack.lock();
        (stack.frame_pointer, stack.frame_base)
    };
    if top == 0 || end == 0 || top >= end {
        return Ok(());
    }
    stack_scan::walk_stack(pcb, heap, allocator, top, end)
}

unsafe fn scan_callback_locatives(pcb: &Pcb, heap: &Heap, allocator: &mut MetaAllocator) -> Result<()> {
    let callbacks = pcb.guardians.lock().callbacks.clone();
    for slot_addr in callbacks {
        evacuate_slot_in_place(pcb, heap, allocator, slot_addr)?;
    }
    Ok(())
}

unsafe fn scan_pin_table(pcb: &Pcb, heap: &Heap, allocator: &mut MetaAllocator) -> Result<()> {
    let pinned = pcb.guardians.lock().not_to_be_collected.clone();
    let mut updated = Vec::with_capacity(pinned.len());
    for obj in pinned {
        updated.push(evacuate(pcb, heap, allocator, obj)?);
    }
    pcb.guardians.lock().not_to_be_collected = updated;
    Ok(())
}

unsafe fn scan_pcb_roots(pcb: &Pcb, heap: &Heap, allocator: &mut MetaAllocator) -> Result<()> {
    let mut roots = pcb.roots.lock();
    roots.next_k = evacuate(pcb, heap, allocator, roots.next_k)?;
    roots.symbol_table = evacuate(pcb, heap, allocator, roots.symbol_table)?;
    roots.gensym_table = evacuate(pcb, heap, allocator, roots.gensym_table)?;
    roots.arg_list = evacuate(pcb, heap, allocator, roots.arg_list)?;
    roots.base_rtd = evacuate(pcb, heap, allocator, roots.base_rtd)?;
    for i in 0..roots.scratch_roots.len() {
        roots.scratch_roots[i] = evacuate(pcb, heap, allocator, roots.scratch_roots[i])?;
    }
    Ok(())
}

unsafe fn evacuate_slot_in_place(
    pcb: &Pcb,
    heap: &Heap,
    allocator: &mut MetaAllocator,
    slot_addr: usize,
) -> Result<()> {
    let value = TaggedPtr::new(memory::read_word(slot_addr));
    if value.is_immediate() {
        return Ok(());
    }
    let new_value = evacuate(pcb, heap, allocator, value)?;
    if new_value != value {
        memory::write_word(slot_addr, new_value.0);
    }
    Ok(())
}
