//! Stack walker (§4.4): evacuates the live portion of a Scheme stack segment
//! (or a frozen continuation body) frame by frame, using per-return-point
//! call-table metadata rather than any conservative scan of the whole range.
//!
//! # Call table layout
//!
//! The call table for a return point is the three words immediately below
//! the return address in memory: `[framesize, offset_field,
//! multivalue_return_point]`. A packed live bitmap, `⌈framesize/8⌉` bytes,
//! sits directly below the call table when `framesize > 0`; bit `j` of byte
//! `i` covers the slot at byte offset `framesize - (8*i+j)*WORD_SIZE` from
//! the frame's return-address word (so the bitmap is read back to front:
//! the slot nearest the *next* frame comes first). This exact word order
//! of the call table itself is this crate's own choice (§3 leaves its
//! internal layout unspecified beyond "frame-size word, offset-field,
//! multi-value return-point label, live bitmap"); the live-bitmap-to-slot
//! mapping is not this crate's choice and is implemented as specified.

use crate::allocator::MetaAllocator;
use crate::error::{GcError, Result};
use crate::heap::Heap;
use crate::pcb::Pcb;
use crate::relocate;
use crate::tag::{Tag, TaggedPtr, WORD_SIZE};

const CALL_TABLE_WORDS: usize = 3;
const CALL_TABLE_FRAMESIZE_WORD: usize = 0;
const CALL_TABLE_OFFSET_FIELD_WORD: usize = 1;

/// Correction applied when recovering a code object's address from a return
/// point's `offset_field` (§4.4: "subtracting `offset_field -
/// call_table_offset_displacement` from the return address"). This crate's
/// `offset_field` already measures the full byte distance from the code
/// object's tagged-pointer address to the return point, so the correction is
/// zero; the named constant documents the quantity rather than applying one.
pub const CALL_TABLE_OFFSET_DISPLACEMENT: usize = 0;

/// Walk `[top, end)` frame by frame, evacuating each frame's code object and
/// every live value slot, rewriting both in place.
///
/// # Safety
/// `[top, end)` must be a valid, frame-aligned stack or frozen-continuation
/// range: each return address in it must carry a call table at the layout
/// documented above.
pub unsafe fn walk_stack(
    pcb: &Pcb,
    heap: &Heap,
    allocator: &mut MetaAllocator,
    mut top: usize,
    end: usize,
) -> Result<()> {
    while top < end {
        top = walk_one_frame(pcb, heap, allocator, top)?;
    }
    if top != end {
        return Err(GcError::StackWalkMismatch { top, end });
    }
    Ok(())
}

unsafe fn walk_one_frame(
    pcb: &Pcb,
    heap: &Heap,
    allocator: &mut MetaAllocator,
    top: usize,
) -> Result<usize> {
    let return_addr = crate::memory::read_word(top);
    let call_table = return_addr - CALL_TABLE_WORDS * WORD_SIZE;
    let framesize_raw: usize =
        crate::memory::read_value(call_table + CALL_TABLE_FRAMESIZE_WORD * WORD_SIZE);
    let offset_field: usize =
        crate::memory::read_value(call_table + CALL_TABLE_OFFSET_FIELD_WORD * WORD_SIZE);

    let code_addr = return_addr - offset_field + CALL_TABLE_OFFSET_DISPLACEMENT;
    let code = TaggedPtr::with_tag(code_addr, Tag::HeaderLed);
    let new_code = relocate::evacuate(pcb, heap, allocator, code)?;
    if new_code != code {
        let new_return_addr = new_code.addr() + offset_field - CALL_TABLE_OFFSET_DISPLACEMENT;
        crate::memory::write_word(top, new_return_addr);
    }

    let framesize = framesize_raw as isize;
    if framesize < 0 {
        return Err(GcError::InvalidFrameSize(framesize));
    }

    if framesize == 0 {
        // Dynamic frame: the real slot count wasn't known at compile time
        // (e.g. `apply` forwarding a variable-length argument list), so the
        // compiler stashes the true byte size in the word above `top` and
        // marks every word after that live.
        let dynsize: usize = crate::memory::read_value(top + WORD_SIZE);
        let slots_base = top + 2 * WORD_SIZE;
        let mut offset = 0;
        while offset < dynsize {
            evacuate_slot(pcb, heap, allocator, slots_base + offset)?;
            offset += WORD_SIZE;
        }
        return Ok(top + 2 * WORD_SIZE + dynsize);
    }

    let framesize = framesize as usize;
    let bitmap_bytes = (framesize + 7) / 8;
    let bitmap_base = call_table - bitmap_bytes;
    for i in 0..bitmap_bytes {
        let byte: u8 = crate::memory::read_value(bitmap_base + i);
        if byte == 0 {
            continue;
        }
        for j in 0..8 {
            if byte & (1 << j) == 0 {
                continue;
            }
            let k = 8 * i + j;
            if let Some(slot_offset) = framesize.checked_sub(k * WORD_SIZE) {
                if slot_offset > 0 {
                    evacuate_slot(pcb, heap, allocator, top + slot_offset)?;
                }
            }
        }
    }

    Ok(top + framesize)
}

unsafe fn evacuate_slot(
    pcb: &Pcb,
    heap: &Heap,
    allocator: &mut MetaAllocator,
    slot_addr: usize,
) -> Result<()> {
    let value = TaggedPtr::new(crate::memory::read_word(slot_addr));
    if value.is_immediate() {
        return Ok(());
    }
    let new_value = relocate::evacuate(pcb, heap, allocator, value)?;
    if new_value != value {
        crate::memory::write_word(slot_addr, new_value.0);
    }
    Ok(())
}
