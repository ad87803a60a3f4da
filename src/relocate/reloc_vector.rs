//! Relocation-vector processor (§4.5): rewrites the object references and
//! PC-relative jumps embedded in a code object's instruction stream after
//! the code object itself has moved (or, for a pinned large code object,
//! in place without moving it at all).
//!
//! A relocation vector is a header-led vector of fixnum *records*. Each
//! record's low bits are a tag, its high bits a byte displacement (`disp`)
//! into the code object's instruction stream:
//!
//! | tag | words | meaning                                              |
//! |-----|-------|-------------------------------------------------------|
//! | 0   | 2     | vanilla object reference at `disp`                     |
//! | 1   | 3     | displaced reference (`base + offset`) at `disp`        |
//! | 2   | 3     | PC-relative jump: 32-bit signed delta at `disp`        |
//! | 3   | 2     | foreign (C) address, opaque, never relocated           |

use crate::allocator::MetaAllocator;
use crate::error::{GcError, Result};
use crate::heap::Heap;
use crate::object::header::{code_header, CODE_HEADER_WORDS};
use crate::pcb::Pcb;
use crate::relocate::evacuator::evacuate;
use crate::tag::{TaggedPtr, WORD_SIZE};

const RECORD_TAG_MASK: usize = 0b11;
const RECORD_TAG_SHIFT: u32 = 2;

enum RecordTag {
    Vanilla,
    Displaced,
    Jump,
    Foreign,
}

impl RecordTag {
    fn from_bits(bits: usize) -> Result<RecordTag> {
        match bits {
            0 => Ok(RecordTag::Vanilla),
            1 => Ok(RecordTag::Displaced),
            2 => Ok(RecordTag::Jump),
            3 => Ok(RecordTag::Foreign),
            other => Err(GcError::RelocationTagOutOfRange(other as u8)),
        }
    }

    fn width_words(&self) -> usize {
        match self {
            RecordTag::Vanilla | RecordTag::Foreign => 2,
            RecordTag::Displaced | RecordTag::Jump => 3,
        }
    }
}

/// Process `code`'s relocation vector, rewriting embedded references and
/// jumps to account for everything this cycle moved. `code` must already be
/// at its final (post-evacuation, or pinned-in-place) address: the caller
/// evacuates the code object itself before calling this.
///
/// # Safety
/// `code` must be a code object (first word `CODE_TAG`) at a stable final
/// address.
pub unsafe fn process_relocation_vector(
    pcb: &Pcb,
    heap: &Heap,
    allocator: &mut MetaAllocator,
    code: TaggedPtr,
) -> Result<()> {
    let header = code_header(code);
    let reloc_vector = evacuate(pcb, heap, allocator, header.relocation_vector)?;
    evacuate(pcb, heap, allocator, header.annotation)?;

    if reloc_vector.is_immediate() {
        return Ok(());
    }

    let code_start = code.addr() + CODE_HEADER_WORDS * WORD_SIZE;
    let vector_addr = reloc_vector.addr();
    let len_word: usize = crate::memory::read_value(vector_addr);
    let record_count = TaggedPtr::new(len_word).fixnum_value().unwrap_or(0) as usize;

    let mut i = 0;
    while i < record_count {
        let record_word: usize =
            crate::memory::read_value(vector_addr + (1 + i) * WORD_SIZE);
        let record = TaggedPtr::new(record_word);
        let record_value = record.fixnum_value().ok_or(GcError::Internal(
            "relocation record header is not a fixnum".to_string(),
        ))? as usize;
        let tag = RecordTag::from_bits(record_value & RECORD_TAG_MASK)?;
        let disp = record_value >> RECORD_TAG_SHIFT;

        match tag {
            RecordTag::Vanilla => {
                let target: TaggedPtr =
                    crate::memory::read_value(vector_addr + (2 + i) * WORD_SIZE);
                let new_target = evacuate(pcb, heap, allocator, target)?;
                crate::memory::write_value(code_start + disp, new_target.0);
            }
            RecordTag::Displaced => {
                let target: TaggedPtr =
                    crate::memory::read_value(vector_addr + (2 + i) * WORD_SIZE);
                let offset_word: usize =
                    crate::memory::read_value(vector_addr + (3 + i) * WORD_SIZE);
                let offset = TaggedPtr::new(offset_word).fixnum_value().unwrap_or(0) as usize;
                let new_target = evacuate(pcb, heap, allocator, target)?;
                crate::memory::write_value(code_start + disp, new_target.addr() + offset);
            }
            RecordTag::Jump => {
                let target: TaggedPtr =
                    crate::memory::read_value(vector_addr + (2 + i) * WORD_SIZE);
                let offset_word: usize =
                    crate::memory::read_value(vector_addr + (3 + i) * WORD_SIZE);
                let offset = TaggedPtr::new(offset_word).fixnum_value().unwrap_or(0) as usize;
                let new_target = evacuate(pcb, heap, allocator, target)?;
                let jump_site = code_start + disp;
                let delta = (new_target.addr() + offset) as i64 - (jump_site as i64 + 4);
                if delta < i32::MIN as i64 || delta > i32::MAX as i64 {
                    return Err(GcError::JumpOverflow(delta));
                }
                crate::memory::write_value(jump_site, delta as i32);
            }
            RecordTag::Foreign => {
                // Opaque C address: not relocated, nothing to rewrite.
            }
        }

        i += tag.width_words();
    }

    Ok(())
}

/// Whether `code_size_bytes` crosses the large-object threshold and must be
/// pinned (re-tagged in place) rather than copied (§4.3, §4.5).
pub fn is_large_code_object(code_size_bytes: usize) -> bool {
    crate::allocator::is_large(CODE_HEADER_WORDS * WORD_SIZE + code_size_bytes)
}
