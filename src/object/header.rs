//! Forwarding-marker protocol and object-shape accessors (§3, §4.3).
//!
//! Every concrete object shape the evacuator and card scanner need to know
//! the size of is described here as a fixed word layout rooted at a tagged
//! pointer's address. The sentinels, forwarding marker, relocation vector,
//! and call-table displacement are pinned by the data model; the exact slot
//! order within each kind is this crate's own layout, chosen to match the
//! behavior those sections describe.

use crate::memory;
use crate::tag::{HeaderKind, Tag, TaggedPtr, IK_FORWARD_PTR, WORD_SIZE};

/// True if `x`'s referent has already been forwarded (§3): its first word is
/// the distinguished `IK_FORWARD_PTR` marker.
///
/// # Safety
/// `x` must be a non-immediate tagged pointer into mapped heap memory.
pub unsafe fn is_forwarded(x: TaggedPtr) -> bool {
    memory::read_word(x.addr()) == IK_FORWARD_PTR
}

/// Read the new tagged pointer out of an already-forwarded object's second
/// word. Caller must have checked [`is_forwarded`] first.
///
/// # Safety
/// `x` must be forwarded.
pub unsafe fn forwarding_target(x: TaggedPtr) -> TaggedPtr {
    TaggedPtr::new(memory::read_word(x.addr() + WORD_SIZE))
}

/// Destructively install a forwarding marker in `from`'s header, pointing at
/// `to` (§3, §9 "forwarding via overwritten header"). `from`'s original
/// first two words are gone after this call; the evacuator must have
/// already copied them to `to` before calling this.
///
/// # Safety
/// `from` must not already be forwarded; `from`'s referent must have at
/// least two words.
pub unsafe fn install_forward(from: TaggedPtr, to: TaggedPtr) {
    memory::write_word(from.addr(), IK_FORWARD_PTR);
    memory::write_word(from.addr() + WORD_SIZE, to.0);
}

/// A code object's metadata (§4.5): `[CODE_TAG, code_size, free_vars,
/// relocation_vector, annotation]`, followed by `code_size` bytes of raw
/// machine code.
pub struct CodeHeader {
    pub code_size_bytes: usize,
    pub free_vars: usize,
    pub relocation_vector: TaggedPtr,
    pub annotation: TaggedPtr,
}

const CODE_SIZE_WORD: usize = 1;
const CODE_FREE_VARS_WORD: usize = 2;
const CODE_RELOC_VECTOR_WORD: usize = 3;
const CODE_ANNOTATION_WORD: usize = 4;
/// Words of metadata preceding a code object's raw instruction bytes.
pub const CODE_HEADER_WORDS: usize = 5;

/// Read a code object's metadata.
///
/// # Safety
/// `code`'s referent must be a code object (first word `CODE_TAG`).
pub unsafe fn code_header(code: TaggedPtr) -> CodeHeader {
    let base = code.addr();
    let size_word: usize = memory::read_value(base + CODE_SIZE_WORD * WORD_SIZE);
    let free_vars_word: usize = memory::read_value(base + CODE_FREE_VARS_WORD * WORD_SIZE);
    CodeHeader {
        code_size_bytes: TaggedPtr::new(size_word).fixnum_value().unwrap_or(0) as usize,
        free_vars: TaggedPtr::new(free_vars_word).fixnum_value().unwrap_or(0) as usize,
        relocation_vector: memory::read_value(base + CODE_RELOC_VECTOR_WORD * WORD_SIZE),
        annotation: memory::read_value(base + CODE_ANNOTATION_WORD * WORD_SIZE),
    }
}

/// Total words (metadata + instruction bytes, word-rounded) of a code object.
///
/// # Safety
/// `code`'s referent must be a code object.
pub unsafe fn code_object_words(code: TaggedPtr) -> usize {
    let header = code_header(code);
    CODE_HEADER_WORDS + (header.code_size_bytes + WORD_SIZE - 1) / WORD_SIZE
}

/// Symbol record layout: `[SYMBOL_TAG, name, value, proc, plist, gensym_id]`.
pub const SYMBOL_WORDS: usize = 6;
pub const SYMBOL_NAME_WORD: usize = 1;
pub const SYMBOL_VALUE_WORD: usize = 2;
pub const SYMBOL_PROC_WORD: usize = 3;
pub const SYMBOL_PLIST_WORD: usize = 4;

/// Scheme continuation body layout: `[CONTINUATION_TAG, stack_size_bytes,
/// frozen_stack_addr, next_continuation]`. The frozen stack itself is a
/// separate raw-data blob pointed to by `frozen_stack_addr` (§4.3): the
/// continuation's body goes to the pointers region, the blob to raw-data.
pub const CONTINUATION_WORDS: usize = 4;
pub const CONTINUATION_STACK_SIZE_WORD: usize = 1;
pub const CONTINUATION_STACK_ADDR_WORD: usize = 2;
pub const CONTINUATION_NEXT_WORD: usize = 3;

/// tcbucket layout: `[link_pair, key, value]` (§4.3, §4.8).
pub const TCBUCKET_WORDS: usize = 3;
pub const TCBUCKET_KEY_WORD: usize = 1;
pub const TCBUCKET_VALUE_WORD: usize = 2;

/// Number of fields an RTD (record-type descriptor) describes. RTDs are
/// themselves plain vectors whose first word is the fixnum field count
/// (§3's "vector/rtd" header-led row).
///
/// # Safety
/// `rtd` must be a vector-shaped header-led object.
pub(crate) unsafe fn rtd_field_count(rtd: TaggedPtr) -> usize {
    let first_word: usize = memory::read_value(rtd.addr());
    TaggedPtr::new(first_word).fixnum_value().unwrap_or(0) as usize
}

/// Total words occupied by the tagged pointer's referent: what the
/// evacuator copies and how far the word-by-word pointer-page scanner
/// advances. Immediates/fixnums have no referent and are not valid inputs.
///
/// # Safety
/// `x` must be a non-immediate tagged pointer to a live object (not
/// forwarded, not a hole) whose first word is a recognized discriminator.
pub unsafe fn object_size_words(x: TaggedPtr) -> usize {
    match x.tag() {
        Tag::Pair => 2,
        Tag::Closure => {
            let code: TaggedPtr = memory::read_value(x.addr());
            1 + code_header(code).free_vars
        }
        Tag::String | Tag::Bytevector => {
            let len_word: usize = memory::read_value(x.addr());
            let len = TaggedPtr::new(len_word).fixnum_value().unwrap_or(0) as usize;
            1 + (len + WORD_SIZE - 1) / WORD_SIZE
        }
        Tag::HeaderLed | Tag::SymbolOrRecord => {
            let first_word: usize = memory::read_value(x.addr());
            match HeaderKind::classify(first_word) {
                Some(HeaderKind::Vector) => {
                    let len = TaggedPtr::new(first_word).fixnum_value().unwrap_or(0) as usize;
                    1 + len
                }
                Some(HeaderKind::Code) => code_object_words(x),
                Some(HeaderKind::Symbol) => SYMBOL_WORDS,
                Some(HeaderKind::Continuation) => CONTINUATION_WORDS,
                Some(HeaderKind::SystemContinuation) => {
                    let len_word: usize = memory::read_value(x.addr() + WORD_SIZE);
                    let len = TaggedPtr::new(len_word).fixnum_value().unwrap_or(0) as usize;
                    2 + (len + WORD_SIZE - 1) / WORD_SIZE
                }
                Some(HeaderKind::Flonum) => 2,
                Some(HeaderKind::Ratnum) | Some(HeaderKind::Compnum) | Some(HeaderKind::Cflonum) => 3,
                Some(HeaderKind::ForeignPointer) => 2,
                Some(HeaderKind::Bignum) => {
                    let digits_word: usize = memory::read_value(x.addr() + WORD_SIZE);
                    let digits = TaggedPtr::new(digits_word).fixnum_value().unwrap_or(0) as usize;
                    2 + digits
                }
                Some(HeaderKind::Port) => {
                    let field_count_word: usize = memory::read_value(x.addr() + WORD_SIZE);
                    let field_count =
                        TaggedPtr::new(field_count_word).fixnum_value().unwrap_or(0) as usize;
                    2 + field_count
                }
                Some(HeaderKind::Record) => 1 + rtd_field_count(TaggedPtr::new(first_word)),
                Some(HeaderKind::TcBucket) => TCBUCKET_WORDS,
                None => 0,
            }
        }
        Tag::Fixnum | Tag::Immediate => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag::NULL;

    fn alloc_words(n: usize) -> usize {
        let layout = std::alloc::Layout::array::<usize>(n.max(1)).unwrap();
        unsafe { std::alloc::alloc_zeroed(layout) as usize }
    }

    #[test]
    fn forward_marker_round_trips() {
        let addr = alloc_words(2);
        let from = TaggedPtr::with_tag(addr, Tag::Pair);
        unsafe {
            assert!(!is_forwarded(from));
            install_forward(from, NULL);
            assert!(is_forwarded(from));
            assert_eq!(forwarding_target(from), NULL);
        }
    }

    #[test]
    fn pair_is_two_words() {
        let addr = alloc_words(2);
        let p = TaggedPtr::with_tag(addr, Tag::Pair);
        unsafe { assert_eq!(object_size_words(p), 2) };
    }

    #[test]
    fn vector_size_follows_fixnum_length() {
        let addr = alloc_words(4);
        unsafe { memory::write_value(addr, TaggedPtr::fixnum(3).0) };
        let v = TaggedPtr::with_tag(addr, Tag::HeaderLed);
        unsafe { assert_eq!(object_size_words(v), 4) };
    }
}
