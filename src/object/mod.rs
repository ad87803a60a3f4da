//! Object model (§3): tagged-pointer layout, the forwarding-marker protocol,
//! and the size/shape accessors the evacuator and stack walker need to know
//! how many words a given object occupies.

pub mod header;
pub mod weak;

pub use header::{
    code_header, forwarding_target, install_forward, is_forwarded, object_size_words, CodeHeader,
};
pub use weak::fixup_weak_pairs;
