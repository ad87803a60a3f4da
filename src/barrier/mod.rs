//! Write barrier and remembered-set scanning (§4.6): the card-marked
//! mechanism that lets a minor collection avoid re-tracing every older
//! generation in full.

pub mod card_scan;

pub use card_scan::{mark_card, scan_dirty_cards};
