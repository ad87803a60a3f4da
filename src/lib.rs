//! # A moving, generational, BIBOP garbage collector for tagged pointers
//!
//! This crate implements a stop-the-world, single-threaded collector for a
//! tagged-pointer Scheme runtime, in the style of Ikarus/ChezScheme's
//! collector: objects are laid out BIBOP-style (Big Bag Of Pages — a page's
//! kind and generation live in a side table, not an object header), the
//! heap is generational with five generations and an escalator that picks
//! how far back a cycle reaches from a monotonic collection counter, and
//! collection is copying: live objects are evacuated into fresh to-space
//! pages and a forwarding marker is left behind so every other pointer to
//! the same object converges on the new location.
//!
//! ## Overview
//!
//! - **BIBOP segment vector** ([`heap::page::SegmentEntry`]): every page's
//!   kind, generation, and large-object/new-generation/dealloc bits live in
//!   one word per page, not scattered across object headers.
//! - **Forwarding-marker evacuation** ([`relocate::evacuate`]): copying a
//!   live object overwrites its old first word with a sentinel and its
//!   second word with the new address; evacuating an already-forwarded
//!   object is a no-op that returns the existing forwarding target.
//! - **Generational escalator** ([`allocator::generation`]): the generation
//!   a cycle collects is a function of the monotonic collection id, so
//!   deeper generations are swept exponentially less often.
//! - **Precise stack scanning** ([`marker::stack_scan`]): the mutator's
//!   call-table metadata gives the collector an exact live-slot bitmap per
//!   frame, rather than conservatively scanning the whole stack.
//! - **Card-marked remembered set** ([`barrier::card_scan`]): a write
//!   barrier dirties a nibble per 512-byte card so a minor cycle need not
//!   rescan the whole older-generation heap for pointers into the nursery.
//! - **Weak pairs and guardians** ([`object::weak`], [`runtime::guardian`]):
//!   weak pairs resolve to a broken-weak-pointer sentinel instead of
//!   keeping their referent alive; guardians revive objects that would
//!   otherwise die and hand them to a tconc finalization queue instead.
//! - **Structured diagnostics** ([`stats`]): every cycle emits a
//!   [`stats::GcEvent`] trail through the `log` facade and into a bounded
//!   in-process ring, alongside the aggregate [`stats::GcStats`] counters.
//!
//! ## Quick start
//!
//! ```rust
//! use chezmoi_gc::{GcConfig, Runtime};
//!
//! fn main() -> chezmoi_gc::error::Result<()> {
//!     let mut config = GcConfig::default();
//!     config.max_heap_size = 64 * 1024 * 1024;
//!     let runtime = Runtime::new(config)?;
//!
//!     // Ask for a cycle only if the nursery can't satisfy the request.
//!     runtime.collect_check(4096)?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Safety
//!
//! Almost everything below [`Runtime`] is `unsafe`: the collector reads and
//! writes raw tagged-pointer words directly out of mapped memory, and its
//! correctness depends on invariants a Scheme compiler's code generator is
//! responsible for upholding (accurate call-table metadata, a consistent
//! segment vector, properly tagged words). [`Runtime`] and
//! [`gc::GarbageCollector`] are the crate's safe boundary for everything
//! that doesn't require touching raw heap memory directly.
//!
//! ## Modules
//!
//! - [`allocator`]: the meta-page bump allocator, its six object categories,
//!   generation escalator, and large-object path
//! - [`barrier`]: the card-marking write barrier and remembered-set scanner
//! - [`config`]: collector configuration and validation
//! - [`error`]: the crate's error taxonomy and fatal-abort policy
//! - [`gc`]: the §4.9 cycle driver
//! - [`heap`]: virtual-memory reservation, page acquisition, and the BIBOP
//!   segment vector
//! - [`marker`]: root discovery (stack, remembered set, PCB roots)
//! - [`memory`]: thin unsafe word-level memory primitives
//! - [`object`]: object headers, sizing, and weak-pair fixup
//! - [`pcb`]: the process control block, the collector's only mutable state
//! - [`relocate`]: the evacuator, code relocation-vector processor, and
//!   to-space region scanner
//! - [`runtime`]: the external interface (`collect`, `collect_check`,
//!   guardians, diagnostics)
//! - [`stats`]: per-cycle timing and collection counters
//! - [`tag`]: the tagged-pointer representation
//! - [`util`]: small generic helpers (alignment, atomics, debug formatting)

pub mod gc;
pub mod config;
pub mod error;

pub mod allocator;
pub mod heap;
pub mod memory;
pub mod object;
pub mod pcb;
pub mod tag;

pub mod barrier;
pub mod marker;
pub mod relocate;

pub mod runtime;
pub mod stats;

pub mod util;

pub use config::GcConfig;
pub use error::{GcError, Result};
pub use gc::GarbageCollector;
pub use runtime::Runtime;

/// Crate version string from Cargo.toml.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build a [`Runtime`] with default configuration.
pub fn init() -> Result<Runtime> {
    Runtime::new(GcConfig::default())
}

/// Build a [`Runtime`] with a caller-supplied configuration.
pub fn init_with_config(config: GcConfig) -> Result<Runtime> {
    Runtime::new(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_with_default_config_succeeds() {
        assert!(init().is_ok());
    }

    #[test]
    fn default_config_validates() {
        let config = GcConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn version_string_is_not_empty() {
        assert!(!VERSION.is_empty());
    }
}
