//! Runtime integration (§6): the external interface a host Scheme runtime
//! actually calls — `collect`, `collect_check`, the integrity-check
//! toggles, and the two print paths used for diagnostics.

pub mod guardian;

use crate::config::GcConfig;
use crate::error::Result;
use crate::gc::GarbageCollector;
use crate::heap::Heap;
use crate::pcb::Pcb;
use crate::tag::TaggedPtr;
use crate::util::debug::format_address;

/// Owns the collector and exposes §6's external interface. A process links
/// exactly one of these; nothing here reaches for global state.
pub struct Runtime {
    gc: GarbageCollector,
}

impl Runtime {
    pub fn new(config: GcConfig) -> Result<Self> {
        Ok(Self {
            gc: GarbageCollector::new(config)?,
        })
    }

    pub fn pcb(&self) -> &Pcb {
        self.gc.pcb()
    }

    pub fn heap(&self) -> &Heap {
        self.gc.heap()
    }

    pub fn gc(&self) -> &GarbageCollector {
        &self.gc
    }

    /// §6: run a collection cycle unconditionally.
    pub fn collect(&self, requested_bytes: usize) -> Result<()> {
        self.gc.collect(requested_bytes)
    }

    /// §6/§4.10: run a collection cycle only if current headroom can't
    /// satisfy `requested_bytes`.
    pub fn collect_check(&self, requested_bytes: usize) -> Result<bool> {
        self.gc.collect_check(requested_bytes)
    }

    pub fn enable_integrity_checks(&self) {
        self.gc.enable_integrity_checks();
    }

    pub fn disable_integrity_checks(&self) {
        self.gc.disable_integrity_checks();
    }

    /// §6: print a Scheme value's tag and address for debugging. Not a
    /// full printer (no pair/vector contents) — just enough to identify
    /// what a pointer refers to without risking a trace through
    /// possibly-inconsistent heap state.
    pub fn scheme_print(&self, value: TaggedPtr) {
        if let Some(fixnum) = value.fixnum_value() {
            log::info!("{}", fixnum);
            return;
        }
        if value.is_immediate() {
            log::info!("#<immediate {}>", format_address(value.0));
            return;
        }
        log::info!("#<{:?} {}>", value.tag(), format_address(value.addr()));
    }

    /// §6: last-resort diagnostic print, used when the collector has
    /// detected a condition (e.g. an integrity violation) it cannot recover
    /// from. Writes directly to stderr rather than through `log`, since the
    /// logging backend itself may depend on heap state the collector no
    /// longer trusts.
    pub fn emergency_print(&self, message: &str) {
        eprintln!("[gc] {}", message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::page::PAGE_SIZE;

    fn test_config() -> GcConfig {
        let mut config = GcConfig::default();
        config.max_heap_size = 64 * PAGE_SIZE;
        config.min_heap_size = 8 * PAGE_SIZE;
        config.nursery_size = 4 * PAGE_SIZE;
        config
    }

    #[test]
    fn collect_check_runs_a_cycle_when_headroom_is_insufficient() {
        let runtime = Runtime::new(test_config()).unwrap();
        let ran = runtime.collect_check(usize::MAX / 2).unwrap();
        assert!(ran);
    }

    #[test]
    fn scheme_print_handles_fixnums_and_immediates_without_panicking() {
        let runtime = Runtime::new(test_config()).unwrap();
        runtime.scheme_print(crate::tag::TaggedPtr::fixnum(42));
        runtime.scheme_print(crate::tag::NULL);
    }
}
