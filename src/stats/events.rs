//! Structured cycle event log (§10.3): an in-process ring of recent
//! [`GcEvent`]s, collectable for diagnostics without a logging backend
//! attached. Every event is also emitted through the `log` facade at the
//! level [`event_level`] assigns it, so a host that *does* have a backend
//! attached sees the same information there.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Instant;

/// Minimum severity an event must reach before it's recorded/emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

/// One notable occurrence during a collection cycle, named after this
/// collector's own phases (§4.9) rather than a concurrent collector's.
#[derive(Debug, Clone)]
pub enum GcEvent {
    CycleStart { collection_id: u64, generation: u8 },
    PhaseStart { phase: &'static str, collection_id: u64 },
    PhaseEnd { phase: &'static str, collection_id: u64, duration_ms: f64 },
    CycleEnd { collection_id: u64, duration_ms: f64, pages_reclaimed: usize },
    HeapStats { used_bytes: usize, total_bytes: usize },
    AllocationFailure { requested_bytes: usize },
    CardScanStats { cards_scanned: usize, cards_cleaned: usize },
    WeakFixupStats { pairs_cleared: usize },
    GuardianStats { finalized: usize, promoted: usize },
    RelocateStats { objects_relocated: usize, bytes_moved: usize },
}

fn event_level(event: &GcEvent) -> LogLevel {
    match event {
        GcEvent::AllocationFailure { .. } => LogLevel::Error,
        GcEvent::CycleStart { .. } | GcEvent::CycleEnd { .. } | GcEvent::HeapStats { .. } => {
            LogLevel::Info
        }
        GcEvent::PhaseStart { .. } | GcEvent::PhaseEnd { .. } => LogLevel::Debug,
        GcEvent::CardScanStats { .. }
        | GcEvent::WeakFixupStats { .. }
        | GcEvent::GuardianStats { .. }
        | GcEvent::RelocateStats { .. } => LogLevel::Trace,
    }
}

fn emit_to_log(event: &GcEvent) {
    match event {
        GcEvent::CycleStart { collection_id, generation } => {
            log::info!("cycle {collection_id} started (generation {generation})");
        }
        GcEvent::PhaseStart { phase, collection_id } => {
            log::debug!("cycle {collection_id}: {phase} started");
        }
        GcEvent::PhaseEnd { phase, collection_id, duration_ms } => {
            log::debug!("cycle {collection_id}: {phase} finished ({duration_ms:.2}ms)");
        }
        GcEvent::CycleEnd { collection_id, duration_ms, pages_reclaimed } => {
            log::info!(
                "cycle {collection_id} finished ({duration_ms:.2}ms, {pages_reclaimed} pages reclaimed)"
            );
        }
        GcEvent::HeapStats { used_bytes, total_bytes } => {
            log::info!("heap: {used_bytes}/{total_bytes} bytes");
        }
        GcEvent::AllocationFailure { requested_bytes } => {
            log::error!("allocation failure: requested {requested_bytes} bytes");
        }
        GcEvent::CardScanStats { cards_scanned, cards_cleaned } => {
            log::trace!("card scan: {cards_scanned} scanned, {cards_cleaned} cleaned");
        }
        GcEvent::WeakFixupStats { pairs_cleared } => {
            log::trace!("weak fixup: {pairs_cleared} pairs resolved to BWP");
        }
        GcEvent::GuardianStats { finalized, promoted } => {
            log::trace!("guardians: {finalized} finalized, {promoted} promoted");
        }
        GcEvent::RelocateStats { objects_relocated, bytes_moved } => {
            log::trace!("relocation: {objects_relocated} objects, {bytes_moved} bytes moved");
        }
    }
}

/// Configuration for an [`EventLog`].
#[derive(Debug, Clone)]
pub struct EventLogConfig {
    pub level: LogLevel,
    pub capacity: usize,
}

impl Default for EventLogConfig {
    fn default() -> Self {
        EventLogConfig { level: LogLevel::Info, capacity: 512 }
    }
}

/// Bounded ring of recent [`GcEvent`]s, owned by a single collector
/// instance (no global singleton — §5's PCB-scoped state applies here
/// too).
pub struct EventLog {
    config: EventLogConfig,
    events: Mutex<Vec<(Instant, GcEvent)>>,
    enabled: AtomicBool,
}

impl EventLog {
    pub fn new(config: EventLogConfig) -> Self {
        EventLog { config, events: Mutex::new(Vec::new()), enabled: AtomicBool::new(true) }
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Relaxed);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Record an event, if enabled and at or above the configured level.
    /// Always emitted through `log` regardless of the ring's own level so
    /// a host's logging backend still sees it.
    pub fn record(&self, event: GcEvent) {
        emit_to_log(&event);
        if !self.is_enabled() || event_level(&event) > self.config.level {
            return;
        }
        let mut events = self.events.lock().unwrap();
        events.push((Instant::now(), event));
        if events.len() > self.config.capacity {
            let overflow = events.len() - self.config.capacity;
            events.drain(0..overflow);
        }
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(EventLogConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_an_event_increments_the_count() {
        let log = EventLog::default();
        log.record(GcEvent::CycleStart { collection_id: 1, generation: 0 });
        assert_eq!(log.event_count(), 1);
    }

    #[test]
    fn disabled_log_drops_events_but_still_logs() {
        let log = EventLog::default();
        log.disable();
        log.record(GcEvent::CycleStart { collection_id: 1, generation: 0 });
        assert_eq!(log.event_count(), 0);
    }

    #[test]
    fn ring_is_bounded_by_capacity() {
        let log = EventLog::new(EventLogConfig { level: LogLevel::Trace, capacity: 2 });
        for i in 0..5 {
            log.record(GcEvent::CycleStart { collection_id: i, generation: 0 });
        }
        assert_eq!(log.event_count(), 2);
    }

    #[test]
    fn events_below_configured_level_are_not_retained() {
        let log = EventLog::new(EventLogConfig { level: LogLevel::Info, capacity: 16 });
        log.record(GcEvent::RelocateStats { objects_relocated: 3, bytes_moved: 96 });
        assert_eq!(log.event_count(), 0);
    }
}
