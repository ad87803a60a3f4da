//! Collection statistics (§6 counters, §10.3 diagnostics): per-cycle timing
//! and generation reached, aggregated for export as JSON.

pub mod events;
pub mod timer;

pub use events::{EventLog, EventLogConfig, GcEvent, LogLevel};

use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;

/// One completed cycle's record (§6: `collection_id`, `collect_utime`,
/// `collect_stime`, `collect_rtime`, and which generation it reached).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleStats {
    pub collection_id: u64,
    pub generation: u8,
    pub wall_time_ms: f64,
    pub bytes_requested: usize,
    pub pages_reclaimed: usize,
    pub timestamp: String,
}

/// Aggregated collector statistics, exported for monitoring (§10.3).
pub struct GcStats {
    history: Mutex<Vec<CycleStats>>,
    max_history: usize,
    allocation_count_minor: std::sync::atomic::AtomicU64,
    allocation_count_major: std::sync::atomic::AtomicU64,
    events: EventLog,
}

impl GcStats {
    pub fn new(max_history: usize) -> Self {
        GcStats {
            history: Mutex::new(Vec::new()),
            max_history,
            allocation_count_minor: std::sync::atomic::AtomicU64::new(0),
            allocation_count_major: std::sync::atomic::AtomicU64::new(0),
            events: EventLog::default(),
        }
    }

    /// The in-process ring of recent structured cycle events (§10.3).
    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn record_cycle(&self, record: CycleStats) {
        if record.generation == 0 {
            self.allocation_count_minor
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        } else {
            self.allocation_count_major
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
        let mut history = self.history.lock().unwrap();
        history.push(record);
        if history.len() > self.max_history {
            let overflow = history.len() - self.max_history;
            history.drain(0..overflow);
        }
    }

    pub fn allocation_count_minor(&self) -> u64 {
        self.allocation_count_minor.load(std::sync::atomic::Ordering::Relaxed)
    }

    pub fn allocation_count_major(&self) -> u64 {
        self.allocation_count_major.load(std::sync::atomic::Ordering::Relaxed)
    }

    pub fn last_cycle(&self) -> Option<CycleStats> {
        self.history.lock().unwrap().last().cloned()
    }

    pub fn total_cycles(&self) -> usize {
        self.history.lock().unwrap().len()
    }

    /// Serialize recent cycle history as JSON (§10.3: stats export).
    pub fn to_json(&self) -> serde_json::Result<String> {
        let history = self.history.lock().unwrap();
        serde_json::to_string_pretty(&*history)
    }
}

impl Default for GcStats {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Build a [`CycleStats`] record from a completed cycle's measured
/// durations (§4.9 step 2/12: snapshot wallclock before and after).
pub fn build_cycle_stats(
    collection_id: u64,
    generation: u8,
    wall_time: Duration,
    bytes_requested: usize,
    pages_reclaimed: usize,
) -> CycleStats {
    CycleStats {
        collection_id,
        generation,
        wall_time_ms: wall_time.as_secs_f64() * 1000.0,
        bytes_requested,
        pages_reclaimed,
        timestamp: chrono::Utc::now().to_rfc3339(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_a_cycle_updates_history_and_counters() {
        let stats = GcStats::default();
        stats.record_cycle(build_cycle_stats(0, 0, Duration::from_millis(5), 1024, 2));
        assert_eq!(stats.total_cycles(), 1);
        assert_eq!(stats.allocation_count_minor(), 1);
        assert_eq!(stats.allocation_count_major(), 0);
    }

    #[test]
    fn history_is_bounded() {
        let stats = GcStats::new(2);
        for i in 0..5 {
            stats.record_cycle(build_cycle_stats(i, 1, Duration::from_millis(1), 0, 0));
        }
        assert_eq!(stats.total_cycles(), 2);
        assert_eq!(stats.last_cycle().unwrap().collection_id, 4);
    }

    #[test]
    fn json_export_round_trips_through_serde() {
        let stats = GcStats::default();
        stats.record_cycle(build_cycle_stats(7, 2, Duration::from_millis(3), 512, 1));
        let json = stats.to_json().unwrap();
        assert!(json.contains("\"collection_id\": 7"));
    }
}
