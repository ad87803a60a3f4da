//! Configuration - validated, `Default`-implementing tunables for the
//! collector.
//!
//! Mirrors the PCB's tunable knobs (§10.1): fixed page size and generation
//! count match the ABI described in §6 and must never be changed without
//! recompiling every code object; the rest (nursery sizing, page cache
//! capacity, escalator base, integrity/verbosity flags) are genuinely
//! tunable per host.

use thiserror::Error;

/// Page size in bytes. Fixed — part of the segment-vector/dirty-vector ABI
/// (§6). Not configurable.
pub const PAGE_SIZE: usize = 4096;

/// Number of generations. Fixed at 5 (0..=4) per §3.
pub const GENERATION_COUNT: u8 = 5;

const KB: usize = 1024;
const MB: usize = 1024 * KB;

/// Validated collector configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct GcConfig {
    /// Page size in bytes. Always [`PAGE_SIZE`]; kept as a field (rather
    /// than hardcoded everywhere) so tests can assert on it and so a
    /// future ABI revision has one place to change.
    pub page_size: usize,

    /// Maximum number of unmapped page frames retained in the page cache
    /// for reuse before pages are returned to the OS (§4.1).
    pub page_cache_capacity: usize,

    /// Initial nursery size in bytes.
    pub nursery_size: usize,

    /// Factor by which the nursery grows when headroom after a cycle is
    /// below the requested allocation (§4.9 step 11). Must be > 1.0.
    pub nursery_growth_factor: f64,

    /// Minimum heap size in bytes. The nursery may never shrink below this.
    pub min_heap_size: usize,

    /// Maximum heap size in bytes.
    pub max_heap_size: usize,

    /// Number of generations. Always [`GENERATION_COUNT`].
    pub generation_count: u8,

    /// Base of the power-of-two collection-frequency escalator (§4.9 step
    /// 1): generation `k` is collected every `escalator_base^(2k+2)`th
    /// cycle. The spec's formula assumes base 2; exposed for testing
    /// alternate escalators without recompiling the formula.
    pub escalator_base: u32,

    /// Run `verify_integrity` (§4.10) at the end of every cycle, not just
    /// when explicitly requested.
    pub integrity_checks_on_every_cycle: bool,

    /// Emit verbose per-phase cycle logging (§10.3).
    pub verbose: bool,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            page_size: PAGE_SIZE,
            page_cache_capacity: 64,
            nursery_size: 4 * MB,
            nursery_growth_factor: 1.5,
            min_heap_size: 8 * MB,
            max_heap_size: 1024 * MB,
            generation_count: GENERATION_COUNT,
            escalator_base: 2,
            integrity_checks_on_every_cycle: false,
            verbose: false,
        }
    }
}

impl GcConfig {
    /// Validate configuration, rejecting combinations that would leave the
    /// collector unable to establish its invariants before any memory is
    /// mapped.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.page_size == 0 || !self.page_size.is_power_of_two() {
            return Err(ConfigError::InvalidPageSize(self.page_size));
        }
        if self.page_size != PAGE_SIZE {
            return Err(ConfigError::UnsupportedPageSize(self.page_size));
        }
        if self.min_heap_size == 0 || self.max_heap_size == 0 {
            return Err(ConfigError::ZeroSizedHeap);
        }
        if self.min_heap_size > self.max_heap_size {
            return Err(ConfigError::MinExceedsMax {
                min: self.min_heap_size,
                max: self.max_heap_size,
            });
        }
        if self.nursery_size > self.max_heap_size {
            return Err(ConfigError::NurseryExceedsMaxHeap {
                nursery: self.nursery_size,
                max: self.max_heap_size,
            });
        }
        if self.nursery_size == 0 {
            return Err(ConfigError::ZeroSizedNursery);
        }
        if self.nursery_growth_factor <= 1.0 {
            return Err(ConfigError::InvalidGrowthFactor(self.nursery_growth_factor));
        }
        if self.generation_count != GENERATION_COUNT {
            return Err(ConfigError::UnsupportedGenerationCount(self.generation_count));
        }
        if self.escalator_base < 2 {
            return Err(ConfigError::InvalidEscalatorBase(self.escalator_base));
        }
        Ok(())
    }

    /// Overlay `IKGC_*` environment variables onto a base config, for
    /// ops-style tuning without a rebuild.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("IKGC_MAX_HEAP") {
            if let Ok(bytes) = v.parse() {
                config.max_heap_size = bytes;
            }
        }
        if let Ok(v) = std::env::var("IKGC_MIN_HEAP") {
            if let Ok(bytes) = v.parse() {
                config.min_heap_size = bytes;
            }
        }
        if let Ok(v) = std::env::var("IKGC_NURSERY_SIZE") {
            if let Ok(bytes) = v.parse() {
                config.nursery_size = bytes;
            }
        }
        if let Ok(v) = std::env::var("IKGC_PAGE_CACHE_CAPACITY") {
            if let Ok(n) = v.parse() {
                config.page_cache_capacity = n;
            }
        }
        if let Ok(v) = std::env::var("IKGC_VERBOSE") {
            config.verbose = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("IKGC_INTEGRITY_CHECKS") {
            config.integrity_checks_on_every_cycle = v == "1" || v.eq_ignore_ascii_case("true");
        }

        config
    }

    /// Rough per-object bookkeeping overhead estimate, used by callers
    /// sizing an initial heap from an expected live-object count.
    pub fn estimated_overhead(&self) -> usize {
        self.page_cache_capacity * self.page_size / 64
    }
}

/// Errors returned by [`GcConfig::validate`].
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("page size {0} is not a power of two")]
    InvalidPageSize(usize),

    #[error("page size {0} does not match the fixed ABI page size ({PAGE_SIZE})")]
    UnsupportedPageSize(usize),

    #[error("heap size must be non-zero")]
    ZeroSizedHeap,

    #[error("nursery size must be non-zero")]
    ZeroSizedNursery,

    #[error("min heap size {min} exceeds max heap size {max}")]
    MinExceedsMax { min: usize, max: usize },

    #[error("nursery size {nursery} exceeds max heap size {max}")]
    NurseryExceedsMaxHeap { nursery: usize, max: usize },

    #[error("nursery growth factor {0} must be greater than 1.0")]
    InvalidGrowthFactor(f64),

    #[error("generation count {0} does not match the fixed ABI generation count ({GENERATION_COUNT})")]
    UnsupportedGenerationCount(u8),

    #[error("escalator base {0} must be at least 2")]
    InvalidEscalatorBase(u32),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(GcConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_sized_heap() {
        let mut config = GcConfig::default();
        config.max_heap_size = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroSizedHeap));
    }

    #[test]
    fn rejects_nursery_larger_than_max_heap() {
        let mut config = GcConfig::default();
        config.nursery_size = config.max_heap_size + 1;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NurseryExceedsMaxHeap { .. })
        ));
    }

    #[test]
    fn rejects_non_power_of_two_page_size() {
        let mut config = GcConfig::default();
        config.page_size = 4000;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidPageSize(4000))));
    }

    #[test]
    fn rejects_min_exceeding_max() {
        let mut config = GcConfig::default();
        config.min_heap_size = config.max_heap_size + 1;
        assert!(matches!(config.validate(), Err(ConfigError::MinExceedsMax { .. })));
    }

    #[test]
    fn rejects_invalid_growth_factor() {
        let mut config = GcConfig::default();
        config.nursery_growth_factor = 1.0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidGrowthFactor(_))));
    }

    #[test]
    fn from_env_defaults_match_default_when_unset() {
        // Best-effort: only checks fields that aren't conventionally set
        // in a test environment.
        let config = GcConfig::from_env();
        assert!(config.validate().is_ok());
    }
}
