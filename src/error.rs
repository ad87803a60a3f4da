//! Error Module - GC Error Types
//!
//! Defines all error types used by the collector. Per the design notes, a
//! "fatal abort" in the original sense is modeled here as a `Result::Err`
//! that the `collect`/`collect_check` boundary converts to a panic after
//! logging, rather than a raw `libc::abort()` — this keeps the crate
//! unwind-safe for embedders that install a panic hook while preserving the
//! "never return a corrupt heap to the mutator" contract.

use std::sync::PoisonError;
use thiserror::Error;

/// Main error type for all collector operations.
#[derive(Debug, Error)]
pub enum GcError {
    // --- Configuration / setup (recoverable) ---
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("mmap failed: {0}")]
    Mmap(String),

    #[error("munmap failed: {0}")]
    Munmap(String),

    #[error("out of memory: requested {requested} bytes, available {available} bytes")]
    OutOfMemory { requested: usize, available: usize },

    #[error("heap initialization failed: {0}")]
    HeapInitialization(String),

    #[error("lock poisoned: {0}")]
    LockPoisoned(String),

    // --- Heap-corruption invariant violations (bugs) ---
    #[error("bad tag on word {word:#x} at {address:#x}")]
    BadTag { address: usize, word: usize },

    #[error("unrecognized header first-word {word:#x} at {address:#x}")]
    UnknownHeaderWord { address: usize, word: usize },

    #[error("invalid frame size {0} (must be > 0 or exactly 0 for dynamic frames)")]
    InvalidFrameSize(isize),

    #[error("stack walk did not terminate at end: stopped at {top:#x}, expected {end:#x}")]
    StackWalkMismatch { top: usize, end: usize },

    #[error("relocation record tag {0} out of range (expected 0..=3)")]
    RelocationTagOutOfRange(u8),

    #[error("relocation jump target does not fit in a signed 32-bit displacement: {0}")]
    JumpOverflow(i64),

    #[error("unexpected forward marker at {0:#x}: object should not already be forwarded here")]
    UnexpectedForwardMarker(usize),

    #[error("integrity check violation: {0}")]
    IntegrityViolation(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GcError {
    /// True if this indicates heap corruption: a bug, not a recoverable
    /// condition. Such errors mean the heap can no longer be trusted.
    pub fn is_bug(&self) -> bool {
        matches!(
            self,
            GcError::BadTag { .. }
                | GcError::UnknownHeaderWord { .. }
                | GcError::InvalidFrameSize(_)
                | GcError::StackWalkMismatch { .. }
                | GcError::RelocationTagOutOfRange(_)
                | GcError::JumpOverflow(_)
                | GcError::UnexpectedForwardMarker(_)
                | GcError::IntegrityViolation(_)
                | GcError::Internal(_)
        )
    }

    /// True if this is a recoverable setup failure: bad configuration or an
    /// OS resource failure that occurred before any mutator data existed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            GcError::Configuration(_)
                | GcError::Mmap(_)
                | GcError::Munmap(_)
                | GcError::HeapInitialization(_)
                | GcError::OutOfMemory { .. }
        )
    }
}

impl<T> From<PoisonError<T>> for GcError {
    fn from(err: PoisonError<T>) -> Self {
        GcError::LockPoisoned(err.to_string())
    }
}

/// Result type alias for collector operations.
pub type Result<T> = std::result::Result<T, GcError>;

/// Log a fatal error and convert it into a panic if it indicates heap
/// corruption (`is_bug()`); otherwise just propagate it. Matches §7: no
/// error is ever handed back to the mutator as a normal return value.
pub fn abort_on_bug<T>(result: Result<T>) -> T {
    match result {
        Ok(value) => value,
        Err(err) if err.is_bug() => {
            log::error!("fatal collector error, heap is corrupt: {err}");
            panic!("gc: heap corruption: {err}");
        }
        Err(err) => {
            log::error!("fatal collector error: {err}");
            panic!("gc: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bug_errors_are_not_recoverable() {
        let err = GcError::BadTag { address: 0x1000, word: 7 };
        assert!(err.is_bug());
        assert!(!err.is_recoverable());
    }

    #[test]
    fn configuration_errors_are_recoverable() {
        let err = GcError::Configuration("bad heap size".into());
        assert!(err.is_recoverable());
        assert!(!err.is_bug());
    }

    #[test]
    #[should_panic(expected = "heap corruption")]
    fn abort_on_bug_panics_for_bugs() {
        let err: Result<()> = Err(GcError::UnexpectedForwardMarker(0x2000));
        abort_on_bug(err);
    }
}
