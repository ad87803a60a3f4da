//! Small shared helpers (alignment arithmetic, lock-free counters) used by
//! the page manager, allocator, and stats modules.

pub mod alignment;
pub mod atomic;
pub mod debug;

pub use alignment::Alignment;
pub use atomic::AtomicUtils;

/// Byte-size constants shared by the config and stats modules.
pub mod constants {
    pub const KB: usize = 1024;
    pub const MB: usize = 1024 * 1024;
    pub const GB: usize = 1024 * 1024 * 1024;
}
