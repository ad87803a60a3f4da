//! Root discovery (§4.9 step 4): finds the starting points for a cycle's
//! trace. There is no separate mark phase or tri-color bitmap here — the
//! collector is stop-the-world and copying, so "marked" and "evacuated" are
//! the same event (§3's forwarding-marker protocol). This module supplies
//! the two ways the driver finds an initial live object: walking the
//! mutator's own stack frames, and the PCB/remembered-set roots proper.

pub mod roots;
pub mod stack_scan;

pub use roots::scan_roots;
