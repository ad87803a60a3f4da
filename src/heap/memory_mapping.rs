//! Bounded page cache (§2, §4.1): unmapped page frames retained for reuse
//! across collections instead of being returned to the OS immediately.
//! Backed directly by the PCB's `caches.cached_pages` field (§6) rather
//! than a standalone structure, since the cache is PCB-owned state.

use crate::heap::virtual_memory;
use crate::pcb::Pcb;

/// Park a single page-sized frame in the PCB's cache, or unmap it
/// immediately if the cache is already at `page_cache_capacity`.
pub fn release_page(pcb: &Pcb, addr: usize, page_size: usize) {
    let mut caches = pcb.caches.lock();
    if caches.cached_pages.len() < pcb.config.page_cache_capacity {
        caches.cached_pages.push(addr);
    } else {
        caches.uncached_pages += 1;
        drop(caches);
        let _ = virtual_memory::unmap_pages(addr, page_size);
    }
}

/// Take a cached frame, if any are parked.
pub fn take_cached_page(pcb: &Pcb) -> Option<usize> {
    pcb.caches.lock().cached_pages.pop()
}

pub fn cached_page_count(pcb: &Pcb) -> usize {
    pcb.caches.lock().cached_pages.len()
}

/// Drain and unmap every parked frame. Used at shutdown.
pub fn drain_and_unmap(pcb: &Pcb, page_size: usize) {
    let frames: Vec<usize> = std::mem::take(&mut pcb.caches.lock().cached_pages);
    for addr in frames {
        let _ = virtual_memory::unmap_pages(addr, page_size);
    }
}
