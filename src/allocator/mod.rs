//! Meta allocator (§4.2): six per-category bump regions, each backed by
//! freshly mapped pages from [`crate::heap::Heap`], plus the per-category
//! work queues the collect loop (§4.9 step 5) drains to a fixed point.

pub mod generation;
pub mod large;
pub mod meta;

pub use generation::{clamp_generation, collection_id_to_gen};
pub use large::{allocate_large, is_large, is_pinned, LARGE_OBJECT_THRESHOLD};
pub use meta::MetaRegion;

use crate::error::Result;
use crate::heap::page::PageKind;
use crate::heap::Heap;
use crate::pcb::Pcb;

/// One of the six object categories a collection cycle partitions live
/// objects into (§4.2). Each gets its own to-space region so that objects
/// of a kind land together, which is what lets the segment vector tag a
/// whole page by kind instead of per object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Pairs,
    WeakPairs,
    Symbols,
    Pointers,
    Code,
    RawData,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Pairs,
        Category::WeakPairs,
        Category::Symbols,
        Category::Pointers,
        Category::Code,
        Category::RawData,
    ];

    pub fn page_kind(self) -> PageKind {
        match self {
            Category::Pairs => PageKind::Pairs,
            Category::Pointers => PageKind::Pointers,
            Category::WeakPairs => PageKind::WeakPairs,
            Category::Symbols => PageKind::Symbols,
            Category::Code => PageKind::Code,
            Category::RawData => PageKind::RawData,
        }
    }

    fn index(self) -> usize {
        match self {
            Category::Pairs => 0,
            Category::WeakPairs => 1,
            Category::Symbols => 2,
            Category::Pointers => 3,
            Category::Code => 4,
            Category::RawData => 5,
        }
    }
}

/// Six to-space regions, one per [`Category`], each exactly one page wide
/// (§4.2: "weak pairs get a dedicated page at a time" generalizes cleanly
/// to every category at this heap size). Extension when a region runs out
/// maps a fresh page, tags it `target_generation`, and — for scannable
/// categories — pushes the filled range onto that category's work queue
/// for the collect loop to trace (§4.9 step 5).
pub struct MetaAllocator {
    regions: [MetaRegion; 6],
    work_queues: [Vec<(usize, usize)>; 6],
    /// Absolute address each category's current region has already had
    /// queued for scanning up to, so [`Self::flush_pending`] only queues the
    /// unscanned tail instead of re-queuing the whole region every time the
    /// collect loop catches up to a moving bump pointer (§4.9 step 5).
    scan_cursor: [usize; 6],
    target_generation: u8,
}

impl MetaAllocator {
    pub fn new(target_generation: u8) -> Self {
        MetaAllocator {
            regions: [MetaRegion::empty(); 6],
            work_queues: [
                Vec::new(),
                Vec::new(),
                Vec::new(),
                Vec::new(),
                Vec::new(),
                Vec::new(),
            ],
            scan_cursor: [0; 6],
            target_generation,
        }
    }

    /// Allocate `words` words in `category`'s to-space, extending into a
    /// fresh page first if the current region can't satisfy it.
    pub fn alloc(&mut self, pcb: &Pcb, heap: &Heap, category: Category, words: usize) -> Result<usize> {
        let size_bytes = words * crate::tag::WORD_SIZE;
        let idx = category.index();
        if let Some(addr) = self.regions[idx].alloc(size_bytes) {
            return Ok(addr);
        }
        self.extend(pcb, heap, category)?;
        self.regions[idx]
            .alloc(size_bytes)
            .ok_or_else(|| crate::error::GcError::OutOfMemory {
                requested: size_bytes,
                available: self.regions[idx].remaining(),
            })
    }

    fn extend(&mut self, pcb: &Pcb, heap: &Heap, category: Category) -> Result<()> {
        let idx = category.index();
        let (filled_base, filled_ap) = self.regions[idx].filled_range();
        if filled_ap > filled_base && category.page_kind().is_scannable() {
            self.work_queues[idx].push((filled_base, filled_ap));
        }
        let addr = heap.acquire_page(pcb, category.page_kind(), self.target_generation)?;
        self.regions[idx] = MetaRegion::new(addr, crate::heap::page::PAGE_SIZE);
        self.scan_cursor[idx] = addr;
        Ok(())
    }

    /// Drain every category's pending work ranges, handing each `(base, ap)`
    /// range to `scan`. Returns the total number of ranges drained so the
    /// collect loop (§4.9 step 5) can tell whether a fixed point was reached.
    pub fn drain_work<F: FnMut(Category, usize, usize)>(&mut self, mut scan: F) -> usize {
        let mut drained = 0;
        for category in Category::ALL {
            let idx = category.index();
            while let Some((base, ap)) = self.work_queues[idx].pop() {
                scan(category, base, ap);
                drained += 1;
            }
        }
        drained
    }

    /// Drain every category's pending work ranges into an owned list. Unlike
    /// [`Self::drain_work`], this releases the borrow of `self` before the
    /// caller processes each range, which is what the collect loop (§4.9
    /// step 5) needs: processing a range calls back into `alloc`, which may
    /// queue more work on the very allocator a closure-based drain would
    /// still be borrowing.
    pub fn take_pending(&mut self) -> Vec<(Category, usize, usize)> {
        let mut pending = Vec::new();
        for category in Category::ALL {
            let idx = category.index();
            for (base, ap) in self.work_queues[idx].drain(..) {
                pending.push((category, base, ap));
            }
        }
        pending
    }

    /// Push a region's still-unscanned tail onto its work queue without
    /// extending — used when the collect loop catches up to a region's
    /// current allocation pointer mid-cycle (§4.9 step 5's fixed point: the
    /// bump pointer may have moved further since the last drain).
    pub fn flush_pending(&mut self, category: Category) {
        let idx = category.index();
        let (base, ap) = self.regions[idx].filled_range();
        let start = self.scan_cursor[idx].max(base);
        if ap > start && category.page_kind().is_scannable() {
            self.work_queues[idx].push((start, ap));
            self.scan_cursor[idx] = ap;
        }
    }

    /// Call [`Self::flush_pending`] for every category (§4.9 step 5: catch
    /// the fixed point up to however far the bump pointers have moved).
    pub fn flush_all_pending(&mut self) {
        for category in Category::ALL {
            self.flush_pending(category);
        }
    }

    /// Queue an already-filled `[base, ap)` range for the collect loop to
    /// trace, bypassing `category`'s own bump region entirely. Used for
    /// large objects (§4.3, §4.5), which live on freshly mapped pages of
    /// their own rather than a shared `MetaRegion`.
    pub fn push_pending(&mut self, category: Category, base: usize, ap: usize) {
        if ap > base && category.page_kind().is_scannable() {
            self.work_queues[category.index()].push((base, ap));
        }
    }

    pub fn region(&self, category: Category) -> MetaRegion {
        self.regions[category.index()]
    }

    /// The generation to-space pages are tagged with this cycle. An object
    /// is in the collection set iff its current page's generation is
    /// strictly older (lower) than this (§4.9 step 1: the escalator picks
    /// how far back a cycle reaches; survivors are promoted one generation
    /// past that).
    pub fn target_generation(&self) -> u8 {
        self.target_generation
    }
}

/// Map a page's kind back to the category its objects are evacuated into.
/// Every non-hole, non-large-object address's destination category is
/// determined entirely by the page it currently lives on — the tagged
/// pointer's own `Tag` is not needed for this (§4.2, §4.3).
pub fn category_for_page_kind(kind: PageKind) -> Option<Category> {
    match kind {
        PageKind::Pairs => Some(Category::Pairs),
        PageKind::WeakPairs => Some(Category::WeakPairs),
        PageKind::Symbols => Some(Category::Symbols),
        PageKind::Pointers => Some(Category::Pointers),
        PageKind::Code => Some(Category::Code),
        PageKind::RawData => Some(Category::RawData),
        PageKind::Hole => None,
    }
}
