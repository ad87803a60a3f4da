//! Collector benchmarks.
//!
//! Run with `cargo bench`.

use chezmoi_gc::heap::page::PageKind;
use chezmoi_gc::tag::{Tag, TaggedPtr, NULL, WORD_SIZE};
use chezmoi_gc::{GarbageCollector, GcConfig};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn bench_config() -> GcConfig {
    let mut config = GcConfig::default();
    config.max_heap_size = 64 * 1024 * 1024;
    config.min_heap_size = 8 * 1024 * 1024;
    config.nursery_size = 1024 * 1024;
    config
}

fn bench_gc_creation(c: &mut Criterion) {
    c.bench_function("gc_creation", |b| {
        b.iter(|| {
            let gc = GarbageCollector::new(bench_config()).unwrap();
            black_box(gc);
        });
    });
}

fn bench_empty_cycle(c: &mut Criterion) {
    let gc = GarbageCollector::new(bench_config()).unwrap();
    c.bench_function("empty_cycle", |b| {
        b.iter(|| {
            gc.collect(black_box(0)).unwrap();
        });
    });
}

fn bench_cycle_with_rooted_pair_chain(c: &mut Criterion) {
    let gc = GarbageCollector::new(bench_config()).unwrap();
    let mut head = NULL;
    for _ in 0..256 {
        let addr = gc
            .heap()
            .acquire_page(gc.pcb(), PageKind::Pairs, 0)
            .unwrap();
        let pair = TaggedPtr::with_tag(addr, Tag::Pair);
        unsafe {
            chezmoi_gc::memory::write_word(addr, head.0);
            chezmoi_gc::memory::write_word(addr + WORD_SIZE, NULL.0);
        }
        head = pair;
    }
    gc.pcb().roots.lock().next_k = head;

    c.bench_function("cycle_with_256_rooted_pairs", |b| {
        b.iter(|| {
            gc.collect(black_box(0)).unwrap();
        });
    });
}

fn bench_page_acquisition(c: &mut Criterion) {
    let gc = GarbageCollector::new(bench_config()).unwrap();
    c.bench_function("acquire_page", |b| {
        b.iter(|| {
            let addr = gc
                .heap()
                .acquire_page(gc.pcb(), PageKind::Pointers, 0)
                .unwrap();
            black_box(addr);
        });
    });
}

criterion_group!(
    benches,
    bench_gc_creation,
    bench_empty_cycle,
    bench_cycle_with_rooted_pair_chain,
    bench_page_acquisition,
);
criterion_main!(benches);
