#![forbid(unsafe_code)]
//! Benchmark: bitmap scan costs on one 512-byte bitmap block.
//!
//! Every allocation walks the bitmap from bit 0, so the interesting case
//! is a nearly-full volume where the scan crosses many set bytes before
//! finding a hole.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use flatfs_alloc::{bitmap_count_free, bitmap_find_free};

/// A mostly-full bitmap: 4096 bits with a free block every ~130.
fn make_bitmap() -> Vec<u8> {
    let mut bm = vec![0xff_u8; 512];
    let mut pos = 37_usize;
    while pos < 4096 {
        bm[pos / 8] &= !(1 << (pos % 8));
        pos += 130;
    }
    bm
}

/// The same bitmap with every hole filled, the worst case for a scan.
fn make_full_bitmap() -> Vec<u8> {
    vec![0xff_u8; 512]
}

fn bench_count_free(c: &mut Criterion) {
    let sparse = make_bitmap();
    let full = make_full_bitmap();

    let mut group = c.benchmark_group("count_free");
    group.bench_function("scattered_holes", |b| {
        b.iter(|| black_box(bitmap_count_free(black_box(&sparse), 4096)));
    });
    group.bench_function("full", |b| {
        b.iter(|| black_box(bitmap_count_free(black_box(&full), 4096)));
    });
    group.finish();
}

fn bench_find_free(c: &mut Criterion) {
    let sparse = make_bitmap();
    let full = make_full_bitmap();

    let mut group = c.benchmark_group("find_free");
    group.bench_function("first_hole_at_37", |b| {
        b.iter(|| black_box(bitmap_find_free(black_box(&sparse), 4096)));
    });
    group.bench_function("no_hole", |b| {
        b.iter(|| black_box(bitmap_find_free(black_box(&full), 4096)));
    });
    group.finish();
}

criterion_group!(benches, bench_count_free, bench_find_free);
criterion_main!(benches);
