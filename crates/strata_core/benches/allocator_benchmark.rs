//! # Allocator Benchmark
//!
//! Allocation churn on both backends, against the system allocator.
//!
//! Run with: `cargo bench --package strata_core`

// Benchmarks don't need docs; the system baseline calls the raw allocator API
#![allow(unsafe_code)]
#![allow(missing_docs)]

use std::alloc::{alloc, dealloc, Layout};
use std::ptr::NonNull;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use strata_core::{Affinity, Allocator, AllocatorConfig, BackendKind};

/// Live allocations kept during churn.
const LIVE: usize = 4096;

/// Deterministic request sizes, mostly small with a long tail.
fn request_sizes(count: usize) -> Vec<usize> {
    let mut rng = ChaCha8Rng::seed_from_u64(0x5EED);
    (0..count)
        .map(|_| match rng.gen_range(0..100) {
            0..=79 => rng.gen_range(8..=128),
            80..=97 => rng.gen_range(129..=4096),
            _ => rng.gen_range(4097..=65_536),
        })
        .collect()
}

/// Benchmark: allocate then free a fixed-size object.
fn bench_allocate_free(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocate_free_64");

    for backend in BackendKind::ALL {
        let allocator = Allocator::new(AllocatorConfig::with_backend(backend)).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(backend), &allocator, |b, allocator| {
            b.iter(|| {
                let ptr = allocator.allocate(black_box(64), Affinity::OBJECTS).unwrap();
                allocator.deallocate(ptr, 64)
            });
        });
    }

    group.finish();
}

/// Benchmark: mixed sizes with a rolling window of live allocations.
fn bench_churn(c: &mut Criterion) {
    let sizes = request_sizes(LIVE * 4);
    let mut group = c.benchmark_group("churn_mixed_sizes");

    for backend in BackendKind::ALL {
        let allocator = Allocator::new(AllocatorConfig::with_backend(backend)).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(backend), &allocator, |b, allocator| {
            b.iter(|| {
                let mut live: Vec<(NonNull<u8>, usize)> = Vec::with_capacity(LIVE);
                for (i, &size) in sizes.iter().enumerate() {
                    if live.len() == LIVE {
                        let (ptr, size) = live.swap_remove(i % LIVE);
                        allocator.deallocate(ptr, size);
                    }
                    live.push((allocator.allocate(size, Affinity::DATA).unwrap(), size));
                }
                for (ptr, size) in live {
                    allocator.deallocate(ptr, size);
                }
            });
        });
    }

    group.bench_function("system", |b| {
        b.iter(|| {
            let mut live: Vec<(*mut u8, Layout)> = Vec::with_capacity(LIVE);
            for (i, &size) in sizes.iter().enumerate() {
                if live.len() == LIVE {
                    let (ptr, layout) = live.swap_remove(i % LIVE);
                    // SAFETY: allocated below with this layout.
                    unsafe { dealloc(ptr, layout) };
                }
                let layout = Layout::from_size_align(size, 4).unwrap();
                // SAFETY: layout has a non-zero size.
                live.push((unsafe { alloc(layout) }, layout));
            }
            for (ptr, layout) in live {
                // SAFETY: allocated above with this layout.
                unsafe { dealloc(ptr, layout) };
            }
        });
    });

    group.finish();
}

/// Benchmark: full validation of a populated allocator.
fn bench_validate(c: &mut Criterion) {
    let allocator = Allocator::default();
    let sizes = request_sizes(LIVE);
    let ptrs: Vec<_> = sizes
        .iter()
        .map(|&size| (allocator.allocate(size, Affinity::OBJECTS).unwrap(), size))
        .collect();
    for (ptr, size) in ptrs.iter().step_by(2) {
        allocator.deallocate(*ptr, *size);
    }

    c.bench_function("validate_4096_live", |b| {
        b.iter(|| black_box(allocator.validate()));
    });
}

criterion_group!(benches, bench_allocate_free, bench_churn, bench_validate);
criterion_main!(benches);
