//! Property tests: random allocate/free sequences keep every block consistent.

use std::ptr::NonNull;

use proptest::prelude::*;
use strata_core::{Affinity, Allocator, AllocatorConfig, BackendKind};

/// One step of a workload.
#[derive(Clone, Debug)]
enum Op {
    /// Allocate this many bytes.
    Allocate(usize),
    /// Free the live allocation at this index (modulo the live count).
    Free(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0usize..600).prop_map(Op::Allocate),
        2 => any::<usize>().prop_map(Op::Free),
    ]
}

fn backend() -> impl Strategy<Value = BackendKind> {
    prop_oneof![Just(BackendKind::Slot), Just(BackendKind::Segment)]
}

fn overlaps(live: &[(NonNull<u8>, usize)], ptr: NonNull<u8>, size: usize) -> bool {
    let start = ptr.as_ptr() as usize;
    let end = start + size.max(1);
    live.iter().any(|&(other, other_size)| {
        let other_start = other.as_ptr() as usize;
        start < other_start + other_size.max(1) && other_start < end
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn block_stays_consistent(
        kind in backend(),
        alignment in prop_oneof![Just(4usize), Just(8), Just(16), Just(64)],
        ops in prop::collection::vec(op(), 1..200),
    ) {
        let mut block = kind.create_block(16 * 1024, alignment).unwrap();
        let empty = block.stats();
        let mut live: Vec<(NonNull<u8>, usize)> = Vec::new();

        for op in ops {
            match op {
                Op::Allocate(size) => {
                    if let Some(ptr) = block.allocate(size).unwrap() {
                        prop_assert_eq!(ptr.as_ptr() as usize % alignment, 0);
                        prop_assert!(block.contains(ptr));
                        prop_assert!(!overlaps(&live, ptr, size));
                        live.push((ptr, size));
                    }
                }
                Op::Free(index) if !live.is_empty() => {
                    let (ptr, size) = live.swap_remove(index % live.len());
                    block.deallocate(ptr, size).unwrap();
                }
                Op::Free(_) => {}
            }
            prop_assert_eq!(block.validate(), Ok(()));
            prop_assert_eq!(block.stats().allocations, live.len());
        }

        for (ptr, size) in live {
            block.deallocate(ptr, size).unwrap();
        }
        prop_assert!(block.is_empty());
        prop_assert_eq!(block.validate(), Ok(()));

        // Everything merged back: one free region as large as at the start.
        let stats = block.stats();
        prop_assert_eq!(stats.free_regions, empty.free_regions);
        prop_assert_eq!(stats.available_size, empty.available_size);
    }

    #[test]
    fn allocator_round_trips(
        kind in backend(),
        ops in prop::collection::vec((op(), 0u32..6), 1..150),
    ) {
        let config = AllocatorConfig {
            default_block_size: 8 * 1024,
            ..AllocatorConfig::with_backend(kind)
        };
        let allocator = Allocator::new(config).unwrap();
        let mut live: Vec<(NonNull<u8>, usize)> = Vec::new();

        for (op, affinity) in ops {
            match op {
                Op::Allocate(size) => {
                    // Occasionally exceed what a slot pool can hold.
                    let size = if size == 599 { 200_000 } else { size };
                    let ptr = allocator.allocate(size, Affinity(affinity)).unwrap();
                    prop_assert!(!overlaps(&live, ptr, size));
                    live.push((ptr, size));
                }
                Op::Free(index) if !live.is_empty() => {
                    let (ptr, size) = live.swap_remove(index % live.len());
                    prop_assert!(allocator.deallocate(ptr, size));
                }
                Op::Free(_) => {}
            }
        }

        prop_assert!(allocator.validate());
        for (ptr, size) in live {
            prop_assert!(allocator.deallocate(ptr, size));
        }
        prop_assert_eq!(allocator.large_allocation_count(), 0);
        prop_assert_eq!(allocator.stats().pools.iter().map(|p| p.allocations()).sum::<usize>(), 0);
        prop_assert!(allocator.validate());
    }
}
