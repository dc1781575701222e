//! Integration tests for the allocator: block scenarios, growth, payload
//! integrity and concurrent use.

// Payload integrity checks write through returned pointers.
#![allow(unsafe_code)]

use std::ptr::NonNull;
use std::sync::Arc;
use std::thread;

use strata_core::{
    Affinity, Allocator, AllocatorConfig, BackendKind, PoolConfig, SlotAllocator,
};

fn assert_disjoint(live: &[(NonNull<u8>, usize)]) {
    let mut ranges: Vec<(usize, usize)> = live
        .iter()
        .map(|&(ptr, size)| (ptr.as_ptr() as usize, ptr.as_ptr() as usize + size.max(1)))
        .collect();
    ranges.sort_unstable();
    for pair in ranges.windows(2) {
        assert!(pair[0].1 <= pair[1].0, "overlap: {:?} and {:?}", pair[0], pair[1]);
    }
}

#[test]
fn test_split_inside_freed_slot_then_full_merge() {
    for order in [[0, 1, 2], [2, 1, 0], [1, 2, 0]] {
        let mut block = SlotAllocator::new(4096, 8).unwrap();
        let a = block.allocate(64).unwrap().unwrap();
        let b = block.allocate(128).unwrap().unwrap();
        let c = block.allocate(64).unwrap().unwrap();

        block.deallocate(b, 128).unwrap();
        let d = block.allocate(32).unwrap().unwrap();
        assert_eq!(d, b);
        block.validate().unwrap();

        let rest = [(a, 64), (c, 64), (d, 32)];
        for i in order {
            let (ptr, size) = rest[i];
            block.deallocate(ptr, size).unwrap();
            block.validate().unwrap();
        }

        assert_eq!(block.free_slots().unwrap(), vec![(1, 1023)]);
    }
}

#[test]
fn test_request_larger_than_default_block() {
    for backend in BackendKind::ALL {
        let config = AllocatorConfig {
            backend,
            default_block_size: 4096,
            pools: vec![PoolConfig::new(Affinity::OBJECTS).with_block_size(4096)],
            ..AllocatorConfig::default()
        };
        let allocator = Allocator::new(config).unwrap();

        let ptr = allocator.allocate(20_000, Affinity::OBJECTS).unwrap();
        assert_eq!(allocator.large_allocation_count(), 0, "{backend}");

        let pool = allocator.pool_stats(Affinity::OBJECTS).unwrap();
        assert_eq!(pool.block_size, 4096);
        assert_eq!(pool.blocks.len(), 1);
        assert!(pool.blocks[0].memory_size >= 20_000);

        // The default is unchanged for ordinary requests.
        let small = allocator.allocate(16, Affinity::OBJECTS).unwrap();
        assert!(allocator.deallocate(small, 16));
        assert!(allocator.deallocate(ptr, 20_000));
        assert!(allocator.validate());
    }
}

#[test]
fn test_payloads_survive_neighbour_churn() {
    for backend in BackendKind::ALL {
        let allocator = Allocator::new(AllocatorConfig::with_backend(backend)).unwrap();
        let mut live = Vec::new();

        for i in 0..512usize {
            let size = 1 + (i * 37) % 300;
            let ptr = allocator.allocate(size, Affinity::NODES).unwrap();
            // SAFETY: ptr is a fresh allocation of `size` bytes.
            unsafe { ptr.as_ptr().write_bytes((i % 251) as u8, size) };
            live.push((ptr, size, (i % 251) as u8));

            if i % 3 == 0 {
                let (ptr, size, _) = live.swap_remove(i % live.len());
                assert!(allocator.deallocate(ptr, size));
            }
        }

        assert!(allocator.validate(), "{backend}");
        let ranges: Vec<_> = live.iter().map(|&(ptr, size, _)| (ptr, size)).collect();
        assert_disjoint(&ranges);

        for (ptr, size, fill) in live {
            // SAFETY: ptr is a live allocation of `size` bytes.
            let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), size) };
            assert!(bytes.iter().all(|&b| b == fill), "{backend}: payload overwritten");
            assert!(allocator.deallocate(ptr, size));
        }
        assert!(allocator.validate());
        assert_eq!(allocator.total_reserved_size(), 0);
    }
}

#[test]
fn test_concurrent_allocation() {
    let allocator = Arc::new(Allocator::default());
    let threads = 8;

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let allocator = Arc::clone(&allocator);
            thread::spawn(move || {
                let affinity = Affinity(t % 4);
                let mut live = Vec::new();
                for i in 0..1000usize {
                    let size = 8 + (i * 13 + t as usize) % 200;
                    live.push((allocator.allocate(size, affinity).unwrap(), size));
                    if i % 2 == 1 {
                        let (ptr, size) = live.swap_remove(0);
                        assert!(allocator.deallocate(ptr, size));
                    }
                }
                live.into_iter()
                    .map(|(ptr, size)| (ptr.as_ptr() as usize, size))
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut live = Vec::new();
    for handle in handles {
        live.extend(handle.join().unwrap());
    }

    let ptrs: Vec<_> = live
        .iter()
        .map(|&(addr, size)| (NonNull::new(addr as *mut u8).unwrap(), size))
        .collect();
    assert_disjoint(&ptrs);
    assert!(allocator.validate());

    for (ptr, size) in ptrs {
        assert!(allocator.deallocate(ptr, size));
    }
    assert!(allocator.reclaim_empty_blocks() > 0);
    assert_eq!(allocator.total_memory_size(), 0);
}

#[test]
fn test_backend_swap_keeps_old_pointers_valid() {
    let original = Allocator::new(AllocatorConfig::with_backend(BackendKind::Segment)).unwrap();
    let before: Vec<_> = (1..20).map(|i| (original.allocate(i * 10, Affinity::DATA).unwrap(), i * 10)).collect();

    let swapped = Allocator::with_nested(AllocatorConfig::with_backend(BackendKind::Slot), original).unwrap();
    let after: Vec<_> = (1..20).map(|i| (swapped.allocate(i * 10, Affinity::DATA).unwrap(), i * 10)).collect();

    for (ptr, size) in before.into_iter().chain(after) {
        assert!(swapped.deallocate(ptr, size));
    }

    let stats = swapped.stats();
    assert_eq!(stats.total_reserved_size(), 0);
    assert_eq!(stats.nested.as_ref().unwrap().backend, BackendKind::Segment);
}

#[test]
fn test_zero_size_requests() {
    for backend in BackendKind::ALL {
        let mut block = backend.create_block(1024, 8).unwrap();
        let a = block.allocate(0).unwrap().unwrap();
        let b = block.allocate(0).unwrap().unwrap();
        assert_ne!(a, b);
        block.deallocate(a, 0).unwrap();
        block.deallocate(b, 0).unwrap();
        assert!(block.is_empty());
        block.validate().unwrap();
    }
}
