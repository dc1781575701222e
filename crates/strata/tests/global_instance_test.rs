//! Integration test for the process-wide allocator lifecycle.
//!
//! The instance is global, so the whole lifecycle runs in one test.

use strata::{Affinity, AllocatorConfig, BackendKind};

#[test]
fn test_instance_lifecycle() {
    // Lazy creation on first use.
    let a = strata::allocate(64, Affinity::OBJECTS).unwrap();
    assert!(strata::is_initialized());
    let first_backend = strata::instance().backend();

    // Swapping keeps pre-swap pointers releasable through the nested allocator.
    let other = match first_backend {
        BackendKind::Slot => BackendKind::Segment,
        BackendKind::Segment => BackendKind::Slot,
    };
    strata::instance().set_alignment(Affinity::NODES, 64).unwrap();
    strata::swap_backend(other).unwrap();
    assert_eq!(strata::instance().backend(), other);
    assert_eq!(strata::instance().nested().unwrap().backend(), first_backend);

    // Pool settings changed before the swap carry over.
    assert_eq!(strata::instance().config().pool(Affinity::NODES).alignment, 64);
    let n = strata::allocate(24, Affinity::NODES).unwrap();
    assert_eq!(n.as_ptr() as usize % 64, 0);
    assert!(strata::deallocate(n, 24));

    let b = strata::allocate(64, Affinity::DATA).unwrap();
    assert!(strata::deallocate(a, 64));
    assert!(strata::deallocate(b, 64));
    assert!(strata::instance().validate());

    // An invalid configuration leaves the running allocator in place.
    let invalid = AllocatorConfig {
        default_alignment: 3,
        ..AllocatorConfig::default()
    };
    assert!(strata::init(invalid).is_err());
    assert_eq!(strata::instance().backend(), other);

    // Shutdown releases everything; later frees are rejected.
    let c = strata::allocate(32, Affinity::PHYSICS).unwrap();
    let stats = strata::shutdown().unwrap();
    assert!(stats.total_reserved_size() >= 32);
    assert!(!strata::is_initialized());
    assert!(!strata::deallocate(c, 32));

    // Explicit init after shutdown.
    strata::init(AllocatorConfig::with_backend(BackendKind::Segment)).unwrap();
    assert_eq!(strata::instance().backend(), BackendKind::Segment);
    assert!(strata::instance().nested().is_none());
    let d = strata::allocate(100, Affinity(9)).unwrap();
    assert!(strata::deallocate(d, 100));
    strata::shutdown();
}
