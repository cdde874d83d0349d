// Port Pool Contract Tests
//
// These tests verify pool INVARIANTS that MUST NEVER BREAK regardless of implementation.
// Every harness built on the pool assumes a leased port is never handed out twice.
//
// **Problem**: A "simpler" pool drops the leased set or skips the lock
// **Solution**: Contract tests that fail with a clear explanation of what's being sacrificed

use mprocess::{MemoryPortChecker, MprocessError, PortPool};
use std::collections::BTreeSet;
use std::sync::Arc;

fn pool_with(start: u16, end: u16) -> (PortPool, Arc<MemoryPortChecker>) {
    let checker = Arc::new(MemoryPortChecker::new());
    let pool = PortPool::new(start, end, None, checker.clone()).unwrap();
    (pool, checker)
}

fn assert_partition(pool: &PortPool) {
    let free: BTreeSet<u16> = pool.free_ports().into_iter().collect();
    let leased: BTreeSet<u16> = pool.leased_ports().into_iter().collect();
    let universe = pool.universe().ports();

    assert!(free.is_disjoint(&leased), "free and leased overlap");
    assert_eq!(
        free.union(&leased).copied().collect::<BTreeSet<u16>>(),
        universe,
        "free + leased must cover exactly the universe"
    );
}

/// WHY: free and leased partition the universe at every point
/// REASON: A port in both sets can be handed to two servers
/// BREAKS: Concurrent spawns bind the same port and one dies with EADDRINUSE
/// SACRIFICES: If this fails, parallel test harnesses become flaky
#[test]
fn free_and_leased_partition_the_universe() {
    let (pool, checker) = pool_with(6000, 6010);
    assert_partition(&pool);

    checker.occupy(6003);
    pool.refresh(false);
    assert_partition(&pool);

    pool.acquire(true).unwrap();
    pool.acquire(false).unwrap();
    assert_partition(&pool);

    pool.release(6000).unwrap();
    assert_partition(&pool);

    pool.configure(7000, 7005, None).unwrap();
    assert_partition(&pool);

    pool.configure(1025, 2000, Some(&[9001, 9003])).unwrap();
    assert_partition(&pool);
    assert_eq!(pool.len(), 2);

    // If this test fails:
    // - A port was added to one set without leaving the other
    // - Or configure() kept ports from the previous universe
}

/// WHY: acquire never returns a port that is currently leased
/// REASON: The lease is the only thing keeping two servers apart
/// BREAKS: Port exclusivity between concurrently spawned processes
/// SACRIFICES: If this fails, you're handing out a port someone holds
#[test]
fn acquire_never_returns_a_leased_port() {
    let (pool, _) = pool_with(6000, 6020);
    let mut handed_out = BTreeSet::new();

    for _ in 0..20 {
        let port = pool.acquire(false).unwrap();
        assert!(handed_out.insert(port), "port {} handed out twice", port);
        assert!(pool.is_leased(port));
    }

    // If this test fails:
    // - acquire() forgot to move the port into the leased set
}

/// WHY: A port released without a refresh comes back on the next acquire
/// REASON: Tests that release and respawn rely on the same small range
/// BREAKS: Single-port pools stay exhausted after the first release
/// SACRIFICES: If this fails, release() is not returning ports to free
#[test]
fn released_port_is_acquired_again() {
    let (pool, _) = pool_with(6000, 6001);

    let port = pool.acquire(false).unwrap();
    pool.release(port).unwrap();
    assert_eq!(pool.acquire(false).unwrap(), port);

    // If this test fails:
    // - release() dropped the port or acquire() ignores returned ports
}

/// WHY: refresh(only_closed) only ever moves ports from leased to free
/// REASON: A partial refresh must not evict a port someone still needs
/// BREAKS: Ports leased by running processes
/// SACRIFICES: If this fails, refresh is leaking leases to other callers
#[test]
fn refresh_only_closed_never_shrinks_free() {
    let (pool, checker) = pool_with(6000, 6006);
    pool.acquire(false).unwrap();
    pool.acquire(false).unwrap();
    pool.acquire(false).unwrap();

    // One leased port got bound, one free port got bound
    checker.occupy(6001);
    checker.occupy(6004);

    let free_before: BTreeSet<u16> = pool.free_ports().into_iter().collect();
    pool.refresh(true);
    let free_after: BTreeSet<u16> = pool.free_ports().into_iter().collect();

    assert!(free_after.is_superset(&free_before));
    assert!(pool.is_leased(6001));
    assert!(!pool.is_leased(6000));
    assert!(!pool.is_leased(6002));
    assert_partition(&pool);

    // If this test fails:
    // - refresh(true) rescanned the whole universe instead of leased ports
}

/// WHY: An exhausted pool fails immediately with Exhausted
/// REASON: Callers decide whether to wait; the pool never blocks them
/// BREAKS: Harnesses hang forever on an exhausted range
/// SACRIFICES: If this fails, acquire() is spinning or waiting
#[test]
fn exhaustion_is_an_error_not_a_wait() {
    let (pool, checker) = pool_with(6000, 6002);
    checker.occupy(6000);
    checker.occupy(6001);

    let started = std::time::Instant::now();
    match pool.acquire(true) {
        Err(MprocessError::Exhausted(_)) => {}
        other => panic!("Expected Exhausted, got {:?}", other),
    }
    assert!(started.elapsed() < std::time::Duration::from_secs(1));
    assert_partition(&pool);

    // If this test fails:
    // - acquire() retries verification in a loop
}
