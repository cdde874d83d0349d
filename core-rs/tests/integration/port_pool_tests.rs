//! Port Pool Integration Tests
//!
//! Exercises PortPool against real sockets on 127.0.0.1: live partitioning,
//! verification against foreign listeners, and reclaiming ports once their
//! holder goes away.

use mprocess::{MprocessError, PortChecker, PortPool, TcpPortChecker};
use std::collections::HashSet;
use std::net::TcpListener;
use std::sync::Arc;

const HOST: &str = "127.0.0.1";

fn checker() -> Arc<TcpPortChecker> {
    Arc::new(TcpPortChecker::new(HOST))
}

/// First run of `len` consecutive bindable ports at or above `start`
fn free_run(start: u16, len: u16) -> u16 {
    let checker = TcpPortChecker::new(HOST);
    let mut base = start;
    while base < 65000 {
        if (base..base + len).all(|port| checker.is_free(port)) {
            return base;
        }
        base += len;
    }
    panic!("no run of {} free ports above {}", len, start);
}

#[test]
fn test_three_free_ports_then_exhausted() {
    // Prefer the documented 6000-6003 range, move elsewhere if the host uses it
    let base = free_run(6000, 3);
    let pool = PortPool::new(base, base + 3, None, checker()).unwrap();

    let ports: HashSet<u16> = (0..3).map(|_| pool.acquire(true).unwrap()).collect();
    assert_eq!(ports, (base..base + 3).collect::<HashSet<u16>>());

    match pool.acquire(true) {
        Err(MprocessError::Exhausted(_)) => {}
        other => panic!("Expected Exhausted, got {:?}", other),
    }
}

#[test]
fn test_foreign_listener_is_never_handed_out() {
    let base = free_run(46200, 4);
    let foreign = TcpListener::bind((HOST, base + 1)).unwrap();

    let pool = PortPool::new(base, base + 4, None, checker()).unwrap();
    assert!(pool.is_leased(base + 1));

    let handed_out: Vec<u16> = (0..3).map(|_| pool.acquire(true).unwrap()).collect();
    assert!(!handed_out.contains(&(base + 1)));
    assert!(pool.acquire(true).is_err());

    drop(foreign);
}

#[test]
fn test_listener_bound_after_scan_is_skipped_by_verification() {
    let base = free_run(46300, 2);
    let pool = PortPool::new(base, base + 2, None, checker()).unwrap();
    assert_eq!(pool.free_ports().len(), 2);

    let late = TcpListener::bind((HOST, base)).unwrap();
    let port = pool.acquire(true).unwrap();
    assert_eq!(port, base + 1);
    assert!(pool.is_leased(base));

    drop(late);
}

#[test]
fn test_refresh_only_closed_reclaims_dead_holders() {
    let base = free_run(46400, 2);
    let pool = PortPool::new(base, base + 2, None, checker()).unwrap();

    let port = pool.acquire(true).unwrap();
    let server = TcpListener::bind((HOST, port)).unwrap();

    pool.refresh(true);
    assert!(pool.is_leased(port), "port still bound must stay leased");

    // Server dies without anyone calling release()
    drop(server);
    pool.refresh(true);
    assert!(!pool.is_leased(port));
    assert!(pool.free_ports().contains(&port));
}

#[test]
fn test_configure_moves_pool_to_new_range() {
    let first = free_run(46500, 2);
    let second = free_run(46600, 3);
    let pool = PortPool::new(first, first + 2, None, checker()).unwrap();
    pool.acquire(true).unwrap();

    pool.configure(second, second + 3, None).unwrap();
    assert_eq!(pool.len(), 3);
    assert!(pool.leased_ports().is_empty());
    assert!(matches!(
        pool.release(first),
        Err(MprocessError::InvalidArgument(_))
    ));
}

#[test]
fn test_parallel_callers_get_distinct_ports() {
    let base = free_run(46700, 16);
    let pool = Arc::new(PortPool::new(base, base + 16, None, checker()).unwrap());

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let pool = pool.clone();
            std::thread::spawn(move || {
                (0..4).map(|_| pool.acquire(true).unwrap()).collect::<Vec<u16>>()
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for worker in workers {
        for port in worker.join().unwrap() {
            assert!(seen.insert(port), "port {} leased twice", port);
        }
    }
    assert_eq!(seen.len(), 16);
}

#[test]
fn test_global_pool_is_one_instance() {
    let a = PortPool::global();
    let b = PortPool::global();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(a.len(), 975);
}
