// Process Supervisor Contract Tests
//
// These tests verify supervisor invariants around port leases and waiting.
// A failed spawn that keeps its lease slowly drains the pool for every later test.
//
// **Problem**: Error paths return early and forget the lease they took
// **Solution**: Contract tests that check pool state after every failure

use mprocess::{
    is_alive, MemoryPortChecker, MprocessError, PortPool, ProcessState, ProcessSupervisor,
    SupervisorOptions,
};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn supervisor(start: u16, end: u16) -> ProcessSupervisor {
    let pool = PortPool::new(start, end, None, Arc::new(MemoryPortChecker::new())).unwrap();
    ProcessSupervisor::with_options(
        Arc::new(pool),
        SupervisorOptions {
            host: "127.0.0.1".to_string(),
            terminate_poll_interval: Duration::from_millis(100),
            ..SupervisorOptions::default()
        },
    )
}

/// WHY: A spawn that fails to launch gives its leased port back
/// REASON: The caller never received a handle, so nobody else can release it
/// BREAKS: The pool shrinks by one port per failed spawn
/// SACRIFICES: If this fails, long test runs end in Exhausted
#[tokio::test]
async fn failed_launch_releases_its_port() {
    let supervisor = supervisor(6500, 6502);

    for _ in 0..5 {
        let result = supervisor
            .spawn(
                PathBuf::from("/nonexistent/mprocess-server"),
                "/tmp/unused.conf",
                None,
                Duration::from_secs(1),
            )
            .await;
        assert!(matches!(result, Err(MprocessError::SpawnFailed { .. })));
    }

    assert!(supervisor.pool().leased_ports().is_empty());
    assert_eq!(supervisor.pool().free_ports(), vec![6500, 6501]);

    // If this test fails:
    // - spawn() returned the launch error before releasing the lease
}

/// WHY: Only startup timeouts are worth retrying
/// REASON: A timeout often means a slow machine; a missing binary stays missing
/// BREAKS: Retry loops that spin on permanent errors
/// SACRIFICES: If this fails, callers retry the wrong failures
#[test]
fn only_startup_timeout_is_retryable() {
    let timeout = MprocessError::StartupTimeout {
        address: "127.0.0.1:6500".to_string(),
        timeout: Duration::from_secs(5),
    };
    assert!(timeout.is_retryable());

    let spawn = MprocessError::SpawnFailed {
        executable: "/nonexistent".to_string(),
        source: std::io::Error::from(std::io::ErrorKind::NotFound),
    };
    assert!(!spawn.is_retryable());
    assert!(!MprocessError::Exhausted("6500-6502".to_string()).is_retryable());

    // If this test fails:
    // - is_retryable() changed meaning
}

/// WHY: A zero timeout returns right after launch
/// REASON: Callers that manage readiness themselves must not pay for a wait
/// BREAKS: Fire-and-forget spawns block for the connect interval
/// SACRIFICES: If this fails, zero means "wait" somewhere
#[tokio::test]
async fn zero_timeout_skips_the_reachability_wait() {
    let supervisor = supervisor(6510, 6512);
    let temp = TempDir::new().unwrap();
    let script = temp.path().join("server");
    fs::write(&script, "#!/bin/sh\nexec sleep 30\n").unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
    }

    let started = Instant::now();
    let mut handle = supervisor
        .spawn(&script, temp.path().join("server.conf"), None, Duration::ZERO)
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(handle.state(), ProcessState::Running);
    assert!(handle.holds_lease());

    assert!(supervisor.kill(&mut handle).await);
    assert!(!is_alive(handle.pid()));
    assert!(supervisor.pool().leased_ports().is_empty());

    // If this test fails:
    // - spawn() waited on a port it was told not to wait for
}

/// WHY: is_alive answers false for pids that never existed
/// REASON: Callers poll liveness on stale pids from earlier runs
/// BREAKS: Harness cleanup that treats lookup errors as fatal
/// SACRIFICES: If this fails, liveness is leaking OS errors
#[test]
fn liveness_of_unknown_pid_is_false() {
    assert!(!is_alive(0));
    assert!(!is_alive(u32::MAX));
    assert!(!is_alive(i32::MAX as u32));

    // If this test fails:
    // - is_alive() panicked or reported a reserved pid as running
}
