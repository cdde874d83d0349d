//! OS-level process status and signalling
//!
//! "Alive" means running, sleeping, or blocked on a lock. Zombies, stopped
//! processes and pids that do not exist are all reported as not alive; a
//! missing process is an expected answer, never an error.

use std::time::Duration;
use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Signal used to stop a process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    /// Graceful termination request (SIGTERM)
    Terminate,
    /// Forced kill (SIGKILL)
    Kill,
}

/// Check if a process with the given pid is alive
pub fn is_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }

    let pid = Pid::from_u32(pid);
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::Some(&[pid]));

    match sys.process(pid) {
        Some(process) => matches!(
            process.status(),
            ProcessStatus::Run | ProcessStatus::Sleep | ProcessStatus::LockBlocked
        ),
        None => false,
    }
}

/// Send a stop signal to a process.
///
/// Returns false when the signal could not be delivered (no such process,
/// no permission, or a pid that does not fit the OS pid type).
#[cfg(unix)]
pub fn send_signal(pid: u32, signal: StopSignal) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    // Non-positive pids address process groups, never do that here
    let raw = match i32::try_from(pid) {
        Ok(raw) if raw > 0 => raw,
        _ => return false,
    };

    let signal = match signal {
        StopSignal::Terminate => Signal::SIGTERM,
        StopSignal::Kill => Signal::SIGKILL,
    };

    match kill(Pid::from_raw(raw), signal) {
        Ok(()) => true,
        Err(e) => {
            debug!(pid, ?signal, error = %e, "Failed to signal process");
            false
        }
    }
}

#[cfg(not(unix))]
pub fn send_signal(pid: u32, signal: StopSignal) -> bool {
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::Some(&[Pid::from_u32(pid)]));
    match sys.process(Pid::from_u32(pid)) {
        Some(process) => {
            debug!(pid, ?signal, "Stopping process");
            process.kill()
        }
        None => false,
    }
}

/// Signal a bare pid and wait up to `timeout` for it to go away.
///
/// Returns true when the process is gone, immediately so if it was not
/// alive to begin with. Polls every `poll_interval`.
pub async fn stop_pid(
    pid: u32,
    signal: StopSignal,
    timeout: Duration,
    poll_interval: Duration,
) -> bool {
    if !is_alive(pid) {
        return true;
    }

    info!(pid, ?signal, "Stopping process");
    send_signal(pid, signal);

    let deadline = Instant::now() + timeout;
    while is_alive(pid) {
        let now = Instant::now();
        if now >= deadline {
            warn!(pid, "Process still alive after stop request");
            return false;
        }
        sleep(poll_interval.min(deadline - now)).await;
    }
    true
}
