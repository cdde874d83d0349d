//! Process spawn/await/terminate lifecycle
//!
//! A spawned process moves through
//! `Pending -> Starting -> Running -> Terminating -> Terminated`, or ends in
//! `Failed` when it never became reachable. The supervisor leases a port from
//! the pool when the caller does not bring one, and gives it back on every
//! failure path and after confirmed termination.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use super::liveness::{is_alive, send_signal, stop_pid, StopSignal};
use super::waiter::{ReachabilityWaiter, DEFAULT_CONNECT_INTERVAL};
use crate::errors::{MprocessError, Result};
use crate::host::{address, local_hostname};
use crate::port::PortPool;

/// How long to wait after sending SIGTERM to a process that failed to start
pub const STARTUP_GRACE_PERIOD: Duration = Duration::from_secs(3);

/// Pause between liveness checks while waiting for a process to exit
pub const TERMINATE_POLL_INTERVAL: Duration = Duration::from_millis(1500);

/// Default time a process gets to become reachable
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(180);

/// Default time a process gets to exit after SIGTERM
pub const DEFAULT_TERMINATE_TIMEOUT: Duration = Duration::from_secs(10);

/// Lifecycle state of a supervised process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    Pending,
    Starting,
    Running,
    Terminating,
    Terminated,
    Failed,
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProcessState::Pending => "pending",
            ProcessState::Starting => "starting",
            ProcessState::Running => "running",
            ProcessState::Terminating => "terminating",
            ProcessState::Terminated => "terminated",
            ProcessState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A launched external process bound (or expected to bind) to `host:port`
#[derive(Debug)]
pub struct ProcessHandle {
    pid: u32,
    host: String,
    port: u16,
    /// Port came from the pool and must go back to it
    leased: bool,
    state: ProcessState,
    started_at: DateTime<Utc>,
    executable: PathBuf,
    config_path: PathBuf,
    output_path: PathBuf,
    child: Option<Child>,
}

/// Serializable snapshot of a handle
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessInfo {
    pub pid: u32,
    pub host: String,
    pub port: u16,
    pub address: String,
    pub state: ProcessState,
    pub started_at: DateTime<Utc>,
    pub executable: PathBuf,
    pub config_path: PathBuf,
    pub output_path: PathBuf,
}

impl ProcessHandle {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port` the process is expected to listen on
    pub fn address(&self) -> String {
        address(&self.host, self.port)
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Whether the handle still holds a lease on its port
    pub fn holds_lease(&self) -> bool {
        self.leased
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// File receiving the process's merged stdout and stderr
    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn info(&self) -> ProcessInfo {
        ProcessInfo {
            pid: self.pid,
            host: self.host.clone(),
            port: self.port,
            address: self.address(),
            state: self.state,
            started_at: self.started_at,
            executable: self.executable.clone(),
            config_path: self.config_path.clone(),
            output_path: self.output_path.clone(),
        }
    }

    fn transition(&mut self, next: ProcessState) {
        debug!(pid = self.pid, from = %self.state, to = %next, "Process state change");
        self.state = next;
    }

    /// Reap the child if it already exited; true when it is gone
    fn reap(&mut self) -> bool {
        match self.child.as_mut().map(|child| child.try_wait()) {
            Some(Ok(Some(status))) => {
                debug!(pid = self.pid, %status, "Reaped child process");
                self.child = None;
                true
            }
            _ => false,
        }
    }

    fn is_running(&mut self) -> bool {
        !self.reap() && is_alive(self.pid)
    }
}

/// Tunables for a [`ProcessSupervisor`]
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Host used for reachability checks and reported addresses
    pub host: String,
    /// Directory receiving per-process output files
    pub output_dir: PathBuf,
    pub connect_interval: Duration,
    pub terminate_poll_interval: Duration,
    pub startup_grace: Duration,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            host: local_hostname(),
            output_dir: std::env::temp_dir(),
            connect_interval: DEFAULT_CONNECT_INTERVAL,
            terminate_poll_interval: TERMINATE_POLL_INTERVAL,
            startup_grace: STARTUP_GRACE_PERIOD,
        }
    }
}

/// Spawns server processes on pooled ports and tears them down again
pub struct ProcessSupervisor {
    pool: Arc<PortPool>,
    options: SupervisorOptions,
    waiter: ReachabilityWaiter,
}

impl ProcessSupervisor {
    pub fn new(pool: Arc<PortPool>) -> Self {
        Self::with_options(pool, SupervisorOptions::default())
    }

    pub fn with_options(pool: Arc<PortPool>, options: SupervisorOptions) -> Self {
        let waiter = ReachabilityWaiter::new(options.connect_interval);
        Self {
            pool,
            options,
            waiter,
        }
    }

    pub fn pool(&self) -> &Arc<PortPool> {
        &self.pool
    }

    pub fn options(&self) -> &SupervisorOptions {
        &self.options
    }

    /// Start `<executable> --config <config_path>`.
    ///
    /// Without `port`, one is leased from the pool (verified). With a
    /// non-zero `timeout` the call waits until the port accepts connections;
    /// a zero timeout returns right after launch without any confirmation.
    ///
    /// # Errors
    /// - `Exhausted` when no port could be leased
    /// - `SpawnFailed` when the executable could not be launched
    /// - `StartupTimeout` when the process never became reachable; it has been
    ///   sent SIGTERM and given a short grace period
    ///
    /// A leased port is released before any of these errors is returned.
    pub async fn spawn(
        &self,
        executable: impl AsRef<Path>,
        config_path: impl AsRef<Path>,
        port: Option<u16>,
        timeout: Duration,
    ) -> Result<ProcessHandle> {
        let executable = executable.as_ref();
        let config_path = config_path.as_ref();

        let (port, leased) = match port {
            Some(port) => (port, false),
            None => (self.pool.acquire(true)?, true),
        };

        let mut handle = match self.launch(executable, config_path, port, leased) {
            Ok(handle) => handle,
            Err(e) => {
                self.release_port(port, leased);
                return Err(e);
            }
        };

        if timeout.is_zero() {
            handle.transition(ProcessState::Running);
            info!(pid = handle.pid, address = %handle.address(), "Started process without waiting");
            return Ok(handle);
        }

        if self.waiter.wait_for(&self.options.host, port, timeout).await {
            handle.transition(ProcessState::Running);
            info!(pid = handle.pid, address = %handle.address(), "Process is up");
            return Ok(handle);
        }

        warn!(
            pid = handle.pid,
            address = %handle.address(),
            timeout_secs = timeout.as_secs(),
            "Process did not become reachable, terminating it"
        );
        send_signal(handle.pid, StopSignal::Terminate);
        if !self.wait_until_gone(&mut handle, self.options.startup_grace).await {
            warn!(pid = handle.pid, "Process still alive after startup grace period");
        }
        handle.transition(ProcessState::Failed);
        self.release_handle_port(&mut handle);

        Err(MprocessError::StartupTimeout {
            address: handle.address(),
            timeout,
        })
    }

    /// Ask a process to exit and wait up to `timeout` for it to go.
    ///
    /// Returns true when the process is confirmed gone (immediately if it
    /// was already dead). Confirmed termination releases the handle's leased
    /// port. False means it is still running after `timeout`; the handle
    /// stays `Terminating` and the caller may retry or [`kill`](Self::kill).
    pub async fn terminate(&self, handle: &mut ProcessHandle, timeout: Duration) -> bool {
        if handle.state == ProcessState::Terminated {
            return true;
        }

        let gone = if handle.is_running() {
            info!(pid = handle.pid, "Terminating process");
            send_signal(handle.pid, StopSignal::Terminate);
            handle.transition(ProcessState::Terminating);
            self.wait_until_gone(handle, timeout).await
        } else {
            true
        };

        if gone {
            handle.transition(ProcessState::Terminated);
            self.release_handle_port(handle);
        } else {
            warn!(
                pid = handle.pid,
                timeout_secs = timeout.as_secs_f64(),
                "Process still alive after termination request"
            );
        }
        gone
    }

    /// Force-kill a process whose graceful termination did not complete
    pub async fn kill(&self, handle: &mut ProcessHandle) -> bool {
        if handle.state == ProcessState::Terminated {
            return true;
        }

        if handle.is_running() {
            warn!(pid = handle.pid, "Killing process");
            send_signal(handle.pid, StopSignal::Kill);
            handle.transition(ProcessState::Terminating);
            if !self.wait_until_gone(handle, self.options.startup_grace).await {
                return false;
            }
        }

        handle.transition(ProcessState::Terminated);
        self.release_handle_port(handle);
        true
    }

    /// [`terminate`](Self::terminate) for a bare pid with no handle.
    ///
    /// No port bookkeeping happens here; the caller owns whatever port the
    /// process used.
    pub async fn terminate_pid(&self, pid: u32, timeout: Duration) -> bool {
        stop_pid(
            pid,
            StopSignal::Terminate,
            timeout,
            self.options.terminate_poll_interval,
        )
        .await
    }

    fn launch(
        &self,
        executable: &Path,
        config_path: &Path,
        port: u16,
        leased: bool,
    ) -> Result<ProcessHandle> {
        let stem = executable
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "process".to_string());

        let (output, output_path) = tempfile::Builder::new()
            .prefix(&format!("{}-{}-", stem, port))
            .suffix(".out")
            .tempfile_in(&self.options.output_dir)?
            .keep()
            .map_err(|e| MprocessError::Io(e.error))?;
        let stderr = output.try_clone()?;

        let spawn_failed = |source: std::io::Error| MprocessError::SpawnFailed {
            executable: executable.display().to_string(),
            source,
        };

        debug!(executable = %executable.display(), config = %config_path.display(), port, "Launching process");
        let child = Command::new(executable)
            .arg("--config")
            .arg(config_path)
            .stdin(Stdio::null())
            .stdout(Stdio::from(output))
            .stderr(Stdio::from(stderr))
            .spawn()
            .map_err(spawn_failed)?;

        let pid = child.id().ok_or_else(|| {
            spawn_failed(std::io::Error::new(
                std::io::ErrorKind::Other,
                "process exited before its pid was read",
            ))
        })?;

        let mut handle = ProcessHandle {
            pid,
            host: self.options.host.clone(),
            port,
            leased,
            state: ProcessState::Pending,
            started_at: Utc::now(),
            executable: executable.to_path_buf(),
            config_path: config_path.to_path_buf(),
            output_path,
            child: Some(child),
        };
        handle.transition(ProcessState::Starting);
        Ok(handle)
    }

    /// Poll until the process is gone or `timeout` elapses
    async fn wait_until_gone(&self, handle: &mut ProcessHandle, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if !handle.is_running() {
                // Collect the exit status if it only just turned into a zombie
                handle.reap();
                return true;
            }

            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            sleep(self.options.terminate_poll_interval.min(deadline - now)).await;
        }
    }

    fn release_handle_port(&self, handle: &mut ProcessHandle) {
        self.release_port(handle.port, handle.leased);
        handle.leased = false;
    }

    fn release_port(&self, port: u16, leased: bool) {
        if !leased {
            return;
        }
        if let Err(e) = self.pool.release(port) {
            warn!(port, error = %e, "Failed to release port");
        }
    }
}
