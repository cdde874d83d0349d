//! Process module for spawning, awaiting and terminating server processes

mod liveness;
mod supervisor;
mod waiter;

pub use liveness::{is_alive, send_signal, stop_pid, StopSignal};
pub use supervisor::{
    ProcessHandle, ProcessInfo, ProcessState, ProcessSupervisor, SupervisorOptions,
    DEFAULT_STARTUP_TIMEOUT, DEFAULT_TERMINATE_TIMEOUT, STARTUP_GRACE_PERIOD,
    TERMINATE_POLL_INTERVAL,
};
pub use waiter::{ReachabilityWaiter, DEFAULT_CONNECT_INTERVAL};
