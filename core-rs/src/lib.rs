//! # mprocess - server process lifecycle for test harnesses
//!
//! Spawns external server daemons (database servers and the like) on free
//! local ports, waits for them to accept connections, and tears them down
//! again while reclaiming their ports.
//!
//! ## Architecture
//!
//! ```text
//! ProcessSupervisor ──acquire/release──▶ PortPool ──is_free──▶ PortChecker
//!        │
//!        ├── spawn `<exe> --config <path>`
//!        └── ReachabilityWaiter::wait_for(host, port)
//! ```
//!
//! The pool is an explicit value shared as `Arc<PortPool>`;
//! [`PortPool::global`] exists for callers with nowhere to keep one.
//!
//! Port selection is check-then-use: a port verified as free can still be
//! bound by an unrelated process before the spawned server binds it.

pub mod cleanup;
pub mod config;
pub mod errors;
pub mod host;
pub mod port;
pub mod process;

pub use cleanup::{cleanup_process, remove_path};
pub use config::{write_config, write_config_in, ProcessConfig, Settings};
pub use errors::{MprocessError, Result};
pub use port::{MemoryPortChecker, PortChecker, PortPool, PortRange, PortUniverse, TcpPortChecker};
pub use process::{
    is_alive, ProcessHandle, ProcessInfo, ProcessState, ProcessSupervisor, ReachabilityWaiter,
    SupervisorOptions,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
