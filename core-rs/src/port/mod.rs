/**
 * port module
 * Port pool and availability checks
 */

pub mod checker;
pub mod pool;

pub use checker::{MemoryPortChecker, PortChecker, TcpPortChecker};
pub use pool::{PortPool, PortRange, PortUniverse, DEFAULT_MAX_PORT, DEFAULT_MIN_PORT};
