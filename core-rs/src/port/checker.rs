/**
 * checker.rs
 * Port availability checks
 *
 * A port is considered free when a TCP listener can be bound to it on the
 * local host. This is a heuristic: another process may bind the port between
 * the check and its real use, so callers must tolerate false positives.
 */

use std::collections::HashSet;
use std::net::TcpListener;
use std::sync::Mutex;

use crate::host::local_hostname;

/// Decides whether a port is currently bindable
pub trait PortChecker: Send + Sync {
    /// true if the port is free, false if anything prevents binding it
    fn is_free(&self, port: u16) -> bool;
}

/// Binds a throwaway TCP listener to `(host, port)`
#[derive(Debug, Clone)]
pub struct TcpPortChecker {
    host: String,
}

impl TcpPortChecker {
    /// Checker bound to an explicit host (e.g. "127.0.0.1")
    pub fn new<S: Into<String>>(host: S) -> Self {
        Self { host: host.into() }
    }

    /// Checker bound to the resolved local hostname
    pub fn local() -> Self {
        Self::new(local_hostname())
    }

    pub fn host(&self) -> &str {
        &self.host
    }
}

impl PortChecker for TcpPortChecker {
    fn is_free(&self, port: u16) -> bool {
        // Listener is dropped before returning, whichever way bind went
        TcpListener::bind((self.host.as_str(), port)).is_ok()
    }
}

/// In-memory checker: every port is free unless marked occupied.
///
/// Lets harnesses simulate foreign processes grabbing or releasing ports
/// without touching real sockets.
#[derive(Debug, Default)]
pub struct MemoryPortChecker {
    occupied: Mutex<HashSet<u16>>,
}

impl MemoryPortChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn occupy(&self, port: u16) {
        self.lock().insert(port);
    }

    pub fn vacate(&self, port: u16) {
        self.lock().remove(&port);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<u16>> {
        self.occupied.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl PortChecker for MemoryPortChecker {
    fn is_free(&self, port: u16) -> bool {
        !self.lock().contains(&port)
    }
}
