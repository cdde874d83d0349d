/**
 * pool.rs
 * Port pool with liveness verification
 *
 * The pool owns a universe of candidate ports (a contiguous range or an
 * explicit sequence) partitioned into two disjoint sets:
 * - free:   assumed bindable, handed out by acquire()
 * - leased: handed out, or found occupied by someone else
 *
 * Every port of the universe is in exactly one of the two sets. The
 * partition sits behind a single mutex, so acquire/release/refresh/configure
 * are serialized against each other.
 *
 * Selecting a port is check-then-use: a verified port can still be taken by
 * another process before the caller binds it.
 */

use once_cell::sync::OnceCell;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::checker::{PortChecker, TcpPortChecker};
use crate::errors::{MprocessError, Result};

/// Default lower bound of the pool (inclusive)
pub const DEFAULT_MIN_PORT: u16 = 1025;

/// Default upper bound of the pool (exclusive)
pub const DEFAULT_MAX_PORT: u16 = 2000;

static DEFAULT_POOL: OnceCell<Arc<PortPool>> = OnceCell::new();

/// Half-open port range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    /// Check if port is within this range
    pub fn contains(&self, port: u16) -> bool {
        port >= self.start && port < self.end
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_PORT, DEFAULT_MAX_PORT)
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Source of the candidate ports
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortUniverse {
    Range(PortRange),
    Sequence(BTreeSet<u16>),
}

impl PortUniverse {
    /// Build from `min`/`max` bounds, or from `sequence` when one is given
    /// (the bounds are then ignored).
    pub fn from_bounds(min_port: u16, max_port: u16, sequence: Option<&[u16]>) -> Result<Self> {
        let universe = match sequence {
            Some(ports) => PortUniverse::Sequence(ports.iter().copied().collect()),
            None => PortUniverse::Range(PortRange::new(min_port, max_port)),
        };
        universe.validate()?;
        Ok(universe)
    }

    /// Reject a universe with no ports in it
    pub fn validate(&self) -> Result<()> {
        let empty = match self {
            PortUniverse::Range(range) => range.is_empty(),
            PortUniverse::Sequence(ports) => ports.is_empty(),
        };
        if empty {
            return Err(MprocessError::InvalidArgument(format!(
                "empty port universe: {}",
                self
            )));
        }
        Ok(())
    }

    pub fn ports(&self) -> BTreeSet<u16> {
        match self {
            PortUniverse::Range(range) => (range.start..range.end).collect(),
            PortUniverse::Sequence(ports) => ports.clone(),
        }
    }
}

impl Default for PortUniverse {
    fn default() -> Self {
        PortUniverse::Range(PortRange::default())
    }
}

impl fmt::Display for PortUniverse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortUniverse::Range(range) => write!(f, "range {}", range),
            PortUniverse::Sequence(ports) => write!(f, "sequence of {} ports", ports.len()),
        }
    }
}

/// Free/leased split of the universe
#[derive(Debug)]
struct Partition {
    universe: PortUniverse,
    ports: BTreeSet<u16>,
    free: BTreeSet<u16>,
    leased: BTreeSet<u16>,
}

impl Partition {
    /// Fresh partition; everything starts out free until the first rescan
    fn new(universe: PortUniverse) -> Self {
        let ports = universe.ports();
        Self {
            universe,
            free: ports.clone(),
            ports,
            leased: BTreeSet::new(),
        }
    }

    /// Re-partition the whole universe from live checks
    fn rescan(&mut self, checker: &dyn PortChecker) {
        let (free, leased): (BTreeSet<u16>, BTreeSet<u16>) =
            self.ports.iter().partition(|&&port| checker.is_free(port));

        debug!(
            universe = %self.universe,
            free = free.len(),
            leased = leased.len(),
            "Rescanned port pool"
        );

        self.free = free;
        self.leased = leased;
    }

    /// Move leased ports that are bindable again back to free
    fn reclaim_closed(&mut self, checker: &dyn PortChecker) {
        let reopened: Vec<u16> = self
            .leased
            .iter()
            .copied()
            .filter(|&port| checker.is_free(port))
            .collect();

        if !reopened.is_empty() {
            info!(count = reopened.len(), "Reclaimed leased ports that are free again");
        }

        for port in reopened {
            self.leased.remove(&port);
            self.free.insert(port);
        }
    }
}

/// Process-wide registry of free and leased ports
pub struct PortPool {
    partition: Mutex<Partition>,
    checker: Arc<dyn PortChecker>,
}

impl PortPool {
    /// Create a pool over `[min_port, max_port)`, or over `sequence` when
    /// given, and partition it with live checks.
    ///
    /// # Example
    /// ```no_run
    /// use mprocess::port::{PortPool, TcpPortChecker};
    /// use std::sync::Arc;
    ///
    /// let pool = PortPool::new(6000, 6100, None, Arc::new(TcpPortChecker::local())).unwrap();
    /// let port = pool.acquire(true).unwrap();
    /// pool.release(port).unwrap();
    /// ```
    pub fn new(
        min_port: u16,
        max_port: u16,
        sequence: Option<&[u16]>,
        checker: Arc<dyn PortChecker>,
    ) -> Result<Self> {
        let universe = PortUniverse::from_bounds(min_port, max_port, sequence)?;
        Ok(Self::scanned(universe, checker))
    }

    /// Create a pool over an explicit universe.
    ///
    /// # Errors
    /// `InvalidArgument` if the universe holds no ports.
    pub fn with_universe(universe: PortUniverse, checker: Arc<dyn PortChecker>) -> Result<Self> {
        universe.validate()?;
        Ok(Self::scanned(universe, checker))
    }

    fn scanned(universe: PortUniverse, checker: Arc<dyn PortChecker>) -> Self {
        let mut partition = Partition::new(universe);
        partition.rescan(checker.as_ref());

        Self {
            partition: Mutex::new(partition),
            checker,
        }
    }

    /// Shared default pool over `[1025, 2000)` on the local hostname.
    ///
    /// Built on first use. Prefer constructing a pool explicitly and passing
    /// it around; this exists for callers that have nowhere to keep one.
    pub fn global() -> Arc<PortPool> {
        DEFAULT_POOL
            .get_or_init(|| {
                Arc::new(Self::scanned(
                    PortUniverse::default(),
                    Arc::new(TcpPortChecker::local()),
                ))
            })
            .clone()
    }

    /// Replace the universe and re-partition it.
    ///
    /// A no-op when the requested universe is already in effect.
    pub fn configure(&self, min_port: u16, max_port: u16, sequence: Option<&[u16]>) -> Result<()> {
        let universe = PortUniverse::from_bounds(min_port, max_port, sequence)?;
        let mut partition = self.partition();

        if partition.universe == universe {
            debug!(universe = %universe, "Port pool already configured");
            return Ok(());
        }

        info!(from = %partition.universe, to = %universe, "Changing port pool universe");
        *partition = Partition::new(universe);
        partition.rescan(self.checker.as_ref());
        Ok(())
    }

    /// Lease a port.
    ///
    /// Rescans the universe first when nothing is free. With `verify`, each
    /// candidate is bind-checked; occupied candidates are marked leased and
    /// skipped.
    ///
    /// # Errors
    /// `Exhausted` when no port is left to hand out.
    pub fn acquire(&self, verify: bool) -> Result<u16> {
        let mut partition = self.partition();

        if partition.free.is_empty() {
            debug!("No free ports, rescanning pool");
            partition.rescan(self.checker.as_ref());
        }

        while let Some(port) = partition.free.pop_first() {
            partition.leased.insert(port);

            if verify && !self.checker.is_free(port) {
                warn!(port, "Port assumed free is occupied, skipping");
                continue;
            }

            debug!(port, verified = verify, "Leased port");
            return Ok(port);
        }

        Err(MprocessError::Exhausted(partition.universe.to_string()))
    }

    /// Return a port to the free set. Idempotent.
    ///
    /// # Errors
    /// `InvalidArgument` if the port is not part of the universe.
    pub fn release(&self, port: u16) -> Result<()> {
        let mut partition = self.partition();

        if !partition.ports.contains(&port) {
            return Err(MprocessError::InvalidArgument(format!(
                "port {} is outside the pool's {}",
                port, partition.universe
            )));
        }

        partition.leased.remove(&port);
        partition.free.insert(port);
        debug!(port, "Released port");
        Ok(())
    }

    /// Re-validate the partition against live port status.
    ///
    /// `only_closed = true` re-checks leased ports only and frees the ones
    /// that became bindable. `false` re-partitions the whole universe, which
    /// also absorbs ports held by unrelated processes into `leased`.
    pub fn refresh(&self, only_closed: bool) {
        let mut partition = self.partition();
        if only_closed {
            partition.reclaim_closed(self.checker.as_ref());
        } else {
            partition.rescan(self.checker.as_ref());
        }
    }

    pub fn free_ports(&self) -> Vec<u16> {
        self.partition().free.iter().copied().collect()
    }

    pub fn leased_ports(&self) -> Vec<u16> {
        self.partition().leased.iter().copied().collect()
    }

    pub fn universe(&self) -> PortUniverse {
        self.partition().universe.clone()
    }

    pub fn is_leased(&self, port: u16) -> bool {
        self.partition().leased.contains(&port)
    }

    pub fn contains(&self, port: u16) -> bool {
        self.partition().ports.contains(&port)
    }

    /// Number of ports in the universe
    pub fn len(&self) -> usize {
        self.partition().ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn partition(&self) -> MutexGuard<'_, Partition> {
        self.partition.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for PortPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let partition = self.partition();
        f.debug_struct("PortPool")
            .field("universe", &partition.universe)
            .field("free", &partition.free.len())
            .field("leased", &partition.leased.len())
            .finish()
    }
}
