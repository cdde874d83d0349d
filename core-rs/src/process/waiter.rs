//! Reachability polling for freshly started processes

use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout as with_timeout, Instant};
use tracing::debug;

/// Pause between connection attempts
pub const DEFAULT_CONNECT_INTERVAL: Duration = Duration::from_secs(1);

/// Polls `host:port` until a TCP connection succeeds or time runs out
#[derive(Debug, Clone)]
pub struct ReachabilityWaiter {
    interval: Duration,
}

impl ReachabilityWaiter {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Wait until something accepts connections on `host:port`.
    ///
    /// Returns true on the first successful connect, false once `timeout`
    /// has elapsed. Connection failures are expected while the process boots
    /// and are never reported as errors. A single attempt is bounded by the
    /// retry interval so an unresponsive host cannot stall past the deadline
    /// by more than one interval.
    pub async fn wait_for(&self, host: &str, port: u16, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            match with_timeout(self.interval, TcpStream::connect((host, port))).await {
                Ok(Ok(_stream)) => {
                    debug!(host, port, attempts, "Process is reachable");
                    return true;
                }
                Ok(Err(e)) => debug!(host, port, error = %e, "Connect failed"),
                Err(_) => debug!(host, port, "Connect attempt timed out"),
            }

            let now = Instant::now();
            if now >= deadline {
                debug!(host, port, attempts, "Gave up waiting for process");
                return false;
            }
            sleep(self.interval.min(deadline - now)).await;
        }
    }
}

impl Default for ReachabilityWaiter {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_INTERVAL)
    }
}
