/**
 * settings.rs
 * Harness settings (YAML)
 *
 * Format:
 * ```yaml
 * host: 127.0.0.1
 * ports:
 *   min: 1025
 *   max: 2000
 *   sequence: [27017, 27018]   # optional, overrides min/max
 * startupTimeoutSecs: 180
 * terminateTimeoutSecs: 10
 * outputDir: /var/tmp/mprocess
 * ```
 *
 * Every key is optional; missing keys take the defaults below.
 */

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::errors::{MprocessError, Result};
use crate::host::local_hostname;
use crate::port::{PortPool, PortUniverse, TcpPortChecker, DEFAULT_MAX_PORT, DEFAULT_MIN_PORT};
use crate::process::{
    ProcessSupervisor, SupervisorOptions, DEFAULT_CONNECT_INTERVAL, DEFAULT_STARTUP_TIMEOUT,
    DEFAULT_TERMINATE_TIMEOUT, STARTUP_GRACE_PERIOD, TERMINATE_POLL_INTERVAL,
};

/// Settings file looked up in the working directory
pub const SETTINGS_FILE: &str = "mprocess.yaml";

/// Port universe settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PortSettings {
    pub min: u16,
    pub max: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<Vec<u16>>,
}

impl Default for PortSettings {
    fn default() -> Self {
        Self {
            min: DEFAULT_MIN_PORT,
            max: DEFAULT_MAX_PORT,
            sequence: None,
        }
    }
}

/// mprocess.yaml structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Host to bind/connect to; resolved from the environment when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    pub ports: PortSettings,
    pub startup_timeout_secs: u64,
    pub terminate_timeout_secs: u64,
    pub connect_interval_ms: u64,
    pub terminate_poll_interval_ms: u64,
    pub startup_grace_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: None,
            ports: PortSettings::default(),
            startup_timeout_secs: DEFAULT_STARTUP_TIMEOUT.as_secs(),
            terminate_timeout_secs: DEFAULT_TERMINATE_TIMEOUT.as_secs(),
            connect_interval_ms: DEFAULT_CONNECT_INTERVAL.as_millis() as u64,
            terminate_poll_interval_ms: TERMINATE_POLL_INTERVAL.as_millis() as u64,
            startup_grace_secs: STARTUP_GRACE_PERIOD.as_secs(),
            output_dir: None,
        }
    }
}

impl Settings {
    /// Load settings from a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(MprocessError::Config(format!(
                "settings file not found: {}",
                path.display()
            )));
        }

        let content = fs::read_to_string(path)?;
        let settings: Settings = serde_yaml::from_str(&content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load `path` if given, else `mprocess.yaml` from the working directory
    /// if present, else defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None if Path::new(SETTINGS_FILE).exists() => Self::load(SETTINGS_FILE),
            None => Ok(Self::default()),
        }
    }

    /// Reject settings that cannot produce a usable pool or supervisor
    pub fn validate(&self) -> Result<()> {
        self.universe()?;
        if self.connect_interval_ms == 0 || self.terminate_poll_interval_ms == 0 {
            return Err(MprocessError::Config(
                "poll intervals must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Configured host, falling back to the local hostname
    pub fn host(&self) -> String {
        self.host.clone().unwrap_or_else(local_hostname)
    }

    pub fn universe(&self) -> Result<PortUniverse> {
        PortUniverse::from_bounds(self.ports.min, self.ports.max, self.ports.sequence.as_deref())
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn terminate_timeout(&self) -> Duration {
        Duration::from_secs(self.terminate_timeout_secs)
    }

    /// Pool over the configured universe, checking ports on the configured host
    pub fn build_pool(&self) -> Result<PortPool> {
        PortPool::with_universe(
            self.universe()?,
            Arc::new(TcpPortChecker::new(self.host())),
        )
    }

    pub fn supervisor_options(&self) -> SupervisorOptions {
        SupervisorOptions {
            host: self.host(),
            output_dir: self
                .output_dir
                .clone()
                .unwrap_or_else(std::env::temp_dir),
            connect_interval: Duration::from_millis(self.connect_interval_ms),
            terminate_poll_interval: Duration::from_millis(self.terminate_poll_interval_ms),
            startup_grace: Duration::from_secs(self.startup_grace_secs),
        }
    }

    pub fn build_supervisor(&self, pool: Arc<PortPool>) -> ProcessSupervisor {
        ProcessSupervisor::with_options(pool, self.supervisor_options())
    }
}
