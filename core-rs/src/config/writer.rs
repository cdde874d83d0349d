/**
 * writer.rs
 * Option files for spawned server processes
 *
 * Format: one `key=value` pair per line, booleans written as true/false.
 * ```text
 * dbpath=/tmp/mprocess-Xa9f2k
 * keyFile=/tmp/mprocess-Xa9f2k/key
 * port=1031
 * ```
 */

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::errors::{MprocessError, Result};
use crate::port::PortPool;

/// Data directory option
pub const DBPATH_KEY: &str = "dbpath";

/// Authentication key file option
pub const KEY_FILE_KEY: &str = "keyFile";

/// Log file option
pub const LOG_PATH_KEY: &str = "logPath";

/// Listening port option
pub const PORT_KEY: &str = "port";

/// Prefix of generated data directories and option files
const TEMP_PREFIX: &str = "mprocess-";

/// A written option file and the options it contains
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessConfig {
    pub path: PathBuf,
    pub options: BTreeMap<String, String>,
}

impl ProcessConfig {
    /// Parse an option file written by [`write_config`]
    ///
    /// Blank lines and `#` comments are skipped.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;

        let mut options = BTreeMap::new();
        for (number, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (key, value) = line.split_once('=').ok_or_else(|| {
                MprocessError::Config(format!(
                    "{}:{}: expected key=value, got '{}'",
                    path.display(),
                    number + 1,
                    line
                ))
            })?;
            options.insert(key.trim().to_string(), value.trim().to_string());
        }

        Ok(Self {
            path: path.to_path_buf(),
            options,
        })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    /// Port the process is configured to listen on
    pub fn port(&self) -> Option<u16> {
        self.get(PORT_KEY).and_then(|port| port.parse().ok())
    }

    /// Everything cleanup should delete: referenced key file, log file and
    /// data directory, then the option file itself
    pub fn cleanup_paths(&self) -> Vec<PathBuf> {
        [KEY_FILE_KEY, LOG_PATH_KEY, DBPATH_KEY]
            .iter()
            .filter_map(|key| self.get(key))
            .map(PathBuf::from)
            .chain(std::iter::once(self.path.clone()))
            .collect()
    }

    fn render(&self) -> String {
        self.options
            .iter()
            .map(|(key, value)| format!("{}={}\n", key, value))
            .collect()
    }
}

/// Render an option value the way the option file stores it
fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Write an option file for a new process under the system temp directory.
///
/// Creates a fresh data directory (`dbpath`), optionally an auth key file
/// (`keyFile`, owner read-only) and a log path (`logPath`), overlays
/// `params`, and leases a verified port from `pool` when `params` has none.
pub fn write_config(
    params: &BTreeMap<String, Value>,
    auth_key: Option<&str>,
    log: bool,
    pool: &PortPool,
) -> Result<ProcessConfig> {
    write_config_in(&std::env::temp_dir(), params, auth_key, log, pool)
}

/// [`write_config`] with the data directory and option file created in `dir`.
///
/// On any error nothing is left behind in `dir` and a port leased here is
/// returned to `pool`.
pub fn write_config_in(
    dir: &Path,
    params: &BTreeMap<String, Value>,
    auth_key: Option<&str>,
    log: bool,
    pool: &PortPool,
) -> Result<ProcessConfig> {
    // Removed on drop until the option file is safely written
    let data_dir = tempfile::Builder::new().prefix(TEMP_PREFIX).tempdir_in(dir)?;

    let mut options = BTreeMap::new();
    options.insert(DBPATH_KEY.to_string(), data_dir.path().display().to_string());

    if let Some(key) = auth_key {
        let key_file = data_dir.path().join("key");
        fs::write(&key_file, key)?;
        restrict_to_owner_read(&key_file)?;
        options.insert(KEY_FILE_KEY.to_string(), key_file.display().to_string());
    }

    if log {
        let log_path = data_dir.path().join("process.log");
        options.insert(LOG_PATH_KEY.to_string(), log_path.display().to_string());
    }

    for (key, value) in params {
        options.insert(key.clone(), render_value(value));
    }

    let leased = if options.contains_key(PORT_KEY) {
        None
    } else {
        let port = pool.acquire(true)?;
        options.insert(PORT_KEY.to_string(), port.to_string());
        Some(port)
    };

    let mut config = ProcessConfig {
        path: PathBuf::new(),
        options,
    };

    match persist(dir, &config) {
        Ok(path) => {
            let _ = data_dir.keep();
            debug!(path = %path.display(), "Wrote process config");
            config.path = path;
            Ok(config)
        }
        Err(e) => {
            if let Some(port) = leased {
                if let Err(release_err) = pool.release(port) {
                    warn!(port, error = %release_err, "Failed to release port after write error");
                }
            }
            Err(e)
        }
    }
}

fn persist(dir: &Path, config: &ProcessConfig) -> Result<PathBuf> {
    let mut file = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .suffix(".conf")
        .tempfile_in(dir)?;
    file.write_all(config.render().as_bytes())?;
    let (_, path) = file.keep().map_err(|e| MprocessError::Io(e.error))?;
    Ok(path)
}

#[cfg(unix)]
fn restrict_to_owner_read(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o400))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_to_owner_read(path: &Path) -> Result<()> {
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_readonly(true);
    fs::set_permissions(path, perms)?;
    Ok(())
}
