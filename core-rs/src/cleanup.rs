//! Removal of the files a spawned process leaves behind

use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::ProcessConfig;
use crate::errors::Result;

/// Pause before retrying a removal that hit a permission error
pub const PERMISSION_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Remove a file or directory tree.
///
/// `None` and missing paths are no-ops. A removal denied for permissions is
/// retried once after [`PERMISSION_RETRY_DELAY`], with the tree made
/// owner-writable first.
pub fn remove_path(path: Option<&Path>) -> Result<()> {
    remove_path_with_delay(path, PERMISSION_RETRY_DELAY)
}

/// [`remove_path`] with an explicit retry delay
pub fn remove_path_with_delay(path: Option<&Path>, retry_delay: Duration) -> Result<()> {
    let path = match path {
        Some(path) => path,
        None => return Ok(()),
    };

    match remove_once(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            warn!(path = %path.display(), "Permission denied removing path, retrying");
            std::thread::sleep(retry_delay);
            make_writable(path);
            Ok(remove_once(path)?)
        }
        Err(e) => Err(e.into()),
    }
}

/// Remove everything a process config refers to, then the config file
pub fn cleanup_process(config: &ProcessConfig) -> Result<()> {
    for path in config.cleanup_paths() {
        remove_path(Some(&path))?;
    }
    debug!(config = %config.path.display(), "Cleaned up process files");
    Ok(())
}

fn remove_once(path: &Path) -> io::Result<()> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    let result = if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };

    match result {
        // Something else removed it in the meantime
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn make_writable(path: &Path) {
    for entry in WalkDir::new(path).into_iter().filter_map(|e| e.ok()) {
        if entry.path_is_symlink() {
            continue;
        }
        if let Err(e) = set_owner_writable(entry.path(), entry.file_type().is_dir()) {
            debug!(path = %entry.path().display(), error = %e, "Could not change permissions");
        }
    }
}

#[cfg(unix)]
fn set_owner_writable(path: &Path, is_dir: bool) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mode = fs::metadata(path)?.permissions().mode();
    let wanted = if is_dir { 0o700 } else { 0o600 };
    fs::set_permissions(path, fs::Permissions::from_mode(mode | wanted))
}

#[cfg(not(unix))]
fn set_owner_writable(path: &Path, _is_dir: bool) -> io::Result<()> {
    let mut perms = fs::metadata(path)?.permissions();
    #[allow(clippy::permissions_set_readonly_false)]
    perms.set_readonly(false);
    fs::set_permissions(path, perms)
}
