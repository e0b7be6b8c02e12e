//! Data-root lock.
//!
//! Imports hold `<root>/.harbor.lock` for the whole run so that two imports
//! never mutate the same datasets at once. The lock file is created with
//! `create_new` and records the holder's PID plus a per-acquisition token.
//! The holder refreshes the file between stages; a lock file untouched for
//! longer than the configured stale age is reclaimed. Dropping the guard
//! removes the file only while it still carries the guard's token.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{anyhow, bail, Context, Result};
use tracing::{debug, warn};

/// Held for as long as an import runs against a data root.
#[derive(Debug)]
pub struct DataRootLock {
    path: PathBuf,
    contents: String,
}

impl DataRootLock {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True while the lock file still belongs to this guard.
    pub fn is_owned(&self) -> bool {
        fs::read_to_string(&self.path).is_ok_and(|current| current == self.contents)
    }

    /// Rewrite the lock file so its age restarts from now.
    pub fn refresh(&self) -> std::io::Result<()> {
        if !self.is_owned() {
            return Err(std::io::Error::other(format!(
                "lock {} is no longer held by this process",
                self.path.display()
            )));
        }
        fs::write(&self.path, &self.contents)
    }
}

impl Drop for DataRootLock {
    fn drop(&mut self) {
        if !self.is_owned() {
            warn!(path = %self.path.display(), "data-root lock was taken over; leaving it in place");
            return;
        }
        let _ = fs::remove_file(&self.path);
        debug!(path = %self.path.display(), "released data-root lock");
    }
}

/// Acquire the lock at `path`, polling until `timeout` elapses.
///
/// A zero timeout rejects immediately when another import holds the lock.
pub async fn acquire(path: &Path, timeout: Duration, stale_after: Duration) -> Result<DataRootLock> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create lock directory {}", parent.display()))?;
        }
    }

    let start = SystemTime::now();
    loop {
        match OpenOptions::new().create_new(true).write(true).open(path) {
            Ok(mut file) => {
                let pid = std::process::id();
                let contents = format!("{} {}\n", pid, uuid::Uuid::new_v4().simple());
                file.write_all(contents.as_bytes())
                    .with_context(|| format!("failed to write lock {}", path.display()))?;
                debug!(path = %path.display(), pid, "acquired data-root lock");
                return Ok(DataRootLock {
                    path: path.to_path_buf(),
                    contents,
                });
            }
            Err(error) if error.kind() == std::io::ErrorKind::AlreadyExists => {
                if stale_after > Duration::ZERO && reclaim_stale_lock(path, stale_after) {
                    continue;
                }
                let elapsed = SystemTime::now().duration_since(start).unwrap_or_default();
                if elapsed >= timeout {
                    bail!(
                        "another import is running against this data root (lock {} held by pid {})",
                        path.display(),
                        holder_pid(path).unwrap_or_else(|| "unknown".to_string())
                    );
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            Err(error) => {
                return Err(anyhow!(
                    "failed to acquire lock {}: {error}",
                    path.display()
                ));
            }
        }
    }
}

/// True when some process currently holds the lock at `path`.
pub fn is_held(path: &Path) -> bool {
    path.exists()
}

fn holder_pid(path: &Path) -> Option<String> {
    fs::read_to_string(path)
        .ok()
        .and_then(|s| s.split_whitespace().next().map(str::to_string))
}

fn reclaim_stale_lock(path: &Path, stale_after: Duration) -> bool {
    let Ok(modified) = fs::metadata(path).and_then(|m| m.modified()) else {
        return false;
    };
    let age = SystemTime::now()
        .duration_since(modified)
        .unwrap_or(Duration::ZERO);
    if age < stale_after {
        return false;
    }
    warn!(path = %path.display(), age_secs = age.as_secs(), "reclaiming stale data-root lock");
    fs::remove_file(path).is_ok()
}
