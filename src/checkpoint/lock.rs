//! Running indicator for a state directory.
//!
//! At most one orchestrator may work against a checkpoint directory. The
//! lock file records the holder's pid so that a second invocation can tell
//! a live concurrent run (refuse) from a lock left behind by a killed
//! process (recover, or refuse in strict mode).

use crate::models::{EtlError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Lock file name inside the checkpoint directory.
pub const LOCK_FILE: &str = "run.lock";

/// Lock file body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
}

/// Held lock; released on drop.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    released: bool,
}

impl RunLock {
    /// Acquire the lock in `dir`.
    ///
    /// - Free → acquired.
    /// - Held by a live process → `RunLocked`.
    /// - Held by a dead process → taken over with a warning, or `StaleLock`
    ///   when `strict` is set.
    pub fn acquire(dir: &Path, strict: bool) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|e| EtlError::io("creating lock dir", e))?;
        let path = dir.join(LOCK_FILE);

        match Self::try_create(&path) {
            Ok(lock) => return Ok(lock),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
            Err(e) => return Err(EtlError::io("creating run lock", e)),
        }

        let holder = Self::read_info(&path)?;
        if let Some(info) = &holder {
            if info.pid != std::process::id() && process_alive(info.pid) {
                return Err(EtlError::RunLocked {
                    pid: info.pid,
                    since: info.started_at.to_rfc3339(),
                });
            }
        }

        let stale_pid = holder.as_ref().map(|i| i.pid).unwrap_or_default();
        if strict {
            return Err(EtlError::StaleLock {
                path,
                pid: stale_pid,
            });
        }

        warn!(
            path = %path.display(),
            stale_pid,
            "Found run lock from a process that is no longer running, taking it over"
        );
        fs::remove_file(&path).map_err(|e| EtlError::io("removing stale run lock", e))?;
        Self::try_create(&path).map_err(|e| EtlError::io("creating run lock", e))
    }

    fn try_create(path: &Path) -> std::io::Result<Self> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        let info = LockInfo {
            pid: std::process::id(),
            started_at: Utc::now(),
        };
        let body = serde_json::to_vec(&info)
            .map_err(|e| std::io::Error::new(ErrorKind::InvalidData, e))?;
        file.write_all(&body)?;
        file.sync_all()?;

        debug!(path = %path.display(), pid = info.pid, "Run lock acquired");
        Ok(Self {
            path: path.to_path_buf(),
            released: false,
        })
    }

    /// Read the current holder; `None` if the file is empty or unreadable
    /// JSON (a crash between create and write).
    pub fn read_info(path: &Path) -> Result<Option<LockInfo>> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(EtlError::io("reading run lock", e)),
        };
        Ok(serde_json::from_str(&content).ok())
    }

    /// Lock file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release explicitly, surfacing IO errors.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(EtlError::io("releasing run lock", e)),
        }
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "Failed to release run lock");
            }
        }
    }
}

/// Whether `pid` names a running process.
#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

// Without a cheap liveness probe every foreign lock is treated as stale.
#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // Well above the default pid_max, so never a live process.
    const DEAD_PID: u32 = 4_194_304 + 17;

    fn write_lock(dir: &Path, pid: u32) {
        let info = LockInfo {
            pid,
            started_at: Utc::now(),
        };
        fs::write(dir.join(LOCK_FILE), serde_json::to_string(&info).unwrap()).unwrap();
    }

    #[test]
    fn test_acquire_and_release_on_drop() {
        let dir = TempDir::new().unwrap();
        {
            let lock = RunLock::acquire(dir.path(), false).unwrap();
            assert!(lock.path().exists());
        }
        assert!(!dir.path().join(LOCK_FILE).exists());
    }

    #[test]
    fn test_stale_lock_is_recovered() {
        let dir = TempDir::new().unwrap();
        write_lock(dir.path(), DEAD_PID);

        let lock = RunLock::acquire(dir.path(), false).unwrap();
        let info = RunLock::read_info(lock.path()).unwrap().unwrap();
        assert_eq!(info.pid, std::process::id());
        lock.release().unwrap();
    }

    #[test]
    fn test_stale_lock_rejected_in_strict_mode() {
        let dir = TempDir::new().unwrap();
        write_lock(dir.path(), DEAD_PID);

        let err = RunLock::acquire(dir.path(), true).unwrap_err();
        assert!(matches!(err, EtlError::StaleLock { pid, .. } if pid == DEAD_PID));
        assert!(dir.path().join(LOCK_FILE).exists());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_live_foreign_lock_is_refused() {
        let dir = TempDir::new().unwrap();
        // pid 1 is always alive on Linux.
        write_lock(dir.path(), 1);

        let err = RunLock::acquire(dir.path(), false).unwrap_err();
        assert!(matches!(err, EtlError::RunLocked { pid: 1, .. }));
    }
}
