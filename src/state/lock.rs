//! state::lock
//!
//! Single-host run lock.
//!
//! # Architecture
//!
//! At most one run per repository root. The lock is a JSON record
//! created with exclusive semantics at
//! `runtime/orchestrator.lock.json`. The holder is detected live by
//! signaling the recorded PID; a stale lock (dead PID, or our own PID
//! from a previous crash) is cleared and the creation retried exactly
//! once.
//!
//! # Invariants
//!
//! - Acquisition uses `create_new` (exclusive) semantics
//! - A live foreign holder is never evicted
//! - Release is best-effort on drop and only removes our own record

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::paths::ConveyorPaths;
use crate::core::types::AutonomyMode;

/// Errors from lock acquisition.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another live process holds the lock.
    #[error("run already active (pid {pid}, run {run_id})")]
    RunAlreadyActive { pid: u32, run_id: String },

    /// The lock could not be acquired even after clearing a stale record.
    #[error("lock unacquired: {0}")]
    LockUnacquired(String),

    /// Filesystem failure while locking.
    #[error("lock io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// The on-disk lock record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRecord {
    pub pid: u32,
    pub run_id: String,
    pub mode: AutonomyMode,
    pub acquired_at: String,
    pub cwd: String,
}

/// An exclusive run lock, released on drop (RAII).
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    held: bool,
}

impl RunLock {
    /// Acquire the run lock.
    ///
    /// In dry-run mode no file is touched; the guard is inert.
    ///
    /// # Errors
    ///
    /// - [`LockError::RunAlreadyActive`] when a live foreign process
    ///   holds the lock
    /// - [`LockError::LockUnacquired`] when creation fails again after
    ///   a stale record was cleared
    pub fn acquire(
        paths: &ConveyorPaths,
        run_id: &str,
        mode: AutonomyMode,
        now: DateTime<Utc>,
        dry_run: bool,
    ) -> Result<Self, LockError> {
        let path = paths.lock_path();
        if dry_run {
            return Ok(Self { path, held: false });
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| LockError::Io {
                path: parent.display().to_string(),
                source,
            })?;
        }

        match Self::try_create(&path, run_id, mode, now) {
            Ok(()) => return Ok(Self { path, held: true }),
            Err(err) if err.kind() != std::io::ErrorKind::AlreadyExists => {
                return Err(LockError::Io {
                    path: path.display().to_string(),
                    source: err,
                });
            }
            Err(_) => {}
        }

        // Lock file exists: decide live vs stale.
        if let Some(record) = Self::read_record(&path) {
            if record.pid != std::process::id() && pid_alive(record.pid) {
                return Err(LockError::RunAlreadyActive {
                    pid: record.pid,
                    run_id: record.run_id,
                });
            }
        }

        // Stale (dead PID, our own PID, or unreadable record): clear it
        // and retry exactly once.
        let _ = fs::remove_file(&path);
        match Self::try_create(&path, run_id, mode, now) {
            Ok(()) => Ok(Self { path, held: true }),
            Err(err) => Err(LockError::LockUnacquired(format!(
                "retry after stale reclaim failed: {err}"
            ))),
        }
    }

    fn try_create(
        path: &PathBuf,
        run_id: &str,
        mode: AutonomyMode,
        now: DateTime<Utc>,
    ) -> std::io::Result<()> {
        let record = LockRecord {
            pid: std::process::id(),
            run_id: run_id.to_string(),
            mode,
            acquired_at: now.to_rfc3339(),
            cwd: std::env::current_dir()
                .map(|dir| dir.display().to_string())
                .unwrap_or_default(),
        };
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        let json = serde_json::to_string_pretty(&record).expect("lock record serializes");
        file.write_all(json.as_bytes())
    }

    fn read_record(path: &PathBuf) -> Option<LockRecord> {
        let raw = fs::read_to_string(path).ok()?;
        serde_json::from_str(&raw).ok()
    }

    /// Whether this guard actually holds the lock (false in dry-run).
    pub fn is_held(&self) -> bool {
        self.held
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if !self.held {
            return;
        }
        // Only remove our own record; best effort.
        if let Some(record) = Self::read_record(&self.path) {
            if record.pid == std::process::id() {
                let _ = fs::remove_file(&self.path);
            }
        }
    }
}

/// Probe whether a PID is alive.
#[cfg(unix)]
fn pid_alive(pid: u32) -> bool {
    let result = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if result == 0 {
        return true;
    }
    // EPERM means the process exists but belongs to someone else.
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn pid_alive(_pid: u32) -> bool {
    // No portable probe; treat the holder as live rather than evict.
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn now() -> DateTime<Utc> {
        "2026-08-01T12:00:00Z".parse().unwrap()
    }

    fn fixture() -> (TempDir, ConveyorPaths) {
        let dir = TempDir::new().unwrap();
        let paths = ConveyorPaths::new(dir.path().to_path_buf());
        (dir, paths)
    }

    #[test]
    fn acquire_writes_our_record() {
        let (_dir, paths) = fixture();
        let lock = RunLock::acquire(&paths, "run-1", AutonomyMode::Guarded, now(), false).unwrap();
        assert!(lock.is_held());

        let raw = fs::read_to_string(paths.lock_path()).unwrap();
        let record: LockRecord = serde_json::from_str(&raw).unwrap();
        assert_eq!(record.pid, std::process::id());
        assert_eq!(record.run_id, "run-1");
    }

    #[test]
    fn drop_releases_the_lock() {
        let (_dir, paths) = fixture();
        {
            let _lock =
                RunLock::acquire(&paths, "run-1", AutonomyMode::Guarded, now(), false).unwrap();
            assert!(paths.lock_path().exists());
        }
        assert!(!paths.lock_path().exists());
    }

    #[test]
    fn live_foreign_holder_is_refused() {
        let (_dir, paths) = fixture();
        fs::create_dir_all(paths.runtime_dir()).unwrap();
        // PID 1 is always alive and never us.
        let record = LockRecord {
            pid: 1,
            run_id: "other-run".to_string(),
            mode: AutonomyMode::Guarded,
            acquired_at: now().to_rfc3339(),
            cwd: String::new(),
        };
        fs::write(
            paths.lock_path(),
            serde_json::to_string(&record).unwrap(),
        )
        .unwrap();

        let result = RunLock::acquire(&paths, "run-1", AutonomyMode::Guarded, now(), false);
        assert!(matches!(
            result,
            Err(LockError::RunAlreadyActive { pid: 1, .. })
        ));
    }

    #[test]
    fn stale_dead_pid_is_reclaimed_once() {
        let (_dir, paths) = fixture();
        fs::create_dir_all(paths.runtime_dir()).unwrap();
        // A PID far beyond pid_max on any test host.
        let record = LockRecord {
            pid: u32::MAX - 1,
            run_id: "dead-run".to_string(),
            mode: AutonomyMode::Guarded,
            acquired_at: now().to_rfc3339(),
            cwd: String::new(),
        };
        fs::write(
            paths.lock_path(),
            serde_json::to_string(&record).unwrap(),
        )
        .unwrap();

        let lock = RunLock::acquire(&paths, "run-1", AutonomyMode::Guarded, now(), false).unwrap();
        assert!(lock.is_held());
    }

    #[test]
    fn unreadable_record_is_treated_as_stale() {
        let (_dir, paths) = fixture();
        fs::create_dir_all(paths.runtime_dir()).unwrap();
        fs::write(paths.lock_path(), "not json").unwrap();

        let lock = RunLock::acquire(&paths, "run-1", AutonomyMode::Guarded, now(), false).unwrap();
        assert!(lock.is_held());
    }

    #[test]
    fn dry_run_touches_nothing() {
        let (_dir, paths) = fixture();
        let lock = RunLock::acquire(&paths, "run-1", AutonomyMode::Guarded, now(), true).unwrap();
        assert!(!lock.is_held());
        assert!(!paths.lock_path().exists());
    }

    #[test]
    fn our_own_stale_record_is_reclaimed() {
        let (_dir, paths) = fixture();
        fs::create_dir_all(paths.runtime_dir()).unwrap();
        let record = LockRecord {
            pid: std::process::id(),
            run_id: "crashed-run".to_string(),
            mode: AutonomyMode::Guarded,
            acquired_at: now().to_rfc3339(),
            cwd: String::new(),
        };
        fs::write(
            paths.lock_path(),
            serde_json::to_string(&record).unwrap(),
        )
        .unwrap();

        let lock = RunLock::acquire(&paths, "run-2", AutonomyMode::Guarded, now(), false).unwrap();
        assert!(lock.is_held());
    }
}
