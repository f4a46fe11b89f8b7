//! Process-level lock serializing bulk syncs against one metadata store.
//!
//! `threadkeep sync` holds `threadkeep-sync.lock` for its lifetime. The lock
//! is an advisory OS file lock (flock) scoped to the database path, so two
//! stores on one machine never block each other.

use anyhow::{Context, Result};
use std::collections::hash_map::DefaultHasher;
use std::fs::{self, File, OpenOptions};
use std::hash::{Hash, Hasher};
use std::io;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

const SYNC_LOCK_FILE: &str = "threadkeep-sync.lock";

/// Held by a process running an explicit sync.
pub struct SyncGuard {
    _lock: ProcessLock,
}

/// Acquire the sync lock for `db_path`, failing fast when another sync holds it.
pub fn acquire_sync_guard(db_path: &Path) -> Result<SyncGuard> {
    match try_acquire_lock(SYNC_LOCK_FILE, db_path)? {
        Some(lock) => Ok(SyncGuard { _lock: lock }),
        None => anyhow::bail!(
            "another threadkeep sync is already running against {}",
            db_path.display()
        ),
    }
}

struct ProcessLock {
    file: File,
    path: PathBuf,
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        let _ = flock_op(&self.file, LOCK_UN);
        let _ = fs::remove_file(&self.path);
    }
}

fn try_acquire_lock(filename: &str, db_path: &Path) -> Result<Option<ProcessLock>> {
    let dir = lock_dir();
    fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create runtime lock directory: {}", dir.display()))?;

    let path = dir.join(scoped_lock_filename(filename, db_path));
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&path)
        .with_context(|| format!("failed to open lock file: {}", path.display()))?;

    match flock_op(&file, LOCK_EX | LOCK_NB) {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "Acquired sync lock");
            Ok(Some(ProcessLock { file, path }))
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
            tracing::debug!(path = %path.display(), "Sync lock held elsewhere");
            Ok(None)
        }
        Err(e) => Err(e).with_context(|| format!("failed to lock file: {}", path.display())),
    }
}

fn lock_dir() -> PathBuf {
    let mut dir = match std::env::var_os("XDG_RUNTIME_DIR") {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => std::env::temp_dir(),
    };
    dir.push("threadkeep");
    dir
}

fn scoped_lock_filename(base_filename: &str, db_path: &Path) -> String {
    let mut hasher = DefaultHasher::new();
    db_path.to_string_lossy().hash(&mut hasher);
    format!("{base_filename}.{:016x}", hasher.finish())
}

const LOCK_EX: i32 = 2;
const LOCK_NB: i32 = 4;
const LOCK_UN: i32 = 8;

#[cfg(unix)]
fn flock_op(file: &File, operation: i32) -> io::Result<()> {
    // SAFETY: the descriptor stays open for the duration of the call.
    match unsafe { flock(file.as_raw_fd(), operation) } {
        0 => Ok(()),
        _ => Err(io::Error::last_os_error()),
    }
}

#[cfg(unix)]
unsafe extern "C" {
    fn flock(fd: i32, operation: i32) -> i32;
}

#[cfg(not(unix))]
compile_error!("threadkeep sync locks require a Unix flock");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_guard_is_refused_until_first_drops() {
        let dir = tempfile::TempDir::new().unwrap();
        let db = dir.path().join("lock-test.db");

        let first = acquire_sync_guard(&db).unwrap();
        assert!(acquire_sync_guard(&db).is_err());

        drop(first);
        assert!(acquire_sync_guard(&db).is_ok());
    }

    #[test]
    fn test_dropped_guard_removes_its_lock_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let db = dir.path().join("cleanup.db");
        let lock_path = lock_dir().join(scoped_lock_filename(SYNC_LOCK_FILE, &db));

        let guard = acquire_sync_guard(&db).unwrap();
        assert!(lock_path.exists());
        assert_eq!(fs::metadata(&lock_path).unwrap().len(), 0);

        drop(guard);
        assert!(!lock_path.exists());
    }

    #[test]
    fn test_lock_names_are_scoped_per_database() {
        let a = scoped_lock_filename(SYNC_LOCK_FILE, Path::new("/tmp/a.db"));
        let b = scoped_lock_filename(SYNC_LOCK_FILE, Path::new("/tmp/b.db"));
        assert_ne!(a, b);
        assert!(a.starts_with("threadkeep-sync.lock."));
    }
}
