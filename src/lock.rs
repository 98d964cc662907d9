//! Run lock preventing overlapping backups against the same root
//!
//! The lock is a file containing the holder's PID. Acquisition never
//! blocks: if a live process holds the lock the caller is told to back off.
//! A lock file naming this process but not held by it is left over from an
//! earlier process that reused the PID (a restarted container) and is stale.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

/// How long an empty lock file is assumed to belong to a holder still writing its PID
const EMPTY_LOCK_GRACE: Duration = Duration::from_secs(10);

/// Lock files held by this process
static HELD: LazyLock<Mutex<HashSet<PathBuf>>> = LazyLock::new(|| Mutex::new(HashSet::new()));

fn held() -> std::sync::MutexGuard<'static, HashSet<PathBuf>> {
    HELD.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Held run lock, released when dropped
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Try to take the lock at `path`.
    ///
    /// Returns `Ok(None)` when another live process, or this process, holds
    /// it. A stale lock is removed and taken over.
    pub fn try_acquire(path: &Path) -> Result<Option<Self>> {
        if held().contains(path) {
            return Ok(None);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create lock directory {}", parent.display()))?;
        }

        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    if let Err(e) = write!(file, "{}", std::process::id()) {
                        drop(file);
                        let _ = fs::remove_file(path);
                        return Err(e)
                            .with_context(|| format!("Failed to write lock file {}", path.display()));
                    }
                    held().insert(path.to_path_buf());
                    debug!("Acquired run lock {}", path.display());
                    return Ok(Some(Self {
                        path: path.to_path_buf(),
                    }));
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if holder_is_alive(path)? {
                        return Ok(None);
                    }
                    warn!("Removing stale lock file {}", path.display());
                    match fs::remove_file(path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == ErrorKind::NotFound => {}
                        Err(e) => {
                            return Err(e).with_context(|| {
                                format!("Failed to remove stale lock file {}", path.display())
                            })
                        }
                    }
                }
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("Failed to create lock file {}", path.display()))
                }
            }
        }

        // Lost a race with another process taking over the same stale lock
        Ok(None)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        held().remove(&self.path);
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Failed to remove lock file {}: {}", self.path.display(), e);
        }
    }
}

fn holder_is_alive(path: &Path) -> Result<bool> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read lock file {}", path.display()))
        }
    };

    // Empty means the holder has created the file but not yet written its PID,
    // unless it has stayed empty long enough that the holder must have died
    if contents.trim().is_empty() {
        return Ok(!empty_lock_expired(path));
    }

    match contents.trim().parse::<u32>() {
        Ok(pid) if pid == std::process::id() => Ok(false),
        Ok(pid) => match i32::try_from(pid) {
            Ok(pid) if pid > 0 => Ok(process_is_alive(pid)),
            _ => Ok(false),
        },
        Err(_) => Ok(false),
    }
}

fn empty_lock_expired(path: &Path) -> bool {
    fs::metadata(path)
        .and_then(|metadata| metadata.modified())
        .ok()
        .and_then(|modified| modified.elapsed().ok())
        .is_some_and(|age| age > EMPTY_LOCK_GRACE)
}

#[cfg(unix)]
fn process_is_alive(pid: i32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal;
    use nix::unistd::Pid;

    match signal::kill(Pid::from_raw(pid), None) {
        Ok(_) => true,
        Err(Errno::ESRCH) => false,
        Err(_) => true, // exists but owned by someone else
    }
}

#[cfg(not(unix))]
fn process_is_alive(_pid: i32) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;
    use std::time::SystemTime;
    use predicates::prelude::*;

    #[test]
    fn test_lock_is_exclusive_and_released_on_drop() {
        let temp = assert_fs::TempDir::new().unwrap();
        let lock_path = temp.child("run/ghbackup.lock");

        let first = RunLock::try_acquire(lock_path.path()).unwrap();
        assert!(first.is_some());
        lock_path.assert(predicate::str::contains(std::process::id().to_string()));

        let second = RunLock::try_acquire(lock_path.path()).unwrap();
        assert!(second.is_none());

        drop(first);
        lock_path.assert(predicate::path::missing());

        let third = RunLock::try_acquire(lock_path.path()).unwrap();
        assert!(third.is_some());
    }

    #[cfg(unix)]
    #[test]
    fn test_stale_lock_is_taken_over() {
        let temp = assert_fs::TempDir::new().unwrap();
        let lock_path = temp.child("ghbackup.lock");
        // Above any configurable pid_max, so no such process exists
        lock_path.write_str(&i32::MAX.to_string()).unwrap();

        let lock = RunLock::try_acquire(lock_path.path()).unwrap();

        assert!(lock.is_some());
        lock_path.assert(std::process::id().to_string());
    }

    #[test]
    fn test_garbage_lock_contents_are_stale() {
        let temp = assert_fs::TempDir::new().unwrap();
        let lock_path = temp.child("ghbackup.lock");
        lock_path.write_str("not-a-pid").unwrap();

        assert!(RunLock::try_acquire(lock_path.path()).unwrap().is_some());
    }

    #[test]
    fn test_freshly_created_empty_lock_is_respected() {
        let temp = assert_fs::TempDir::new().unwrap();
        let lock_path = temp.child("ghbackup.lock");
        lock_path.touch().unwrap();

        assert!(RunLock::try_acquire(lock_path.path()).unwrap().is_none());
    }

    #[test]
    fn test_abandoned_empty_lock_is_stale() {
        let temp = assert_fs::TempDir::new().unwrap();
        let lock_path = temp.child("ghbackup.lock");
        lock_path.touch().unwrap();
        fs::File::options()
            .write(true)
            .open(lock_path.path())
            .unwrap()
            .set_modified(SystemTime::now() - Duration::from_secs(60))
            .unwrap();

        let lock = RunLock::try_acquire(lock_path.path()).unwrap();

        assert!(lock.is_some());
        lock_path.assert(std::process::id().to_string());
    }

    #[test]
    fn test_lock_naming_this_process_but_not_held_is_stale() {
        let temp = assert_fs::TempDir::new().unwrap();
        let lock_path = temp.child("ghbackup.lock");
        lock_path.write_str(&std::process::id().to_string()).unwrap();

        let lock = RunLock::try_acquire(lock_path.path()).unwrap();

        assert!(lock.is_some());
        assert_eq!(lock.unwrap().path(), lock_path.path());
    }

    #[cfg(unix)]
    #[test]
    fn test_lock_held_by_another_live_process_is_respected() {
        let temp = assert_fs::TempDir::new().unwrap();
        let lock_path = temp.child("ghbackup.lock");
        lock_path
            .write_str(&std::os::unix::process::parent_id().to_string())
            .unwrap();

        assert!(RunLock::try_acquire(lock_path.path()).unwrap().is_none());
        lock_path.assert(predicate::path::exists());
    }
}
