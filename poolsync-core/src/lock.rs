//! PID-file lock guarding one sync run per source pool
//!
//! Exclusion comes from an advisory `flock` held on the open PID file for
//! the life of the guard. The file itself is never unlinked, so every
//! contender locks the same inode; its contents only record the owner.

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use nix::sys::signal::kill;
use nix::unistd::Pid;
use poolsync_common::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Result of trying to take the lock
#[derive(Debug)]
pub enum LockStatus {
    /// This process now owns the lock
    Acquired(PidLock),
    /// Another live process owns the lock; `None` if it has not written its PID yet
    Held { pid: Option<i32> },
}

/// Held PID file; cleared and unlocked on drop
pub struct PidLock {
    path: PathBuf,
    pid: u32,
    file: Flock<File>,
}

impl std::fmt::Debug for PidLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PidLock")
            .field("path", &self.path)
            .field("pid", &self.pid)
            .finish()
    }
}

impl PidLock {
    /// PID file location for a source pool
    pub fn path_for(lock_dir: &Path, source: &str) -> PathBuf {
        lock_dir.join(format!("poolsync-{}.pid", source))
    }

    /// Take the lock for `source`, reclaiming it if the recorded process is gone
    pub fn acquire(lock_dir: &Path, source: &str) -> Result<LockStatus> {
        let path = Self::path_for(lock_dir, source);
        let pid = std::process::id();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| {
                Error::Lock(format!("Failed to open lock file {}: {}", path.display(), e))
            })?;

        let mut file = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(locked) => locked,
            Err((mut file, Errno::EWOULDBLOCK)) => {
                let owner = read_owner(&mut file)?.trim().parse::<i32>().ok();
                return Ok(LockStatus::Held { pid: owner });
            }
            Err((_, errno)) => {
                return Err(Error::Lock(format!(
                    "Failed to lock {}: {}",
                    path.display(),
                    errno
                )));
            }
        };

        let contents = read_owner(&mut file)?;
        let recorded = contents.trim();
        if !recorded.is_empty() {
            match recorded.parse::<i32>() {
                Ok(owner) if owner as u32 != pid && is_process_alive(owner) => {
                    // Alive but not holding the flock: an owner that predates
                    // flock-based locking, or a recycled PID. Stay out of its way.
                    return Ok(LockStatus::Held { pid: Some(owner) });
                }
                Ok(owner) => {
                    warn!(
                        path = %path.display(),
                        "Reclaiming stale lock left by dead process {}", owner
                    );
                }
                Err(_) => {
                    warn!(
                        path = %path.display(),
                        "Reclaiming stale lock with unreadable contents {:?}",
                        recorded
                    );
                }
            }
        }

        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        writeln!(file, "{}", pid)?;
        file.sync_all()?;
        debug!(path = %path.display(), pid, "Lock acquired");

        Ok(LockStatus::Acquired(PidLock { path, pid, file }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release explicitly; equivalent to dropping the guard
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for PidLock {
    fn drop(&mut self) {
        // Clear the record only if it is still ours; the flock goes with the file
        let ours = read_owner(&mut self.file)
            .map(|contents| contents.trim() == self.pid.to_string())
            .unwrap_or(false);

        if ours {
            if let Err(e) = self.file.set_len(0) {
                warn!(path = %self.path.display(), "Failed to clear lock file: {}", e);
            } else {
                debug!(path = %self.path.display(), "Lock released");
            }
        }
    }
}

fn read_owner(file: &mut File) -> std::io::Result<String> {
    let mut contents = String::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_string(&mut contents)?;
    Ok(contents)
}

/// Signal 0 probes for existence; EPERM still means the process exists
pub fn is_process_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }

    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};

    // Above any kernel pid_max, so never a live process
    const DEAD_PID: i32 = i32::MAX;

    fn acquired(status: LockStatus) -> PidLock {
        match status {
            LockStatus::Acquired(lock) => lock,
            LockStatus::Held { pid } => panic!("unexpectedly held by {:?}", pid),
        }
    }

    #[test]
    fn test_acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let lock = acquired(PidLock::acquire(dir.path(), "tank").unwrap());

        let contents = std::fs::read_to_string(lock.path()).unwrap();
        assert_eq!(contents.trim(), std::process::id().to_string());

        let path = lock.path().to_path_buf();
        lock.release();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");

        // released means the next run gets it straight away
        acquired(PidLock::acquire(dir.path(), "tank").unwrap());
    }

    #[test]
    fn test_second_acquire_is_held() {
        let dir = tempfile::tempdir().unwrap();
        let _first = PidLock::acquire(dir.path(), "tank").unwrap();

        match PidLock::acquire(dir.path(), "tank").unwrap() {
            LockStatus::Held { pid } => assert_eq!(pid, Some(std::process::id() as i32)),
            LockStatus::Acquired(_) => panic!("lock acquired twice"),
        }
    }

    #[test]
    fn test_different_pools_do_not_block() {
        let dir = tempfile::tempdir().unwrap();
        let first = PidLock::acquire(dir.path(), "tank").unwrap();
        let second = PidLock::acquire(dir.path(), "rpool").unwrap();
        assert!(matches!(first, LockStatus::Acquired(_)));
        assert!(matches!(second, LockStatus::Acquired(_)));
    }

    #[test]
    fn test_stale_lock_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let path = PidLock::path_for(dir.path(), "tank");
        std::fs::write(&path, format!("{}\n", DEAD_PID)).unwrap();

        let _lock = acquired(PidLock::acquire(dir.path(), "tank").unwrap());
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.trim(), std::process::id().to_string());
    }

    #[test]
    fn test_garbage_lock_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let path = PidLock::path_for(dir.path(), "tank");
        std::fs::write(&path, "not a pid").unwrap();

        assert!(matches!(
            PidLock::acquire(dir.path(), "tank").unwrap(),
            LockStatus::Acquired(_)
        ));
    }

    #[test]
    fn test_unlocked_file_with_live_pid_is_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = PidLock::path_for(dir.path(), "tank");
        // pid 1 is always alive
        std::fs::write(&path, "1\n").unwrap();

        match PidLock::acquire(dir.path(), "tank").unwrap() {
            LockStatus::Held { pid } => assert_eq!(pid, Some(1)),
            LockStatus::Acquired(_) => panic!("took a lock recorded by a live process"),
        }
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "1\n");
    }

    #[test]
    fn test_racing_reclaimers_get_one_lock() {
        for _ in 0..200 {
            let dir = tempfile::tempdir().unwrap();
            let path = PidLock::path_for(dir.path(), "tank");
            std::fs::write(&path, format!("{}\n", DEAD_PID)).unwrap();

            let barrier = Arc::new(Barrier::new(4));
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let barrier = Arc::clone(&barrier);
                    let lock_dir = dir.path().to_path_buf();
                    std::thread::spawn(move || {
                        barrier.wait();
                        PidLock::acquire(&lock_dir, "tank").unwrap()
                    })
                })
                .collect();

            // every guard stays alive until all threads have reported
            let results: Vec<LockStatus> = handles.into_iter().map(|h| h.join().unwrap()).collect();
            let winners = results
                .iter()
                .filter(|status| matches!(status, LockStatus::Acquired(_)))
                .count();
            assert_eq!(winners, 1);
        }
    }

    #[test]
    fn test_drop_keeps_foreign_record() {
        let dir = tempfile::tempdir().unwrap();
        let lock = acquired(PidLock::acquire(dir.path(), "tank").unwrap());
        let path = lock.path().to_path_buf();
        std::fs::write(&path, "1\n").unwrap();

        drop(lock);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "1\n");
    }

    #[test]
    fn test_missing_lock_dir_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = PidLock::acquire(&dir.path().join("missing"), "tank");
        assert!(matches!(result, Err(Error::Lock(_))));
    }

    #[test]
    fn test_process_liveness() {
        assert!(is_process_alive(std::process::id() as i32));
        assert!(!is_process_alive(DEAD_PID));
        assert!(!is_process_alive(0));
        assert!(!is_process_alive(-1));
    }
}
