//! PID-file single-instance lock (spec §4.11). Ported from
//! `infra/instance_lock.py`. Must be the first side effect after config
//! validation and the last released on any exit path (spec §5).

use std::path::{Path, PathBuf};

use tracing::{error, info, warn};

use crate::domain::errors::ErrorKind;

pub struct InstanceLock {
    lock_file: PathBuf,
    acquired: bool,
}

fn is_process_running(pid: u32) -> bool {
    #[cfg(unix)]
    {
        // SAFETY: kill(pid, 0) sends no signal, only checks existence/permission.
        unsafe { libc::kill(pid as i32, 0) == 0 }
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        true
    }
}

fn terminate_process(pid: u32) {
    #[cfg(unix)]
    {
        // SAFETY: sends SIGTERM to a PID we just read from our own lock file.
        unsafe {
            libc::kill(pid as i32, libc::SIGTERM);
        }
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
    }
}

impl InstanceLock {
    pub fn new(name: &str, lock_dir: impl AsRef<Path>) -> Self {
        Self {
            lock_file: lock_dir.as_ref().join(format!("{name}.pid")),
            acquired: false,
        }
    }

    /// Acquires the lock. When `force` is set, a live competing instance is
    /// sent SIGTERM before this instance takes over — operator recovery only.
    pub fn acquire(&mut self, force: bool) -> Result<(), ErrorKind> {
        if self.acquired {
            warn!("lock already acquired by this instance");
            return Ok(());
        }

        if let Some(parent) = self.lock_file.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ErrorKind::InstanceLockFailure(format!("cannot create lock dir: {e}")))?;
        }

        if self.lock_file.exists() {
            match std::fs::read_to_string(&self.lock_file) {
                Ok(contents) => match contents.trim().parse::<u32>() {
                    Ok(existing_pid) => {
                        if is_process_running(existing_pid) {
                            if force {
                                warn!(existing_pid, "FORCE acquiring lock, terminating existing instance");
                                terminate_process(existing_pid);
                            } else {
                                return Err(ErrorKind::InstanceLockFailure(format!(
                                    "another instance is running (PID={existing_pid})"
                                )));
                            }
                        } else {
                            warn!(existing_pid, "found stale lock file, removing");
                            let _ = std::fs::remove_file(&self.lock_file);
                        }
                    }
                    Err(_) => {
                        warn!("invalid lock file contents, removing");
                        let _ = std::fs::remove_file(&self.lock_file);
                    }
                },
                Err(err) => {
                    warn!(error = %err, "failed to read lock file, removing");
                    let _ = std::fs::remove_file(&self.lock_file);
                }
            }
        }

        let pid = std::process::id();
        std::fs::write(&self.lock_file, pid.to_string())
            .map_err(|e| ErrorKind::InstanceLockFailure(format!("failed to create lock file: {e}")))?;

        self.acquired = true;
        info!(pid, file = %self.lock_file.display(), "instance lock acquired");
        Ok(())
    }

    pub fn release(&mut self) {
        if !self.acquired {
            return;
        }
        if self.lock_file.exists() {
            if let Err(err) = std::fs::remove_file(&self.lock_file) {
                warn!(error = %err, "failed to release instance lock");
            } else {
                info!(file = %self.lock_file.display(), "instance lock released");
            }
        }
        self.acquired = false;
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        if self.acquired {
            self.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn acquire_then_release_leaves_no_lock_file() {
        let dir = tempdir().unwrap();
        let mut lock = InstanceLock::new("rustrade-test", dir.path());
        lock.acquire(false).unwrap();
        assert!(dir.path().join("rustrade-test.pid").exists());
        lock.release();
        assert!(!dir.path().join("rustrade-test.pid").exists());
    }

    #[test]
    fn stale_lock_file_from_dead_pid_is_reclaimed() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("rustrade-test.pid"), "999999999").unwrap();
        let mut lock = InstanceLock::new("rustrade-test", dir.path());
        assert!(lock.acquire(false).is_ok());
    }
}
