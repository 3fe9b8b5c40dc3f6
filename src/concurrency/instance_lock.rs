//! Cross-process instance lock using advisory file locking (fs2 flock).
//!
//! The security core assumes one Key Manager, one audit writer and one set
//! of tickers per device. Holding this lock for the lifetime of an `App`
//! turns that assumption into a checked precondition.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

/// Advisory file lock for the security state directory.
#[derive(Debug, Clone)]
pub struct InstanceLock {
    path: PathBuf,
}

/// RAII guard that releases the lock on drop.
#[derive(Debug)]
pub struct InstanceLockGuard {
    file: File,
    path: PathBuf,
}

impl InstanceLockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLockGuard {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

impl InstanceLock {
    /// Lock at `path`. The parent directory is created if missing.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Blocking acquire; waits until the lock is available.
    pub fn acquire(&self) -> Result<InstanceLockGuard> {
        let file = File::create(&self.path)?;
        file.lock_exclusive()?;
        Ok(self.guard(file))
    }

    /// Non-blocking try-acquire. Returns `None` if another process holds it.
    pub fn try_acquire(&self) -> Result<Option<InstanceLockGuard>> {
        let file = File::create(&self.path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(self.guard(file))),
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            #[cfg(unix)]
            Err(ref e) if e.raw_os_error() == Some(35) || e.raw_os_error() == Some(11) => {
                // EAGAIN(11) / EWOULDBLOCK(35 on macOS): lock contention
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Try-acquire, turning contention into an error naming the lock file.
    pub fn acquire_exclusive(&self) -> Result<InstanceLockGuard> {
        self.try_acquire()?.with_context(|| {
            format!(
                "Another localguard instance holds {}",
                self.path.display()
            )
        })
    }

    fn guard(&self, file: File) -> InstanceLockGuard {
        InstanceLockGuard {
            file,
            path: self.path.clone(),
        }
    }
}
