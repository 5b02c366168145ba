//! Advisory file locking.
//!
//! Mutual exclusion between independent processes (and threads) that share a
//! lock file path. `FileLock::acquire` blocks until the OS grants an exclusive
//! lock and returns a `LockGuard`; the lock is released when the guard is
//! released or dropped, on every exit path.
//!
//! The lock is not recursive: acquiring the same path again while holding a
//! guard blocks forever, even on the same thread. Lock files are created on
//! demand (parent directories included) and never deleted.
//!
//! Backends are chosen at build time: `flock` on Unix and `LockFileEx` on
//! Windows (both through `fs2`). Other platforms fail with
//! `AtlasError::LockUnsupported`.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{AtlasError, Result};

/// A lock file path that can be locked exclusively
#[derive(Debug, Clone)]
pub struct FileLock {
    path: PathBuf,
}

impl FileLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path to the lock file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Block until the exclusive lock is held
    ///
    /// # Errors
    ///
    /// - `LockUnsupported` when the platform has no locking backend
    /// - `Io` when the lock file or its directory cannot be created
    pub fn acquire(&self) -> Result<LockGuard> {
        if !backend::SUPPORTED {
            return Err(AtlasError::LockUnsupported);
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
                debug!(path = %parent.display(), "created lock directory");
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;

        backend::lock_exclusive(&file)?;
        debug!(path = %self.path.display(), "acquired file lock");

        Ok(LockGuard {
            file: Some(file),
            path: self.path.clone(),
        })
    }

    /// Run `f` while holding the lock
    pub fn with_lock<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let guard = self.acquire()?;
        let result = f();
        drop(guard);
        result
    }
}

/// Scoped ownership of an acquired lock
#[derive(Debug)]
pub struct LockGuard {
    /// `None` once released
    file: Option<File>,
    path: PathBuf,
}

impl LockGuard {
    /// Release the lock and close the file now, reporting unlock errors
    pub fn release(mut self) -> Result<()> {
        self.unlock()
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn unlock(&mut self) -> Result<()> {
        let Some(file) = self.file.take() else {
            return Ok(());
        };
        let result = backend::unlock(&file);
        drop(file);
        debug!(path = %self.path.display(), "released file lock");
        result.map_err(AtlasError::from)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        // Closing the file releases the OS lock even if unlock failed.
        if let Err(e) = self.unlock() {
            warn!(path = %self.path.display(), error = %e, "failed to release file lock");
        }
    }
}

#[cfg(any(unix, windows))]
mod backend {
    use std::fs::File;
    use std::io;

    use fs2::FileExt;

    pub const SUPPORTED: bool = true;

    pub fn lock_exclusive(file: &File) -> io::Result<()> {
        FileExt::lock_exclusive(file)
    }

    pub fn unlock(file: &File) -> io::Result<()> {
        FileExt::unlock(file)
    }
}

#[cfg(not(any(unix, windows)))]
mod backend {
    use std::fs::File;
    use std::io;

    pub const SUPPORTED: bool = false;

    pub fn lock_exclusive(_file: &File) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "file locking is not supported"))
    }

    pub fn unlock(_file: &File) -> io::Result<()> {
        Ok(())
    }
}
