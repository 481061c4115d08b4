//! Advisory per-module build locks.
//!
//! The lock is an exclusive `flock`-style lock on `<jit_dir>/<name>.lock`.
//! Every acquisition opens its own file handle, so the lock serializes
//! builders in other threads of this process as well as in other processes.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::{JitError, Result};

/// Holds an exclusive build lock until dropped.
#[derive(Debug)]
pub struct BuildLock {
    file: File,
    path: PathBuf,
}

impl BuildLock {
    /// Blocks until the lock at `path` is acquired, creating the file if needed.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = open_lock_file(&path)?;

        if file.try_lock_exclusive().is_err() {
            tracing::debug!(path = %path.display(), "Waiting for build lock");
            file.lock_exclusive().map_err(|source| JitError::Lock {
                path: path.clone(),
                source,
            })?;
        }

        Ok(Self { file, path })
    }

    /// Acquires the lock at `path` only if nobody else holds it.
    pub fn try_acquire(path: impl Into<PathBuf>) -> Result<Option<Self>> {
        let path = path.into();
        let file = open_lock_file(&path)?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { file, path })),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(source) => Err(JitError::Lock { path, source }),
        }
    }

    /// Lock file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for BuildLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), "Failed to release build lock: {}", e);
        }
    }
}

fn open_lock_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|source| JitError::Lock {
            path: path.to_path_buf(),
            source,
        })
}
