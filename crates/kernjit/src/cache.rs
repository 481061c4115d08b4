//! On-disk build cache.
//!
//! Each module builds into `<jit_dir>/<name>/`. Besides the object files and
//! the shared library, that directory holds a `build.fingerprint` file: the
//! SHA-256 of everything that determines the build output. A build whose
//! fingerprint matches the stored one is reused instead of recompiled.

use std::collections::HashSet;
use std::ffi::OsStr;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::lock::BuildLock;

const LOCK_EXTENSION: &str = "lock";

/// Fingerprint file name inside a build directory.
pub const FINGERPRINT_FILE: &str = "build.fingerprint";

/// Current fingerprint format version. Increment to invalidate all cached builds.
pub const CACHE_VERSION: u32 = 1;

/// Incremental SHA-256 over the inputs of one build.
#[derive(Debug, Clone, Default)]
pub struct Fingerprint {
    hasher: Sha256,
}

impl Fingerprint {
    /// Starts a fingerprint for module `name`.
    pub fn new(name: &str) -> Self {
        let mut fp = Self::default();
        fp.field("version", CACHE_VERSION.to_string().as_bytes());
        fp.field("name", name.as_bytes());
        fp
    }

    /// Adds a labelled value. Labels and lengths are hashed so adjacent
    /// fields cannot run into each other.
    pub fn field(&mut self, label: &str, value: &[u8]) -> &mut Self {
        self.hasher.update(label.as_bytes());
        self.hasher.update((value.len() as u64).to_le_bytes());
        self.hasher.update(value);
        self
    }

    /// Adds every string in `values` under one label.
    pub fn strings<S: AsRef<str>>(&mut self, label: &str, values: &[S]) -> &mut Self {
        for value in values {
            self.field(label, value.as_ref().as_bytes());
        }
        self
    }

    /// Adds a source file's path and contents.
    pub fn source(&mut self, path: &Path) -> Result<&mut Self> {
        let contents = fs::read(path)?;
        self.field("source", path.to_string_lossy().as_bytes());
        self.field("contents", &contents);
        Ok(self)
    }

    /// Lowercase hex digest.
    #[must_use]
    pub fn finish(self) -> String {
        format!("{:x}", self.hasher.finalize())
    }
}

/// Reads the fingerprint stored in `build_dir`, if any.
pub fn stored_fingerprint(build_dir: &Path) -> Option<String> {
    fs::read_to_string(build_dir.join(FINGERPRINT_FILE))
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Atomically records `fingerprint` in `build_dir`.
pub fn store_fingerprint(build_dir: &Path, fingerprint: &str) -> Result<()> {
    let path = build_dir.join(FINGERPRINT_FILE);
    let temp_path = path.with_extension("fingerprint.tmp");

    let mut file = fs::File::create(&temp_path)?;
    file.write_all(fingerprint.as_bytes())?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp_path, &path)?;
    Ok(())
}

/// Removes everything inside `dir`, leaving `dir` itself in place.
///
/// A missing directory is not an error. A module whose `<name>.lock` is held
/// by a running build keeps both its lock file and its build directory; the
/// locks of idle modules are held while their directories are removed.
pub fn clear_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }

    let mut busy = HashSet::new();
    let mut idle = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension() != Some(OsStr::new(LOCK_EXTENSION)) || !path.is_file() {
            continue;
        }
        let Some(stem) = path.file_stem().map(OsStr::to_os_string) else {
            continue;
        };
        match BuildLock::try_acquire(&path)? {
            Some(lock) => idle.push(lock),
            None => {
                tracing::debug!(path = %path.display(), "Build in progress, keeping it");
                busy.insert(stem);
            }
        }
    }

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_lock = path.extension() == Some(OsStr::new(LOCK_EXTENSION));
        if is_lock || path.file_name().is_some_and(|n| busy.contains(n)) {
            continue;
        }
        if path.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
    }

    for lock in idle {
        let path = lock.path().to_path_buf();
        drop(lock);
        fs::remove_file(&path)?;
    }

    tracing::debug!(dir = %dir.display(), busy = busy.len(), "Cleared build cache");
    Ok(())
}

/// Summary of a JIT cache directory.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Number of module build directories.
    pub entries: usize,
    /// Total size of all cached files in bytes.
    pub bytes: u64,
    /// Cache directory path.
    pub cache_dir: PathBuf,
}

impl CacheStats {
    /// Scans `dir`. A missing directory reports zero entries.
    pub fn scan(dir: &Path) -> Self {
        let mut stats = Self {
            cache_dir: dir.to_path_buf(),
            ..Self::default()
        };

        if let Ok(entries) = fs::read_dir(dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    stats.entries += 1;
                }
                stats.bytes += dir_size(&path);
            }
        }

        stats
    }
}

fn dir_size(path: &Path) -> u64 {
    let Ok(metadata) = fs::symlink_metadata(path) else {
        return 0;
    };
    if !metadata.is_dir() {
        return metadata.len();
    }
    fs::read_dir(path)
        .map(|entries| entries.flatten().map(|e| dir_size(&e.path())).sum())
        .unwrap_or(0)
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "JIT cache: {} modules, {:.2} KB at {}",
            self.entries,
            self.bytes as f64 / 1024.0,
            self.cache_dir.display()
        )
    }
}
