//! Registry of ahead-of-time compiled ops.
//!
//! A prebuilt directory contains `prebuilt_ops.json`:
//!
//! ```json
//! { "ops": ["single_decode_with_kv_cache_dtype_q_f16_...", "..."] }
//! ```
//!
//! and one `lib<uri>.so` per listed URI. A missing directory or registry
//! file yields an empty registry.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Registry file name inside a prebuilt directory.
pub const REGISTRY_FILE: &str = "prebuilt_ops.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    ops: BTreeSet<String>,
}

/// Set of op URIs available as prebuilt libraries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrebuiltOps {
    dir: Option<PathBuf>,
    uris: BTreeSet<String>,
}

impl PrebuiltOps {
    /// Registry with no prebuilt ops.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Loads the registry under `dir`.
    ///
    /// Absence is silent; a registry file that exists but cannot be parsed is
    /// an error.
    pub fn load(dir: Option<&Path>) -> Result<Self> {
        let Some(dir) = dir else {
            return Ok(Self::empty());
        };

        let path = dir.join(REGISTRY_FILE);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::empty()),
            Err(e) => return Err(e.into()),
        };

        let registry: RegistryFile = serde_json::from_str(&content)?;
        tracing::debug!(
            path = %path.display(),
            ops = registry.ops.len(),
            "Loaded prebuilt op registry"
        );

        Ok(Self {
            dir: Some(dir.to_path_buf()),
            uris: registry.ops,
        })
    }

    /// Writes a registry listing `uris` into `dir`.
    pub fn write(dir: &Path, uris: impl IntoIterator<Item = String>) -> Result<()> {
        let registry = RegistryFile {
            ops: uris.into_iter().collect(),
        };
        fs::create_dir_all(dir)?;
        fs::write(
            dir.join(REGISTRY_FILE),
            serde_json::to_string_pretty(&registry)?,
        )?;
        Ok(())
    }

    /// True if any prebuilt ops are registered.
    pub fn has_prebuilt_ops(&self) -> bool {
        !self.uris.is_empty()
    }

    /// True if `uri` is registered.
    pub fn contains(&self, uri: &str) -> bool {
        self.uris.contains(uri)
    }

    /// Registered URIs in sorted order.
    pub fn uris(&self) -> impl Iterator<Item = &str> {
        self.uris.iter().map(String::as_str)
    }

    /// Library path for a registered `uri`.
    pub fn library_path(&self, uri: &str) -> Option<PathBuf> {
        if !self.contains(uri) {
            return None;
        }
        self.dir
            .as_ref()
            .map(|dir| dir.join(libloading::library_filename(uri)))
    }
}
