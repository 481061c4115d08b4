//! Workspace and include-path configuration.
//!
//! Every path kernjit touches is derived from a [`JitConfig`]:
//!
//! ```text
//! <workspace>/
//!   kernjit_jit.log        append-only build log
//!   cached_ops/            one directory per module name, plus <name>.lock
//!   generated/             rendered kernel sources, one directory per URI
//! ```
//!
//! Defaults come from the environment:
//!
//! | Variable                  | Meaning                                      |
//! |---------------------------|----------------------------------------------|
//! | `KERNJIT_WORKSPACE_BASE`  | base directory (default: platform cache dir) |
//! | `KERNJIT_INCLUDE_DIR`     | kernjit native headers                       |
//! | `KERNJIT_CSRC_DIR`        | kernjit C++/CUDA binding sources             |
//! | `KERNJIT_CUTLASS_DIR`     | CUTLASS checkout root                        |
//! | `KERNJIT_CUDA_ARCH_LIST`  | arch list, e.g. `"8.0;8.6+PTX"`              |
//! | `KERNJIT_PREBUILT_DIR`    | precompiled-op registry directory            |
//!
//! A `kernjit.toml` file can override any of these, see [`JitConfig::from_file`].
//!
//! The native headers are not shipped with the crate. Without
//! `KERNJIT_INCLUDE_DIR` (or `include_dir` in the config file) the default
//! points into the crate source tree, and builds that rely on the default
//! include paths fail with [`JitError::Config`] unless that directory exists.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{JitError, Result};

/// Name of the build log written under the workspace root.
pub const LOG_FILE_NAME: &str = "kernjit_jit.log";

/// Subdirectory of the workspace holding built modules and their lock files.
pub const CACHED_OPS_DIR: &str = "cached_ops";

/// Subdirectory of the workspace holding generated kernel sources.
pub const GENERATED_DIR: &str = "generated";

/// Paths and build inputs for JIT compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JitConfig {
    workspace_dir: PathBuf,
    include_dir: PathBuf,
    csrc_dir: PathBuf,
    cutlass_include_dirs: Vec<PathBuf>,
    arch_list: Option<String>,
    prebuilt_dir: Option<PathBuf>,
}

/// On-disk form of a `kernjit.toml` file. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    workspace_dir: Option<PathBuf>,
    include_dir: Option<PathBuf>,
    csrc_dir: Option<PathBuf>,
    cutlass_dir: Option<PathBuf>,
    cuda_arch_list: Option<String>,
    prebuilt_dir: Option<PathBuf>,
}

impl JitConfig {
    /// Builds a configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let workspace_dir = default_workspace_dir();
        let root = PathBuf::from(env!("CARGO_MANIFEST_DIR"));

        let include_dir = env_path("KERNJIT_INCLUDE_DIR").unwrap_or_else(|| root.join("include"));
        let csrc_dir = env_path("KERNJIT_CSRC_DIR").unwrap_or_else(|| root.join("csrc"));
        let cutlass_root = env_path("KERNJIT_CUTLASS_DIR")
            .unwrap_or_else(|| root.join("3rdparty").join("cutlass"));

        Self {
            workspace_dir,
            include_dir,
            csrc_dir,
            cutlass_include_dirs: cutlass_include_dirs(&cutlass_root),
            arch_list: std::env::var("KERNJIT_CUDA_ARCH_LIST")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            prebuilt_dir: env_path("KERNJIT_PREBUILT_DIR"),
        }
    }

    /// Loads a `kernjit.toml` file on top of the environment defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let file: ConfigFile = toml::from_str(&content)?;
        let mut config = Self::from_env();

        if let Some(dir) = file.workspace_dir {
            config.workspace_dir = dir;
        }
        if let Some(dir) = file.include_dir {
            config.include_dir = dir;
        }
        if let Some(dir) = file.csrc_dir {
            config.csrc_dir = dir;
        }
        if let Some(dir) = file.cutlass_dir {
            config.cutlass_include_dirs = cutlass_include_dirs(&dir);
        }
        if let Some(list) = file.cuda_arch_list {
            config.arch_list = Some(list);
        }
        if let Some(dir) = file.prebuilt_dir {
            config.prebuilt_dir = Some(dir);
        }

        Ok(config)
    }

    /// Overrides the workspace root.
    #[must_use]
    pub fn with_workspace_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workspace_dir = dir.into();
        self
    }

    /// Overrides the native header directory.
    #[must_use]
    pub fn with_include_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.include_dir = dir.into();
        self
    }

    /// Overrides the binding-source directory.
    #[must_use]
    pub fn with_csrc_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.csrc_dir = dir.into();
        self
    }

    /// Uses the CUTLASS checkout at `root`.
    #[must_use]
    pub fn with_cutlass_dir(mut self, root: impl AsRef<Path>) -> Self {
        self.cutlass_include_dirs = cutlass_include_dirs(root.as_ref());
        self
    }

    /// Overrides the CUDA arch list.
    #[must_use]
    pub fn with_arch_list(mut self, list: impl Into<String>) -> Self {
        self.arch_list = Some(list.into());
        self
    }

    /// Points the configuration at a prebuilt-op registry.
    #[must_use]
    pub fn with_prebuilt_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.prebuilt_dir = Some(dir.into());
        self
    }

    /// Workspace root.
    pub fn workspace_dir(&self) -> &Path {
        &self.workspace_dir
    }

    /// Directory holding one build directory per module name.
    pub fn jit_dir(&self) -> PathBuf {
        self.workspace_dir.join(CACHED_OPS_DIR)
    }

    /// Directory holding generated kernel sources.
    pub fn gen_src_dir(&self) -> PathBuf {
        self.workspace_dir.join(GENERATED_DIR)
    }

    /// Path of the build log.
    pub fn log_path(&self) -> PathBuf {
        self.workspace_dir.join(LOG_FILE_NAME)
    }

    /// kernjit native headers.
    pub fn include_dir(&self) -> &Path {
        &self.include_dir
    }

    /// C++/CUDA binding sources.
    pub fn csrc_dir(&self) -> &Path {
        &self.csrc_dir
    }

    /// CUTLASS include directories.
    pub fn cutlass_include_dirs(&self) -> &[PathBuf] {
        &self.cutlass_include_dirs
    }

    /// Fails unless the native header directory exists.
    pub fn check_include_dir(&self) -> Result<()> {
        if self.include_dir.is_dir() {
            return Ok(());
        }
        Err(JitError::Config(format!(
            "kernjit headers not found at {}; set KERNJIT_INCLUDE_DIR",
            self.include_dir.display()
        )))
    }

    /// Include path used when a build does not supply its own.
    pub fn default_include_paths(&self) -> Vec<PathBuf> {
        let mut paths = vec![self.include_dir.clone(), self.csrc_dir.clone()];
        paths.extend(self.cutlass_include_dirs.iter().cloned());
        paths
    }

    /// Configured arch list, if any.
    pub fn arch_list(&self) -> Option<&str> {
        self.arch_list.as_deref()
    }

    /// Prebuilt-op registry directory, if any.
    pub fn prebuilt_dir(&self) -> Option<&Path> {
        self.prebuilt_dir.as_deref()
    }

    /// Creates the workspace root if it does not exist.
    ///
    /// Returns `true` when the directory was created. An existing directory
    /// and its contents are left untouched.
    pub fn ensure_workspace(&self) -> Result<bool> {
        if self.workspace_dir.is_dir() {
            return Ok(false);
        }
        if self.workspace_dir.exists() {
            return Err(JitError::Config(format!(
                "workspace path {} exists and is not a directory",
                self.workspace_dir.display()
            )));
        }
        fs::create_dir_all(&self.workspace_dir)?;
        Ok(true)
    }
}

impl Default for JitConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn cutlass_include_dirs(root: &Path) -> Vec<PathBuf> {
    vec![
        root.join("include"),
        root.join("tools").join("util").join("include"),
    ]
}

/// `<base>/kernjit/<crate version>`, where base is `KERNJIT_WORKSPACE_BASE`
/// or the platform cache directory.
fn default_workspace_dir() -> PathBuf {
    let base = env_path("KERNJIT_WORKSPACE_BASE").unwrap_or_else(platform_cache_dir);
    base.join("kernjit").join(env!("CARGO_PKG_VERSION"))
}

fn platform_cache_dir() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        if let Some(xdg) = env_path("XDG_CACHE_HOME") {
            return xdg;
        }
        if let Some(home) = env_path("HOME") {
            return home.join(".cache");
        }
    }

    #[cfg(target_os = "macos")]
    {
        if let Some(home) = env_path("HOME") {
            return home.join("Library/Caches");
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Some(local_app_data) = env_path("LOCALAPPDATA") {
            return local_app_data;
        }
    }

    std::env::temp_dir()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_derived_paths() {
        let config = JitConfig::from_env().with_workspace_dir("/tmp/kj");
        assert_eq!(config.jit_dir(), PathBuf::from("/tmp/kj/cached_ops"));
        assert_eq!(config.gen_src_dir(), PathBuf::from("/tmp/kj/generated"));
        assert_eq!(config.log_path(), PathBuf::from("/tmp/kj/kernjit_jit.log"));
    }

    #[test]
    fn test_check_include_dir() {
        let temp = TempDir::new().unwrap();
        let missing = JitConfig::default().with_include_dir(temp.path().join("absent"));
        let err = missing.check_include_dir().unwrap_err();
        assert!(err.to_string().contains("KERNJIT_INCLUDE_DIR"));

        let present = JitConfig::default().with_include_dir(temp.path());
        assert!(present.check_include_dir().is_ok());
    }

    #[test]
    fn test_default_include_paths_order() {
        let config = JitConfig::from_env()
            .with_include_dir("/inc")
            .with_csrc_dir("/csrc")
            .with_cutlass_dir("/cutlass");

        assert_eq!(
            config.default_include_paths(),
            vec![
                PathBuf::from("/inc"),
                PathBuf::from("/csrc"),
                PathBuf::from("/cutlass/include"),
                PathBuf::from("/cutlass/tools/util/include"),
            ]
        );
    }

    #[test]
    fn test_ensure_workspace_creates_missing() {
        let temp = TempDir::new().unwrap();
        let ws = temp.path().join("a").join("b");
        let config = JitConfig::from_env().with_workspace_dir(&ws);

        assert!(config.ensure_workspace().unwrap());
        assert!(ws.is_dir());
    }

    #[test]
    fn test_ensure_workspace_leaves_existing_untouched() {
        let temp = TempDir::new().unwrap();
        let marker = temp.path().join("keep.txt");
        fs::write(&marker, "data").unwrap();
        let config = JitConfig::from_env().with_workspace_dir(temp.path());

        assert!(!config.ensure_workspace().unwrap());
        assert!(!config.ensure_workspace().unwrap());
        assert_eq!(fs::read_to_string(&marker).unwrap(), "data");
    }

    #[test]
    fn test_ensure_workspace_rejects_file() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("ws");
        fs::write(&file, "").unwrap();
        let config = JitConfig::from_env().with_workspace_dir(&file);

        assert!(matches!(
            config.ensure_workspace(),
            Err(JitError::Config(_))
        ));
    }

    #[test]
    fn test_from_file_overrides() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("kernjit.toml");
        fs::write(
            &path,
            r#"
workspace_dir = "/srv/kernjit"
cuda_arch_list = "8.0;9.0"
cutlass_dir = "/opt/cutlass"
"#,
        )
        .unwrap();

        let config = JitConfig::from_file(&path).unwrap();
        assert_eq!(config.workspace_dir(), Path::new("/srv/kernjit"));
        assert_eq!(config.arch_list(), Some("8.0;9.0"));
        assert_eq!(
            config.cutlass_include_dirs()[0],
            PathBuf::from("/opt/cutlass/include")
        );
    }

    #[test]
    fn test_from_file_rejects_unknown_keys() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("kernjit.toml");
        fs::write(&path, "workspace = \"/x\"\n").unwrap();

        assert!(matches!(
            JitConfig::from_file(&path),
            Err(JitError::Config(_))
        ));
    }
}
