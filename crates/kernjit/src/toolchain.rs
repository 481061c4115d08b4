//! Locating nvcc, the host C++ compiler and the CUDA libraries.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{JitError, Result};

/// External compilers used for a build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    /// nvcc executable.
    pub nvcc: PathBuf,
    /// Host C++ compiler, also used as the linker driver.
    pub cxx: PathBuf,
    /// CUDA installation root, when known.
    pub cuda_home: Option<PathBuf>,
}

impl Toolchain {
    /// Discovers nvcc and the host compiler.
    ///
    /// nvcc is searched in `CUDA_HOME`, `CUDA_PATH`, the usual Linux install
    /// locations and finally `PATH`. The host compiler is `CXX` or `c++`.
    pub fn discover() -> Result<Self> {
        let nvcc = find_nvcc().ok_or_else(|| {
            JitError::ToolchainNotFound(
                "nvcc not found; set CUDA_HOME or add nvcc to PATH".to_string(),
            )
        })?;

        // <cuda_home>/bin/nvcc
        let cuda_home = nvcc
            .parent()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .filter(|p| p.join("include").is_dir());

        let cxx = std::env::var_os("CXX")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("c++"));

        tracing::debug!(nvcc = %nvcc.display(), cxx = %cxx.display(), "Discovered toolchain");

        Ok(Self {
            nvcc,
            cxx,
            cuda_home,
        })
    }

    /// CUDA headers directory, when the installation root is known.
    pub fn cuda_include_dir(&self) -> Option<PathBuf> {
        self.cuda_home.as_ref().map(|home| home.join("include"))
    }

    /// CUDA runtime library directory, when the installation root is known.
    pub fn cuda_lib_dir(&self) -> Option<PathBuf> {
        let home = self.cuda_home.as_ref()?;
        ["lib64", "lib", "lib/x64"]
            .iter()
            .map(|sub| home.join(sub))
            .find(|dir| dir.is_dir())
    }
}

fn find_nvcc() -> Option<PathBuf> {
    for var in ["CUDA_HOME", "CUDA_PATH"] {
        if let Ok(root) = std::env::var(var) {
            let nvcc = PathBuf::from(&root).join("bin").join(nvcc_binary());
            if nvcc.exists() {
                return Some(nvcc);
            }
        }
    }

    for path in [
        "/usr/local/cuda/bin/nvcc",
        "/opt/cuda/bin/nvcc",
        "/usr/bin/nvcc",
    ] {
        let p = PathBuf::from(path);
        if p.exists() {
            return Some(p);
        }
    }

    let which = if cfg!(windows) { "where" } else { "which" };
    if let Ok(output) = Command::new(which).arg("nvcc").output() {
        if output.status.success() {
            let path = String::from_utf8_lossy(&output.stdout)
                .lines()
                .next()
                .unwrap_or_default()
                .trim()
                .to_string();
            if !path.is_empty() {
                return Some(PathBuf::from(path));
            }
        }
    }

    None
}

fn nvcc_binary() -> &'static str {
    if cfg!(windows) {
        "nvcc.exe"
    } else {
        "nvcc"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_cuda_dirs_from_home() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("lib64")).unwrap();

        let toolchain = Toolchain {
            nvcc: temp.path().join("bin/nvcc"),
            cxx: PathBuf::from("c++"),
            cuda_home: Some(temp.path().to_path_buf()),
        };

        assert_eq!(toolchain.cuda_include_dir(), Some(temp.path().join("include")));
        assert_eq!(toolchain.cuda_lib_dir(), Some(temp.path().join("lib64")));
    }

    #[test]
    fn test_cuda_lib_dir_unknown_home() {
        let toolchain = Toolchain {
            nvcc: PathBuf::from("nvcc"),
            cxx: PathBuf::from("c++"),
            cuda_home: None,
        };
        assert!(toolchain.cuda_lib_dir().is_none());
        assert!(toolchain.cuda_include_dir().is_none());
    }
}
