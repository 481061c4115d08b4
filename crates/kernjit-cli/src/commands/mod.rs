//! CLI command implementations.

pub mod build;
pub mod check_arch;
pub mod clear_cache;
pub mod gen_act;
pub mod info;

use std::path::{Path, PathBuf};

use kernjit::{JitConfig, JitContext};

use crate::error::CliResult;

/// Loads the configuration file if given, otherwise the environment, then
/// applies the workspace override.
pub fn load_config(config_file: Option<&Path>, workspace: Option<&Path>) -> CliResult<JitConfig> {
    let config = match config_file {
        Some(path) => JitConfig::from_file(path)?,
        None => JitConfig::from_env(),
    };
    Ok(match workspace {
        Some(dir) => config.with_workspace_dir(dir),
        None => config,
    })
}

/// Initializes a JIT context for `config`.
pub fn context(config: JitConfig) -> CliResult<JitContext> {
    Ok(JitContext::initialize(config)?)
}

/// Resolves relative paths against the current directory.
pub fn absolutize(paths: &[PathBuf]) -> CliResult<Vec<PathBuf>> {
    let cwd = std::env::current_dir()?;
    Ok(paths
        .iter()
        .map(|p| if p.is_absolute() { p.clone() } else { cwd.join(p) })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_config_workspace_override() {
        let temp = TempDir::new().unwrap();
        let config = load_config(None, Some(temp.path())).unwrap();
        assert_eq!(config.workspace_dir(), temp.path());
    }

    #[test]
    fn test_load_config_from_file() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("kernjit.toml");
        fs::write(&file, "cuda_arch_list = \"8.0\"\n").unwrap();

        let config = load_config(Some(&file), None).unwrap();
        assert_eq!(config.arch_list(), Some("8.0"));
    }

    #[test]
    fn test_load_config_bad_file() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("kernjit.toml");
        fs::write(&file, "unknown_key = 1\n").unwrap();
        assert!(load_config(Some(&file), None).is_err());
    }

    #[test]
    fn test_absolutize() {
        let paths = absolutize(&[PathBuf::from("a.cu"), PathBuf::from("/abs/b.cu")]).unwrap();
        assert!(paths[0].is_absolute());
        assert!(paths[0].ends_with("a.cu"));
        assert_eq!(paths[1], PathBuf::from("/abs/b.cu"));
    }
}
