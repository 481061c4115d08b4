//! `kernjit clear-cache` command - Remove every cached build.

use colored::Colorize;
use kernjit::JitConfig;

use crate::error::CliResult;

use super::context;

/// Execute the `clear-cache` command.
pub fn execute(config: JitConfig) -> CliResult<()> {
    let ctx = context(config)?;
    let before = ctx.cache_stats();

    ctx.clear_cache_dir()?;

    println!(
        "{} Removed {} cached module{} ({:.2} KB) from {}",
        "✓".bright_green(),
        before.entries,
        if before.entries == 1 { "" } else { "s" },
        before.bytes as f64 / 1024.0,
        before.cache_dir.display().to_string().dimmed()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_clear_cache_empties_dir() {
        let temp = TempDir::new().unwrap();
        let config = JitConfig::from_env().with_workspace_dir(temp.path());
        let jit_dir = config.jit_dir();
        fs::create_dir_all(jit_dir.join("ops")).unwrap();
        fs::write(jit_dir.join("ops").join("libops.so"), b"x").unwrap();
        fs::write(jit_dir.join("ops.lock"), b"").unwrap();

        execute(config).unwrap();

        assert!(jit_dir.is_dir());
        assert_eq!(fs::read_dir(&jit_dir).unwrap().count(), 0);
    }

    #[test]
    fn test_clear_cache_without_jit_dir() {
        let temp = TempDir::new().unwrap();
        let config = JitConfig::from_env().with_workspace_dir(temp.path().join("fresh"));
        execute(config).unwrap();
        assert!(temp.path().join("fresh").is_dir());
    }
}
