//! `kernjit info` command - Show configuration, toolchain and cache state.

use std::path::Path;

use colored::Colorize;
use kernjit::{JitConfig, PrebuiltOps, Toolchain};

use crate::error::CliResult;

fn row(label: &str, value: impl std::fmt::Display) {
    println!("  {} {:<14} {}", "•".dimmed(), label, value);
}

fn path_row(label: &str, path: &Path) {
    let mark = if path.exists() {
        "".normal()
    } else {
        " (missing)".yellow()
    };
    row(label, format!("{}{}", path.display(), mark));
}

/// Execute the `info` command.
///
/// Only reads state; the workspace is not created.
pub fn execute(config: &JitConfig) -> CliResult<()> {
    println!("{}:", "Configuration".bright_white().underline());
    path_row("workspace", config.workspace_dir());
    path_row("cache", &config.jit_dir());
    path_row("generated", &config.gen_src_dir());
    path_row("log", &config.log_path());
    for include in config.default_include_paths() {
        path_row("include", &include);
    }
    row(
        "arch list",
        config.arch_list().unwrap_or("(detect from devices)"),
    );
    println!();

    println!("{}:", "Toolchain".bright_white().underline());
    match Toolchain::discover() {
        Ok(toolchain) => {
            row("nvcc", toolchain.nvcc.display());
            row("c++", toolchain.cxx.display());
            if let Some(home) = &toolchain.cuda_home {
                row("cuda home", home.display());
            }
        }
        Err(e) => row("nvcc", e.to_string().yellow()),
    }
    println!();

    println!("{}:", "Cache".bright_white().underline());
    row("", kernjit::CacheStats::scan(&config.jit_dir()));
    let prebuilt = PrebuiltOps::load(config.prebuilt_dir())?;
    if prebuilt.has_prebuilt_ops() {
        row("prebuilt ops", prebuilt.uris().count());
    } else {
        row("prebuilt ops", "none".dimmed());
    }

    Ok(())
}
