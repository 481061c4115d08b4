//! `kernjit build` command - JIT-build and load a module from sources.

use std::path::PathBuf;

use colored::Colorize;
use kernjit::{JitConfig, LoadOptions};

use crate::error::{CliError, CliResult};

use super::{absolutize, context};

/// Arguments of the `build` command.
#[derive(Debug, Default)]
pub struct BuildArgs {
    /// Module name.
    pub name: String,
    /// Source files.
    pub sources: Vec<PathBuf>,
    /// Extra host compiler flags.
    pub cflags: Vec<String>,
    /// Extra nvcc flags.
    pub cuda_cflags: Vec<String>,
    /// Extra linker flags.
    pub ldflags: Vec<String>,
    /// Include directories replacing the defaults.
    pub include_paths: Vec<PathBuf>,
    /// Log compiler invocations.
    pub verbose: bool,
}

impl BuildArgs {
    fn load_options(&self) -> CliResult<LoadOptions> {
        let mut options = LoadOptions::new()
            .with_cflags(self.cflags.iter().cloned())
            .with_cuda_cflags(self.cuda_cflags.iter().cloned())
            .with_ldflags(self.ldflags.iter().cloned())
            .with_verbose(self.verbose);
        if !self.include_paths.is_empty() {
            options = options.with_include_paths(absolutize(&self.include_paths)?);
        }
        Ok(options)
    }
}

/// Execute the `build` command.
pub fn execute(config: JitConfig, args: &BuildArgs) -> CliResult<()> {
    if args.sources.is_empty() {
        return Err(CliError::InvalidArgument(
            "at least one source file is required".to_string(),
        ));
    }
    for source in &args.sources {
        if !source.is_file() {
            return Err(CliError::InvalidArgument(format!(
                "source not found: {}",
                source.display()
            )));
        }
    }

    let ctx = context(config)?;
    let sources = absolutize(&args.sources)?;
    let options = args.load_options()?;

    println!(
        "{} Building {} ({} source{})",
        "→".bright_cyan(),
        args.name.bright_white(),
        sources.len(),
        if sources.len() == 1 { "" } else { "s" }
    );

    let module = ctx.load_cuda_ops(&args.name, &sources, &options)?;

    println!(
        "{} Loaded {} from {}",
        "✓".bright_green(),
        module.name().bright_white(),
        module.path().display().to_string().dimmed()
    );
    Ok(())
}
