//! `kernjit gen-act` command - Generate (and optionally build) an
//! activation-and-multiply kernel.

use std::fs;
use std::path::Path;

use colored::Colorize;
use kernjit::codegen::gen_act_and_mul_cu;
use kernjit::{JitConfig, LoadOptions};

use crate::error::CliResult;

use super::context;

/// Execute the `gen-act` command.
///
/// `definition` is a file holding the `__device__` activation function.
pub fn execute(config: JitConfig, name: &str, definition: &Path, load: bool) -> CliResult<()> {
    let act_func_def = fs::read_to_string(definition)?;

    if load {
        let ctx = context(config)?;
        let module = ctx.gen_act_and_mul_module(name, &act_func_def, &LoadOptions::new())?;
        println!(
            "{} Loaded {} from {}",
            "✓".bright_green(),
            module.name().bright_white(),
            module.path().display().to_string().dimmed()
        );
        return Ok(());
    }

    let generated = gen_act_and_mul_cu(&config.gen_src_dir(), name, &act_func_def)?;
    println!(
        "{} Generated {}",
        "✓".bright_green(),
        generated.uri.bright_white()
    );
    for source in &generated.sources {
        println!("  {} {}", "•".dimmed(), source.display());
    }
    Ok(())
}
