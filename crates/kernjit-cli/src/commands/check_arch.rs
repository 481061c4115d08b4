//! `kernjit check-arch` command - Resolve target archs and apply the sm75 gate.

use colored::Colorize;
use kernjit::arch::{gencode_flags, resolve_archs};
use kernjit::{check_cuda_arch, JitConfig, MIN_COMPUTE_CAPABILITY};

use crate::error::CliResult;

/// Execute the `check-arch` command.
pub fn execute(config: JitConfig, arch_list: Option<&str>) -> CliResult<()> {
    let config = match arch_list {
        Some(list) => config.with_arch_list(list),
        None => config,
    };

    let archs = resolve_archs(&config)?;
    let flags = gencode_flags(&archs);

    println!("{} Target architectures", "→".bright_cyan());
    for arch in &archs {
        let ok = arch.number() >= MIN_COMPUTE_CAPABILITY;
        let mark = if ok {
            "✓".bright_green()
        } else {
            "✗".bright_red()
        };
        println!("  {} sm_{} ({})", mark, arch.number(), arch);
    }
    println!();
    for flag in &flags {
        println!("  {}", flag.dimmed());
    }

    check_cuda_arch(&flags)?;
    println!(
        "\n{} All targets are sm{}+",
        "✓".bright_green(),
        MIN_COMPUTE_CAPABILITY
    );
    Ok(())
}
