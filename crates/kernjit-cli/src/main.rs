//! kernjit CLI - build, inspect and clear JIT-compiled CUDA kernel modules.
//!
//! # Commands
//!
//! - `kernjit build <name> <sources>...` - JIT-build and load a module
//! - `kernjit gen-act <name> <definition>` - Generate an activation-and-multiply kernel
//! - `kernjit check-arch` - Resolve target archs and check the sm75 minimum
//! - `kernjit clear-cache` - Remove all cached builds
//! - `kernjit info` - Show configuration, toolchain and cache state
//!
//! # Examples
//!
//! ```bash
//! # Build a module with an extra nvcc flag
//! kernjit build my_ops csrc/my_ops.cu --cuda-cflag=-lineinfo
//!
//! # Check an explicit arch list
//! kernjit check-arch --arch-list "8.0;9.0+PTX"
//!
//! # Use a separate workspace
//! kernjit --workspace /tmp/kernjit info
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

mod commands;
mod error;

use commands::{build, check_arch, clear_cache, gen_act, info, load_config};
use error::CliResult;

/// kernjit - JIT build and cache for CUDA kernel extensions
#[derive(Parser)]
#[command(name = "kernjit")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Configuration file (kernjit.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Workspace directory, overriding the environment and config file
    #[arg(short, long, global = true)]
    workspace: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// JIT-build and load a module from source files
    Build {
        /// Module name
        name: String,

        /// Source files (.cu, .cpp)
        #[arg(required = true)]
        sources: Vec<PathBuf>,

        /// Extra host compiler flag (repeatable)
        #[arg(long = "cflag", allow_hyphen_values = true)]
        cflags: Vec<String>,

        /// Extra nvcc flag (repeatable)
        #[arg(long = "cuda-cflag", allow_hyphen_values = true)]
        cuda_cflags: Vec<String>,

        /// Extra linker flag (repeatable)
        #[arg(long = "ldflag", allow_hyphen_values = true)]
        ldflags: Vec<String>,

        /// Include directory replacing the defaults (repeatable)
        #[arg(short = 'I', long = "include")]
        include_paths: Vec<PathBuf>,
    },

    /// Generate an activation-and-multiply kernel
    GenAct {
        /// Activation function name, e.g. gelu_tanh
        name: String,

        /// File containing the __device__ activation function
        definition: PathBuf,

        /// Also build and load the generated module
        #[arg(long)]
        load: bool,
    },

    /// Resolve target architectures and check the minimum compute capability
    CheckArch {
        /// Arch list to check instead of the configured one, e.g. "8.0;9.0+PTX"
        #[arg(short, long)]
        arch_list: Option<String>,
    },

    /// Remove every cached build
    ClearCache,

    /// Show configuration, toolchain and cache state
    Info,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

fn setup_logging(verbose: bool, quiet: bool, log_path: &Path) -> CliResult<()> {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    if let Some(dir) = log_path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    kernjit::logging::init_logging_with_filter(log_path, filter)?;
    Ok(())
}

fn run(cli: Cli) -> CliResult<()> {
    let config = || load_config(cli.config.as_deref(), cli.workspace.as_deref());

    match cli.command {
        Commands::Build {
            name,
            sources,
            cflags,
            cuda_cflags,
            ldflags,
            include_paths,
        } => {
            let config = config()?;
            setup_logging(cli.verbose, cli.quiet, &config.log_path())?;
            let args = build::BuildArgs {
                name,
                sources,
                cflags,
                cuda_cflags,
                ldflags,
                include_paths,
                verbose: cli.verbose,
            };
            build::execute(config, &args)
        }

        Commands::GenAct {
            name,
            definition,
            load,
        } => {
            let config = config()?;
            setup_logging(cli.verbose, cli.quiet, &config.log_path())?;
            gen_act::execute(config, &name, &definition, load)
        }

        Commands::CheckArch { arch_list } => check_arch::execute(config()?, arch_list.as_deref()),

        Commands::ClearCache => {
            let config = config()?;
            setup_logging(cli.verbose, cli.quiet, &config.log_path())?;
            clear_cache::execute(config)
        }

        Commands::Info => info::execute(&config()?),

        Commands::Completions { shell } => {
            use clap::CommandFactory;
            clap_complete::generate(shell, &mut Cli::command(), "kernjit", &mut std::io::stdout());
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_build_args_parse() {
        let cli = Cli::try_parse_from([
            "kernjit",
            "build",
            "ops",
            "a.cu",
            "b.cpp",
            "--cuda-cflag",
            "-lineinfo",
            "-I",
            "/inc",
        ])
        .unwrap();
        match cli.command {
            Commands::Build {
                name,
                sources,
                cuda_cflags,
                include_paths,
                ..
            } => {
                assert_eq!(name, "ops");
                assert_eq!(sources, [PathBuf::from("a.cu"), PathBuf::from("b.cpp")]);
                assert_eq!(cuda_cflags, ["-lineinfo"]);
                assert_eq!(include_paths, [PathBuf::from("/inc")]);
            }
            _ => panic!("expected build"),
        }
    }

    #[test]
    fn test_build_requires_sources() {
        assert!(Cli::try_parse_from(["kernjit", "build", "ops"]).is_err());
    }

    #[test]
    fn test_global_workspace_flag() {
        let cli = Cli::try_parse_from(["kernjit", "info", "--workspace", "/tmp/kj"]).unwrap();
        assert_eq!(cli.workspace, Some(PathBuf::from("/tmp/kj")));
        assert!(matches!(cli.command, Commands::Info));
    }
}
