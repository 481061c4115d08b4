//! Error types for JIT kernel building and loading.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for kernjit operations.
pub type Result<T> = std::result::Result<T, JitError>;

/// Errors raised while configuring, building or loading JIT kernel modules.
#[derive(Error, Debug)]
pub enum JitError {
    /// IO error during cache or workspace operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The target GPU generation is too old to run the generated kernels.
    #[error("kernjit requires sm{required}+, found compute_{found}")]
    UnsupportedArch {
        /// Lowest compute capability found among the arch flags.
        found: u32,
        /// Minimum supported compute capability.
        required: u32,
    },

    /// An arch list entry or arch flag could not be parsed.
    #[error("Invalid CUDA arch: {0}")]
    InvalidArch(String),

    /// nvcc or the host compiler could not be located.
    #[error("Toolchain not found: {0}")]
    ToolchainNotFound(String),

    /// A source file failed to compile.
    #[error("Compilation of {source_file} failed:\n{stderr}")]
    CompileFailed {
        /// Source that failed.
        source_file: PathBuf,
        /// Compiler diagnostics, verbatim.
        stderr: String,
    },

    /// Linking the shared library failed.
    #[error("Linking {library} failed:\n{stderr}")]
    LinkFailed {
        /// Library that was being produced.
        library: PathBuf,
        /// Linker diagnostics, verbatim.
        stderr: String,
    },

    /// The shared library could not be loaded into the process.
    #[error("Failed to load {path}: {reason}")]
    LoadFailed {
        /// Library path.
        path: PathBuf,
        /// Loader error message.
        reason: String,
    },

    /// A symbol was not exported by a loaded module.
    #[error("Symbol '{symbol}' not found in module '{module}'")]
    MissingSymbol {
        /// Module name.
        module: String,
        /// Requested symbol.
        symbol: String,
    },

    /// Acquiring or releasing a build lock failed.
    #[error("Lock error on {path}: {source}")]
    Lock {
        /// Lock file path.
        path: PathBuf,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// Kernel source template rendering error.
    #[error("Template error: {0}")]
    Template(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<handlebars::RenderError> for JitError {
    fn from(e: handlebars::RenderError) -> Self {
        JitError::Template(e.to_string())
    }
}

impl From<handlebars::TemplateError> for JitError {
    fn from(e: handlebars::TemplateError) -> Self {
        JitError::Template(e.to_string())
    }
}

impl From<toml::de::Error> for JitError {
    fn from(e: toml::de::Error) -> Self {
        JitError::Config(e.to_string())
    }
}

impl From<serde_json::Error> for JitError {
    fn from(e: serde_json::Error) -> Self {
        JitError::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_arch_message() {
        let err = JitError::UnsupportedArch {
            found: 70,
            required: 75,
        };
        assert_eq!(err.to_string(), "kernjit requires sm75+, found compute_70");
    }

    #[test]
    fn test_compile_failed_keeps_stderr() {
        let err = JitError::CompileFailed {
            source_file: PathBuf::from("a.cu"),
            stderr: "a.cu(3): error: expected a \";\"".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("a.cu"));
        assert!(msg.contains("expected a"));
    }
}
