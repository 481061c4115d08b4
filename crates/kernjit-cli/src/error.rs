//! Error types for the kernjit CLI.

use thiserror::Error;

/// CLI result type alias.
pub type CliResult<T> = Result<T, CliError>;

/// CLI error type.
#[derive(Error, Debug)]
pub enum CliError {
    /// Error from the JIT library.
    #[error(transparent)]
    Jit(#[from] kernjit::JitError),

    /// IO error while reading inputs.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A command argument was rejected.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jit_error_is_transparent() {
        let err: CliError = kernjit::JitError::UnsupportedArch {
            found: 70,
            required: 75,
        }
        .into();
        assert_eq!(err.to_string(), "kernjit requires sm75+, found compute_70");
    }
}
