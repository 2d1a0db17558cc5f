//! latent-tree error types

/// latent-tree result type
pub type Result<T> = std::result::Result<T, Error>;

/// latent-tree errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Error from numr operations
    #[error("numr error: {0}")]
    Numr(#[from] numr::error::Error),

    /// Rejected configuration (leaf transform selector, sampling flags, dims)
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of what went wrong
        reason: String,
    },

    /// Caller-supplied tensor does not have the expected shape
    #[error("shape mismatch for '{arg}': expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        /// Argument name
        arg: &'static str,
        /// Expected shape
        expected: Vec<usize>,
        /// Actual shape
        got: Vec<usize>,
    },

    /// Invalid argument to an operation
    #[error("invalid argument '{arg}': {reason}")]
    InvalidArgument {
        /// Argument name
        arg: &'static str,
        /// Why it's invalid
        reason: String,
    },
}

impl Error {
    pub(crate) fn config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Check `got` against `expected`, reporting a [`Error::ShapeMismatch`] on difference.
    pub(crate) fn check_shape(arg: &'static str, got: &[usize], expected: &[usize]) -> Result<()> {
        if got != expected {
            return Err(Self::ShapeMismatch {
                arg,
                expected: expected.to_vec(),
                got: got.to_vec(),
            });
        }
        Ok(())
    }
}
