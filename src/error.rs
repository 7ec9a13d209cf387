//! Merge engine error types.
//!
//! Defines [`MergeError`], the unified error type for all merge operations.
//! Each variant is self-contained: a caller receiving the error can tell what
//! went wrong and whether the run can continue without additional context.
//!
//! Merge conflicts are deliberately *not* represented here. A conflict is an
//! expected outcome, reported through [`crate::strategy::MergeReport`] and as
//! conflict artifacts in the output, never as an `Err`.

use std::fmt;
use std::io;
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// MergeError
// ---------------------------------------------------------------------------

/// Unified error type for merge operations.
#[derive(Debug)]
pub enum MergeError {
    /// An input could not be parsed into an artifact tree.
    ///
    /// Under the `combined`/`autotuning` strategy this triggers a per-file
    /// fallback to the line-based merger; under `structured` it surfaces.
    ParseFailure {
        /// The input that failed to parse.
        file: PathBuf,
        /// Parser-provided description of the failure.
        detail: String,
    },

    /// An unknown strategy name was requested.
    StrategyNotFound {
        /// The name that did not resolve (already trimmed and lowercased).
        name: String,
    },

    /// An input file or directory does not exist.
    InputMissing {
        /// The missing path.
        path: PathBuf,
    },

    /// An input exists but could not be read, or an output could not be
    /// written.
    InputInaccessible {
        /// The offending path.
        path: PathBuf,
        /// The underlying I/O error.
        source: io::Error,
    },

    /// A configuration value failed to parse.
    InvalidOption {
        /// Which option was being parsed (e.g. `"lookahead"`).
        what: &'static str,
        /// The raw value that was rejected.
        value: String,
        /// Why the value is invalid.
        reason: String,
    },

    /// A data-model invariant was violated. Always a bug; never caught for
    /// recovery.
    InternalAssertion {
        /// Description of the violated invariant.
        detail: String,
    },

    /// The run was cancelled through the cooperative cancellation token.
    /// Partial results have been discarded.
    Cancelled {
        /// The scenario that was being merged when cancellation was observed.
        scenario: String,
    },

    /// An I/O error outside any specific input (e.g. a sink write).
    Io(io::Error),
}

impl fmt::Display for MergeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ParseFailure { file, detail } => {
                write!(f, "failed to parse '{}': {detail}", file.display())
            }
            Self::StrategyNotFound { name } => {
                write!(f, "strategy not found: '{name}'")
            }
            Self::InputMissing { path } => {
                write!(f, "input does not exist: '{}'", path.display())
            }
            Self::InputInaccessible { path, source } => {
                write!(f, "cannot access '{}': {source}", path.display())
            }
            Self::InvalidOption {
                what,
                value,
                reason,
            } => {
                write!(f, "invalid {what} value '{value}': {reason}")
            }
            Self::InternalAssertion { detail } => {
                write!(f, "internal assertion violated: {detail}")
            }
            Self::Cancelled { scenario } => {
                write!(f, "merge of {scenario} was cancelled")
            }
            Self::Io(err) => write!(f, "i/o error: {err}"),
        }
    }
}

impl std::error::Error for MergeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InputInaccessible { source, .. } => Some(source),
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for MergeError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl MergeError {
    /// Returns `true` if the per-file `keep_going` policy may swallow this
    /// error and continue with the next scenario.
    ///
    /// Internal assertions and cancellation are never recoverable.
    #[must_use]
    pub fn recoverable(&self) -> bool {
        !matches!(
            self,
            Self::InternalAssertion { .. } | Self::Cancelled { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_self_contained() {
        let err = MergeError::StrategyNotFound {
            name: "semantic".to_owned(),
        };
        assert_eq!(err.to_string(), "strategy not found: 'semantic'");

        let err = MergeError::InvalidOption {
            what: "lookahead",
            value: "-3".to_owned(),
            reason: "must be 'off', 'full' or a non-negative integer".to_owned(),
        };
        assert!(err.to_string().contains("lookahead"));
        assert!(err.to_string().contains("-3"));
    }

    #[test]
    fn recoverability() {
        assert!(MergeError::ParseFailure {
            file: PathBuf::from("a.java"),
            detail: "unexpected token".to_owned(),
        }
        .recoverable());
        assert!(!MergeError::InternalAssertion {
            detail: "match symmetry broken".to_owned(),
        }
        .recoverable());
        assert!(!MergeError::Cancelled {
            scenario: "left.txt <- base.txt -> right.txt".to_owned(),
        }
        .recoverable());
    }
}
