//! Error types for endurecer operations.
//!
//! Provides rich error context for library consumers. Configuration and
//! dimension faults are detected before any numeric work begins; numerical
//! faults (non-finite gradients or norms) are always surfaced rather than
//! silently substituted, since masking them would hide divergence.

use std::fmt;

/// Main error type for endurecer operations.
///
/// # Examples
///
/// ```
/// use endurecer::error::RobustError;
///
/// let err = RobustError::Configuration {
///     param: "epsilon".to_string(),
///     value: "-0.3".to_string(),
///     constraint: "> 0".to_string(),
/// };
/// assert!(err.to_string().contains("epsilon"));
/// ```
#[derive(Debug)]
pub enum RobustError {
    /// Invalid hyperparameter or attack/evaluation configuration.
    Configuration {
        /// Parameter name
        param: String,
        /// Provided value
        value: String,
        /// Constraint description
        constraint: String,
    },

    /// Input/label shape doesn't match what the model or operation expects.
    Dimension {
        /// Expected shape description
        expected: String,
        /// Actual shape found
        actual: String,
    },

    /// Explicitly unimplemented code path.
    NotImplemented {
        /// Feature name
        feature: String,
    },

    /// A gradient or norm computation produced non-finite values.
    Numerical {
        /// Where the non-finite value appeared
        context: String,
    },

    /// Transient resource exhaustion (propagated, never retried internally).
    Resource {
        /// Error description
        message: String,
    },

    /// The operation was aborted through a cancellation token.
    Cancelled,
}

impl fmt::Display for RobustError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RobustError::Configuration {
                param,
                value,
                constraint,
            } => {
                write!(
                    f,
                    "Invalid configuration: {param} = {value}, expected {constraint}"
                )
            }
            RobustError::Dimension { expected, actual } => {
                write!(f, "Dimension mismatch: expected {expected}, got {actual}")
            }
            RobustError::NotImplemented { feature } => {
                write!(f, "Not implemented: {feature}")
            }
            RobustError::Numerical { context } => {
                write!(f, "Non-finite value encountered in {context}")
            }
            RobustError::Resource { message } => {
                write!(f, "Resource exhausted: {message}")
            }
            RobustError::Cancelled => write!(f, "Operation cancelled"),
        }
    }
}

impl std::error::Error for RobustError {}

impl RobustError {
    /// Create a configuration error with descriptive context.
    #[must_use]
    pub fn configuration(param: &str, value: impl fmt::Display, constraint: &str) -> Self {
        Self::Configuration {
            param: param.to_string(),
            value: value.to_string(),
            constraint: constraint.to_string(),
        }
    }

    /// Create a dimension mismatch error from two shapes.
    #[must_use]
    pub fn dimension(expected: impl fmt::Debug, actual: impl fmt::Debug) -> Self {
        Self::Dimension {
            expected: format!("{expected:?}"),
            actual: format!("{actual:?}"),
        }
    }

    /// Create a numerical error for the given computation context.
    #[must_use]
    pub fn numerical(context: &str) -> Self {
        Self::Numerical {
            context: context.to_string(),
        }
    }
}

/// Convenience type alias for Results.
pub type Result<T> = std::result::Result<T, RobustError>;
