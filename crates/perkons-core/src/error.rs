//! Runtime evaluation errors

use thiserror::Error;

/// Errors raised while evaluating a threshold expression at runtime.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EvalError {
    #[error("unresolved variable '{0}'")]
    UnresolvedVariable(String),

    #[error("division by zero in threshold expression")]
    DivisionByZero,

    /// Unreachable with the shipped parser; kept so operator dispatch stays
    /// exhaustive for programmatically built trees.
    #[error("unsupported operator '{0}'")]
    UnsupportedOperator(String),
}
