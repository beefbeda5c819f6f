//! Error types for the streaming runtime

use perkons_core::EvalError;
use perkons_parser::ParseError;
use thiserror::Error;

/// Terminal failure of the source stream, fanned out through the router.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StreamError {
    #[error("upstream source failed: {0}")]
    Upstream(String),
}

/// Terminal failure carried on a verdict stream.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RuntimeError {
    #[error(transparent)]
    Eval(#[from] EvalError),

    #[error(transparent)]
    Upstream(#[from] StreamError),
}

/// Failure to compile a rule expression.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BuildError {
    #[error("syntax error: {0}")]
    Syntax(#[from] ParseError),

    #[error("invalid expression:\n{0}")]
    InvalidExpression(String),
}
