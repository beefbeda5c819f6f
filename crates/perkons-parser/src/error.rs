//! Parser error types

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    #[error("unexpected token at position {position}: expected {expected}, found {found}")]
    UnexpectedToken {
        position: usize,
        expected: String,
        found: String,
    },

    #[error("unexpected end of input: expected {expected}")]
    UnexpectedEof { expected: String },

    #[error("invalid token '{lexeme}' at position {position}")]
    InvalidToken { position: usize, lexeme: String },

    #[error("unknown aggregation function '{name}' at position {position}")]
    UnknownAggregation { position: usize, name: String },

    #[error("invalid time unit '{unit}' at position {position}: expected s, m, or h")]
    InvalidTimeUnit { position: usize, unit: String },
}

pub type ParseResult<T> = Result<T, ParseError>;
