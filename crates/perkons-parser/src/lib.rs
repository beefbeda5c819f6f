//! Perkons Parser
//!
//! This crate provides lexing and parsing for the Perkons rule expression
//! language, turning rule text such as `avg(cpu, 1m) > 70 || mem > k * 2`
//! into a `perkons_core::Expr` tree.

pub mod error;
pub mod lexer;
pub mod parser;

pub use error::{ParseError, ParseResult};
pub use lexer::Token;
pub use parser::parse;
