//! Perkons Core - sample model, rule AST, and analyses
//!
//! This crate provides the foundational types for the Perkons metric rule
//! engine: the clocked sample model, the boolean rule expression tree with
//! its arithmetic threshold sub-language, visitor dispatch, and the semantic
//! analyses (metric/variable collection, complexity, validation) that run
//! over a parsed rule before it is compiled into a live verdict stream.

pub mod analysis;
pub mod arith;
pub mod ast;
pub mod error;
pub mod sample;
pub mod validate;

pub use arith::{ArithExpr, ArithOp, EmptyResolver, VariableResolver};
pub use ast::{AggKind, AggSpec, CmpOp, Condition, Expr, ExprVisitor, LogicalOp, Threshold};
pub use error::EvalError;
pub use sample::{Period, Sample};
