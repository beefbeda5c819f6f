//! Arithmetic sub-language for dynamic thresholds
//!
//! Thresholds may be arithmetic expressions over named variables
//! (`k * 2 + base`). Variables are looked up in a read-only
//! [`VariableResolver`] at comparison time; unknown names and division by
//! zero fail the evaluation rather than defaulting.

use crate::error::EvalError;
use rustc_hash::FxHashMap;
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Read-only mapping from variable name to numeric value, consulted when a
/// threshold expression is evaluated. Implementations must be safe for
/// concurrent reads.
pub trait VariableResolver: Send + Sync {
    fn resolve(&self, name: &str) -> Option<f64>;
}

impl VariableResolver for HashMap<String, f64> {
    fn resolve(&self, name: &str) -> Option<f64> {
        self.get(name).copied()
    }
}

impl VariableResolver for FxHashMap<String, f64> {
    fn resolve(&self, name: &str) -> Option<f64> {
        self.get(name).copied()
    }
}

/// Resolver with no bindings; every lookup misses.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyResolver;

impl VariableResolver for EmptyResolver {
    fn resolve(&self, _name: &str) -> Option<f64> {
        None
    }
}

/// Binary arithmetic operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl ArithOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
        }
    }

    /// Multiplicative operators bind tighter than additive ones.
    fn precedence(&self) -> u8 {
        match self {
            ArithOp::Add | ArithOp::Sub => 1,
            ArithOp::Mul | ArithOp::Div => 2,
        }
    }

    pub fn apply(&self, lhs: f64, rhs: f64) -> Result<f64, EvalError> {
        match self {
            ArithOp::Add => Ok(lhs + rhs),
            ArithOp::Sub => Ok(lhs - rhs),
            ArithOp::Mul => Ok(lhs * rhs),
            ArithOp::Div => {
                if rhs == 0.0 {
                    Err(EvalError::DivisionByZero)
                } else {
                    Ok(lhs / rhs)
                }
            }
        }
    }
}

impl fmt::Display for ArithOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An arithmetic threshold expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum ArithExpr {
    Const(f64),
    Var(String),
    Binary {
        op: ArithOp,
        left: Box<ArithExpr>,
        right: Box<ArithExpr>,
    },
}

impl ArithExpr {
    pub fn binary(op: ArithOp, left: ArithExpr, right: ArithExpr) -> Self {
        ArithExpr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Evaluate against a resolver. Unknown variables and division by zero
    /// fail the evaluation.
    pub fn evaluate(&self, resolver: &dyn VariableResolver) -> Result<f64, EvalError> {
        match self {
            ArithExpr::Const(v) => Ok(*v),
            ArithExpr::Var(name) => resolver
                .resolve(name)
                .ok_or_else(|| EvalError::UnresolvedVariable(name.clone())),
            ArithExpr::Binary { op, left, right } => {
                let lhs = left.evaluate(resolver)?;
                let rhs = right.evaluate(resolver)?;
                op.apply(lhs, rhs)
            }
        }
    }

    /// Union of variable names referenced in the subtree.
    pub fn variables(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_variables(&mut out);
        out
    }

    fn collect_variables(&self, out: &mut BTreeSet<String>) {
        match self {
            ArithExpr::Const(_) => {}
            ArithExpr::Var(name) => {
                out.insert(name.clone());
            }
            ArithExpr::Binary { left, right, .. } => {
                left.collect_variables(out);
                right.collect_variables(out);
            }
        }
    }

    pub fn node_count(&self) -> usize {
        match self {
            ArithExpr::Const(_) | ArithExpr::Var(_) => 1,
            ArithExpr::Binary { left, right, .. } => 1 + left.node_count() + right.node_count(),
        }
    }

    pub fn depth(&self) -> usize {
        match self {
            ArithExpr::Const(_) | ArithExpr::Var(_) => 1,
            ArithExpr::Binary { left, right, .. } => 1 + left.depth().max(right.depth()),
        }
    }

    pub fn operator_count(&self) -> usize {
        match self {
            ArithExpr::Const(_) | ArithExpr::Var(_) => 0,
            ArithExpr::Binary { left, right, .. } => {
                1 + left.operator_count() + right.operator_count()
            }
        }
    }

    /// Parenthesizes only where precedence or left-associativity require it,
    /// so the printed form re-parses to the same tree.
    fn fmt_with(&self, f: &mut fmt::Formatter<'_>, parent_prec: u8, right_side: bool) -> fmt::Result {
        match self {
            ArithExpr::Const(v) => write!(f, "{}", v),
            ArithExpr::Var(name) => f.write_str(name),
            ArithExpr::Binary { op, left, right } => {
                let prec = op.precedence();
                let needs_parens = prec < parent_prec || (right_side && prec == parent_prec);
                if needs_parens {
                    f.write_str("(")?;
                }
                left.fmt_with(f, prec, false)?;
                write!(f, " {} ", op)?;
                right.fmt_with(f, prec, true)?;
                if needs_parens {
                    f.write_str(")")?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for ArithExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_with(f, 0, false)
    }
}
