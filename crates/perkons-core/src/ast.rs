//! Rule expression AST
//!
//! A rule is a tree whose leaves are threshold conditions over a named
//! metric (optionally windowed through an aggregation) and whose interior
//! nodes combine child verdicts under logical AND/OR. Nodes own their
//! children exclusively, and every node carries a name minted at
//! construction for tracing; structural equality ignores the names.

use crate::arith::{ArithExpr, VariableResolver};
use crate::error::EvalError;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Process-wide sequence for minting unique leaf names.
static NODE_SEQ: AtomicU64 = AtomicU64::new(0);

fn next_node_id() -> u64 {
    NODE_SEQ.fetch_add(1, Ordering::Relaxed)
}

/// Comparison operator between an observed value and its threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
}

impl CmpOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
        }
    }

    /// Compares raw doubles; `==` and `!=` are exact.
    pub fn apply(&self, lhs: f64, rhs: f64) -> bool {
        match self {
            CmpOp::Gt => lhs > rhs,
            CmpOp::Ge => lhs >= rhs,
            CmpOp::Lt => lhs < rhs,
            CmpOp::Le => lhs <= rhs,
            CmpOp::Eq => lhs == rhs,
            CmpOp::Ne => lhs != rhs,
        }
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logical connective for interior expression nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalOp {
    And,
    Or,
}

impl LogicalOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogicalOp::And => "&&",
            LogicalOp::Or => "||",
        }
    }

    /// Lowercase word form used when deriving combinator node names.
    pub fn word(&self) -> &'static str {
        match self {
            LogicalOp::And => "and",
            LogicalOp::Or => "or",
        }
    }

    pub fn apply(&self, lhs: bool, rhs: bool) -> bool {
        match self {
            LogicalOp::And => lhs && rhs,
            LogicalOp::Or => lhs || rhs,
        }
    }
}

impl fmt::Display for LogicalOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Window aggregation function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggKind {
    Avg,
    Sum,
    Max,
    Min,
}

impl AggKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggKind::Avg => "avg",
            AggKind::Sum => "sum",
            AggKind::Max => "max",
            AggKind::Min => "min",
        }
    }

    /// Case-insensitive lookup, `None` for anything that is not an
    /// aggregation function name.
    pub fn parse(name: &str) -> Option<AggKind> {
        match name.to_ascii_lowercase().as_str() {
            "avg" => Some(AggKind::Avg),
            "sum" => Some(AggKind::Sum),
            "max" => Some(AggKind::Max),
            "min" => Some(AggKind::Min),
            _ => None,
        }
    }
}

impl fmt::Display for AggKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregation kind plus tumbling-window width
#[derive(Debug, Clone, PartialEq)]
pub struct AggSpec {
    pub kind: AggKind,
    pub window: Duration,
}

/// A condition threshold: a literal, or an arithmetic expression evaluated
/// against the variable resolver at comparison time.
#[derive(Debug, Clone, PartialEq)]
pub enum Threshold {
    Literal(f64),
    Expr(ArithExpr),
}

impl Threshold {
    pub fn evaluate(&self, resolver: &dyn VariableResolver) -> Result<f64, EvalError> {
        match self {
            Threshold::Literal(v) => Ok(*v),
            Threshold::Expr(expr) => expr.evaluate(resolver),
        }
    }

    pub fn variables(&self) -> BTreeSet<String> {
        match self {
            Threshold::Literal(_) => BTreeSet::new(),
            Threshold::Expr(expr) => expr.variables(),
        }
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Threshold::Literal(v) => write!(f, "{}", v),
            Threshold::Expr(expr) => write!(f, "{}", expr),
        }
    }
}

/// A leaf condition over one metric.
///
/// `agg: Some(..)` makes it an aggregation condition evaluated once per
/// completed window; `None` makes it a simple per-sample condition.
#[derive(Debug, Clone)]
pub struct Condition {
    pub metric: String,
    pub op: CmpOp,
    pub threshold: Threshold,
    pub agg: Option<AggSpec>,
    name: Arc<str>,
}

impl Condition {
    /// A per-sample condition: `metric op threshold`.
    pub fn simple(metric: impl Into<String>, op: CmpOp, threshold: Threshold) -> Self {
        let metric = metric.into();
        let name = Arc::from(format!("{}#{}", metric, next_node_id()));
        Self {
            metric,
            op,
            threshold,
            agg: None,
            name,
        }
    }

    /// A windowed condition: `kind(metric, window) op threshold`.
    pub fn aggregate(
        kind: AggKind,
        metric: impl Into<String>,
        window: Duration,
        op: CmpOp,
        threshold: Threshold,
    ) -> Self {
        let metric = metric.into();
        let name = Arc::from(format!("{}({})#{}", kind, metric, next_node_id()));
        Self {
            metric,
            op,
            threshold,
            agg: Some(AggSpec { kind, window }),
            name,
        }
    }

    /// Tracing name minted at construction; non-empty and unique per leaf.
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub fn is_aggregation(&self) -> bool {
        self.agg.is_some()
    }
}

impl PartialEq for Condition {
    /// Structural equality; node names are ignored.
    fn eq(&self, other: &Self) -> bool {
        self.metric == other.metric
            && self.op == other.op
            && self.threshold == other.threshold
            && self.agg == other.agg
    }
}

/// Formats a window width with the largest unit that divides it exactly.
fn format_window(window: &Duration) -> String {
    let ms = window.num_milliseconds();
    if ms % 3_600_000 == 0 {
        format!("{}h", ms / 3_600_000)
    } else if ms % 60_000 == 0 {
        format!("{}m", ms / 60_000)
    } else if ms % 1000 == 0 {
        format!("{}s", ms / 1000)
    } else {
        format!("{}s", ms as f64 / 1000.0)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.agg {
            Some(spec) => write!(
                f,
                "{}({}, {}) {} {}",
                spec.kind,
                self.metric,
                format_window(&spec.window),
                self.op,
                self.threshold
            ),
            None => write!(f, "{} {} {}", self.metric, self.op, self.threshold),
        }
    }
}

/// A rule expression: a condition leaf or a logical combination of two
/// subtrees.
#[derive(Debug, Clone)]
pub enum Expr {
    Condition(Condition),
    Binary {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
        name: Arc<str>,
    },
}

impl Expr {
    /// Combines two subtrees; the node name derives from the operator and
    /// the children's names.
    pub fn binary(op: LogicalOp, left: Expr, right: Expr) -> Expr {
        let name = Arc::from(format!("{}({},{})", op.word(), left.name(), right.name()));
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
            name,
        }
    }

    pub fn name(&self) -> &Arc<str> {
        match self {
            Expr::Condition(c) => c.name(),
            Expr::Binary { name, .. } => name,
        }
    }

    /// Polymorphic dispatch over the two node shapes.
    pub fn accept<V: ExprVisitor>(&self, visitor: &mut V) -> V::Output {
        match self {
            Expr::Condition(c) => visitor.visit_condition(c),
            Expr::Binary {
                op,
                left,
                right,
                name,
            } => visitor.visit_binary(*op, left, right, name),
        }
    }
}

impl PartialEq for Expr {
    /// Structural equality; node names are ignored.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Expr::Condition(a), Expr::Condition(b)) => a == b,
            (
                Expr::Binary {
                    op: op_a,
                    left: l_a,
                    right: r_a,
                    ..
                },
                Expr::Binary {
                    op: op_b,
                    left: l_b,
                    right: r_b,
                    ..
                },
            ) => op_a == op_b && l_a == l_b && r_a == r_b,
            _ => false,
        }
    }
}

impl fmt::Display for Expr {
    /// Canonical form: binary children are parenthesized, so the printed
    /// rule re-parses to a structurally equal tree.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn fmt_child(expr: &Expr, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match expr {
                Expr::Condition(c) => write!(f, "{}", c),
                binary => write!(f, "({})", binary),
            }
        }

        match self {
            Expr::Condition(c) => write!(f, "{}", c),
            Expr::Binary {
                op, left, right, ..
            } => {
                fmt_child(left, f)?;
                write!(f, " {} ", op)?;
                fmt_child(right, f)
            }
        }
    }
}

/// Visitor over the two expression node shapes, producing `Output` per node.
pub trait ExprVisitor {
    type Output;

    fn visit_condition(&mut self, condition: &Condition) -> Self::Output;

    fn visit_binary(
        &mut self,
        op: LogicalOp,
        left: &Expr,
        right: &Expr,
        name: &Arc<str>,
    ) -> Self::Output;
}
