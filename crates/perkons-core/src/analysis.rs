//! Auxiliary analyses over rule expressions
//!
//! Visitor implementations that collect referenced metric and variable
//! names and compute structural complexity for a parsed rule.

use crate::ast::{Condition, Expr, ExprVisitor, LogicalOp, Threshold};
use std::collections::HashSet;
use std::sync::Arc;

/// Collects the set of metric names referenced anywhere in the tree.
#[derive(Debug, Default)]
pub struct MetricCollector {
    metrics: HashSet<String>,
}

impl MetricCollector {
    pub fn collect(expr: &Expr) -> HashSet<String> {
        let mut collector = Self::default();
        expr.accept(&mut collector);
        collector.metrics
    }
}

impl ExprVisitor for MetricCollector {
    type Output = ();

    fn visit_condition(&mut self, condition: &Condition) {
        self.metrics.insert(condition.metric.clone());
    }

    fn visit_binary(&mut self, _op: LogicalOp, left: &Expr, right: &Expr, _name: &Arc<str>) {
        left.accept(self);
        right.accept(self);
    }
}

/// Collects the set of variable names referenced in any threshold expression.
#[derive(Debug, Default)]
pub struct VariableCollector {
    variables: HashSet<String>,
}

impl VariableCollector {
    pub fn collect(expr: &Expr) -> HashSet<String> {
        let mut collector = Self::default();
        expr.accept(&mut collector);
        collector.variables
    }
}

impl ExprVisitor for VariableCollector {
    type Output = ();

    fn visit_condition(&mut self, condition: &Condition) {
        self.variables.extend(condition.threshold.variables());
    }

    fn visit_binary(&mut self, _op: LogicalOp, left: &Expr, right: &Expr, _name: &Arc<str>) {
        left.accept(self);
        right.accept(self);
    }
}

/// Structural complexity metrics for a rule expression.
///
/// `node_count` and `max_depth` include the threshold arithmetic trees: a
/// condition leaf contributes `1 + depth(threshold)` to the depth and its
/// threshold's nodes to the count. `operator_count` counts binary operators,
/// logical and arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Complexity {
    pub node_count: usize,
    pub condition_count: usize,
    pub aggregation_count: usize,
    pub max_depth: usize,
    pub operator_count: usize,
    pub is_high_complexity: bool,
}

/// Per-subtree tally accumulated by the analyzer.
#[derive(Debug, Clone, Copy)]
pub struct Tally {
    nodes: usize,
    depth: usize,
    conditions: usize,
    aggregations: usize,
    operators: usize,
}

/// Computes [`Complexity`] for a rule expression.
#[derive(Debug, Default)]
pub struct ComplexityAnalyzer;

impl ComplexityAnalyzer {
    pub fn analyze(expr: &Expr) -> Complexity {
        let tally = expr.accept(&mut ComplexityAnalyzer);
        Complexity {
            node_count: tally.nodes,
            condition_count: tally.conditions,
            aggregation_count: tally.aggregations,
            max_depth: tally.depth,
            operator_count: tally.operators,
            is_high_complexity: tally.nodes > 20 || tally.depth > 10 || tally.aggregations > 5,
        }
    }
}

impl ExprVisitor for ComplexityAnalyzer {
    type Output = Tally;

    fn visit_condition(&mut self, condition: &Condition) -> Tally {
        let (threshold_nodes, threshold_depth, threshold_ops) = match &condition.threshold {
            Threshold::Literal(_) => (1, 1, 0),
            Threshold::Expr(expr) => (expr.node_count(), expr.depth(), expr.operator_count()),
        };
        Tally {
            nodes: 1 + threshold_nodes,
            depth: 1 + threshold_depth,
            conditions: 1,
            aggregations: usize::from(condition.is_aggregation()),
            operators: threshold_ops,
        }
    }

    fn visit_binary(&mut self, _op: LogicalOp, left: &Expr, right: &Expr, _name: &Arc<str>) -> Tally {
        let l = left.accept(self);
        let r = right.accept(self);
        Tally {
            nodes: 1 + l.nodes + r.nodes,
            depth: 1 + l.depth.max(r.depth),
            conditions: l.conditions + r.conditions,
            aggregations: l.aggregations + r.aggregations,
            operators: 1 + l.operators + r.operators,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arith::{ArithExpr, ArithOp};
    use crate::ast::{AggKind, CmpOp};
    use chrono::Duration;

    fn agg(metric: &str) -> Expr {
        Expr::Condition(Condition::aggregate(
            AggKind::Avg,
            metric,
            Duration::seconds(30),
            CmpOp::Gt,
            Threshold::Literal(80.0),
        ))
    }

    fn simple(metric: &str) -> Expr {
        Expr::Condition(Condition::simple(
            metric,
            CmpOp::Gt,
            Threshold::Literal(1.0),
        ))
    }

    #[test]
    fn test_metric_collection_deduplicates() {
        let expr = Expr::binary(
            LogicalOp::Or,
            Expr::binary(LogicalOp::And, agg("cpu"), simple("mem")),
            agg("cpu"),
        );
        let metrics = MetricCollector::collect(&expr);
        assert_eq!(metrics.len(), 2);
        assert!(metrics.contains("cpu"));
        assert!(metrics.contains("mem"));
    }

    #[test]
    fn test_variable_collection() {
        let threshold = Threshold::Expr(ArithExpr::binary(
            ArithOp::Add,
            ArithExpr::Var("base".into()),
            ArithExpr::Var("margin".into()),
        ));
        let expr = Expr::binary(
            LogicalOp::And,
            Expr::Condition(Condition::simple("cpu", CmpOp::Gt, threshold)),
            simple("mem"),
        );
        let vars = VariableCollector::collect(&expr);
        assert_eq!(vars.len(), 2);
        assert!(vars.contains("base"));
        assert!(vars.contains("margin"));
    }

    #[test]
    fn test_complexity_single_leaf() {
        let report = ComplexityAnalyzer::analyze(&agg("cpu"));
        assert_eq!(report.node_count, 2);
        assert_eq!(report.condition_count, 1);
        assert_eq!(report.aggregation_count, 1);
        assert_eq!(report.max_depth, 2);
        assert_eq!(report.operator_count, 0);
        assert!(!report.is_high_complexity);
    }

    #[test]
    fn test_complexity_balanced_tree() {
        // (agg && simple) || (agg && simple)
        let expr = Expr::binary(
            LogicalOp::Or,
            Expr::binary(LogicalOp::And, agg("a"), simple("b")),
            Expr::binary(LogicalOp::And, agg("c"), simple("d")),
        );
        let report = ComplexityAnalyzer::analyze(&expr);
        assert_eq!(report.condition_count, 4);
        assert_eq!(report.aggregation_count, 2);
        assert_eq!(report.node_count, 11);
        assert_eq!(report.max_depth, 4);
        assert_eq!(report.operator_count, 3);
        assert!(!report.is_high_complexity);
    }

    #[test]
    fn test_deep_chain_flags_high_complexity() {
        let mut expr = simple("m0");
        for i in 1..=11 {
            expr = Expr::binary(LogicalOp::And, expr, simple(&format!("m{}", i)));
        }
        let report = ComplexityAnalyzer::analyze(&expr);
        assert!(report.max_depth > 10);
        assert!(report.is_high_complexity);
    }

    #[test]
    fn test_many_aggregations_flag_high_complexity() {
        let mut expr = agg("m0");
        for i in 1..=5 {
            expr = Expr::binary(LogicalOp::Or, expr, agg(&format!("m{}", i)));
        }
        let report = ComplexityAnalyzer::analyze(&expr);
        assert_eq!(report.aggregation_count, 6);
        assert!(report.is_high_complexity);
    }
}
