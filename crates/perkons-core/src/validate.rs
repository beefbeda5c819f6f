//! Semantic validation for rule expressions
//!
//! Runs after parsing and before a rule is compiled. Errors abort the
//! build; warnings are surfaced to the log sink. Diagnostics carry stable
//! codes so callers can match on them.

use crate::ast::{Condition, Expr, ExprVisitor, LogicalOp, Threshold};
use chrono::Duration;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Severity of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// A single diagnostic produced by validation.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: &'static str,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{}[{}]: {}", prefix, self.code, self.message)
    }
}

/// Result of validating a rule expression.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationResult {
    /// A result holding a single syntax-error diagnostic, used when the
    /// text never reached the semantic checks.
    pub fn syntax_error(message: impl Into<String>) -> Self {
        Self {
            diagnostics: vec![Diagnostic {
                severity: Severity::Error,
                code: "E000",
                message: message.into(),
            }],
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.has_errors()
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Warning)
    }

    /// Formats all diagnostics, one per line.
    pub fn format(&self) -> String {
        self.diagnostics
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Validate a rule expression.
///
/// `known_metrics` and `known_variables` are optional closed worlds: when
/// supplied, references outside them are errors; when absent, those checks
/// are skipped.
pub fn validate(
    expr: &Expr,
    known_metrics: Option<&HashSet<String>>,
    known_variables: Option<&HashSet<String>>,
) -> ValidationResult {
    let mut validator = Validator {
        known_metrics,
        known_variables,
        diagnostics: Vec::new(),
    };
    expr.accept(&mut validator);
    ValidationResult {
        diagnostics: validator.diagnostics,
    }
}

struct Validator<'a> {
    known_metrics: Option<&'a HashSet<String>>,
    known_variables: Option<&'a HashSet<String>>,
    diagnostics: Vec<Diagnostic>,
}

impl Validator<'_> {
    fn emit(&mut self, severity: Severity, code: &'static str, message: String) {
        self.diagnostics.push(Diagnostic {
            severity,
            code,
            message,
        });
    }
}

impl ExprVisitor for Validator<'_> {
    type Output = ();

    fn visit_condition(&mut self, condition: &Condition) {
        if condition.metric.is_empty() {
            self.emit(
                Severity::Error,
                "E001",
                "condition has an empty metric name".to_string(),
            );
        }

        if let Some(spec) = &condition.agg {
            if spec.window <= Duration::zero() {
                self.emit(
                    Severity::Error,
                    "E002",
                    format!(
                        "aggregation window for '{}' must be positive",
                        condition.metric
                    ),
                );
            } else if spec.window > Duration::hours(24) {
                self.emit(
                    Severity::Warning,
                    "W001",
                    format!(
                        "aggregation window for '{}' exceeds 24 hours",
                        condition.metric
                    ),
                );
            }
        }

        if let Threshold::Literal(value) = condition.threshold {
            if !value.is_finite() {
                self.emit(
                    Severity::Error,
                    "E003",
                    format!("threshold for '{}' is not a finite number", condition.metric),
                );
            }
        }

        if let Some(known) = self.known_metrics {
            if !known.contains(&condition.metric) {
                self.emit(
                    Severity::Error,
                    "E004",
                    format!("unknown metric '{}'", condition.metric),
                );
            }
        }

        if let Some(known) = self.known_variables {
            for variable in condition.threshold.variables() {
                if !known.contains(&variable) {
                    self.emit(
                        Severity::Error,
                        "E005",
                        format!("unknown variable '{}'", variable),
                    );
                }
            }
        }
    }

    fn visit_binary(&mut self, _op: LogicalOp, left: &Expr, right: &Expr, _name: &Arc<str>) {
        left.accept(self);
        right.accept(self);
    }
}
