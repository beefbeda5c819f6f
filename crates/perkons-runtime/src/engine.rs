//! Compiler driver and public engine surface
//!
//! [`Engine::build`] turns rule text into a live pipeline: parse, validate,
//! then dispatch the stream-builder visitor over the AST, wiring router
//! subscriptions, windowers, leaves and combinators into a [`Rule`] whose
//! receiver yields the root verdict stream. Compile-time failures are
//! returned synchronously and never create a subscription.

use crate::combinator;
use crate::error::{BuildError, RuntimeError};
use crate::leaf;
use crate::router::{Routed, SampleRouter};
use crate::verdict::Verdict;
use crate::windower;
use perkons_core::analysis::{Complexity, ComplexityAnalyzer, MetricCollector, VariableCollector};
use perkons_core::validate::{validate as validate_expr, ValidationResult};
use perkons_core::{Condition, Expr, ExprVisitor, LogicalOp, Sample, VariableResolver};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Engine tuning knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Wall-clock flush interval of the reorder buffer, in milliseconds.
    /// Bounds the out-of-order tolerance of every windower.
    pub reorder_interval_ms: u64,
    /// Capacity of the channels between pipeline operators. Consumers that
    /// fall further behind than this lose samples (no backpressure
    /// guarantee).
    pub channel_capacity: usize,
    /// When set, rules referencing metrics outside this set fail validation.
    pub known_metrics: Option<HashSet<String>>,
    /// When set, thresholds referencing variables outside this set fail
    /// validation.
    pub known_variables: Option<HashSet<String>>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reorder_interval_ms: 1000,
            channel_capacity: 1024,
            known_metrics: None,
            known_variables: None,
        }
    }
}

impl EngineConfig {
    fn reorder_interval(&self) -> Duration {
        Duration::from_millis(self.reorder_interval_ms.max(1))
    }
}

/// The rule evaluation engine.
///
/// Owns the per-metric router over one push source of samples. Any number
/// of rules can be built against it; conditions on the same metric share
/// one sub-stream.
pub struct Engine {
    router: Arc<SampleRouter>,
    resolver: Arc<dyn VariableResolver>,
    config: EngineConfig,
    pump: JoinHandle<()>,
}

impl Engine {
    /// Create an engine over a push source. The router pump starts
    /// immediately; dropping the engine stops it.
    pub fn new(
        source: mpsc::Receiver<Routed>,
        resolver: Arc<dyn VariableResolver>,
        config: EngineConfig,
    ) -> Self {
        let router = SampleRouter::new(config.channel_capacity);
        let pump = router.clone().spawn_pump(source);
        Self {
            router,
            resolver,
            config,
            pump,
        }
    }

    pub fn router(&self) -> &Arc<SampleRouter> {
        &self.router
    }

    /// Compile a rule expression into a live verdict stream.
    ///
    /// Validation warnings go to the log sink; errors reject the rule
    /// before any subscription is made.
    pub fn build(&self, text: &str) -> Result<Rule, BuildError> {
        let expr = perkons_parser::parse(text)?;
        let report = validate_expr(
            &expr,
            self.config.known_metrics.as_ref(),
            self.config.known_variables.as_ref(),
        );
        for diagnostic in report.warnings() {
            warn!(code = diagnostic.code, "{}", diagnostic.message);
        }
        if report.has_errors() {
            return Err(BuildError::InvalidExpression(report.format()));
        }

        let metrics = MetricCollector::collect(&expr);
        let mut builder = StreamBuilder {
            router: &self.router,
            resolver: &self.resolver,
            config: &self.config,
            tasks: Vec::new(),
        };
        let verdicts = expr.accept(&mut builder);
        info!(rule = %expr, root = %expr.name(), "rule built");
        Ok(Rule {
            name: expr.name().clone(),
            metrics,
            verdicts,
            tasks: builder.tasks,
        })
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

/// A compiled rule: the root verdict stream plus ownership of every
/// pipeline task it spawned. Dropping the rule cancels its windower timers,
/// leaves and combinators.
pub struct Rule {
    name: Arc<str>,
    metrics: HashSet<String>,
    verdicts: mpsc::Receiver<Result<Verdict, RuntimeError>>,
    tasks: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

impl Rule {
    /// Root node name; stable for the lifetime of this build.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Metric names this rule subscribed to.
    pub fn metrics(&self) -> &HashSet<String> {
        &self.metrics
    }

    /// Receive the next root verdict. `None` once the stream has
    /// terminated (source completion, or after a terminal error).
    pub async fn next(&mut self) -> Option<Result<Verdict, RuntimeError>> {
        self.verdicts.recv().await
    }
}

impl Drop for Rule {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Evaluator visitor: builds the verdict pipeline for each node.
struct StreamBuilder<'a> {
    router: &'a Arc<SampleRouter>,
    resolver: &'a Arc<dyn VariableResolver>,
    config: &'a EngineConfig,
    tasks: Vec<JoinHandle<()>>,
}

impl ExprVisitor for StreamBuilder<'_> {
    type Output = mpsc::Receiver<Result<Verdict, RuntimeError>>;

    fn visit_condition(&mut self, condition: &Condition) -> Self::Output {
        let subscription = self.router.subscribe(&condition.metric);
        let (tx, rx) = mpsc::channel(self.config.channel_capacity);
        match &condition.agg {
            Some(spec) => {
                let (windows, windower_task) = windower::spawn(
                    subscription,
                    spec.window,
                    self.config.reorder_interval(),
                    self.config.channel_capacity,
                    |sample: &Sample| sample.ticks(),
                );
                self.tasks.push(windower_task);
                self.tasks.push(leaf::spawn_aggregation(
                    windows,
                    condition.clone(),
                    self.resolver.clone(),
                    tx,
                ));
            }
            None => {
                self.tasks.push(leaf::spawn_simple(
                    subscription,
                    condition.clone(),
                    self.resolver.clone(),
                    tx,
                ));
            }
        }
        rx
    }

    fn visit_binary(
        &mut self,
        op: LogicalOp,
        left: &Expr,
        right: &Expr,
        name: &Arc<str>,
    ) -> Self::Output {
        let left_rx = left.accept(self);
        let right_rx = right.accept(self);
        let (tx, rx) = mpsc::channel(self.config.channel_capacity);
        self.tasks
            .push(combinator::spawn(op, name.clone(), left_rx, right_rx, tx));
        rx
    }
}

// ============================================================================
// Text-level analysis surface
// ============================================================================

/// Set of metric names referenced by a rule expression.
pub fn extract_metrics(text: &str) -> Result<HashSet<String>, BuildError> {
    Ok(MetricCollector::collect(&perkons_parser::parse(text)?))
}

/// Set of variable names referenced by any threshold in a rule expression.
pub fn extract_variables(text: &str) -> Result<HashSet<String>, BuildError> {
    Ok(VariableCollector::collect(&perkons_parser::parse(text)?))
}

/// Structural complexity of a rule expression.
pub fn analyze_complexity(text: &str) -> Result<Complexity, BuildError> {
    Ok(ComplexityAnalyzer::analyze(&perkons_parser::parse(text)?))
}

/// Validate a rule expression without building it.
///
/// A syntax failure is reported as an error diagnostic inside the result
/// rather than as an `Err`.
pub fn validate(
    text: &str,
    known_metrics: Option<&HashSet<String>>,
    known_variables: Option<&HashSet<String>>,
) -> ValidationResult {
    match perkons_parser::parse(text) {
        Ok(expr) => validate_expr(&expr, known_metrics, known_variables),
        Err(error) => ValidationResult::syntax_error(error.to_string()),
    }
}
