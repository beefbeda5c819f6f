//! Condition leaves: the verdict-producing ends of the pipeline
//!
//! An aggregation leaf folds each completed window into a single value,
//! compares it against the condition's threshold and emits one verdict per
//! non-empty window. A simple leaf compares every routed sample directly and
//! emits one verdict per sample. Threshold evaluation failures terminate the
//! leaf's verdict stream with an error; they are never flattened to `false`.

use crate::error::{RuntimeError, StreamError};
use crate::fold::AggFold;
use crate::router::Routed;
use crate::verdict::{Aggregate, Verdict};
use crate::windower::Window;
use perkons_core::{Condition, Period, Sample, VariableResolver};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{trace, warn};

/// Spawn the evaluation task for an aggregation condition.
///
/// `windows` must come from a windower whose duration equals the condition's
/// window. Empty windows emit no verdict.
pub fn spawn_aggregation(
    mut windows: mpsc::Receiver<Result<Window<Sample>, StreamError>>,
    condition: Condition,
    resolver: Arc<dyn VariableResolver>,
    out: mpsc::Sender<Result<Verdict, RuntimeError>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let Some(spec) = condition.agg.clone() else {
            // Contract violation; the stream builder only routes
            // aggregation conditions here.
            warn!(node = %condition.name(), "aggregation leaf built for simple condition");
            return;
        };
        while let Some(message) = windows.recv().await {
            let mut window = match message {
                Ok(window) => window,
                Err(error) => {
                    let _ = out.send(Err(error.into())).await;
                    return;
                }
            };
            let mut fold = AggFold::new(spec.kind);
            while let Some(sample) = window.items.recv().await {
                fold.update(sample.value);
            }
            let Some(value) = fold.finish() else {
                continue;
            };
            let aggregate = Aggregate {
                node: condition.name().clone(),
                kind: spec.kind,
                period: window.period,
                value,
            };
            trace!(
                node = %aggregate.node,
                window = window.id,
                value = aggregate.value,
                samples = fold.count(),
                "window folded"
            );
            let threshold = match condition.threshold.evaluate(resolver.as_ref()) {
                Ok(threshold) => threshold,
                Err(error) => {
                    warn!(node = %condition.name(), %error, "threshold evaluation failed");
                    let _ = out.send(Err(error.into())).await;
                    return;
                }
            };
            let verdict = Verdict {
                node: aggregate.node.clone(),
                value: condition.op.apply(aggregate.value, threshold),
                period: aggregate.period,
            };
            if out.send(Ok(verdict)).await.is_err() {
                return;
            }
        }
    })
}

/// Spawn the evaluation task for a simple per-sample condition.
///
/// The verdict period is the single instant of the sample.
pub fn spawn_simple(
    mut input: broadcast::Receiver<Routed>,
    condition: Condition,
    resolver: Arc<dyn VariableResolver>,
    out: mpsc::Sender<Result<Verdict, RuntimeError>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match input.recv().await {
                Ok(Ok(sample)) => {
                    let threshold = match condition.threshold.evaluate(resolver.as_ref()) {
                        Ok(threshold) => threshold,
                        Err(error) => {
                            warn!(node = %condition.name(), %error, "threshold evaluation failed");
                            let _ = out.send(Err(error.into())).await;
                            return;
                        }
                    };
                    let verdict = Verdict {
                        node: condition.name().clone(),
                        value: condition.op.apply(sample.value, threshold),
                        period: Period::point(sample.timestamp),
                    };
                    if out.send(Ok(verdict)).await.is_err() {
                        return;
                    }
                }
                Ok(Err(error)) => {
                    let _ = out.send(Err(error.into())).await;
                    return;
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, node = %condition.name(), "sub-stream lagged, samples lost");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use perkons_core::{AggKind, CmpOp, EmptyResolver, EvalError, Threshold};
    use perkons_core::{ArithExpr, ArithOp};
    use std::collections::HashMap;

    fn sample(value: f64, secs: i64) -> Sample {
        Sample::new("cpu", value, Utc.timestamp_opt(secs, 0).unwrap())
    }

    fn no_vars() -> Arc<dyn VariableResolver> {
        Arc::new(EmptyResolver)
    }

    #[tokio::test]
    async fn test_aggregation_leaf_emits_one_verdict_per_window() {
        let condition = Condition::aggregate(
            AggKind::Avg,
            "cpu",
            Duration::seconds(3),
            CmpOp::Gt,
            Threshold::Literal(70.0),
        );
        let (window_tx, window_rx) = mpsc::channel(8);
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let _task = spawn_aggregation(window_rx, condition, no_vars(), out_tx);

        let (items_tx, items_rx) = mpsc::channel(8);
        let period = Period::new(
            Utc.timestamp_opt(0, 0).unwrap(),
            Utc.timestamp_opt(3, 0).unwrap(),
        );
        window_tx
            .send(Ok(Window {
                id: 0,
                period,
                items: items_rx,
            }))
            .await
            .unwrap();
        for value in [85.0, 85.0, 85.0] {
            items_tx.send(sample(value, 0)).await.unwrap();
        }
        drop(items_tx);
        drop(window_tx);

        let verdict = out_rx.recv().await.unwrap().unwrap();
        assert!(verdict.value);
        assert_eq!(verdict.period, period);
        assert!(out_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_aggregation_leaf_skips_empty_window() {
        let condition = Condition::aggregate(
            AggKind::Sum,
            "cpu",
            Duration::seconds(3),
            CmpOp::Gt,
            Threshold::Literal(0.0),
        );
        let (window_tx, window_rx) = mpsc::channel(8);
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let _task = spawn_aggregation(window_rx, condition, no_vars(), out_tx);

        let (items_tx, items_rx) = mpsc::channel::<Sample>(8);
        window_tx
            .send(Ok(Window {
                id: 0,
                period: Period::new(
                    Utc.timestamp_opt(0, 0).unwrap(),
                    Utc.timestamp_opt(3, 0).unwrap(),
                ),
                items: items_rx,
            }))
            .await
            .unwrap();
        drop(items_tx); // window closes with no samples
        drop(window_tx);

        assert!(out_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_aggregation_leaf_forwards_upstream_error() {
        let condition = Condition::aggregate(
            AggKind::Max,
            "cpu",
            Duration::seconds(3),
            CmpOp::Gt,
            Threshold::Literal(0.0),
        );
        let (window_tx, window_rx) = mpsc::channel(8);
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let _task = spawn_aggregation(window_rx, condition, no_vars(), out_tx);

        window_tx
            .send(Err(StreamError::Upstream("boom".to_string())))
            .await
            .unwrap();

        assert!(matches!(
            out_rx.recv().await,
            Some(Err(RuntimeError::Upstream(_)))
        ));
        assert!(out_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_simple_leaf_emits_point_verdict_per_sample() {
        let condition = Condition::simple("cpu", CmpOp::Gt, Threshold::Literal(80.0));
        let (tx, rx) = broadcast::channel(8);
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let _task = spawn_simple(rx, condition, no_vars(), out_tx);

        tx.send(Ok(sample(81.0, 0))).unwrap();
        tx.send(Ok(sample(79.0, 1))).unwrap();
        drop(tx);

        let first = out_rx.recv().await.unwrap().unwrap();
        assert!(first.value);
        assert_eq!(first.period, Period::point(Utc.timestamp_opt(0, 0).unwrap()));

        let second = out_rx.recv().await.unwrap().unwrap();
        assert!(!second.value);
        assert!(out_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_simple_leaf_resolves_variable_threshold() {
        let condition = Condition::simple(
            "cpu",
            CmpOp::Gt,
            Threshold::Expr(ArithExpr::binary(
                ArithOp::Mul,
                ArithExpr::Var("k".to_string()),
                ArithExpr::Const(2.0),
            )),
        );
        let resolver: HashMap<String, f64> = [("k".to_string(), 40.0)].into_iter().collect();
        let (tx, rx) = broadcast::channel(8);
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let _task = spawn_simple(rx, condition, Arc::new(resolver), out_tx);

        tx.send(Ok(sample(81.0, 0))).unwrap();
        tx.send(Ok(sample(79.0, 1))).unwrap();
        drop(tx);

        assert!(out_rx.recv().await.unwrap().unwrap().value);
        assert!(!out_rx.recv().await.unwrap().unwrap().value);
    }

    #[tokio::test]
    async fn test_unresolved_variable_terminates_stream() {
        let condition = Condition::simple(
            "cpu",
            CmpOp::Gt,
            Threshold::Expr(ArithExpr::Var("k".to_string())),
        );
        let (tx, rx) = broadcast::channel(8);
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let _task = spawn_simple(rx, condition, no_vars(), out_tx);

        tx.send(Ok(sample(81.0, 0))).unwrap();

        assert!(matches!(
            out_rx.recv().await,
            Some(Err(RuntimeError::Eval(EvalError::UnresolvedVariable(name)))) if name == "k"
        ));
        assert!(out_rx.recv().await.is_none());
    }
}
