//! Combine-latest logical combinators over verdict streams
//!
//! An AND/OR node pairs each incoming child verdict with the opposite
//! side's most recent one. Nothing is emitted until both children have
//! produced at least one verdict; afterwards every input yields exactly one
//! output. Children emitting at different cadences (e.g. different window
//! durations) therefore keep the combined output responsive.

use crate::error::RuntimeError;
use crate::verdict::Verdict;
use perkons_core::LogicalOp;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

enum Side {
    Left(Result<Verdict, RuntimeError>),
    Right(Result<Verdict, RuntimeError>),
}

/// Spawn a combinator task over two child verdict streams.
///
/// A child error is forwarded downstream and terminates the combinator. A
/// child that completes stops producing but its latest verdict stays frozen;
/// the output completes only once both children have completed.
pub fn spawn(
    op: LogicalOp,
    name: Arc<str>,
    mut left: mpsc::Receiver<Result<Verdict, RuntimeError>>,
    mut right: mpsc::Receiver<Result<Verdict, RuntimeError>>,
    out: mpsc::Sender<Result<Verdict, RuntimeError>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut latest_left: Option<Verdict> = None;
        let mut latest_right: Option<Verdict> = None;
        let mut left_open = true;
        let mut right_open = true;

        while left_open || right_open {
            let incoming = tokio::select! {
                message = left.recv(), if left_open => match message {
                    Some(message) => Side::Left(message),
                    None => {
                        left_open = false;
                        continue;
                    }
                },
                message = right.recv(), if right_open => match message {
                    Some(message) => Side::Right(message),
                    None => {
                        right_open = false;
                        continue;
                    }
                },
            };

            match incoming {
                Side::Left(Ok(verdict)) => latest_left = Some(verdict),
                Side::Right(Ok(verdict)) => latest_right = Some(verdict),
                Side::Left(Err(error)) | Side::Right(Err(error)) => {
                    let _ = out.send(Err(error)).await;
                    return;
                }
            }

            let (Some(l), Some(r)) = (&latest_left, &latest_right) else {
                continue;
            };
            let combined = Verdict {
                node: name.clone(),
                value: op.apply(l.value, r.value),
                period: l.period.join(&r.period),
            };
            trace!(node = %combined.node, value = combined.value, "combined verdict");
            if out.send(Ok(combined)).await.is_err() {
                return;
            }
        }
    })
}
