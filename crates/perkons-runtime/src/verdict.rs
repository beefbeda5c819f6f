//! Verdict and aggregate records flowing through the evaluation pipeline

use perkons_core::{AggKind, Period};
use serde::Serialize;
use std::sync::Arc;

/// Boolean output of an expression node, stamped with the period of the
/// samples that contributed to it.
///
/// `node` is a stable identifier within one build, useful for routing and
/// logging; it is not part of the public contract beyond being non-empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verdict {
    pub node: Arc<str>,
    pub value: bool,
    pub period: Period,
}

/// A folded window value, produced by an aggregation leaf just before the
/// threshold comparison.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Aggregate {
    pub node: Arc<str>,
    pub kind: AggKind,
    pub period: Period,
    pub value: f64,
}
