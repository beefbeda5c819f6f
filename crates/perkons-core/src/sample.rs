//! Clocked sample model: metric readings and verdict periods

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// A single metric reading produced by the data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Metric name (Arc<str> for O(1) clone on the routing hot path)
    pub metric: Arc<str>,
    /// Observed value
    pub value: f64,
    /// Event-time carried by the sample
    pub timestamp: DateTime<Utc>,
}

impl Sample {
    pub fn new(metric: impl Into<Arc<str>>, value: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            metric: metric.into(),
            value,
            timestamp,
        }
    }

    /// Event-time in milliseconds since the Unix epoch, the tick domain used
    /// for window-id computation.
    pub fn ticks(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }
}

/// A half-open time interval stamped onto every verdict.
///
/// `Period::EMPTY` is the distinguished zero-duration value at the Unix epoch
/// and acts as the unit of [`Period::join`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Period {
    /// The empty period, unit of `join`.
    pub const EMPTY: Period = Period {
        start: DateTime::UNIX_EPOCH,
        end: DateTime::UNIX_EPOCH,
    };

    /// Creates a period. Panics if `end` precedes `start`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        assert!(end >= start, "period end must not precede start");
        Self { start, end }
    }

    /// A single-instant period, used by per-sample verdicts.
    pub fn point(at: DateTime<Utc>) -> Self {
        Self { start: at, end: at }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::EMPTY
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Smallest period covering both operands; `EMPTY` is the unit.
    pub fn join(&self, other: &Period) -> Period {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Period {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.start.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            self.end.format("%Y-%m-%dT%H:%M:%S%.3fZ")
        )
    }
}
