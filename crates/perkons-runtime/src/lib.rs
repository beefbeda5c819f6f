//! Perkons Runtime - streaming evaluation engine for metric rules
//!
//! Compiles textual boolean rules over named metric streams into live
//! pipelines of tokio tasks and emits a running stream of period-stamped
//! verdicts as samples arrive.
//!
//! Data flow: source stream → [`router::SampleRouter`] → per-metric
//! sub-stream → [`windower`] → per-window inner stream → condition leaf →
//! verdict stream → [`combinator`] nodes up the tree → root verdict stream.

pub mod combinator;
pub mod engine;
pub mod error;
pub mod fold;
pub mod leaf;
pub mod router;
pub mod verdict;
pub mod windower;

pub use engine::{
    analyze_complexity, extract_metrics, extract_variables, validate, Engine, EngineConfig, Rule,
};
pub use error::{BuildError, RuntimeError, StreamError};
pub use verdict::{Aggregate, Verdict};
