//! Per-metric sample routing
//!
//! Demultiplexes the single source stream into one hot broadcast subject per
//! metric name. Every condition referencing a metric shares that metric's
//! subject; the router creates at most one subject per distinct name.

use crate::error::StreamError;
use perkons_core::Sample;
use rustc_hash::FxHashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Message type flowing through router subjects.
pub type Routed = Result<Sample, StreamError>;

/// Fans a source stream of samples out to per-metric sub-streams.
pub struct SampleRouter {
    state: Mutex<RouterState>,
    capacity: usize,
}

struct RouterState {
    subjects: FxHashMap<Arc<str>, broadcast::Sender<Routed>>,
    terminated: bool,
}

impl SampleRouter {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(RouterState {
                subjects: FxHashMap::default(),
                terminated: false,
            }),
            capacity,
        })
    }

    fn locked(&self) -> MutexGuard<'_, RouterState> {
        self.state.lock().expect("router mutex poisoned")
    }

    /// Subscribe to the sub-stream for `metric`.
    ///
    /// Idempotent per metric name: the first caller creates the subject,
    /// later callers attach to it. After the source has terminated, an
    /// already-closed receiver is returned.
    pub fn subscribe(&self, metric: &str) -> broadcast::Receiver<Routed> {
        let mut state = self.locked();
        if state.terminated {
            let (tx, rx) = broadcast::channel(self.capacity);
            drop(tx);
            return rx;
        }
        state
            .subjects
            .entry(Arc::from(metric))
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Metric names with a live subject, i.e. the set subscribed so far.
    pub fn subscribed_metrics(&self) -> Vec<Arc<str>> {
        let state = self.locked();
        state.subjects.keys().cloned().collect()
    }

    /// Number of distinct subjects ever created and still live.
    pub fn subject_count(&self) -> usize {
        let state = self.locked();
        state.subjects.len()
    }

    /// Spawn the pump task that drains `source` and routes each sample to
    /// its metric's subject, preserving source order. A source error is
    /// fanned out to every subject exactly once; source completion drops all
    /// subjects so sub-streams observe the close.
    pub fn spawn_pump(self: Arc<Self>, mut source: mpsc::Receiver<Routed>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(message) = source.recv().await {
                match message {
                    Ok(sample) => {
                        let subject = {
                            let state = self.locked();
                            state.subjects.get(sample.metric.as_ref()).cloned()
                        };
                        match subject {
                            // Send only fails with zero receivers; the
                            // subject stays usable for later subscribers.
                            Some(tx) => {
                                let _ = tx.send(Ok(sample));
                            }
                            None => trace!(metric = %sample.metric, "no subscribers, sample dropped"),
                        }
                    }
                    Err(error) => {
                        warn!(%error, "source stream failed, fanning out");
                        let mut state = self.locked();
                        for (_, tx) in state.subjects.drain() {
                            let _ = tx.send(Err(error.clone()));
                        }
                        state.terminated = true;
                        return;
                    }
                }
            }
            debug!("source stream completed");
            let mut state = self.locked();
            state.subjects.clear();
            state.terminated = true;
        })
    }
}
