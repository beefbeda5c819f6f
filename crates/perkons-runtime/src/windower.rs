//! Event-time tumbling windows with a wall-clock reorder buffer
//!
//! Transforms one routed sub-stream into a stream of inner streams, one per
//! tumbling window. Incoming items accumulate in a reorder buffer that is
//! flushed on a fixed wall-clock interval; each flush stable-sorts the batch
//! by event time and routes every item to the window whose id is
//! `event_time / window_duration` (euclidean division, so the grid is exact
//! for negative timestamps too).
//!
//! Only one window is live at a time: opening a window completes the
//! previous one, even if stragglers for it might still arrive. Items whose
//! window is older than the newest opened window are dropped; the reorder
//! buffer exists to absorb the usual amount of jitter. Windows are never
//! re-opened.

use crate::error::StreamError;
use chrono::{DateTime, Duration};
use perkons_core::Period;
use rustc_hash::FxHashMap;
use std::time::Duration as StdDuration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, warn};

/// One tumbling window: its id on the window grid, the aligned period it
/// covers, and the stream of items that fall inside it. The item stream
/// completes when the window closes.
pub struct Window<T> {
    pub id: i64,
    pub period: Period,
    pub items: mpsc::Receiver<T>,
}

/// Spawn a windower over `input`.
///
/// `event_time` maps an item to its event-time in milliseconds since the
/// Unix epoch. `window` and `reorder` must be positive. Returns the outer
/// window stream and the task handle; aborting the handle stops the flush
/// timer and drops all in-flight windows.
pub fn spawn<T, F>(
    input: broadcast::Receiver<Result<T, StreamError>>,
    window: Duration,
    reorder: StdDuration,
    capacity: usize,
    event_time: F,
) -> (
    mpsc::Receiver<Result<Window<T>, StreamError>>,
    JoinHandle<()>,
)
where
    T: Clone + Send + 'static,
    F: Fn(&T) -> i64 + Send + 'static,
{
    assert!(
        window.num_milliseconds() > 0,
        "window duration must be at least one millisecond"
    );
    assert!(!reorder.is_zero(), "reorder interval must be positive");

    let (outer_tx, outer_rx) = mpsc::channel(capacity.max(1));
    let handle = tokio::spawn(run(input, window, reorder, capacity, event_time, outer_tx));
    (outer_rx, handle)
}

async fn run<T, F>(
    mut input: broadcast::Receiver<Result<T, StreamError>>,
    window: Duration,
    reorder: StdDuration,
    capacity: usize,
    event_time: F,
    outer: mpsc::Sender<Result<Window<T>, StreamError>>,
) where
    T: Clone + Send + 'static,
    F: Fn(&T) -> i64 + Send + 'static,
{
    let mut state = Windower {
        window_ms: window.num_milliseconds(),
        window,
        event_time,
        capacity,
        open: FxHashMap::default(),
        latest: None,
        outer,
    };
    let mut buffer: Vec<T> = Vec::new();
    let mut flush = time::interval_at(time::Instant::now() + reorder, reorder);
    flush.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            message = input.recv() => match message {
                Ok(Ok(item)) => buffer.push(item),
                Ok(Err(error)) => {
                    // Terminal: the in-flight reorder buffer is discarded.
                    warn!(%error, "sub-stream failed, closing windows");
                    state.open.clear();
                    let _ = state.outer.send(Err(error)).await;
                    return;
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "sub-stream lagged, samples lost");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    state.flush(&mut buffer).await;
                    debug!("sub-stream completed, closing windows");
                    return;
                }
            },
            _ = flush.tick() => {
                if !state.flush(&mut buffer).await {
                    return;
                }
            }
        }
    }
}

struct Windower<T, F> {
    window_ms: i64,
    window: Duration,
    event_time: F,
    capacity: usize,
    open: FxHashMap<i64, mpsc::Sender<T>>,
    latest: Option<i64>,
    outer: mpsc::Sender<Result<Window<T>, StreamError>>,
}

impl<T, F> Windower<T, F>
where
    T: Send + 'static,
    F: Fn(&T) -> i64,
{
    /// Sort the batch by event time and route every item. Returns `false`
    /// once the downstream subscriber is gone.
    async fn flush(&mut self, buffer: &mut Vec<T>) -> bool {
        if buffer.is_empty() {
            return true;
        }
        // Stable sort keeps arrival order for identical event times.
        buffer.sort_by_key(|item| (self.event_time)(item));
        for item in buffer.drain(..) {
            let wid = (self.event_time)(&item).div_euclid(self.window_ms);
            let sender = match self.latest {
                Some(last) if wid < last => {
                    debug!(window = wid, "late sample for closed window dropped");
                    continue;
                }
                Some(last) if wid == last => match self.open.get(&wid) {
                    Some(tx) => tx.clone(),
                    None => continue,
                },
                _ => match self.open_window(wid).await {
                    Some(tx) => tx,
                    None => return false,
                },
            };
            let _ = sender.send(item).await;
        }
        true
    }

    /// Open the window for `wid`, completing the previous one. Returns
    /// `None` once the downstream subscriber is gone.
    async fn open_window(&mut self, wid: i64) -> Option<mpsc::Sender<T>> {
        if let Some(previous) = self.latest.take() {
            self.open.remove(&previous);
            debug!(window = previous, "window completed");
        }
        let (tx, rx) = mpsc::channel(self.capacity.max(1));
        let start = DateTime::UNIX_EPOCH + Duration::milliseconds(wid * self.window_ms);
        let period = Period::new(start, start + self.window);
        self.open.insert(wid, tx.clone());
        self.latest = Some(wid);
        debug!(window = wid, %period, "window opened");
        let handle = Window {
            id: wid,
            period,
            items: rx,
        };
        if self.outer.send(Ok(handle)).await.is_err() {
            return None;
        }
        Some(tx)
    }
}
