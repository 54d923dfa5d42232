//! Progress reporting and per-result postprocessing strategies.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use serde_json::Value;

/// Receives progress of a fetch operation.
///
/// `advance` is called once per completed request, from whichever request finishes next.
pub trait ProgressSink: Send + Sync {
    /// The operation is starting with `total` expected steps.
    fn start(&self, _total: usize) {}

    /// The expected number of steps changed.
    fn set_total(&self, _total: usize) {}

    /// `delta` more steps completed.
    fn advance(&self, delta: usize);

    /// The operation finished, successfully or not.
    fn finish(&self) {}
}

/// Ignores progress.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn advance(&self, _delta: usize) {}
}

/// Reports progress through [tracing] events.
///
/// Each step is logged at DEBUG. On completion a summary with the elapsed time is logged at INFO.
#[derive(Debug)]
pub struct TracingProgress {
    message: String,
    started: Instant,
    total: AtomicUsize,
    done: AtomicUsize,
}

impl TracingProgress {
    /// Return a new TracingProgress labelled with `message`.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            started: Instant::now(),
            total: AtomicUsize::new(0),
            done: AtomicUsize::new(0),
        }
    }

    /// Number of completed steps.
    pub fn done(&self) -> usize {
        self.done.load(Ordering::SeqCst)
    }

    /// Expected number of steps.
    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

impl ProgressSink for TracingProgress {
    fn start(&self, total: usize) {
        self.total.store(total, Ordering::SeqCst);
        self.done.store(0, Ordering::SeqCst);
    }

    fn set_total(&self, total: usize) {
        self.total.store(total, Ordering::SeqCst);
    }

    fn advance(&self, delta: usize) {
        let done = self.done.fetch_add(delta, Ordering::SeqCst) + delta;
        tracing::debug!("{}: {}/{}", self.message, done, self.total());
    }

    fn finish(&self) {
        tracing::info!(
            "Operation '{}' took {:.1} seconds",
            self.message,
            self.started.elapsed().as_secs_f64()
        );
    }
}

/// Transforms each result of a batch as it completes.
///
/// Closures of the form `Fn(usize, Value) -> Value` implement this trait, where the first
/// argument is the result's position in the batch.
pub trait Postprocess: Send + Sync {
    /// Transform the payload at position `index`.
    fn apply(&self, index: usize, payload: Value) -> Value;
}

impl<F> Postprocess for F
where
    F: Fn(usize, Value) -> Value + Send + Sync,
{
    fn apply(&self, index: usize, payload: Value) -> Value {
        self(index, payload)
    }
}

/// Returns payloads unchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoPostprocess;

impl Postprocess for NoPostprocess {
    fn apply(&self, _index: usize, payload: Value) -> Value {
        payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn tracing_progress_counts() {
        let progress = TracingProgress::new("Counting");
        progress.start(3);
        progress.advance(1);
        progress.advance(2);
        progress.finish();
        assert_eq!(3, progress.done());
        assert_eq!(3, progress.total());
        progress.set_total(5);
        assert_eq!(5, progress.total());
    }

    #[test]
    fn closure_postprocess() {
        let add_index = |i: usize, mut v: Value| {
            v["index"] = json!(i);
            v
        };
        assert_eq!(json!({"a": 1, "index": 4}), add_index.apply(4, json!({"a": 1})));
        assert_eq!(json!(1), NoPostprocess.apply(4, json!(1)));
    }
}
