//! Utilities for tests: a scripted in-memory transport and progress counter.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use hashbrown::HashMap;
use rand::Rng;
use serde_json::{json, Value};

use crate::error::CloudError;
use crate::progress::ProgressSink;
use crate::request::{QueryValue, RequestDescriptor};
use crate::transport::Transport;

/// Scripted response for a URL.
#[derive(Clone, Debug)]
enum Script {
    /// Fixed JSON body
    Body(Value),
    /// Failure status
    Status(reqwest::StatusCode),
    /// Records served as pages using the `page` and `page_size` query parameters
    Pages(Vec<Value>),
}

/// An in-memory [Transport] that serves scripted responses.
///
/// Responses are keyed by URL without query string. Every call is recorded, along with the
/// largest number of calls that were in flight at once.
#[derive(Debug, Default)]
pub(crate) struct MockTransport {
    scripts: Mutex<HashMap<String, Script>>,
    failures: Mutex<HashMap<String, reqwest::StatusCode>>,
    requests: Mutex<Vec<String>>,
    max_latency_ms: u64,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Delay each response by a random time up to `max_latency_ms`.
    pub(crate) fn with_random_latency(mut self, max_latency_ms: u64) -> Self {
        self.max_latency_ms = max_latency_ms;
        self
    }

    pub(crate) fn respond(&self, url: &str, body: Value) {
        self.script(url, Script::Body(body));
    }

    pub(crate) fn fail(&self, url: &str, status: reqwest::StatusCode) {
        self.script(url, Script::Status(status));
    }

    /// Fail one exact request, query string included.
    pub(crate) fn fail_request(&self, full_url: &str, status: reqwest::StatusCode) {
        self.failures
            .lock()
            .unwrap()
            .insert(full_url.to_string(), status);
    }

    pub(crate) fn paginate(&self, url: &str, records: Vec<Value>) {
        self.script(url, Script::Pages(records));
    }

    fn script(&self, url: &str, script: Script) {
        self.scripts.lock().unwrap().insert(url.to_string(), script);
    }

    /// Number of calls made.
    pub(crate) fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Full URLs of the calls made, in call order.
    pub(crate) fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn respond_to(&self, request: &RequestDescriptor) -> Result<Value, CloudError> {
        let url = request.cache_key();
        if let Some(status) = self.failures.lock().unwrap().get(&url) {
            return Err(CloudError::HttpStatus { url, status: *status });
        }
        let script = self.scripts.lock().unwrap().get(request.url()).cloned();
        match script {
            Some(Script::Body(body)) => Ok(body),
            Some(Script::Status(status)) => Err(CloudError::HttpStatus {
                url: request.cache_key(),
                status,
            }),
            Some(Script::Pages(records)) => Ok(page_of(request, &records)),
            None => Err(CloudError::HttpStatus {
                url: request.cache_key(),
                status: reqwest::StatusCode::NOT_FOUND,
            }),
        }
    }
}

fn int_param(request: &RequestDescriptor, key: &str) -> Option<usize> {
    match request.params().get(key) {
        Some(QueryValue::Int(value)) => usize::try_from(*value).ok(),
        Some(QueryValue::Str(value)) => value.parse().ok(),
        None => None,
    }
}

/// Build the page envelope that a paginated resource returns for `request`.
pub(crate) fn page_of(request: &RequestDescriptor, records: &[Value]) -> Value {
    let page = int_param(request, "page").unwrap_or(1);
    let page_size = int_param(request, "page_size").unwrap_or(100);
    let start = (page.saturating_sub(1) * page_size).min(records.len());
    let end = (start + page_size).min(records.len());
    let results = records[start..end].to_vec();
    json!({
        "count": records.len(),
        "next": null,
        "previous": null,
        "results": results,
    })
}

impl Transport for MockTransport {
    async fn send(&self, request: &RequestDescriptor) -> Result<Value, CloudError> {
        self.requests.lock().unwrap().push(request.cache_key());
        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        if self.max_latency_ms > 0 {
            let latency = rand::thread_rng().gen_range(0..=self.max_latency_ms);
            tokio::time::sleep(Duration::from_millis(latency)).await;
        } else {
            tokio::task::yield_now().await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.respond_to(request)
    }
}

/// Counts progress ticks.
#[derive(Debug, Default)]
pub(crate) struct CountingProgress {
    ticks: AtomicUsize,
    total: AtomicUsize,
    finished: AtomicUsize,
}

impl CountingProgress {
    pub(crate) fn ticks(&self) -> usize {
        self.ticks.load(Ordering::SeqCst)
    }

    pub(crate) fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    pub(crate) fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

impl ProgressSink for CountingProgress {
    fn start(&self, total: usize) {
        self.total.store(total, Ordering::SeqCst);
    }

    fn set_total(&self, total: usize) {
        self.total.store(total, Ordering::SeqCst);
    }

    fn advance(&self, delta: usize) {
        self.ticks.fetch_add(delta, Ordering::SeqCst);
    }

    fn finish(&self) {
        self.finished.fetch_add(1, Ordering::SeqCst);
    }
}

/// Records `{"id": i}` for `0..n`.
pub(crate) fn records(n: usize) -> Vec<Value> {
    (0..n).map(|i| json!({ "id": i })).collect()
}
