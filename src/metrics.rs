//! Prometheus metrics for cloud requests and the request cache.

use lazy_static::lazy_static;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
};

lazy_static! {
    // Registry for holding metric state
    pub static ref REGISTRY: Registry = Registry::new();
    // Request counter by HTTP method
    pub static ref OUTGOING_REQUESTS: IntCounterVec = IntCounterVec::new(
        Opts::new("outgoing_requests", "The number of requests sent to the cloud"),
        &["http_method"]
    ).unwrap();
    // Failed request counter by error class
    pub static ref FAILED_REQUESTS: IntCounterVec = IntCounterVec::new(
        Opts::new("failed_requests", "The number of requests that failed"),
        &["kind"]
    ).unwrap();
    // Request cache hit counter
    pub static ref CACHE_HITS: IntCounter = IntCounter::new(
        "request_cache_hits", "The number of requests served from the cache"
    ).unwrap();
    // Request cache miss counter
    pub static ref CACHE_MISSES: IntCounter = IntCounter::new(
        "request_cache_misses", "The number of cache lookups that missed"
    ).unwrap();
    // Request histogram by response time
    pub static ref REQUEST_TIME_COLLECTOR: HistogramVec = HistogramVec::new(
        HistogramOpts{
            common_opts: Opts::new("request_time", "The time taken for each cloud request"),
            buckets: prometheus::DEFAULT_BUCKETS.to_vec(), // Change buckets here if desired
        },
        &["http_method"],
    ).unwrap();
}

/// Register all metrics with [REGISTRY].
///
/// Only needs calling once. Metrics are updated whether or not they are registered.
pub fn register_metrics() -> Result<(), prometheus::Error> {
    REGISTRY.register(Box::new(OUTGOING_REQUESTS.clone()))?;
    REGISTRY.register(Box::new(FAILED_REQUESTS.clone()))?;
    REGISTRY.register(Box::new(CACHE_HITS.clone()))?;
    REGISTRY.register(Box::new(CACHE_MISSES.clone()))?;
    REGISTRY.register(Box::new(REQUEST_TIME_COLLECTOR.clone()))?;
    Ok(())
}

/// Return the registered metrics in the Prometheus text format.
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&REGISTRY.gather(), &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

/// Record a completed request.
pub fn record_request(method: &str, latency: std::time::Duration) {
    OUTGOING_REQUESTS.with_label_values(&[method]).inc();
    REQUEST_TIME_COLLECTOR
        .with_label_values(&[method])
        .observe(latency.as_secs_f64());
}

/// Record a failed request, labelled by error class.
pub fn record_failure(kind: crate::error::ErrorKind) {
    FAILED_REQUESTS
        .with_label_values(&[&format!("{:?}", kind)])
        .inc();
}
