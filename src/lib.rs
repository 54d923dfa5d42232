//! This crate provides the data access and aggregation engine of an IOTile.cloud analytics
//! client. It pulls device telemetry from the cloud's paginated REST API with many requests in
//! flight at once, and reduces dense time series to compact min/max envelopes for plotting.
//!
//! The engine has two halves.
//!
//! * A parallel fetch engine. [session::CloudSession] fans out independent requests through a
//!   [dispatcher::Dispatcher], bounded by a shared [resource_manager::ResourceManager], and
//!   returns results in submission order. Responses are memoized per cloud domain in a
//!   [cache::CacheRegistry] that is invalidated when a different user logs in.
//! * A numeric envelope. [envelope::envelope] bins `(x, y)` points over a domain and reports the
//!   minimum and maximum of each bin, interpolating empty bins. [envelope::EnvelopeState] does the
//!   same incrementally.
//!
//! It is built on top of a number of open source components.
//!
//! * [Tokio](tokio), the most popular asynchronous Rust runtime.
//! * [reqwest] performs HTTP requests against the cloud API.
//! * [Serde](serde) performs (de)serialisation of JSON response data.
//! * [ndarray] provides [NumPy](https://numpy.org)-like n-dimensional arrays used in numerical
//!   computation, with [rayon] to process many arrays in parallel.

pub mod array;
pub mod blocking;
pub mod cache;
pub mod channel;
pub mod cli;
pub mod dispatcher;
pub mod domain;
pub mod envelope;
pub mod error;
pub mod metrics;
pub mod models;
pub mod progress;
pub mod request;
pub mod resource_manager;
pub mod session;
#[cfg(test)]
pub mod test_utils;
pub mod tracing;
pub mod transport;
