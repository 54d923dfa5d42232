//! Error handling.

use ndarray::ShapeError;
use serde::{Deserialize, Serialize};
use std::error::Error;
use thiserror::Error;
use tokio::sync::AcquireError;
use tracing::{event, Level};

use crate::domain::Domain;

/// IOTile analytics error type
///
/// This type encapsulates the various errors that may occur while fetching from the cloud or
/// aggregating data. Each variant belongs to one [ErrorKind].
#[derive(Debug, Error)]
pub enum CloudError {
    /// More than one device matches an external id
    #[error("more than one device has external id {external_id}: {slugs:?}")]
    AmbiguousDevice {
        external_id: String,
        slugs: Vec<String>,
    },

    /// Two argument lists that must be parallel have different lengths
    #[error("{what} has {actual} entries but {expected} were expected")]
    ArgumentMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// One or more requests in a batch failed
    #[error("{failed} of {total} requests failed, first failure at index {index} ({request})")]
    BatchFailed {
        failed: usize,
        total: usize,
        index: usize,
        request: String,
        #[source]
        source: Box<CloudError>,
    },

    /// Session configuration failed validation
    #[error("session configuration is not valid")]
    ConfigValidation(#[from] validator::ValidationErrors),

    /// Domain intersection requested over domains that do not overlap
    #[error("not all domains intersect: running intersection {running} and next domain {next}")]
    DisjointDomains { running: Domain, next: Domain },

    /// Attempt to perform an invalid operation on an empty array or list
    #[error("cannot perform {operation} on empty input")]
    EmptyInput { operation: &'static str },

    /// Envelope finished without any data points inside its domain
    #[error("cannot finish an envelope that has no data points within its domain")]
    EmptyEnvelope,

    /// Remote service answered with a non-success status
    #[error("request to {url} failed with status {status}")]
    HttpStatus {
        url: String,
        status: reqwest::StatusCode,
    },

    /// Non-positive bin count
    #[error("invalid bin count {0}, must be a positive number")]
    InvalidBinCount(usize),

    /// Unknown bin marker policy
    #[error("invalid bin mark {0:?}, must be left, right or center")]
    InvalidBinMark(String),

    /// Unknown bin spacing
    #[error("invalid bin spacing {0:?}, must be linear or log")]
    InvalidBinSpacing(String),

    /// Unknown domain combination
    #[error("unknown domain combination {0:?}, must be union or intersection")]
    InvalidCombination(String),

    /// Envelope bounds that cannot be divided into bins
    #[error("invalid envelope domain [{min}, {max}]: {reason}")]
    InvalidDomain {
        min: f64,
        max: f64,
        reason: &'static str,
    },

    /// Page size that cannot paginate a resource
    #[error("invalid page size {0}, must be a positive number")]
    InvalidPageSize(usize),

    /// Cloud object that does not exist
    #[error("no {what} found for {id}")]
    NotFound { what: &'static str, id: String },

    /// Request limit that would never let a request through
    #[error("invalid request limit {0}, must be a positive number")]
    InvalidRequestLimit(usize),

    /// Response body is not valid JSON of the expected shape
    #[error("failed to decode response from {url}")]
    MalformedPayload {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    /// Response body lacks a field required for pagination
    #[error("response from {url} is missing required field {field}")]
    MissingField { url: String, field: &'static str },

    /// Caller supplied a query parameter owned by the pagination logic
    #[error("query parameter {0} is reserved for pagination and cannot be passed explicitly")]
    ReservedParameter(String),

    /// Error building the worker pool runtime
    #[error("failed to start worker pool")]
    Runtime(#[source] std::io::Error),

    /// Error acquiring a semaphore
    #[error("error acquiring resources")]
    SemaphoreAcquireError(#[from] AcquireError),

    /// Error creating an ndarray array from a shape
    #[error("failed to create array from shape")]
    ShapeInvalid(#[from] ShapeError),

    /// Error sending a request or receiving its body
    #[error("error communicating with the remote service")]
    Transport(#[from] reqwest::Error),

    /// Error converting between integer types
    #[error(transparent)]
    TryFromInt(#[from] std::num::TryFromIntError),

    /// NaN found where values must be ordered
    #[error("cannot perform {operation} on data containing NaN")]
    UndefinedOrder { operation: &'static str },

    /// Array with a shape the operation does not accept
    #[error("unsupported array shape {shape:?}, expected {expected}")]
    UnsupportedShape {
        shape: Vec<usize>,
        expected: &'static str,
    },

    /// Cloud identifier with an unknown prefix
    #[error("invalid source type for {cloud_id}, must be a project (p--), device (d--) or datablock (b--)")]
    UnsupportedSource { cloud_id: String },

    /// Error parsing a URL
    #[error("invalid URL")]
    Url(#[from] url::ParseError),
}

/// Broad classification of a [CloudError].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// The remote call itself failed.
    Transport,
    /// The remote call succeeded but its body could not be used.
    MalformedPayload,
    /// The caller passed invalid arguments. Raised before any I/O or computation.
    CallerMisuse,
}

impl CloudError {
    /// Return the class of this error.
    ///
    /// A batch failure takes the class of the failure that caused it.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CloudError::BatchFailed { source, .. } => source.kind(),

            CloudError::HttpStatus { .. }
            | CloudError::Runtime(_)
            | CloudError::SemaphoreAcquireError(_)
            | CloudError::Transport(_)
            | CloudError::TryFromInt(_) => ErrorKind::Transport,

            CloudError::MalformedPayload { .. } | CloudError::MissingField { .. } => {
                ErrorKind::MalformedPayload
            }

            CloudError::AmbiguousDevice { .. }
            | CloudError::ArgumentMismatch { .. }
            | CloudError::ConfigValidation(_)
            | CloudError::DisjointDomains { .. }
            | CloudError::EmptyInput { .. }
            | CloudError::EmptyEnvelope
            | CloudError::InvalidBinCount(_)
            | CloudError::InvalidBinMark(_)
            | CloudError::InvalidBinSpacing(_)
            | CloudError::InvalidCombination(_)
            | CloudError::InvalidDomain { .. }
            | CloudError::InvalidPageSize(_)
            | CloudError::InvalidRequestLimit(_)
            | CloudError::NotFound { .. }
            | CloudError::ReservedParameter(_)
            | CloudError::ShapeInvalid(_)
            | CloudError::UndefinedOrder { .. }
            | CloudError::UnsupportedShape { .. }
            | CloudError::UnsupportedSource { .. }
            | CloudError::Url(_) => ErrorKind::CallerMisuse,
        }
    }

    /// Whether this error was caused by invalid arguments.
    pub fn is_caller_error(&self) -> bool {
        self.kind() == ErrorKind::CallerMisuse
    }
}

/// A serialisable summary of an error and its chain of causes.
#[derive(Debug, Deserialize, Serialize)]
pub struct ErrorReport {
    /// Main error message
    pub message: String,

    /// Optional list of causes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caused_by: Option<Vec<String>>,
}

impl ErrorReport {
    /// Return a new ErrorReport
    ///
    /// # Arguments
    ///
    /// * `error`: The error that occurred
    pub fn new<E>(error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        let message = error.to_string();
        let mut caused_by = None;
        let mut current = error.source();
        while let Some(source) = current {
            let mut causes: Vec<String> = caused_by.unwrap_or_default();
            causes.push(source.to_string());
            caused_by = Some(causes);
            current = source.source();
        }
        // Remove duplicate entries.
        if let Some(caused_by) = caused_by.as_mut() {
            caused_by.dedup()
        }
        ErrorReport { message, caused_by }
    }
}

impl From<&CloudError> for ErrorReport {
    fn from(error: &CloudError) -> Self {
        Self::new(error)
    }
}

/// Log an error and each of its causes.
///
/// Caller misuse is logged at WARN, everything else at ERROR.
pub fn log_error(error: &CloudError) {
    if error.is_caller_error() {
        event!(Level::WARN, "{}", error);
        return;
    }
    event!(Level::ERROR, "{}", error);
    let mut current = error.source();
    while let Some(source) = current {
        event!(Level::ERROR, "Caused by: {}", source);
        current = source.source();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cloud_error(
        error: CloudError,
        kind: ErrorKind,
        message: &str,
        caused_by: Option<Vec<&'static str>>,
    ) {
        assert_eq!(kind, error.kind());
        let report = ErrorReport::from(&error);
        assert_eq!(message.to_string(), report.message);
        // Map Vec items from str to String
        let caused_by = caused_by.map(|cb| cb.iter().map(|s| s.to_string()).collect());
        assert_eq!(caused_by, report.caused_by);
    }

    #[test]
    fn argument_mismatch() {
        let error = CloudError::ArgumentMismatch {
            what: "per_resource_args",
            expected: 3,
            actual: 2,
        };
        let message = "per_resource_args has 2 entries but 3 were expected";
        test_cloud_error(error, ErrorKind::CallerMisuse, message, None);
    }

    #[test]
    fn batch_failed_takes_kind_of_cause() {
        let error = CloudError::BatchFailed {
            failed: 1,
            total: 4,
            index: 2,
            request: "http://example.com/api/v1/data/?page=3".to_string(),
            source: Box::new(CloudError::HttpStatus {
                url: "http://example.com/api/v1/data/?page=3".to_string(),
                status: reqwest::StatusCode::NOT_FOUND,
            }),
        };
        let message = "1 of 4 requests failed, first failure at index 2 \
                       (http://example.com/api/v1/data/?page=3)";
        let caused_by = Some(vec![
            "request to http://example.com/api/v1/data/?page=3 failed with status 404 Not Found",
        ]);
        test_cloud_error(error, ErrorKind::Transport, message, caused_by);
    }

    #[test]
    fn disjoint_domains() {
        let error = CloudError::DisjointDomains {
            running: Domain::new(0.0, 10.0),
            next: Domain::new(-10.0, -5.0),
        };
        let message =
            "not all domains intersect: running intersection [0, 10] and next domain [-10, -5]";
        test_cloud_error(error, ErrorKind::CallerMisuse, message, None);
    }

    #[test]
    fn invalid_bin_mark() {
        let error = CloudError::InvalidBinMark("middle".to_string());
        let message = "invalid bin mark \"middle\", must be left, right or center";
        test_cloud_error(error, ErrorKind::CallerMisuse, message, None);
    }

    #[test]
    fn malformed_payload() {
        let json_error = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let cause = json_error.to_string();
        let error = CloudError::MalformedPayload {
            url: "http://example.com".to_string(),
            source: json_error,
        };
        assert_eq!(ErrorKind::MalformedPayload, error.kind());
        let report = ErrorReport::from(&error);
        assert_eq!("failed to decode response from http://example.com", report.message);
        assert_eq!(Some(vec![cause]), report.caused_by);
    }

    #[test]
    fn missing_field() {
        let error = CloudError::MissingField {
            url: "http://example.com".to_string(),
            field: "count",
        };
        let message = "response from http://example.com is missing required field count";
        test_cloud_error(error, ErrorKind::MalformedPayload, message, None);
    }

    #[tokio::test]
    async fn semaphore_acquire_error() {
        let sem = tokio::sync::Semaphore::new(1);
        sem.close();
        let error = CloudError::SemaphoreAcquireError(sem.acquire().await.unwrap_err());
        let message = "error acquiring resources";
        let caused_by = Some(vec!["semaphore closed"]);
        test_cloud_error(error, ErrorKind::Transport, message, caused_by);
    }

    #[test]
    fn shape_error() {
        let error =
            CloudError::ShapeInvalid(ShapeError::from_kind(ndarray::ErrorKind::OutOfBounds));
        let message = "failed to create array from shape";
        let caused_by = Some(vec!["ShapeError/OutOfBounds: out of bounds indexing"]);
        test_cloud_error(error, ErrorKind::CallerMisuse, message, caused_by);
    }

    #[test]
    fn try_from_int_error() {
        let error = CloudError::TryFromInt(u8::try_from(-1_i8).unwrap_err());
        let message = "out of range integral type conversion attempted";
        test_cloud_error(error, ErrorKind::Transport, message, None);
    }

    #[test]
    fn unsupported_source() {
        let error = CloudError::UnsupportedSource {
            cloud_id: "x--1234".to_string(),
        };
        let message = "invalid source type for x--1234, must be a project (p--), \
                       device (d--) or datablock (b--)";
        test_cloud_error(error, ErrorKind::CallerMisuse, message, None);
    }
}
