//! Transport of requests to the cloud.

use std::time::Instant;

use serde_json::Value;

use crate::error::CloudError;
use crate::metrics;
use crate::models::SessionConfig;
use crate::request::RequestDescriptor;

/// Transport trait.
///
/// Defines how a single request is sent and its JSON response decoded. Caching, concurrency
/// limits and retries are not the transport's concern.
///
/// # Methods
/// * `send`: Send a request and decode the response.
pub trait Transport {
    /// Send a request and return the decoded JSON response.
    ///
    /// A non-success status is an error.
    ///
    /// # Arguments
    ///
    /// * `request`: Request to send
    fn send(
        &self,
        request: &RequestDescriptor,
    ) -> impl std::future::Future<Output = Result<Value, CloudError>>;
}

/// HTTP transport.
///
/// Implements [Transport] using [reqwest].
#[derive(Debug)]
pub struct HttpTransport {
    reqwest_client: reqwest::Client,
    /// Value of the `Authorization` header, if authenticated.
    authorization: Option<String>,
}

impl HttpTransport {
    /// Create a new HTTP transport.
    ///
    /// # Arguments
    ///
    /// * `config`: Session configuration providing the token and TLS settings
    pub fn new(config: &SessionConfig) -> Result<Self, CloudError> {
        if !config.verify {
            tracing::warn!(
                "TLS certificate verification is disabled for {}",
                config.domain
            );
        }
        let reqwest_client = reqwest::Client::builder()
            .danger_accept_invalid_certs(!config.verify)
            .build()?;
        let authorization = config
            .token
            .as_ref()
            .map(|token| format!("{} {}", config.token_type, token));
        Ok(Self {
            reqwest_client,
            authorization,
        })
    }
}

impl Transport for HttpTransport {
    /// Send a request and return the decoded JSON response.
    ///
    /// # Arguments
    ///
    /// * `request`: Request to send
    #[tracing::instrument(level = "DEBUG", skip(self, request), fields(request = %request))]
    async fn send(&self, request: &RequestDescriptor) -> Result<Value, CloudError> {
        let url = request.cache_key();
        // Prepare a GET or a POST with a JSON body
        let (method, builder) = match request.body() {
            Some(body) => ("POST", self.reqwest_client.post(&url).json(body)),
            None => ("GET", self.reqwest_client.get(&url)),
        };
        let builder = match (&self.authorization, request.authenticate()) {
            (Some(authorization), true) => {
                builder.header(reqwest::header::AUTHORIZATION, authorization)
            }
            _ => builder,
        };
        let builder = request
            .headers()
            .iter()
            .fold(builder, |builder, (name, value)| builder.header(name, value));
        // Send the request
        let start = Instant::now();
        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CloudError::HttpStatus { url, status });
        }
        let body = response.bytes().await?;
        metrics::record_request(method, start.elapsed());
        serde_json::from_slice(&body).map_err(|source| CloudError::MalformedPayload { url, source })
    }
}
