//! Session configuration and decoded response types

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::Display;
use url::Url;
use validator::{Validate, ValidationError};

use crate::error::CloudError;

/// Default IOTile.cloud server
pub const DEFAULT_DOMAIN: &str = "https://iotile.cloud";

/// Default maximum number of requests in flight
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Default page size for paginated fetches
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Kind of authentication token
#[derive(Clone, Copy, Debug, Default, Deserialize, Display, PartialEq, Eq, Serialize)]
pub enum TokenType {
    /// Short lived user token
    #[default]
    #[serde(rename = "jwt")]
    #[strum(serialize = "jwt")]
    Jwt,
    /// Permanent machine token
    #[serde(rename = "a-jwt")]
    #[strum(serialize = "a-jwt")]
    MachineJwt,
}

impl std::str::FromStr for TokenType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "jwt" => Ok(Self::Jwt),
            "a-jwt" => Ok(Self::MachineJwt),
            _ => Err(format!("unknown token type {:?}, must be jwt or a-jwt", s)),
        }
    }
}

/// Who is logged into a cloud domain.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
pub struct Identity {
    /// User name, absent when logging in with a bare token
    pub user: Option<String>,
}

impl Identity {
    /// An identity for a named user.
    pub fn user(name: impl Into<String>) -> Self {
        Self {
            user: Some(name.into()),
        }
    }

    /// An anonymous token-only identity.
    pub fn token_only() -> Self {
        Self { user: None }
    }
}

/// Cloud session configuration
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize, Validate)]
#[serde(deny_unknown_fields)]
#[validate(schema(function = "validate_session_config"))]
pub struct SessionConfig {
    /// Base URL of the cloud server, without the API path
    pub domain: Url,
    /// Authentication token
    pub token: Option<String>,
    /// Type of the authentication token
    #[serde(default)]
    pub token_type: TokenType,
    /// User the token belongs to
    pub user: Option<String>,
    /// Maximum number of requests in flight
    #[validate(range(min = 1, message = "concurrency must be greater than 0"))]
    pub concurrency: usize,
    /// Whether to verify the server's TLS certificate
    pub verify: bool,
    /// Whether responses are cached
    pub cache_enabled: bool,
}

impl SessionConfig {
    /// Return a configuration for `domain` with default settings.
    pub fn new(domain: Url) -> Self {
        Self {
            domain,
            token: None,
            token_type: TokenType::default(),
            user: None,
            concurrency: DEFAULT_CONCURRENCY,
            verify: true,
            cache_enabled: true,
        }
    }

    /// Domain as a cache registry key, without a trailing slash.
    pub fn domain_key(&self) -> String {
        self.domain.as_str().trim_end_matches('/').to_string()
    }

    /// Identity used for cache invalidation.
    pub fn identity(&self) -> Identity {
        Identity {
            user: self.user.clone(),
        }
    }

    /// Full URL of an API resource path such as `stream/s--0001/data/`.
    pub fn api_url(&self, resource: &str) -> String {
        format!(
            "{}/api/v1/{}",
            self.domain_key(),
            resource.trim_start_matches('/')
        )
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        // The default domain is a valid URL literal.
        Self::new(Url::parse(DEFAULT_DOMAIN).expect("default domain is a valid URL"))
    }
}

/// Validate a session configuration
fn validate_session_config(config: &SessionConfig) -> Result<(), ValidationError> {
    match config.domain.scheme() {
        "http" | "https" => (),
        scheme => {
            let mut error = ValidationError::new("Domain must be an http or https URL");
            error.add_param("scheme".into(), &scheme);
            return Err(error);
        }
    }
    if config.token.as_deref() == Some("") {
        return Err(ValidationError::new("Token must not be empty"));
    }
    Ok(())
}

/// A decoded page of a paginated resource.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Page {
    /// Total number of records across all pages
    pub count: usize,
    /// Records on this page
    pub results: Vec<Value>,
    /// URL of the next page
    #[serde(default)]
    pub next: Option<String>,
    /// URL of the previous page
    #[serde(default)]
    pub previous: Option<String>,
}

impl Page {
    /// Decode a page from a JSON payload.
    ///
    /// # Arguments
    ///
    /// * `url`: URL the payload was fetched from, for error reporting
    /// * `payload`: Decoded JSON body
    pub fn from_payload(url: &str, payload: Value) -> Result<Self, CloudError> {
        let object = payload.as_object().ok_or_else(|| CloudError::MissingField {
            url: url.to_string(),
            field: "count",
        })?;
        if !object.contains_key("count") {
            return Err(CloudError::MissingField {
                url: url.to_string(),
                field: "count",
            });
        }
        if !object.contains_key("results") {
            return Err(CloudError::MissingField {
                url: url.to_string(),
                field: "results",
            });
        }
        serde_json::from_value(payload).map_err(|source| CloudError::MalformedPayload {
            url: url.to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    fn test_config() -> SessionConfig {
        SessionConfig::new(Url::parse("https://iotile.cloud/").unwrap())
    }

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        config.validate().unwrap();
        assert_eq!(10, config.concurrency);
        assert_eq!(TokenType::Jwt, config.token_type);
        assert!(config.verify);
        assert!(config.cache_enabled);
    }

    #[test]
    fn test_api_url() {
        let config = test_config();
        assert_eq!("https://iotile.cloud", config.domain_key());
        assert_eq!(
            "https://iotile.cloud/api/v1/stream/s--0001/data/",
            config.api_url("/stream/s--0001/data/")
        );
        assert_eq!(
            "https://iotile.cloud/api/v1/event/",
            config.api_url("event/")
        );
    }

    #[test]
    fn test_zero_concurrency() {
        let config = SessionConfig {
            concurrency: 0,
            ..test_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_scheme() {
        let config = SessionConfig::new(Url::parse("ftp://iotile.cloud").unwrap());
        let err = CloudError::from(config.validate().unwrap_err());
        assert!(err.is_caller_error());
    }

    #[test]
    fn test_empty_token() {
        let config = SessionConfig {
            token: Some(String::new()),
            ..test_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_token_type() {
        assert_eq!("jwt", TokenType::Jwt.to_string());
        assert_eq!("a-jwt", TokenType::MachineJwt.to_string());
        assert_eq!(TokenType::MachineJwt, "a-jwt".parse().unwrap());
        assert!("bearer".parse::<TokenType>().is_err());
    }

    #[test]
    fn test_deserialize_config() {
        let config: SessionConfig = serde_json::from_value(json!({
            "domain": "http://localhost:8000",
            "token": "abc",
            "token_type": "a-jwt",
            "user": null,
            "concurrency": 4,
            "verify": false,
            "cache_enabled": true
        }))
        .unwrap();
        config.validate().unwrap();
        assert_eq!(TokenType::MachineJwt, config.token_type);
        assert_eq!(Identity::token_only(), config.identity());
    }

    #[test]
    fn test_page_from_payload() {
        let page = Page::from_payload(
            "http://localhost",
            json!({"count": 2, "next": null, "results": [{"a": 1}, {"a": 2}]}),
        )
        .unwrap();
        assert_eq!(2, page.count);
        assert_eq!(2, page.results.len());
        assert_eq!(None, page.next);
    }

    #[test]
    fn test_page_missing_count() {
        let err = Page::from_payload("http://localhost", json!({"results": []})).unwrap_err();
        assert!(matches!(err, CloudError::MissingField { field: "count", .. }));
    }

    #[test]
    fn test_page_missing_results() {
        let err = Page::from_payload("http://localhost", json!({"count": 3})).unwrap_err();
        assert!(matches!(
            err,
            CloudError::MissingField {
                field: "results",
                ..
            }
        ));
    }

    #[test]
    fn test_page_bad_count() {
        let err =
            Page::from_payload("http://localhost", json!({"count": "x", "results": []})).unwrap_err();
        assert!(matches!(err, CloudError::MalformedPayload { .. }));
    }

    #[test]
    fn test_page_not_object() {
        let err = Page::from_payload("http://localhost", json!([1, 2])).unwrap_err();
        assert!(matches!(err, CloudError::MissingField { .. }));
    }
}
