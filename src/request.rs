//! Request descriptors and their cache signatures.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::form_urlencoded;

/// A query string value.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryValue {
    /// Integer value
    Int(i64),
    /// String value
    Str(String),
}

impl fmt::Display for QueryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(value) => write!(f, "{}", value),
            Self::Str(value) => f.write_str(value),
        }
    }
}

impl From<i64> for QueryValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for QueryValue {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl From<u32> for QueryValue {
    fn from(value: u32) -> Self {
        Self::Int(value.into())
    }
}

impl From<&str> for QueryValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for QueryValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

/// Query arguments, ordered by key.
pub type QueryArgs = BTreeMap<String, QueryValue>;

/// Build [QueryArgs] from a list of key/value pairs.
pub fn query_args<K, V, I>(pairs: I) -> QueryArgs
where
    K: Into<String>,
    V: Into<QueryValue>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// A single remote call: a URL, its query parameters and an optional JSON body.
///
/// Parameters are held in key order, so the query string and therefore the cache key of two
/// descriptors with the same parameters are identical regardless of the order they were added in.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestDescriptor {
    url: String,
    params: QueryArgs,
    headers: BTreeMap<String, String>,
    body: Option<Value>,
    authenticate: bool,
}

impl RequestDescriptor {
    /// Create a GET request for `url`.
    ///
    /// A query string already present in `url` is split off into the request's parameters.
    pub fn get(url: impl Into<String>) -> Self {
        let url = url.into();
        let (url, params) = match url.split_once('?') {
            Some((base, query)) => (
                base.to_string(),
                form_urlencoded::parse(query.as_bytes())
                    .map(|(k, v)| (k.into_owned(), QueryValue::Str(v.into_owned())))
                    .collect(),
            ),
            None => (url, QueryArgs::new()),
        };
        Self {
            url,
            params,
            headers: BTreeMap::new(),
            body: None,
            authenticate: true,
        }
    }

    /// Create a POST request for `url` with a JSON body.
    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self {
            body: Some(body),
            ..Self::get(url)
        }
    }

    /// Add or replace a query parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<QueryValue>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Add or replace several query parameters.
    pub fn with_params(mut self, args: &QueryArgs) -> Self {
        self.params
            .extend(args.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Add or replace an extra request header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Send the request without the session's authorization header.
    pub fn without_auth(mut self) -> Self {
        self.authenticate = false;
        self
    }

    /// Whether the session's authorization header is sent.
    pub fn authenticate(&self) -> bool {
        self.authenticate
    }

    /// URL without query string.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Query parameters.
    pub fn params(&self) -> &QueryArgs {
        &self.params
    }

    /// Extra headers.
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// JSON body, present for POST requests.
    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    /// Whether this is a POST request.
    pub fn is_post(&self) -> bool {
        self.body.is_some()
    }

    /// Whether the response may be served from and stored in the request cache.
    pub fn is_cacheable(&self) -> bool {
        !self.is_post()
    }

    /// The form-urlencoded query string, parameters sorted by key.
    pub fn query_string(&self) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (key, value) in &self.params {
            serializer.append_pair(key, &value.to_string());
        }
        serializer.finish()
    }

    /// The cache key: the full URL including its query string.
    ///
    /// This is also the URL the request is sent to.
    pub fn cache_key(&self) -> String {
        if self.params.is_empty() {
            self.url.clone()
        } else {
            format!("{}?{}", self.url, self.query_string())
        }
    }
}

impl fmt::Display for RequestDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let method = if self.is_post() { "POST" } else { "GET" };
        write!(f, "{} {}", method, self.cache_key())
    }
}
