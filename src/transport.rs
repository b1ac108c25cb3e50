//! HTTP capability consumed by the backends.
//!
//! Backends never talk to `reqwest` directly. They build [`ApiRequest`]
//! values and hand them to a [`Transport`], which lets tests replay scripted
//! responses without a network.

use std::collections::BTreeMap;
use std::sync::LazyLock;
use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::error::ClusterError;
use crate::service::ServiceFuture;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = concat!("flotilla/", env!("CARGO_PKG_VERSION"));

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .user_agent(USER_AGENT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

/// HTTP verbs used by the backends.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Method {
    /// `GET`
    Get,
    /// `POST`
    Post,
    /// `PUT`
    Put,
    /// `PATCH`
    Patch,
    /// `DELETE`
    Delete,
}

impl Method {
    const fn to_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Put => reqwest::Method::PUT,
            Self::Patch => reqwest::Method::PATCH,
            Self::Delete => reqwest::Method::DELETE,
        }
    }
}

/// A single backend call.
#[derive(Clone, Debug, PartialEq)]
pub struct ApiRequest {
    /// Operation name used in error messages.
    pub action: String,
    /// HTTP verb.
    pub method: Method,
    /// Absolute URL.
    pub url: String,
    /// Extra request headers.
    pub headers: Vec<(String, String)>,
    /// JSON body, if any.
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    /// Starts a request without headers or body.
    #[must_use]
    pub fn new(action: impl Into<String>, method: Method, url: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// Adds a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets a JSON body.
    #[must_use]
    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Looks up a header value, ignoring case.
    #[must_use]
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// A backend response with the body fully read.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ApiResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers keyed by lower-case name.
    pub headers: BTreeMap<String, String>,
    /// Raw body text.
    pub body: String,
}

impl ApiResponse {
    /// Builds a response with a body and no headers.
    #[must_use]
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    /// Adds a header; the name is stored lower-cased.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Returns `true` for 2xx statuses.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Looks up a header value, ignoring case.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Decodes the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::Decode`] when the body does not match `T`.
    pub fn json<T: DeserializeOwned>(&self, action: &str) -> Result<T, ClusterError> {
        serde_json::from_str(&self.body).map_err(|err| ClusterError::Decode {
            action: action.to_owned(),
            message: err.to_string(),
        })
    }
}

/// Sends backend requests.
pub trait Transport: Send + Sync {
    /// Sends a request and returns the response whatever its status.
    ///
    /// Only failures to reach the backend are errors; status classification
    /// is left to the caller.
    fn send(&self, request: ApiRequest) -> ServiceFuture<'_, ApiResponse>;
}

/// [`Transport`] backed by a shared `reqwest` client.
#[derive(Clone, Copy, Debug, Default)]
pub struct HttpTransport;

impl Transport for HttpTransport {
    fn send(&self, request: ApiRequest) -> ServiceFuture<'_, ApiResponse> {
        Box::pin(async move {
            let transport_error = |err: &reqwest::Error| ClusterError::Transport {
                action: request.action.clone(),
                message: err.to_string(),
            };

            let mut builder = HTTP_CLIENT.request(request.method.to_reqwest(), &request.url);
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            if let Some(body) = &request.body {
                builder = builder.json(body);
            }

            tracing::debug!(action = %request.action, url = %request.url, "sending backend request");
            let response = builder.send().await.map_err(|err| transport_error(&err))?;
            let status = response.status().as_u16();
            let headers = response
                .headers()
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|text| (name.as_str().to_ascii_lowercase(), text.to_owned()))
                })
                .collect();
            let body = response.text().await.map_err(|err| transport_error(&err))?;
            tracing::debug!(action = %request.action, status, "backend responded");

            Ok(ApiResponse {
                status,
                headers,
                body,
            })
        })
    }
}
