//! Error taxonomy shared by the client, the cache, and every backend.

use std::fmt;

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::account::CloudType;

/// HTTP status returned by backends that consider the client out of date.
pub const STATUS_NOT_ACCEPTABLE: u16 = 406;

/// The kind of remote object an error refers to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResourceKind {
    /// A provisioned cluster.
    Cluster,
    /// A cluster template (cluster type).
    Template,
    /// Any other backend resource, addressed by request path.
    Resource,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cluster => f.write_str("cluster"),
            Self::Template => f.write_str("template"),
            Self::Resource => f.write_str("resource"),
        }
    }
}

/// Errors raised while orchestrating cluster operations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ClusterError {
    /// Raised when the backend rejects the account credentials.
    #[error("authentication with {backend} failed: {message}")]
    Authentication {
        /// Backend that rejected the credentials.
        backend: CloudType,
        /// Message returned by the backend.
        message: String,
    },
    /// Raised when the backend signals that this client speaks an
    /// incompatible protocol version.
    #[error(
        "{action}: the {backend} API rejected this client as out of date (HTTP {status}); \
         update flotilla to the latest release"
    )]
    BackendProtocol {
        /// Backend that refused the request.
        backend: CloudType,
        /// Operation being attempted.
        action: String,
        /// HTTP status code returned.
        status: u16,
    },
    /// Raised when a token or pattern does not resolve to anything.
    #[error("could not find {kind} '{token}'")]
    NotFound {
        /// Kind of object that was looked up.
        kind: ResourceKind,
        /// Identifier, name, or pattern used for the lookup.
        token: String,
    },
    /// Raised when a token or pattern resolves to more than one candidate.
    #[error("'{pattern}' matches more than one {kind}; use a more specific name or pattern")]
    AmbiguousMatch {
        /// Kind of object that was looked up.
        kind: ResourceKind,
        /// Pattern or name supplied by the caller.
        pattern: String,
    },
    /// Raised when a backend does not implement an operation.
    #[error("{backend} does not support {operation}{}", alternative_hint(.alternative.as_deref()))]
    Unsupported {
        /// Backend that lacks the capability.
        backend: CloudType,
        /// Operation that was requested.
        operation: String,
        /// Supported operation the caller should use instead, if any.
        alternative: Option<String>,
    },
    /// Raised when the account cache cannot be used; operations continue
    /// without persistence.
    #[error("account cache unavailable, continuing without it: {message}")]
    CacheUnavailable {
        /// Reason the cache could not be loaded.
        message: String,
    },
    /// Raised when a credential bundle directory is unsafe or inconsistent.
    #[error("refusing to touch credentials at '{path}': {message}")]
    CredentialState {
        /// Directory involved.
        path: Utf8PathBuf,
        /// Description of the inconsistency.
        message: String,
    },
    /// Raised when the backend cannot be reached.
    #[error("{action}: transport failure: {message}")]
    Transport {
        /// Operation being attempted.
        action: String,
        /// Underlying I/O or HTTP client message.
        message: String,
    },
    /// Raised when the backend returns an unexpected HTTP status.
    #[error("{action}: backend returned HTTP {status}: {message}")]
    Api {
        /// Operation being attempted.
        action: String,
        /// HTTP status code returned.
        status: u16,
        /// Response body or reason phrase.
        message: String,
    },
    /// Raised when a backend response cannot be decoded.
    #[error("{action}: unable to decode backend response: {message}")]
    Decode {
        /// Operation being attempted.
        action: String,
        /// Decoder message.
        message: String,
    },
    /// Raised when the caller supplies an invalid request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// Raised when the backend reports a failure while deleting a cluster.
    #[error("unable to delete cluster '{cluster}', an error occurred while deleting")]
    DeletionFailed {
        /// Cluster name or identifier.
        cluster: String,
    },
    /// Raised when a wait loop passes its deadline.
    #[error("timed out waiting for cluster '{cluster}' to {action}")]
    Timeout {
        /// What the loop was waiting for.
        action: String,
        /// Cluster name or identifier.
        cluster: String,
    },
    /// Raised when local file system access fails.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Operating system error string.
        message: String,
    },
    /// Raised when configuration is incomplete or cannot be parsed.
    #[error("configuration error: {0}")]
    Config(String),
}

fn alternative_hint(alternative: Option<&str>) -> String {
    alternative.map_or_else(String::new, |name| format!("; use '{name}' instead"))
}

impl ClusterError {
    /// Returns `true` when the error means the addressed object does not
    /// exist.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` when the backend rejected the credentials.
    #[must_use]
    pub const fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }

    pub(crate) fn unsupported(
        backend: CloudType,
        operation: &str,
        alternative: Option<&str>,
    ) -> Self {
        Self::Unsupported {
            backend,
            operation: operation.to_owned(),
            alternative: alternative.map(str::to_owned),
        }
    }

    pub(crate) fn io(path: impl Into<Utf8PathBuf>, err: &std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }

    /// Maps a non-success HTTP status onto the error taxonomy.
    ///
    /// `subject` names the object the request addressed so that a 404 can be
    /// reported as a missing cluster or template rather than a bare path.
    #[must_use]
    pub fn from_status(
        backend: CloudType,
        action: &str,
        subject: Option<(ResourceKind, &str)>,
        status: u16,
        body: &str,
    ) -> Self {
        match status {
            401 | 403 => Self::Authentication {
                backend,
                message: non_empty(body, "credentials were rejected"),
            },
            404 => {
                let (kind, token) = subject.unwrap_or((ResourceKind::Resource, action));
                Self::NotFound {
                    kind,
                    token: token.to_owned(),
                }
            }
            STATUS_NOT_ACCEPTABLE => Self::BackendProtocol {
                backend,
                action: action.to_owned(),
                status,
            },
            _ => Self::Api {
                action: action.to_owned(),
                status,
                message: non_empty(body, "no response body"),
            },
        }
    }
}

fn non_empty(body: &str, fallback: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        fallback.to_owned()
    } else {
        trimmed.to_owned()
    }
}
