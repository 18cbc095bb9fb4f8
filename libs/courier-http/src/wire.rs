//! Transport-level request and response values.

use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// How a request interacts with HTTP caches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
    /// Let the protocol's caching rules decide
    #[default]
    UseProtocolCachePolicy,
    /// Always revalidate with the origin
    ReloadIgnoringCacheData,
    /// Accept stale cached data, loading only on a miss
    ReturnCacheDataElseLoad,
    /// Only ever answer from cache
    ReturnCacheDataDontLoad,
}

impl CachePolicy {
    /// `Cache-Control` request directive expressing this policy, if any
    #[must_use]
    pub fn request_directive(self) -> Option<HeaderValue> {
        match self {
            Self::UseProtocolCachePolicy => None,
            Self::ReloadIgnoringCacheData => Some(HeaderValue::from_static("no-cache")),
            Self::ReturnCacheDataElseLoad => Some(HeaderValue::from_static("max-stale")),
            Self::ReturnCacheDataDontLoad => Some(HeaderValue::from_static("only-if-cached")),
        }
    }
}

/// Fully resolved request handed to a [`Transport`](crate::Transport)
#[derive(Debug, Clone, PartialEq)]
pub struct WireRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub cache_policy: CachePolicy,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResponseMetadata {
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// URI the response was received for
    pub uri: Uri,
}

/// Status, headers and fully buffered body of a response
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseEnvelope {
    pub metadata: ResponseMetadata,
    pub body: Bytes,
}

impl ResponseEnvelope {
    #[must_use]
    pub fn new(status: StatusCode, headers: HeaderMap, uri: Uri, body: impl Into<Bytes>) -> Self {
        Self {
            metadata: ResponseMetadata {
                status,
                headers,
                uri,
            },
            body: body.into(),
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.metadata.status
    }
}

/// Classification of a failed exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum FailureKind {
    /// 3xx that was not followed
    Redirection,
    /// 4xx
    ClientError(StatusCode),
    /// 5xx
    ServerError(StatusCode),
    Cancelled,
    TimedOut,
    /// Connection could not be established (DNS, refused, TLS handshake)
    NoConnectivity,
    Unknown,
}

impl FailureKind {
    /// Failure kind for a final response status, `None` for 2xx
    #[must_use]
    pub fn from_status(status: StatusCode) -> Option<Self> {
        if status.is_success() {
            None
        } else if status.is_redirection() {
            Some(Self::Redirection)
        } else if status.is_client_error() {
            Some(Self::ClientError(status))
        } else if status.is_server_error() {
            Some(Self::ServerError(status))
        } else {
            Some(Self::Unknown)
        }
    }

    #[must_use]
    pub fn status(self) -> Option<StatusCode> {
        match self {
            Self::ClientError(status) | Self::ServerError(status) => Some(status),
            _ => None,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Redirection => f.write_str("unfollowed redirection"),
            Self::ClientError(status) => write!(f, "client error {status}"),
            Self::ServerError(status) => write!(f, "server error {status}"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::TimedOut => f.write_str("timed out"),
            Self::NoConnectivity => f.write_str("no connectivity"),
            Self::Unknown => f.write_str("unknown failure"),
        }
    }
}

/// A failed exchange: what went wrong, what was sent and what came back
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind} for {} {}", .request.method, .request.uri)]
pub struct TransportFailure {
    pub kind: FailureKind,
    pub request: WireRequest,
    pub response: Option<ResponseEnvelope>,
    #[source]
    pub source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl TransportFailure {
    #[must_use]
    pub fn new(kind: FailureKind, request: WireRequest) -> Self {
        Self {
            kind,
            request,
            response: None,
            source: None,
        }
    }

    /// Failure for a non-2xx response, classified from its status
    #[must_use]
    pub fn from_response(request: WireRequest, response: ResponseEnvelope) -> Self {
        let kind = FailureKind::from_status(response.status()).unwrap_or(FailureKind::Unknown);
        Self {
            kind,
            request,
            response: Some(response),
            source: None,
        }
    }

    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        self.response
            .as_ref()
            .map(ResponseEnvelope::status)
            .or_else(|| self.kind.status())
    }
}
