use crate::wire::{ResponseEnvelope, TransportFailure};
use http::{HeaderMap, StatusCode};
use std::sync::Arc;
use thiserror::Error;

type SharedError = Arc<dyn std::error::Error + Send + Sync>;

/// Error returned from request execution.
///
/// Cheap to clone so recovery strategies can hand the original error back.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum BackendError {
    /// Transport-level failure (status, timeout, connectivity)
    #[error("Transport failure: {0}")]
    Transport(#[source] Box<TransportFailure>),

    /// A successful response was rejected by the request's validator
    #[error("Response validation failed: {message}")]
    Validation { message: String },

    /// Response body could not be decoded into the target type
    #[error("Failed to decode response as {target}: {source}")]
    Decode {
        /// Rust type name the body was decoded into
        target: &'static str,
        /// Raw response, kept for diagnostics
        response: Box<ResponseEnvelope>,
        #[source]
        source: SharedError,
    },

    /// A preparation strategy failed before the request was sent
    #[error("Request preparation failed: {0}")]
    Preparation(#[source] SharedError),

    /// Execution was cancelled by the caller
    #[error("Request cancelled")]
    Cancelled,

    /// Request or recovery result violated an execution invariant
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl BackendError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Decode failure for target type `T`
    pub fn decode<T: ?Sized>(
        response: ResponseEnvelope,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Decode {
            target: std::any::type_name::<T>(),
            response: Box::new(response),
            source: Arc::new(source),
        }
    }

    pub fn preparation(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Preparation(Arc::new(source))
    }

    #[must_use]
    pub fn transport_failure(&self) -> Option<&TransportFailure> {
        match self {
            Self::Transport(failure) => Some(failure),
            _ => None,
        }
    }

    /// Response status, when the error carries a response
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Transport(failure) => failure.status(),
            Self::Decode { response, .. } => Some(response.status()),
            _ => None,
        }
    }

    /// Headers of the response that caused this error, if any
    #[must_use]
    pub fn response_headers(&self) -> Option<&HeaderMap> {
        match self {
            Self::Transport(failure) => failure
                .response
                .as_ref()
                .map(|response| &response.metadata.headers),
            Self::Decode { response, .. } => Some(&response.metadata.headers),
            _ => None,
        }
    }
}

impl From<TransportFailure> for BackendError {
    fn from(failure: TransportFailure) -> Self {
        Self::Transport(Box::new(failure))
    }
}

/// Failure to construct a transport
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TransportBuildError {
    /// Invalid User-Agent value
    #[error("Invalid header value: {0}")]
    InvalidUserAgent(#[from] http::header::InvalidHeaderValue),

    /// TLS configuration failed
    #[error("TLS error: {0}")]
    Tls(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl From<courier_pinning::PinningError> for TransportBuildError {
    fn from(err: courier_pinning::PinningError) -> Self {
        TransportBuildError::Tls(Box::new(err))
    }
}

impl From<rustls::Error> for TransportBuildError {
    fn from(err: rustls::Error) -> Self {
        TransportBuildError::Tls(Box::new(err))
    }
}
