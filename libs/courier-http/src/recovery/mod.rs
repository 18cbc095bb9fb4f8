//! Recovery and preparation strategies.
//!
//! Strategies work on [`RequestParts`] only, so one strategy list serves
//! every result type.

mod backoff;

pub use backoff::{
    BackoffRecoveryStrategy, BackoffStrategy, ExponentialBackoff, RecoveryPredicate,
    parse_retry_after, retry_on_kinds, retry_on_server_errors, retry_on_status,
};

use crate::descriptor::RequestParts;
use crate::error::BackendError;
use async_trait::async_trait;
use http::HeaderMap;

/// Outcome of a single recovery strategy
#[derive(Debug, Clone)]
pub enum RecoveryDisposition<D> {
    /// The strategy does not handle this error; ask the next one
    NotAttempted,
    /// Stop recovering and return this error
    Failure(BackendError),
    /// Send this request instead
    Retry(D),
}

impl<D> RecoveryDisposition<D> {
    #[must_use]
    pub fn is_not_attempted(&self) -> bool {
        matches!(self, Self::NotAttempted)
    }
}

/// Decides what to do after a failed attempt.
///
/// A `Retry` must carry parts produced by
/// [`RequestParts::updated_for_next_attempt`]; the executor rejects retries
/// that do not advance the attempt count.
#[async_trait]
pub trait RecoveryStrategy: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    async fn attempt_recovery(
        &self,
        error: &BackendError,
        request: &RequestParts,
    ) -> RecoveryDisposition<RequestParts>;
}

/// Adjusts a request before every attempt, retries included
#[async_trait]
pub trait PreparationStrategy: Send + Sync {
    /// # Errors
    ///
    /// Any error aborts execution without entering recovery.
    async fn prepare(&self, request: RequestParts) -> Result<RequestParts, BackendError>;
}

/// Adds a fixed set of headers, replacing existing values
#[derive(Debug, Clone, Default)]
pub struct StaticHeaders {
    headers: HeaderMap,
}

impl StaticHeaders {
    #[must_use]
    pub fn new(headers: HeaderMap) -> Self {
        Self { headers }
    }
}

#[async_trait]
impl PreparationStrategy for StaticHeaders {
    async fn prepare(&self, request: RequestParts) -> Result<RequestParts, BackendError> {
        Ok(request.adding_headers(&self.headers))
    }
}
