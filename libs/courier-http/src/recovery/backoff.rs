use super::{RecoveryDisposition, RecoveryStrategy};
use crate::descriptor::RequestParts;
use crate::error::BackendError;
use crate::wire::FailureKind;
use async_trait::async_trait;
use http::{HeaderMap, StatusCode};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Decides whether a [`BackoffRecoveryStrategy`] handles an error
pub type RecoveryPredicate = Arc<dyn Fn(&BackendError, &RequestParts) -> bool + Send + Sync>;

/// Exponential backoff: `base * 2^attempt`, plus jitter, clamped to `maximum`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExponentialBackoff {
    /// Delay before the first recovery (default: 1s)
    #[serde(with = "humantime_serde")]
    pub base: Duration,

    /// Upper bound for any delay, jitter included (default: none)
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub maximum: Option<Duration>,

    /// Lower bound of the uniform jitter added to each delay
    #[serde(with = "humantime_serde")]
    pub jitter_min: Duration,

    /// Upper bound of the uniform jitter (zero disables jitter)
    #[serde(with = "humantime_serde")]
    pub jitter_max: Duration,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            maximum: None,
            jitter_min: Duration::ZERO,
            jitter_max: Duration::ZERO,
        }
    }
}

impl ExponentialBackoff {
    /// One second base, capped at `maximum`, no jitter
    #[must_use]
    pub fn new(maximum: Duration) -> Self {
        Self {
            maximum: Some(maximum),
            ..Self::default()
        }
    }

    /// 1ms base, 100ms cap, no jitter; for tests
    #[must_use]
    pub fn fast() -> Self {
        Self {
            base: Duration::from_millis(1),
            maximum: Some(Duration::from_millis(100)),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_jitter(mut self, min: Duration, max: Duration) -> Self {
        self.jitter_min = min;
        self.jitter_max = max;
        self
    }

    fn jitter(&self) -> Duration {
        if self.jitter_max <= self.jitter_min {
            return self.jitter_min;
        }
        rand::rng().random_range(self.jitter_min..=self.jitter_max)
    }

    /// Delay before recovery number `attempt + 1`
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        let delay = self
            .base
            .saturating_mul(factor)
            .saturating_add(self.jitter());
        match self.maximum {
            Some(maximum) => delay.min(maximum),
            None => delay,
        }
    }
}

/// How long to wait before retrying
#[derive(Clone)]
#[non_exhaustive]
pub enum BackoffStrategy {
    Exponential(ExponentialBackoff),
    /// Honor the response's `Retry-After`, else wait `fallback`
    RetryAfter { fallback: Duration },
    /// Caller-computed delay from the attempt number and the error
    Custom(Arc<dyn Fn(u32, &BackendError) -> Duration + Send + Sync>),
}

impl fmt::Debug for BackoffStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exponential(backoff) => f.debug_tuple("Exponential").field(backoff).finish(),
            Self::RetryAfter { fallback } => f
                .debug_struct("RetryAfter")
                .field("fallback", fallback)
                .finish(),
            Self::Custom(_) => f.write_str("Custom"),
        }
    }
}

impl BackoffStrategy {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(u32, &BackendError) -> Duration + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    /// Delay for the recovery after `attempt` previous recoveries
    #[must_use]
    pub fn delay(&self, attempt: u32, error: &BackendError) -> Duration {
        match self {
            Self::Exponential(backoff) => backoff.delay(attempt),
            Self::RetryAfter { fallback } => error
                .response_headers()
                .and_then(|headers| parse_retry_after(headers, SystemTime::now()))
                .unwrap_or(*fallback),
            Self::Custom(f) => f(attempt, error),
        }
    }
}

/// Parse the `Retry-After` header relative to `now`.
///
/// Accepts delay-seconds (`"120"`) and HTTP-dates
/// (`"Wed, 21 Oct 2015 07:28:00 GMT"`). A date in the past yields zero.
/// Returns `None` if the header is missing, negative or unparseable.
#[must_use]
pub fn parse_retry_after(headers: &HeaderMap, now: SystemTime) -> Option<Duration> {
    let value = headers.get(http::header::RETRY_AFTER)?.to_str().ok()?;
    let trimmed = value.trim();

    if let Ok(seconds) = trimmed.parse::<i64>() {
        if seconds < 0 {
            return None;
        }
        return Some(Duration::from_secs(seconds.cast_unsigned()));
    }

    let at = httpdate::parse_http_date(trimmed).ok()?;
    Some(at.duration_since(now).unwrap_or(Duration::ZERO))
}

/// Matches transport failures whose response status is in `statuses`
#[must_use]
pub fn retry_on_status(statuses: &[StatusCode]) -> RecoveryPredicate {
    let statuses = statuses.to_vec();
    Arc::new(move |error: &BackendError, _: &RequestParts| {
        error
            .transport_failure()
            .and_then(|failure| failure.status())
            .is_some_and(|status| statuses.contains(&status))
    })
}

/// Matches any 5xx transport failure
#[must_use]
pub fn retry_on_server_errors() -> RecoveryPredicate {
    Arc::new(|error: &BackendError, _: &RequestParts| {
        error
            .transport_failure()
            .is_some_and(|failure| matches!(failure.kind, FailureKind::ServerError(_)))
    })
}

/// Matches transport failures of the given kinds
#[must_use]
pub fn retry_on_kinds(kinds: &[FailureKind]) -> RecoveryPredicate {
    let kinds = kinds.to_vec();
    Arc::new(move |error: &BackendError, _: &RequestParts| {
        error
            .transport_failure()
            .is_some_and(|failure| kinds.contains(&failure.kind))
    })
}

/// Waits, then retries, while the predicate matches and the budget allows
#[derive(Clone)]
pub struct BackoffRecoveryStrategy {
    predicate: RecoveryPredicate,
    backoff: BackoffStrategy,
}

impl fmt::Debug for BackoffRecoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackoffRecoveryStrategy")
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

impl BackoffRecoveryStrategy {
    pub fn new<P>(predicate: P, backoff: BackoffStrategy) -> Self
    where
        P: Fn(&BackendError, &RequestParts) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
            backoff,
        }
    }

    #[must_use]
    pub fn from_predicate(predicate: RecoveryPredicate, backoff: BackoffStrategy) -> Self {
        Self { predicate, backoff }
    }

    #[must_use]
    pub fn on_status(statuses: &[StatusCode], backoff: BackoffStrategy) -> Self {
        Self::from_predicate(retry_on_status(statuses), backoff)
    }

    #[must_use]
    pub fn on_server_errors(backoff: BackoffStrategy) -> Self {
        Self::from_predicate(retry_on_server_errors(), backoff)
    }

    #[must_use]
    pub fn on_kinds(kinds: &[FailureKind], backoff: BackoffStrategy) -> Self {
        Self::from_predicate(retry_on_kinds(kinds), backoff)
    }

    #[must_use]
    pub fn backoff(&self) -> &BackoffStrategy {
        &self.backoff
    }
}

#[async_trait]
impl RecoveryStrategy for BackoffRecoveryStrategy {
    fn name(&self) -> &'static str {
        "backoff"
    }

    async fn attempt_recovery(
        &self,
        error: &BackendError,
        request: &RequestParts,
    ) -> RecoveryDisposition<RequestParts> {
        if !(self.predicate)(error, request) {
            return RecoveryDisposition::NotAttempted;
        }

        let Some(next) = request.updated_for_next_attempt() else {
            tracing::debug!(
                attempt = request.recovery_attempt_count(),
                max = ?request.max_recovery_attempts(),
                "Recovery budget exhausted"
            );
            return RecoveryDisposition::Failure(error.clone());
        };

        let delay = self.backoff.delay(request.recovery_attempt_count(), error);
        tracing::debug!(
            attempt = next.recovery_attempt_count(),
            delay_ms = delay.as_millis(),
            strategy = self.name(),
            method = %request.method(),
            uri = %request.uri(),
            "Retrying request after backoff"
        );
        tokio::time::sleep(delay).await;
        RecoveryDisposition::Retry(next)
    }
}
