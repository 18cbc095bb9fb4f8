//! Request execution with preparation and recovery.
//!
//! One call to [`BackendExecutor::execute`] runs this loop until it returns:
//!
//! 1. Every [`PreparationStrategy`] runs, in order, on the current request.
//! 2. The request goes to the [`Transport`].
//! 3. A 2xx response is validated, then decoded.
//! 4. A failure is offered to the descriptor's quick-recovery hook; a
//!    substitute response is decoded without validation.
//! 5. Otherwise recovery strategies are asked in order. The first that does
//!    not answer `NotAttempted` decides: `Failure` ends the call, `Retry`
//!    restarts the loop with the returned request.
//!
//! When no strategy reacts, the original error is returned.

use crate::activity::NetworkActivity;
use crate::descriptor::{RequestDescriptor, RequestParts};
use crate::error::BackendError;
use crate::recovery::{PreparationStrategy, RecoveryDisposition, RecoveryStrategy};
use crate::transport::Transport;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Runs `fut` unless `token` fires first
async fn cancellable<F: Future>(token: Option<&CancellationToken>, fut: F) -> Option<F::Output> {
    match token {
        Some(token) => tokio::select! {
            biased;
            () = token.cancelled() => None,
            output = fut => Some(output),
        },
        None => Some(fut.await),
    }
}

fn is_cancelled(token: Option<&CancellationToken>) -> bool {
    token.is_some_and(CancellationToken::is_cancelled)
}

/// Executes [`RequestDescriptor`]s against a [`Transport`]
#[derive(Clone)]
pub struct BackendExecutor {
    transport: Arc<dyn Transport>,
    preparations: Arc<[Arc<dyn PreparationStrategy>]>,
    recoveries: Arc<[Arc<dyn RecoveryStrategy>]>,
    activity: NetworkActivity,
}

impl fmt::Debug for BackendExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendExecutor")
            .field("preparations", &self.preparations.len())
            .field("recoveries", &self.recoveries.len())
            .field("activity", &self.activity)
            .finish_non_exhaustive()
    }
}

impl BackendExecutor {
    /// Executor without preparation or recovery strategies
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self::builder(transport).build()
    }

    pub fn builder(transport: impl Transport + 'static) -> BackendExecutorBuilder {
        BackendExecutorBuilder {
            transport: Arc::new(transport),
            preparations: Vec::new(),
            recoveries: Vec::new(),
            activity: NetworkActivity::new(),
        }
    }

    /// Counter of transport calls made through this executor
    #[must_use]
    pub fn activity(&self) -> &NetworkActivity {
        &self.activity
    }

    /// Execute a request, recovering from failures as configured.
    ///
    /// Dropping the returned future aborts the in-flight transport call or
    /// backoff sleep.
    ///
    /// # Errors
    ///
    /// Returns the last underlying error once recovery gives up, a
    /// preparation error unchanged, or a decode error.
    ///
    /// # Panics
    ///
    /// Panics if a preparation step yields a GET request with a body.
    pub async fn execute<R>(&self, descriptor: RequestDescriptor<R>) -> Result<R, BackendError> {
        self.run(descriptor, None).await
    }

    /// Like [`execute`](Self::execute), but stops with
    /// [`BackendError::Cancelled`] as soon as `token` is cancelled. A
    /// cancelled call never retries.
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    ///
    /// # Panics
    ///
    /// Panics if a preparation step yields a GET request with a body.
    pub async fn execute_with_cancellation<R>(
        &self,
        descriptor: RequestDescriptor<R>,
        token: CancellationToken,
    ) -> Result<R, BackendError> {
        self.run(descriptor, Some(&token)).await
    }

    async fn prepare(&self, mut parts: RequestParts) -> Result<RequestParts, BackendError> {
        for preparation in self.preparations.iter() {
            parts = preparation.prepare(parts).await?;
        }
        Ok(parts)
    }

    async fn run<R>(
        &self,
        mut descriptor: RequestDescriptor<R>,
        token: Option<&CancellationToken>,
    ) -> Result<R, BackendError> {
        loop {
            if is_cancelled(token) {
                return Err(BackendError::Cancelled);
            }

            let prepared = descriptor.with_parts(self.prepare(descriptor.parts().clone()).await?);
            assert!(
                !prepared.parts().is_get_with_body(),
                "GET request to {} must not carry a body",
                prepared.parts().uri()
            );

            let outcome = {
                let _guard = self.activity.begin();
                cancellable(token, self.transport.execute(prepared.to_wire_request())).await
            };
            let Some(outcome) = outcome else {
                return Err(BackendError::Cancelled);
            };
            if is_cancelled(token) {
                return Err(BackendError::Cancelled);
            }

            let error = match outcome {
                Ok(response) => match prepared.validate(&response.metadata) {
                    Ok(()) => return prepared.decode(response).await,
                    Err(err) => err,
                },
                Err(failure) => {
                    if let Some(response) = prepared.quick_recover(&failure) {
                        tracing::debug!(
                            kind = %failure.kind,
                            uri = %failure.request.uri,
                            "Failure quick-recovered"
                        );
                        return prepared.decode(response).await;
                    }
                    BackendError::from(failure)
                }
            };

            match self.recover(&error, prepared.parts(), token).await? {
                Some(next) => descriptor = prepared.with_parts(next),
                None => return Err(error),
            }
        }
    }

    /// Ask each recovery strategy in order; `None` when none reacted
    async fn recover(
        &self,
        error: &BackendError,
        request: &RequestParts,
        token: Option<&CancellationToken>,
    ) -> Result<Option<RequestParts>, BackendError> {
        for strategy in self.recoveries.iter() {
            let attempt = strategy.attempt_recovery(error, request);
            let Some(disposition) = cancellable(token, attempt).await else {
                return Err(BackendError::Cancelled);
            };

            match disposition {
                RecoveryDisposition::NotAttempted => {}
                RecoveryDisposition::Failure(err) => return Err(err),
                RecoveryDisposition::Retry(next) => {
                    check_retry(strategy.name(), request, &next)?;
                    tracing::debug!(
                        strategy = strategy.name(),
                        attempt = next.recovery_attempt_count(),
                        error = %error,
                        "Recovering request"
                    );
                    return Ok(Some(next));
                }
            }
        }
        Ok(None)
    }
}

/// A retry must advance the attempt count and stay within the budget
fn check_retry(
    strategy: &str,
    previous: &RequestParts,
    next: &RequestParts,
) -> Result<(), BackendError> {
    if next.recovery_attempt_count() <= previous.recovery_attempt_count() {
        return Err(BackendError::InvalidRequest(format!(
            "{strategy} retried without advancing the attempt count ({})",
            next.recovery_attempt_count()
        )));
    }
    if let Some(max) = next.max_recovery_attempts()
        && next.recovery_attempt_count() > max
    {
        return Err(BackendError::InvalidRequest(format!(
            "{strategy} retried past the recovery budget ({} > {max})",
            next.recovery_attempt_count()
        )));
    }
    Ok(())
}

/// Builder for [`BackendExecutor`]
#[must_use]
pub struct BackendExecutorBuilder {
    transport: Arc<dyn Transport>,
    preparations: Vec<Arc<dyn PreparationStrategy>>,
    recoveries: Vec<Arc<dyn RecoveryStrategy>>,
    activity: NetworkActivity,
}

impl fmt::Debug for BackendExecutorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendExecutorBuilder")
            .field("preparations", &self.preparations.len())
            .field("recoveries", &self.recoveries.len())
            .field("activity", &self.activity)
            .finish_non_exhaustive()
    }
}

impl BackendExecutorBuilder {
    /// Append a preparation step; steps run in insertion order
    pub fn preparation(mut self, preparation: impl PreparationStrategy + 'static) -> Self {
        self.preparations.push(Arc::new(preparation));
        self
    }

    /// Append a recovery strategy; strategies are asked in insertion order
    pub fn recovery(mut self, recovery: impl RecoveryStrategy + 'static) -> Self {
        self.recoveries.push(Arc::new(recovery));
        self
    }

    pub fn recovery_arc(mut self, recovery: Arc<dyn RecoveryStrategy>) -> Self {
        self.recoveries.push(recovery);
        self
    }

    /// Share an activity counter with other executors
    pub fn activity(mut self, activity: NetworkActivity) -> Self {
        self.activity = activity;
        self
    }

    pub fn build(self) -> BackendExecutor {
        BackendExecutor {
            transport: self.transport,
            preparations: self.preparations.into(),
            recoveries: self.recoveries.into(),
            activity: self.activity,
        }
    }
}
