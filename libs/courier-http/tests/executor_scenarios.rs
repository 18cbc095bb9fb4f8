//! Executor behavior against a scripted in-memory transport.

use async_trait::async_trait;
use courier_http::{
    BackendError, BackendExecutor, BackoffRecoveryStrategy, BackoffStrategy, CancellationToken,
    ExponentialBackoff, FailureKind, PreparationStrategy, RecoveryDisposition, RecoveryStrategy,
    RequestBody, RequestDefaults, RequestDescriptor, RequestParts, ResponseEnvelope,
    ResponseMetadata, TextDecoder, Transport, TransportFailure, WireRequest,
};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Deserialize, PartialEq)]
struct Item {
    id: u64,
}

#[derive(Clone)]
enum Reply {
    Respond(StatusCode, &'static [(&'static str, &'static str)], &'static str),
    Fail(FailureKind),
    Hang,
}

fn ok(body: &'static str) -> Reply {
    Reply::Respond(StatusCode::OK, &[], body)
}

fn status(status: StatusCode) -> Reply {
    Reply::Respond(status, &[], "")
}

fn header_map(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
    pairs
        .iter()
        .map(|(name, value)| {
            (
                HeaderName::from_static(name),
                HeaderValue::from_static(value),
            )
        })
        .collect()
}

/// Replays scripted replies in order and records every request it sees
#[derive(Default)]
struct ScriptedTransport {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<WireRequest>>,
}

impl ScriptedTransport {
    fn new(replies: impl IntoIterator<Item = Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().collect()),
            requests: Mutex::default(),
        })
    }

    fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    fn requests(&self) -> Vec<WireRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, request: WireRequest) -> Result<ResponseEnvelope, TransportFailure> {
        self.requests.lock().push(request.clone());
        let reply = self
            .replies
            .lock()
            .pop_front()
            .unwrap_or(Reply::Fail(FailureKind::Unknown));
        match reply {
            Reply::Respond(status, headers, body) => {
                let envelope =
                    ResponseEnvelope::new(status, header_map(headers), request.uri.clone(), body);
                if status.is_success() {
                    Ok(envelope)
                } else {
                    Err(TransportFailure::from_response(request, envelope))
                }
            }
            Reply::Fail(kind) => Err(TransportFailure::new(kind, request)),
            Reply::Hang => std::future::pending().await,
        }
    }
}

/// Logs its name on every call; retries when `retry` is set
struct Recording {
    name: &'static str,
    log: Arc<Mutex<Vec<&'static str>>>,
    retry: bool,
}

#[async_trait]
impl RecoveryStrategy for Recording {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn attempt_recovery(
        &self,
        _: &BackendError,
        request: &RequestParts,
    ) -> RecoveryDisposition<RequestParts> {
        self.log.lock().push(self.name);
        if !self.retry {
            return RecoveryDisposition::NotAttempted;
        }
        match request.updated_for_next_attempt() {
            Some(next) => RecoveryDisposition::Retry(next),
            None => RecoveryDisposition::NotAttempted,
        }
    }
}

fn recording(
    name: &'static str,
    log: &Arc<Mutex<Vec<&'static str>>>,
    retry: bool,
) -> Recording {
    Recording {
        name,
        log: Arc::clone(log),
        retry,
    }
}

/// Stamps each attempt with a sequence number
#[derive(Clone, Default)]
struct CountingPreparation {
    runs: Arc<AtomicUsize>,
}

#[async_trait]
impl PreparationStrategy for CountingPreparation {
    async fn prepare(&self, request: RequestParts) -> Result<RequestParts, BackendError> {
        let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
        let mut headers = HeaderMap::new();
        headers.insert("x-attempt", HeaderValue::from(run));
        Ok(request.adding_headers(&headers))
    }
}

/// Records the attempt count of every request it prepares
#[derive(Clone, Default)]
struct AttemptRecorder {
    seen: Arc<Mutex<Vec<u32>>>,
}

#[async_trait]
impl PreparationStrategy for AttemptRecorder {
    async fn prepare(&self, request: RequestParts) -> Result<RequestParts, BackendError> {
        self.seen.lock().push(request.recovery_attempt_count());
        Ok(request)
    }
}

struct FailingPreparation;

#[async_trait]
impl PreparationStrategy for FailingPreparation {
    async fn prepare(&self, _: RequestParts) -> Result<RequestParts, BackendError> {
        Err(BackendError::preparation(std::io::Error::other(
            "token refresh failed",
        )))
    }
}

fn get(max: Option<u32>) -> RequestParts {
    RequestParts::new(
        Method::GET,
        Uri::from_static("http://backend.test/items/1"),
        &RequestDefaults::default(),
    )
    .using_max_recovery_attempts(max)
}

fn retry_after_on_503() -> BackoffRecoveryStrategy {
    BackoffRecoveryStrategy::on_status(
        &[StatusCode::SERVICE_UNAVAILABLE],
        BackoffStrategy::RetryAfter {
            fallback: Duration::from_secs(30),
        },
    )
}

#[tokio::test(start_paused = true)]
async fn test_503_with_retry_after_then_success() {
    let transport = ScriptedTransport::new([
        Reply::Respond(StatusCode::SERVICE_UNAVAILABLE, &[("retry-after", "2")], ""),
        ok(r#"{"id":1}"#),
    ]);
    let attempts = AttemptRecorder::default();
    let executor = BackendExecutor::builder(Arc::clone(&transport))
        .preparation(attempts.clone())
        .recovery(retry_after_on_503())
        .build();
    let start = tokio::time::Instant::now();

    let item: Item = executor
        .execute(RequestDescriptor::json(get(Some(1))))
        .await
        .unwrap();

    assert_eq!(item, Item { id: 1 });
    assert_eq!(transport.calls(), 2);
    // The retry carries the updated descriptor, not the original
    assert_eq!(*attempts.seen.lock(), [0, 1]);
    let waited = start.elapsed();
    assert!(waited >= Duration::from_secs(2), "{waited:?}");
    assert!(waited < Duration::from_secs(3), "{waited:?}");
    assert_eq!(executor.activity().total_started(), 2);
    assert_eq!(executor.activity().in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_budget_returns_last_503() {
    let transport = ScriptedTransport::new([
        Reply::Respond(StatusCode::SERVICE_UNAVAILABLE, &[("retry-after", "2")], ""),
        Reply::Respond(StatusCode::SERVICE_UNAVAILABLE, &[("retry-after", "2")], "busy"),
    ]);
    let executor = BackendExecutor::builder(Arc::clone(&transport))
        .recovery(retry_after_on_503())
        .build();

    let err = executor
        .execute(RequestDescriptor::<Item>::json(get(Some(1))))
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(StatusCode::SERVICE_UNAVAILABLE));
    let failure = err.transport_failure().unwrap();
    assert_eq!(failure.response.as_ref().unwrap().body, "busy");
    assert_eq!(transport.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_budget_of_n_allows_n_retries() {
    let transport =
        ScriptedTransport::new(std::iter::repeat_n(status(StatusCode::BAD_GATEWAY), 10));
    let executor = BackendExecutor::builder(Arc::clone(&transport))
        .recovery(BackoffRecoveryStrategy::on_server_errors(
            BackoffStrategy::Exponential(ExponentialBackoff::fast()),
        ))
        .build();

    let err = executor
        .execute(RequestDescriptor::<Item>::json(get(Some(3))))
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(StatusCode::BAD_GATEWAY));
    assert_eq!(transport.calls(), 4);
}

#[tokio::test]
async fn test_strategies_are_consulted_in_order() {
    let transport = ScriptedTransport::new([status(StatusCode::NOT_FOUND), ok("done")]);
    let log = Arc::new(Mutex::new(Vec::new()));
    let executor = BackendExecutor::builder(Arc::clone(&transport))
        .recovery(recording("a", &log, false))
        .recovery(recording("b", &log, true))
        .recovery(recording("c", &log, true))
        .build();

    let body = executor
        .execute(RequestDescriptor::new(get(Some(1)), TextDecoder))
        .await
        .unwrap();

    assert_eq!(body, "done");
    assert_eq!(*log.lock(), vec!["a", "b"]);
}

#[tokio::test]
async fn test_no_strategy_returns_original_error() {
    let transport = ScriptedTransport::new([Reply::Fail(FailureKind::NoConnectivity)]);
    let log = Arc::new(Mutex::new(Vec::new()));
    let executor = BackendExecutor::builder(Arc::clone(&transport))
        .recovery(recording("a", &log, false))
        .build();

    let err = executor
        .execute(RequestDescriptor::new(get(Some(5)), TextDecoder))
        .await
        .unwrap_err();

    assert_eq!(
        err.transport_failure().unwrap().kind,
        FailureKind::NoConnectivity
    );
    assert_eq!(transport.calls(), 1);
    assert_eq!(*log.lock(), vec!["a"]);
}

#[tokio::test]
async fn test_failure_disposition_ends_execution() {
    struct GiveUp;

    #[async_trait]
    impl RecoveryStrategy for GiveUp {
        async fn attempt_recovery(
            &self,
            _: &BackendError,
            _: &RequestParts,
        ) -> RecoveryDisposition<RequestParts> {
            RecoveryDisposition::Failure(BackendError::validation("session expired"))
        }
    }

    let transport = ScriptedTransport::new([status(StatusCode::UNAUTHORIZED)]);
    let log = Arc::new(Mutex::new(Vec::new()));
    let executor = BackendExecutor::builder(Arc::clone(&transport))
        .recovery(GiveUp)
        .recovery(recording("never", &log, true))
        .build();

    let err = executor
        .execute(RequestDescriptor::new(get(Some(3)), TextDecoder))
        .await
        .unwrap_err();

    assert!(
        matches!(err, BackendError::Validation { ref message } if message == "session expired")
    );
    assert!(log.lock().is_empty());
}

#[tokio::test]
async fn test_quick_recovery_bypasses_strategies_and_validation() {
    let transport = ScriptedTransport::new([status(StatusCode::NOT_FOUND)]);
    let log = Arc::new(Mutex::new(Vec::new()));
    let validations = Arc::new(AtomicUsize::new(0));
    let executor = BackendExecutor::builder(Arc::clone(&transport))
        .recovery(recording("a", &log, true))
        .build();

    let seen = Arc::clone(&validations);
    let descriptor = RequestDescriptor::new(get(Some(3)), TextDecoder)
        .with_validation(move |_: &ResponseMetadata| {
            seen.fetch_add(1, Ordering::SeqCst);
            Err(BackendError::validation("never valid"))
        })
        .with_quick_recovery(|failure: &TransportFailure| {
            (failure.status() == Some(StatusCode::NOT_FOUND)).then(|| {
                ResponseEnvelope::new(
                    StatusCode::OK,
                    HeaderMap::new(),
                    failure.request.uri.clone(),
                    "cached",
                )
            })
        });

    let body = executor.execute(descriptor).await.unwrap();

    assert_eq!(body, "cached");
    assert!(log.lock().is_empty());
    assert_eq!(validations.load(Ordering::SeqCst), 0);
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn test_validation_failure_enters_recovery() {
    let transport = ScriptedTransport::new([
        Reply::Respond(StatusCode::OK, &[("x-stale", "1")], "old"),
        ok("fresh"),
    ]);
    let log = Arc::new(Mutex::new(Vec::new()));
    let executor = BackendExecutor::builder(Arc::clone(&transport))
        .recovery(recording("refresh", &log, true))
        .build();

    let descriptor = RequestDescriptor::new(get(Some(1)), TextDecoder).with_validation(
        |metadata: &ResponseMetadata| {
            if metadata.headers.contains_key("x-stale") {
                Err(BackendError::validation("stale response"))
            } else {
                Ok(())
            }
        },
    );

    assert_eq!(executor.execute(descriptor).await.unwrap(), "fresh");
    assert_eq!(*log.lock(), vec!["refresh"]);
}

#[tokio::test]
async fn test_decode_error_is_not_recovered() {
    let transport = ScriptedTransport::new([ok("not json"), ok(r#"{"id":2}"#)]);
    let log = Arc::new(Mutex::new(Vec::new()));
    let executor = BackendExecutor::builder(Arc::clone(&transport))
        .recovery(recording("a", &log, true))
        .build();

    let err = executor
        .execute(RequestDescriptor::<Item>::json(get(Some(3))))
        .await
        .unwrap_err();

    assert!(matches!(err, BackendError::Decode { .. }));
    assert!(log.lock().is_empty());
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn test_preparation_runs_before_every_attempt() {
    let transport = ScriptedTransport::new([status(StatusCode::SERVICE_UNAVAILABLE), ok("done")]);
    let preparation = CountingPreparation::default();
    let executor = BackendExecutor::builder(Arc::clone(&transport))
        .preparation(preparation.clone())
        .recovery(BackoffRecoveryStrategy::on_server_errors(
            BackoffStrategy::Exponential(ExponentialBackoff::fast()),
        ))
        .build();

    executor
        .execute(RequestDescriptor::new(get(Some(1)), TextDecoder))
        .await
        .unwrap();

    assert_eq!(preparation.runs.load(Ordering::SeqCst), 2);
    let stamps: Vec<_> = transport
        .requests()
        .iter()
        .map(|request| request.headers["x-attempt"].clone())
        .collect();
    assert_eq!(stamps, vec!["1", "2"]);
}

#[tokio::test]
async fn test_preparation_error_is_not_recovered() {
    let transport = ScriptedTransport::new([ok("unused")]);
    let log = Arc::new(Mutex::new(Vec::new()));
    let executor = BackendExecutor::builder(Arc::clone(&transport))
        .preparation(FailingPreparation)
        .recovery(recording("a", &log, true))
        .build();

    let err = executor
        .execute(RequestDescriptor::new(get(Some(3)), TextDecoder))
        .await
        .unwrap_err();

    assert!(matches!(err, BackendError::Preparation(_)));
    assert_eq!(transport.calls(), 0);
    assert!(log.lock().is_empty());
}

#[tokio::test]
async fn test_retry_without_progress_is_rejected() {
    struct Stuck;

    #[async_trait]
    impl RecoveryStrategy for Stuck {
        async fn attempt_recovery(
            &self,
            _: &BackendError,
            request: &RequestParts,
        ) -> RecoveryDisposition<RequestParts> {
            RecoveryDisposition::Retry(request.clone())
        }
    }

    let transport = ScriptedTransport::new([status(StatusCode::BAD_GATEWAY)]);
    let executor = BackendExecutor::builder(Arc::clone(&transport))
        .recovery(Stuck)
        .build();

    let err = executor
        .execute(RequestDescriptor::new(get(None), TextDecoder))
        .await
        .unwrap_err();

    assert!(matches!(err, BackendError::InvalidRequest(_)));
    assert_eq!(transport.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_during_backoff() {
    let transport = ScriptedTransport::new([status(StatusCode::SERVICE_UNAVAILABLE), ok("late")]);
    let executor = BackendExecutor::builder(Arc::clone(&transport))
        .recovery(retry_after_on_503())
        .build();
    let token = CancellationToken::new();

    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        canceller.cancel();
    });

    let err = executor
        .execute_with_cancellation(RequestDescriptor::new(get(Some(3)), TextDecoder), token)
        .await
        .unwrap_err();

    assert!(matches!(err, BackendError::Cancelled));
    assert_eq!(transport.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_during_transport() {
    let transport = ScriptedTransport::new([Reply::Hang]);
    let executor = BackendExecutor::builder(Arc::clone(&transport))
        .recovery(retry_after_on_503())
        .build();
    let token = CancellationToken::new();

    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        canceller.cancel();
    });

    let err = executor
        .execute_with_cancellation(RequestDescriptor::new(get(Some(3)), TextDecoder), token)
        .await
        .unwrap_err();

    assert!(matches!(err, BackendError::Cancelled));
    assert_eq!(executor.activity().in_flight(), 0);
}

#[tokio::test]
async fn test_cancelled_token_prevents_sending() {
    let transport = ScriptedTransport::new([ok("unused")]);
    let executor = BackendExecutor::new(Arc::clone(&transport));
    let token = CancellationToken::new();
    token.cancel();

    let err = executor
        .execute_with_cancellation(RequestDescriptor::new(get(Some(1)), TextDecoder), token)
        .await
        .unwrap_err();

    assert!(matches!(err, BackendError::Cancelled));
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
#[should_panic(expected = "must not carry a body")]
async fn test_get_with_body_panics() {
    let transport = ScriptedTransport::new([ok("unused")]);
    let executor = BackendExecutor::new(transport);
    let parts = get(Some(1)).using_body(Some(RequestBody::new("payload")));

    let _ = executor
        .execute(RequestDescriptor::new(parts, TextDecoder))
        .await;
}

#[tokio::test]
async fn test_post_body_reaches_transport() {
    let transport = ScriptedTransport::new([ok("{}")]);
    let executor = BackendExecutor::new(Arc::clone(&transport));
    let parts = RequestParts::new(
        Method::POST,
        Uri::from_static("http://backend.test/items"),
        &RequestDefaults::default(),
    )
    .using_body(Some(
        RequestBody::json(&serde_json::json!({ "id": 3 })).unwrap(),
    ));

    executor
        .execute(RequestDescriptor::new(parts, TextDecoder))
        .await
        .unwrap();

    let sent = &transport.requests()[0];
    assert_eq!(sent.method, Method::POST);
    assert_eq!(sent.body.as_deref(), Some(&br#"{"id":3}"#[..]));
    assert_eq!(sent.headers[http::header::CONTENT_TYPE], "application/json");
}
