//! Request descriptors: what to send, and how to interpret the answer.
//!
//! [`RequestParts`] holds everything a transport or recovery strategy needs
//! and is independent of the result type. [`RequestDescriptor`] adds the
//! decoder and the optional validation and quick-recovery hooks. All mutators
//! return a new value; the receiver is never changed.

use crate::config::RequestDefaults;
use crate::decode::{JsonDecoder, ResponseDecoder};
use crate::error::BackendError;
use crate::wire::{CachePolicy, ResponseEnvelope, ResponseMetadata, TransportFailure, WireRequest};
use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderName};
use http::{HeaderMap, HeaderValue, Method, Uri};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Checks response metadata before the body is decoded
pub type SuccessValidator =
    Arc<dyn Fn(&ResponseMetadata) -> Result<(), BackendError> + Send + Sync>;

/// Turns a failure into a substitute response without going through recovery
pub type QuickRecovery = Arc<dyn Fn(&TransportFailure) -> Option<ResponseEnvelope> + Send + Sync>;

/// Request payload and the headers that describe it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestBody {
    pub bytes: Bytes,
    pub headers: HeaderMap,
}

impl RequestBody {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
            headers: HeaderMap::new(),
        }
    }

    /// JSON body with `Content-Type: application/json`
    ///
    /// # Errors
    ///
    /// Returns the serializer error if `value` cannot be encoded.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, serde_json::Error> {
        let bytes = serde_json::to_vec(value)?;
        Ok(Self::new(bytes).with_header(CONTENT_TYPE, HeaderValue::from_static("application/json")))
    }

    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}

/// Replace every header of `top` in `base`, keeping the rest of `base`
fn overlay_headers(base: &mut HeaderMap, top: &HeaderMap) {
    for name in top.keys() {
        base.remove(name);
        for value in top.get_all(name) {
            base.append(name.clone(), value.clone());
        }
    }
}

/// Result-independent part of a request
#[derive(Debug, Clone, PartialEq)]
pub struct RequestParts {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Option<RequestBody>,
    cache_policy: CachePolicy,
    timeout: Duration,
    recovery_attempt_count: u32,
    max_recovery_attempts: Option<u32>,
}

impl RequestParts {
    #[must_use]
    pub fn new(method: Method, uri: Uri, defaults: &RequestDefaults) -> Self {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            body: None,
            cache_policy: defaults.cache_policy,
            timeout: defaults.timeout,
            recovery_attempt_count: 0,
            max_recovery_attempts: defaults.max_recovery_attempts,
        }
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[must_use]
    pub fn body(&self) -> Option<&RequestBody> {
        self.body.as_ref()
    }

    #[must_use]
    pub fn cache_policy(&self) -> CachePolicy {
        self.cache_policy
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of recoveries already performed for this request
    #[must_use]
    pub fn recovery_attempt_count(&self) -> u32 {
        self.recovery_attempt_count
    }

    #[must_use]
    pub fn max_recovery_attempts(&self) -> Option<u32> {
        self.max_recovery_attempts
    }

    /// Copy with `extra` merged in; headers from `extra` replace existing ones
    #[must_use]
    pub fn adding_headers(&self, extra: &HeaderMap) -> Self {
        let mut next = self.clone();
        overlay_headers(&mut next.headers, extra);
        next
    }

    /// Copy with the header map replaced
    #[must_use]
    pub fn using_headers(&self, headers: HeaderMap) -> Self {
        Self {
            headers,
            ..self.clone()
        }
    }

    #[must_use]
    pub fn using_body(&self, body: Option<RequestBody>) -> Self {
        Self {
            body,
            ..self.clone()
        }
    }

    #[must_use]
    pub fn using_timeout(&self, timeout: Duration) -> Self {
        Self {
            timeout,
            ..self.clone()
        }
    }

    #[must_use]
    pub fn using_cache_policy(&self, cache_policy: CachePolicy) -> Self {
        Self {
            cache_policy,
            ..self.clone()
        }
    }

    /// Copy with a new recovery budget. A budget at or below the current
    /// attempt count leaves the request unrecoverable.
    #[must_use]
    pub fn using_max_recovery_attempts(&self, max_recovery_attempts: Option<u32>) -> Self {
        Self {
            max_recovery_attempts,
            ..self.clone()
        }
    }

    /// Whether another recovery attempt fits in the budget
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        self.max_recovery_attempts
            .is_none_or(|max| self.recovery_attempt_count < max)
    }

    /// Copy for the next recovery attempt, or `None` when the budget is spent
    #[must_use]
    pub fn updated_for_next_attempt(&self) -> Option<Self> {
        if !self.is_recoverable() {
            return None;
        }
        let recovery_attempt_count = self.recovery_attempt_count.checked_add(1)?;
        Some(Self {
            recovery_attempt_count,
            ..self.clone()
        })
    }

    /// Whether this is a GET that carries a body
    #[must_use]
    pub fn is_get_with_body(&self) -> bool {
        self.method == Method::GET && self.body.is_some()
    }

    /// Resolve into the request handed to the transport.
    ///
    /// Body headers are applied first; explicit headers win on collision.
    #[must_use]
    pub fn to_wire_request(&self) -> WireRequest {
        let (headers, body) = match &self.body {
            Some(body) => {
                let mut headers = body.headers.clone();
                overlay_headers(&mut headers, &self.headers);
                (headers, Some(body.bytes.clone()))
            }
            None => (self.headers.clone(), None),
        };
        WireRequest {
            method: self.method.clone(),
            uri: self.uri.clone(),
            headers,
            body,
            cache_policy: self.cache_policy,
            timeout: self.timeout,
        }
    }
}

/// A request together with the knowledge of how to decode its result
pub struct RequestDescriptor<R> {
    parts: RequestParts,
    decoder: Arc<dyn ResponseDecoder<R>>,
    validator: Option<SuccessValidator>,
    quick_recovery: Option<QuickRecovery>,
}

impl<R> Clone for RequestDescriptor<R> {
    fn clone(&self) -> Self {
        Self {
            parts: self.parts.clone(),
            decoder: Arc::clone(&self.decoder),
            validator: self.validator.clone(),
            quick_recovery: self.quick_recovery.clone(),
        }
    }
}

impl<R> fmt::Debug for RequestDescriptor<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestDescriptor")
            .field("parts", &self.parts)
            .field("validator", &self.validator.is_some())
            .field("quick_recovery", &self.quick_recovery.is_some())
            .finish_non_exhaustive()
    }
}

impl<R> RequestDescriptor<R> {
    pub fn new<D>(parts: RequestParts, decoder: D) -> Self
    where
        D: ResponseDecoder<R> + 'static,
    {
        Self {
            parts,
            decoder: Arc::new(decoder),
            validator: None,
            quick_recovery: None,
        }
    }

    #[must_use]
    pub fn parts(&self) -> &RequestParts {
        &self.parts
    }

    /// Same decoder and hooks, different request
    #[must_use]
    pub fn with_parts(&self, parts: RequestParts) -> Self {
        Self {
            parts,
            ..self.clone()
        }
    }

    /// Run `validator` on every successful response before decoding it
    #[must_use]
    pub fn with_validation<F>(mut self, validator: F) -> Self
    where
        F: Fn(&ResponseMetadata) -> Result<(), BackendError> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Offer a substitute response for a failure before recovery strategies run
    #[must_use]
    pub fn with_quick_recovery<F>(mut self, quick_recovery: F) -> Self
    where
        F: Fn(&TransportFailure) -> Option<ResponseEnvelope> + Send + Sync + 'static,
    {
        self.quick_recovery = Some(Arc::new(quick_recovery));
        self
    }

    #[must_use]
    pub fn adding_headers(&self, extra: &HeaderMap) -> Self {
        self.with_parts(self.parts.adding_headers(extra))
    }

    #[must_use]
    pub fn using_headers(&self, headers: HeaderMap) -> Self {
        self.with_parts(self.parts.using_headers(headers))
    }

    #[must_use]
    pub fn using_body(&self, body: Option<RequestBody>) -> Self {
        self.with_parts(self.parts.using_body(body))
    }

    #[must_use]
    pub fn using_timeout(&self, timeout: Duration) -> Self {
        self.with_parts(self.parts.using_timeout(timeout))
    }

    #[must_use]
    pub fn using_cache_policy(&self, cache_policy: CachePolicy) -> Self {
        self.with_parts(self.parts.using_cache_policy(cache_policy))
    }

    #[must_use]
    pub fn using_max_recovery_attempts(&self, max_recovery_attempts: Option<u32>) -> Self {
        self.with_parts(self.parts.using_max_recovery_attempts(max_recovery_attempts))
    }

    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        self.parts.is_recoverable()
    }

    #[must_use]
    pub fn updated_for_next_attempt(&self) -> Option<Self> {
        self.parts
            .updated_for_next_attempt()
            .map(|parts| self.with_parts(parts))
    }

    #[must_use]
    pub fn to_wire_request(&self) -> WireRequest {
        self.parts.to_wire_request()
    }

    /// Apply the success validator, if any
    ///
    /// # Errors
    ///
    /// Returns whatever the validator rejects the response with.
    pub fn validate(&self, metadata: &ResponseMetadata) -> Result<(), BackendError> {
        match &self.validator {
            Some(validator) => validator(metadata),
            None => Ok(()),
        }
    }

    /// Substitute response for `failure`, if the quick-recovery hook has one
    #[must_use]
    pub fn quick_recover(&self, failure: &TransportFailure) -> Option<ResponseEnvelope> {
        self.quick_recovery
            .as_ref()
            .and_then(|quick_recovery| quick_recovery(failure))
    }

    /// Decode a response into the result type
    ///
    /// # Errors
    ///
    /// Returns the decoder's error.
    pub async fn decode(&self, response: ResponseEnvelope) -> Result<R, BackendError> {
        self.decoder.decode(response).await
    }
}

impl<T> RequestDescriptor<T>
where
    T: DeserializeOwned + Send + 'static,
{
    /// Descriptor whose body is decoded as JSON
    #[must_use]
    pub fn json(parts: RequestParts) -> Self {
        Self::new(parts, JsonDecoder::<T>::new())
    }
}
