//! Transport-wide default headers, applied underneath per-request headers.

use http::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use http::{Request, Response};
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// Tower layer filling in headers a request does not set itself.
///
/// A request header always wins over a default of the same name, so a
/// descriptor can override the transport's `User-Agent` or `Accept`.
#[derive(Debug, Clone, Default)]
pub struct DefaultHeadersLayer {
    defaults: Arc<HeaderMap>,
}

impl DefaultHeadersLayer {
    #[must_use]
    pub fn new(defaults: HeaderMap) -> Self {
        Self {
            defaults: Arc::new(defaults),
        }
    }

    /// Layer that only supplies `User-Agent`
    #[must_use]
    pub fn user_agent(user_agent: HeaderValue) -> Self {
        let mut defaults = HeaderMap::new();
        defaults.insert(USER_AGENT, user_agent);
        Self::new(defaults)
    }

    #[must_use]
    pub fn defaults(&self) -> &HeaderMap {
        &self.defaults
    }
}

impl<S> Layer<S> for DefaultHeadersLayer {
    type Service = DefaultHeadersService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        DefaultHeadersService {
            inner,
            defaults: Arc::clone(&self.defaults),
        }
    }
}

/// Service produced by [`DefaultHeadersLayer`]
#[derive(Debug, Clone)]
pub struct DefaultHeadersService<S> {
    inner: S,
    defaults: Arc<HeaderMap>,
}

impl<S> DefaultHeadersService<S> {
    fn fill_in(&self, headers: &mut HeaderMap) {
        for name in self.defaults.keys() {
            if headers.contains_key(name) {
                continue;
            }
            for value in self.defaults.get_all(name) {
                headers.append(HeaderName::clone(name), value.clone());
            }
        }
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for DefaultHeadersService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        self.fill_in(req.headers_mut());
        self.inner.call(req)
    }
}
