use super::Transport;
use super::tls::{TlsRoots, client_config};
use super::default_headers::{DefaultHeadersLayer, DefaultHeadersService};
use crate::error::TransportBuildError;
use crate::wire::{FailureKind, ResponseEnvelope, TransportFailure, WireRequest};
use async_trait::async_trait;
use bytes::Bytes;
use courier_pinning::TrustValidator;
use http::Request;
use http::header::{CACHE_CONTROL, HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use http_body_util::{BodyExt, Full};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tower::{Layer, ServiceExt};

/// Default User-Agent string for requests
pub const DEFAULT_USER_AGENT: &str = concat!("courier-http/", env!("CARGO_PKG_VERSION"));

type HyperClient = Client<HttpsConnector<HttpConnector>, Full<Bytes>>;

/// Whether plain HTTP is allowed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportSecurity {
    /// HTTPS only
    #[default]
    TlsOnly,
    /// Also allow `http://` URIs (mock servers in tests)
    AllowInsecureHttp,
}

/// Builder for [`HyperTransport`]
#[must_use]
pub struct HyperTransportBuilder {
    user_agent: String,
    default_headers: HeaderMap,
    tls_roots: TlsRoots,
    trust_validator: Option<Arc<TrustValidator>>,
    transport: TransportSecurity,
    pool_idle_timeout: Option<Duration>,
    pool_max_idle_per_host: usize,
}

impl Default for HyperTransportBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HyperTransportBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HyperTransportBuilder")
            .field("user_agent", &self.user_agent)
            .field("default_headers", &self.default_headers)
            .field("tls_roots", &self.tls_roots)
            .field("pinned", &self.trust_validator.is_some())
            .field("transport", &self.transport)
            .field("pool_idle_timeout", &self.pool_idle_timeout)
            .field("pool_max_idle_per_host", &self.pool_max_idle_per_host)
            .finish()
    }
}

impl HyperTransportBuilder {
    pub fn new() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            default_headers: HeaderMap::new(),
            tls_roots: TlsRoots::default(),
            trust_validator: None,
            transport: TransportSecurity::default(),
            pool_idle_timeout: Some(Duration::from_secs(90)),
            pool_max_idle_per_host: 32,
        }
    }

    /// Value for requests that do not set `User-Agent` themselves
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Header sent with every request that does not set it itself
    pub fn default_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.default_headers.append(name, value);
        self
    }

    pub fn tls_roots(mut self, tls_roots: TlsRoots) -> Self {
        self.tls_roots = tls_roots;
        self
    }

    /// Validate server certificates against pinned public keys
    pub fn trust_validator(mut self, validator: Arc<TrustValidator>) -> Self {
        self.trust_validator = Some(validator);
        self
    }

    pub fn transport(mut self, transport: TransportSecurity) -> Self {
        self.transport = transport;
        self
    }

    /// Allow plain HTTP.
    ///
    /// Only available in debug builds or with the `allow-insecure-http`
    /// feature.
    #[cfg(any(debug_assertions, feature = "allow-insecure-http"))]
    pub fn allow_insecure_http(mut self) -> Self {
        tracing::warn!(
            target: "courier_http::security",
            "allow_insecure_http() called - HTTP traffic will NOT be encrypted"
        );
        self.transport = TransportSecurity::AllowInsecureHttp;
        self
    }

    /// `None` keeps idle connections indefinitely
    pub fn pool_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.pool_idle_timeout = timeout;
        self
    }

    pub fn pool_max_idle_per_host(mut self, max: usize) -> Self {
        self.pool_max_idle_per_host = max;
        self
    }

    /// # Errors
    ///
    /// Returns [`TransportBuildError`] if the user agent is not a valid
    /// header value or TLS cannot be configured.
    pub fn build(self) -> Result<HyperTransport, TransportBuildError> {
        if self.transport == TransportSecurity::AllowInsecureHttp {
            tracing::warn!(
                "insecure HTTP enabled (TransportSecurity::AllowInsecureHttp); \
                 use only for testing with mock servers"
            );
        }

        let mut defaults = self.default_headers;
        defaults.insert(USER_AGENT, HeaderValue::from_str(&self.user_agent)?);
        let headers_layer = DefaultHeadersLayer::new(defaults);

        let tls = client_config(&self.tls_roots, self.trust_validator)?;
        let builder = HttpsConnectorBuilder::new().with_tls_config(tls);
        let https = if self.transport == TransportSecurity::AllowInsecureHttp {
            builder.https_or_http().enable_all_versions().build()
        } else {
            builder.https_only().enable_all_versions().build()
        };

        // pool_timer is required for pool_idle_timeout to take effect
        let mut client_builder = Client::builder(TokioExecutor::new());
        client_builder
            .pool_timer(TokioTimer::new())
            .pool_max_idle_per_host(self.pool_max_idle_per_host)
            .pool_idle_timeout(self.pool_idle_timeout);
        let client: HyperClient = client_builder.build(https);

        Ok(HyperTransport {
            service: headers_layer.layer(client),
        })
    }
}

/// [`Transport`] backed by hyper-util's pooled client over rustls
#[derive(Clone)]
pub struct HyperTransport {
    service: DefaultHeadersService<HyperClient>,
}

impl fmt::Debug for HyperTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HyperTransport").finish_non_exhaustive()
    }
}

impl HyperTransport {
    pub fn builder() -> HyperTransportBuilder {
        HyperTransportBuilder::new()
    }

    fn to_hyper_request(request: &WireRequest) -> Request<Full<Bytes>> {
        let body = request.body.clone().unwrap_or_default();
        let mut req = Request::new(Full::new(body));
        *req.method_mut() = request.method.clone();
        *req.uri_mut() = request.uri.clone();
        *req.headers_mut() = request.headers.clone();
        if let Some(directive) = request.cache_policy.request_directive()
            && !req.headers().contains_key(CACHE_CONTROL)
        {
            req.headers_mut().insert(CACHE_CONTROL, directive);
        }
        req
    }

    async fn exchange(&self, request: &WireRequest) -> Result<ResponseEnvelope, TransportFailure> {
        let req = Self::to_hyper_request(request);

        let response = match self.service.clone().oneshot(req).await {
            Ok(response) => response,
            Err(err) => {
                let kind = if err.is_connect() {
                    FailureKind::NoConnectivity
                } else {
                    FailureKind::Unknown
                };
                return Err(TransportFailure::new(kind, request.clone()).with_source(err));
            }
        };

        let (parts, body) = response.into_parts();
        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(err) => {
                return Err(
                    TransportFailure::new(FailureKind::Unknown, request.clone()).with_source(err)
                );
            }
        };

        let envelope =
            ResponseEnvelope::new(parts.status, parts.headers, request.uri.clone(), body);
        if envelope.status().is_success() {
            Ok(envelope)
        } else {
            Err(TransportFailure::from_response(request.clone(), envelope))
        }
    }
}

#[async_trait]
impl Transport for HyperTransport {
    async fn execute(&self, request: WireRequest) -> Result<ResponseEnvelope, TransportFailure> {
        tracing::trace!(
            method = %request.method,
            uri = %request.uri,
            timeout_ms = request.timeout.as_millis(),
            "Dispatching request"
        );

        match tokio::time::timeout(request.timeout, self.exchange(&request)).await {
            Ok(result) => result,
            Err(elapsed) => {
                Err(TransportFailure::new(FailureKind::TimedOut, request).with_source(elapsed))
            }
        }
    }
}
