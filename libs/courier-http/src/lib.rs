#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! Typed HTTP request execution with recovery strategies
//!
//! A [`RequestDescriptor`] describes one request and how to decode its
//! response. A [`BackendExecutor`] sends it through a [`Transport`] and, on
//! failure, consults an ordered list of [`RecoveryStrategy`]s that may retry
//! it with a modified request:
//!
//! - Preparation steps run before every attempt, retries included
//! - Non-2xx responses, timeouts and connectivity errors surface as
//!   [`TransportFailure`] and can be recovered
//! - Each request carries its own recovery budget
//! - [`HyperTransport`] optionally pins server public keys via
//!   [`courier_pinning`]
//!
//! # Example
//!
//! ```ignore
//! use courier_http::{
//!     BackendExecutor, BackoffRecoveryStrategy, BackoffStrategy, HyperTransport,
//!     RequestDefaults, RequestDescriptor, RequestParts,
//! };
//! use std::time::Duration;
//!
//! let executor = BackendExecutor::builder(HyperTransport::builder().build()?)
//!     .recovery(BackoffRecoveryStrategy::on_server_errors(BackoffStrategy::RetryAfter {
//!         fallback: Duration::from_secs(1),
//!     }))
//!     .build();
//!
//! let defaults = RequestDefaults::default();
//! let uri = "https://api.example.com/user".parse()?;
//! let parts = RequestParts::new(http::Method::GET, uri, &defaults);
//! let user: User = executor.execute(RequestDescriptor::json(parts)).await?;
//! ```

pub mod activity;
pub mod config;
pub mod decode;
pub mod descriptor;
pub mod error;
pub mod executor;
pub mod recovery;
pub mod transport;
pub mod wire;

pub use activity::{ActivityGuard, NetworkActivity};
pub use config::RequestDefaults;
pub use decode::{
    BytesDecoder, EmptyDecoder, Enveloped, FnDecoder, JsonDecoder, MissingKey, ResponseDecoder,
    TextDecoder, decode_with,
};
pub use descriptor::{QuickRecovery, RequestBody, RequestDescriptor, RequestParts, SuccessValidator};
pub use error::{BackendError, TransportBuildError};
pub use executor::{BackendExecutor, BackendExecutorBuilder};
pub use recovery::{
    BackoffRecoveryStrategy, BackoffStrategy, ExponentialBackoff, PreparationStrategy,
    RecoveryDisposition, RecoveryPredicate, RecoveryStrategy, StaticHeaders, parse_retry_after,
    retry_on_kinds, retry_on_server_errors, retry_on_status,
};
pub use transport::{
    DEFAULT_USER_AGENT, DefaultHeadersLayer, DefaultHeadersService, HyperTransport,
    HyperTransportBuilder, TlsRoots, Transport, TransportSecurity,
};
pub use wire::{
    CachePolicy, FailureKind, ResponseEnvelope, ResponseMetadata, TransportFailure, WireRequest,
};

pub use tokio_util::sync::CancellationToken;
