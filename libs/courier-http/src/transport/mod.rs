//! Transport capability and its hyper-based implementation.

mod default_headers;
mod hyper;
pub mod tls;

pub use self::hyper::{
    DEFAULT_USER_AGENT, HyperTransport, HyperTransportBuilder, TransportSecurity,
};
pub use default_headers::{DefaultHeadersLayer, DefaultHeadersService};
pub use tls::TlsRoots;

use crate::wire::{ResponseEnvelope, TransportFailure, WireRequest};
use async_trait::async_trait;
use std::sync::Arc;

/// Sends one request and buffers the answer.
///
/// Implementations return `Ok` only for 2xx responses; every other outcome is
/// a [`TransportFailure`] classified by [`FailureKind`](crate::FailureKind).
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: WireRequest) -> Result<ResponseEnvelope, TransportFailure>;
}

#[async_trait]
impl<T> Transport for Arc<T>
where
    T: Transport + ?Sized,
{
    async fn execute(&self, request: WireRequest) -> Result<ResponseEnvelope, TransportFailure> {
        (**self).execute(request).await
    }
}
