//! Root certificates and rustls client configuration for [`HyperTransport`](super::HyperTransport).
//!
//! Native roots are loaded from the OS store once per process and cached.

use crate::error::TransportBuildError;
use courier_pinning::{TrustValidator, crypto_provider, pinned_client_config};
use rustls::{ClientConfig, RootCertStore};
use rustls_pki_types::CertificateDer;
use std::sync::{Arc, OnceLock};

/// Always stores Ok; an empty vec means no certs were found (warned, not errored).
static NATIVE_ROOTS_CACHE: OnceLock<Vec<CertificateDer<'static>>> = OnceLock::new();

#[cfg(test)]
static LOAD_COUNT: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);

fn load_native_certs_inner() -> Vec<CertificateDer<'static>> {
    #[cfg(test)]
    LOAD_COUNT.fetch_add(1, std::sync::atomic::Ordering::SeqCst);

    let result = rustls_native_certs::load_native_certs();
    for err in &result.errors {
        tracing::warn!(error = %err, "error loading native root certificate");
    }

    let certs = result.certs;
    if certs.is_empty() {
        tracing::warn!("no native root CA certificates found");
    } else {
        tracing::debug!(count = certs.len(), "loaded native root certificates");
    }
    certs
}

/// Cached native root certificates (may be empty)
pub fn native_root_certs() -> &'static [CertificateDer<'static>] {
    NATIVE_ROOTS_CACHE
        .get_or_init(load_native_certs_inner)
        .as_slice()
}

/// Trust anchors for server certificate validation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum TlsRoots {
    /// OS native certificate store
    #[default]
    Native,
    /// Explicit DER-encoded CA certificates
    Custom(Vec<CertificateDer<'static>>),
}

impl TlsRoots {
    /// Build a root store from these anchors.
    ///
    /// # Errors
    ///
    /// Returns [`TransportBuildError::Tls`] if no certificate could be added.
    pub fn root_store(&self) -> Result<RootCertStore, TransportBuildError> {
        let certs = match self {
            Self::Native => native_root_certs(),
            Self::Custom(certs) => certs.as_slice(),
        };
        if certs.is_empty() {
            return Err(TransportBuildError::Tls(
                "no root CA certificates available".into(),
            ));
        }

        let mut store = RootCertStore::empty();
        let (added, ignored) = store.add_parsable_certificates(certs.iter().cloned());
        if ignored > 0 {
            tracing::warn!(added, ignored, "some root certificates could not be parsed");
        }
        if added == 0 {
            return Err(TransportBuildError::Tls(
                format!(
                    "no valid root CA certificates parsed (found {}, all failed to parse)",
                    certs.len()
                )
                .into(),
            ));
        }
        Ok(store)
    }
}

/// rustls configuration for the given roots, pinned when a validator is given.
///
/// # Errors
///
/// Returns [`TransportBuildError::Tls`] if the root store or the protocol
/// configuration cannot be built.
pub fn client_config(
    roots: &TlsRoots,
    validator: Option<Arc<TrustValidator>>,
) -> Result<ClientConfig, TransportBuildError> {
    let store = roots.root_store()?;
    match validator {
        Some(validator) => Ok(pinned_client_config(validator, store)?),
        None => Ok(ClientConfig::builder_with_provider(crypto_provider())
            .with_safe_default_protocol_versions()?
            .with_root_certificates(store)
            .with_no_client_auth()),
    }
}
