//! Chain-of-trust evaluation, independent of pinning.

use crate::error::PinningError;
use rustls::RootCertStore;
use rustls::client::VerifierBuilderError;
use rustls_pki_types::{CertificateDer, ServerName, SubjectPublicKeyInfoDer, UnixTime};
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// A chain that verified up to a trust anchor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifiedChain {
    anchor: Option<SubjectPublicKeyInfoDer<'static>>,
}

impl VerifiedChain {
    /// Chain anchored at a root whose DER `SubjectPublicKeyInfo` is `spki`
    #[must_use]
    pub fn anchored(spki: SubjectPublicKeyInfoDer<'static>) -> Self {
        Self { anchor: Some(spki) }
    }

    /// Chain accepted without a known anchor key
    #[must_use]
    pub fn unanchored() -> Self {
        Self::default()
    }

    /// Key of the trust anchor, which the server usually does not send
    #[must_use]
    pub fn anchor(&self) -> Option<&SubjectPublicKeyInfoDer<'static>> {
        self.anchor.as_ref()
    }
}

/// Evaluates whether a presented chain is trusted for `host` at `now`.
///
/// Implementations must be pure with respect to their inputs; the validator
/// calls them concurrently from independent handshakes.
pub trait ChainEvaluator: Send + Sync + fmt::Debug {
    /// `chain[0]` is the end-entity certificate, followed by intermediates
    /// in presentation order. Returns `None` when the chain is not trusted.
    fn check_validity(
        &self,
        chain: &[CertificateDer<'_>],
        host: &str,
        now: SystemTime,
    ) -> Option<VerifiedChain>;
}

/// Get the crypto provider for TLS verification.
///
/// Uses the process default when one is installed, otherwise a fresh
/// aws-lc-rs provider without installing it globally.
pub fn crypto_provider() -> Arc<rustls::crypto::CryptoProvider> {
    rustls::crypto::CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}

/// [`ChainEvaluator`] backed by webpki path building.
///
/// Checks signatures up to a trust anchor, validity periods, key usage and
/// that the end-entity certificate names `host`. The anchor's key is
/// reported so it can be pinned.
#[derive(Debug, Clone)]
pub struct WebPkiChainEvaluator {
    roots: Arc<RootCertStore>,
    provider: Arc<rustls::crypto::CryptoProvider>,
}

impl WebPkiChainEvaluator {
    /// Build an evaluator trusting `roots`.
    ///
    /// # Errors
    ///
    /// Returns [`PinningError::Tls`] if the root store is empty.
    pub fn new(roots: impl Into<Arc<RootCertStore>>) -> Result<Self, PinningError> {
        let roots = roots.into();
        if roots.is_empty() {
            return Err(PinningError::Tls(Box::new(VerifierBuilderError::NoRootAnchors)));
        }
        Ok(Self {
            roots,
            provider: crypto_provider(),
        })
    }

    #[must_use]
    pub fn roots(&self) -> &RootCertStore {
        &self.roots
    }
}

impl ChainEvaluator for WebPkiChainEvaluator {
    fn check_validity(
        &self,
        chain: &[CertificateDer<'_>],
        host: &str,
        now: SystemTime,
    ) -> Option<VerifiedChain> {
        let (end_entity, intermediates) = chain.split_first()?;
        let server_name = match ServerName::try_from(host) {
            Ok(name) => name,
            Err(e) => {
                tracing::debug!(host, error = %e, "host is not a valid server name");
                return None;
            }
        };
        let cert = match webpki::EndEntityCert::try_from(end_entity) {
            Ok(cert) => cert,
            Err(e) => {
                tracing::debug!(host, error = %e, "end-entity certificate does not parse");
                return None;
            }
        };
        let since_epoch = now.duration_since(UNIX_EPOCH).unwrap_or_default();

        let path = match cert.verify_for_usage(
            self.provider.signature_verification_algorithms.all,
            &self.roots.roots,
            intermediates,
            UnixTime::since_unix_epoch(since_epoch),
            webpki::KeyUsage::server_auth(),
            None,
            None,
        ) {
            Ok(path) => path,
            Err(e) => {
                tracing::debug!(host, error = %e, "certificate chain rejected");
                return None;
            }
        };
        if let Err(e) = cert.verify_is_valid_for_subject_name(&server_name) {
            tracing::debug!(host, error = %e, "certificate does not name host");
            return None;
        }

        let anchor = der_sequence(path.anchor().subject_public_key_info.as_ref());
        Some(anchor.map_or_else(VerifiedChain::unanchored, |spki| {
            VerifiedChain::anchored(SubjectPublicKeyInfoDer::from(spki))
        }))
    }
}

/// Wrap SEQUENCE contents in their DER tag and length.
///
/// Trust anchors keep only the contents of their `SubjectPublicKeyInfo`.
fn der_sequence(contents: &[u8]) -> Option<Vec<u8>> {
    let len = u16::try_from(contents.len()).ok()?;
    let mut der = Vec::with_capacity(contents.len() + 4);
    der.push(0x30);
    match u8::try_from(len) {
        Ok(short) if short < 0x80 => der.push(short),
        Ok(long) => der.extend([0x81, long]),
        Err(_) => {
            der.push(0x82);
            der.extend(len.to_be_bytes());
        }
    }
    der.extend_from_slice(contents);
    Some(der)
}
