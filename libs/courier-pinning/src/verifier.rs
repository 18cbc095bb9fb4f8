//! rustls integration: run the trust validator inside the TLS handshake.

use crate::chain::crypto_provider;
use crate::error::PinningError;
use crate::validator::{AuthenticationChallenge, ChallengeDisposition, ServerTrust, TrustValidator};
use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::{CertificateError, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

/// Server certificate verifier that consults a [`TrustValidator`] first.
///
/// - `UseCredential` accepts the chain
/// - `CancelAuthenticationChallenge` fails the handshake
/// - `PerformDefaultHandling` defers to the wrapped webpki verifier
///
/// Handshake signatures are always checked by the wrapped verifier.
#[derive(Debug)]
pub struct PinningServerCertVerifier {
    validator: Arc<TrustValidator>,
    default: Arc<WebPkiServerVerifier>,
}

impl PinningServerCertVerifier {
    #[must_use]
    pub fn new(validator: Arc<TrustValidator>, default: Arc<WebPkiServerVerifier>) -> Self {
        Self { validator, default }
    }

    /// Wrap a default webpki verifier trusting `roots`.
    ///
    /// # Errors
    ///
    /// Returns [`PinningError::Tls`] if the verifier cannot be built.
    pub fn with_roots(
        validator: Arc<TrustValidator>,
        roots: Arc<RootCertStore>,
    ) -> Result<Self, PinningError> {
        let default = WebPkiServerVerifier::builder_with_provider(roots, crypto_provider())
            .build()
            .map_err(|e| PinningError::Tls(Box::new(e)))?;
        Ok(Self::new(validator, default))
    }
}

impl ServerCertVerifier for PinningServerCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let challenge = AuthenticationChallenge::server_trust(
            server_name_host(server_name),
            ServerTrust::from_handshake(end_entity, intermediates),
        );
        let at = UNIX_EPOCH + Duration::from_secs(now.as_secs());

        match self.validator.handle_at(&challenge, at).disposition {
            ChallengeDisposition::UseCredential => Ok(ServerCertVerified::assertion()),
            ChallengeDisposition::CancelAuthenticationChallenge => {
                tracing::warn!(
                    host = challenge.host(),
                    "TLS handshake cancelled by certificate pinning"
                );
                Err(rustls::Error::InvalidCertificate(
                    CertificateError::ApplicationVerificationFailure,
                ))
            }
            ChallengeDisposition::PerformDefaultHandling => self.default.verify_server_cert(
                end_entity,
                intermediates,
                server_name,
                ocsp_response,
                now,
            ),
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.default.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.default.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.default.supported_verify_schemes()
    }
}

fn server_name_host(name: &ServerName<'_>) -> String {
    match name {
        ServerName::DnsName(dns) => dns.as_ref().to_owned(),
        ServerName::IpAddress(ip) => std::net::IpAddr::from(*ip).to_string(),
        _ => String::new(),
    }
}

/// Build a rustls `ClientConfig` whose server verification runs through
/// `validator`, falling back to webpki verification against `roots`.
///
/// # Errors
///
/// Returns [`PinningError::Tls`] if `roots` is empty or protocol versions
/// cannot be configured.
pub fn pinned_client_config(
    validator: Arc<TrustValidator>,
    roots: RootCertStore,
) -> Result<ClientConfig, PinningError> {
    let verifier = PinningServerCertVerifier::with_roots(validator, Arc::new(roots))?;

    let config = ClientConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();

    Ok(config)
}
