//! TLS authentication challenge evaluation.

use crate::chain::{ChainEvaluator, VerifiedChain};
use crate::domain::TrustConfiguration;
use rustls_pki_types::CertificateDer;
use std::sync::Arc;
use std::time::SystemTime;

/// Kind of authentication a peer asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum AuthenticationMethod {
    /// The server presented a certificate chain to be trusted
    ServerTrust,
    /// The server requested a client certificate
    ClientCertificate,
    /// HTTP-level credentials (basic, digest, ...)
    HttpCredentials,
}

/// Certificate chain presented by a server, end-entity first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerTrust {
    chain: Vec<CertificateDer<'static>>,
}

impl ServerTrust {
    #[must_use]
    pub fn new(chain: Vec<CertificateDer<'static>>) -> Self {
        Self { chain }
    }

    /// Capture the chain handed to a rustls verifier
    #[must_use]
    pub fn from_handshake(
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
    ) -> Self {
        let chain = std::iter::once(end_entity)
            .chain(intermediates)
            .map(|cert| cert.clone().into_owned())
            .collect();
        Self { chain }
    }

    #[must_use]
    pub fn chain(&self) -> &[CertificateDer<'static>] {
        &self.chain
    }
}

/// A single authentication challenge raised during connection setup
#[derive(Debug, Clone)]
pub struct AuthenticationChallenge {
    method: AuthenticationMethod,
    host: String,
    server_trust: Option<ServerTrust>,
}

impl AuthenticationChallenge {
    #[must_use]
    pub fn new(
        method: AuthenticationMethod,
        host: impl Into<String>,
        server_trust: Option<ServerTrust>,
    ) -> Self {
        Self {
            method,
            host: host.into(),
            server_trust,
        }
    }

    /// Server-trust challenge for `host` carrying `trust`
    #[must_use]
    pub fn server_trust(host: impl Into<String>, trust: ServerTrust) -> Self {
        Self::new(AuthenticationMethod::ServerTrust, host, Some(trust))
    }

    #[must_use]
    pub fn method(&self) -> AuthenticationMethod {
        self.method
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub fn trust(&self) -> Option<&ServerTrust> {
        self.server_trust.as_ref()
    }
}

/// Credential derived from a trusted, pinned chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCredential {
    trust: ServerTrust,
    pinned_index: usize,
}

impl ServerCredential {
    #[must_use]
    pub fn trust(&self) -> &ServerTrust {
        &self.trust
    }

    /// Position in the evaluated chain of the certificate whose key matched
    /// a pin. Equal to `trust().chain().len()` when only the trust anchor
    /// matched.
    #[must_use]
    pub fn pinned_index(&self) -> usize {
        self.pinned_index
    }
}

/// Outcome of evaluating a server-trust challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustDecision {
    Allow(ServerCredential),
    Block,
    NotPinned,
}

/// What the TLS layer should do with a challenge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeDisposition {
    /// Proceed with the supplied credential
    UseCredential,
    /// Fall back to the platform's default trust handling
    PerformDefaultHandling,
    /// Abort the connection
    CancelAuthenticationChallenge,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeResponse {
    pub disposition: ChallengeDisposition,
    pub credential: Option<ServerCredential>,
}

impl ChallengeResponse {
    fn default_handling() -> Self {
        Self {
            disposition: ChallengeDisposition::PerformDefaultHandling,
            credential: None,
        }
    }
}

/// Decides server trust from pinning policy and chain validity.
///
/// Holds only shared, read-only state; one instance serves any number of
/// concurrent handshakes.
#[derive(Debug, Clone)]
pub struct TrustValidator {
    configuration: Arc<TrustConfiguration>,
    evaluator: Arc<dyn ChainEvaluator>,
}

impl TrustValidator {
    pub fn new(
        configuration: impl Into<Arc<TrustConfiguration>>,
        evaluator: Arc<dyn ChainEvaluator>,
    ) -> Self {
        Self {
            configuration: configuration.into(),
            evaluator,
        }
    }

    #[must_use]
    pub fn configuration(&self) -> &TrustConfiguration {
        &self.configuration
    }

    /// Evaluate `challenge` at the current time.
    ///
    /// Returns `None` when the challenge is not a server-trust challenge or
    /// carries no chain; the caller should use default handling.
    #[must_use]
    pub fn evaluate(&self, challenge: &AuthenticationChallenge) -> Option<TrustDecision> {
        self.evaluate_at(challenge, SystemTime::now())
    }

    /// Evaluate `challenge` as of `now`
    #[must_use]
    pub fn evaluate_at(
        &self,
        challenge: &AuthenticationChallenge,
        now: SystemTime,
    ) -> Option<TrustDecision> {
        if challenge.method != AuthenticationMethod::ServerTrust {
            return None;
        }
        let trust = challenge.server_trust.as_ref()?;
        let host = challenge.host.as_str();

        let Some(domain) = self
            .configuration
            .domain_configuration(host)
            .filter(|config| config.should_validate_certificate_at(host, now))
        else {
            return Some(TrustDecision::NotPinned);
        };

        let Some(verified) = self.evaluator.check_validity(&trust.chain, host, now) else {
            tracing::debug!(host, "certificate chain failed trust evaluation");
            return Some(TrustDecision::Block);
        };

        // Presented certificates first, then the anchor the chain verified to
        let matched = trust
            .chain
            .iter()
            .position(|cert| domain.validate(cert.as_ref()))
            .or_else(|| {
                verified
                    .anchor()
                    .filter(|spki| domain.validate_public_key_info(spki.as_ref()))
                    .map(|_| trust.chain.len())
            });

        Some(match matched {
            Some(pinned_index) => {
                tracing::debug!(host, chain_index = pinned_index, "certificate pin matched");
                TrustDecision::Allow(ServerCredential {
                    trust: trust.clone(),
                    pinned_index,
                })
            }
            None => {
                tracing::debug!(
                    host,
                    chain_len = trust.chain.len(),
                    "no certificate in chain matches a pin"
                );
                TrustDecision::Block
            }
        })
    }

    /// Resolve `challenge` into a TLS disposition at the current time
    #[must_use]
    pub fn handle(&self, challenge: &AuthenticationChallenge) -> ChallengeResponse {
        self.handle_at(challenge, SystemTime::now())
    }

    /// Resolve `challenge` into a TLS disposition as of `now`
    #[must_use]
    pub fn handle_at(
        &self,
        challenge: &AuthenticationChallenge,
        now: SystemTime,
    ) -> ChallengeResponse {
        match self.evaluate_at(challenge, now) {
            Some(TrustDecision::Allow(credential)) => ChallengeResponse {
                disposition: ChallengeDisposition::UseCredential,
                credential: Some(credential),
            },
            Some(TrustDecision::Block) => {
                let disposition = self
                    .configuration
                    .domain_configuration(challenge.host())
                    .map_or(
                        ChallengeDisposition::CancelAuthenticationChallenge,
                        crate::domain::DomainConfiguration::disposition_on_failure,
                    );
                ChallengeResponse {
                    disposition,
                    credential: None,
                }
            }
            Some(TrustDecision::NotPinned) | None => ChallengeResponse::default_handling(),
        }
    }
}
