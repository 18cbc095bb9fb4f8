//! Per-domain pinning policy.

use crate::error::PinningError;
use crate::hash::{PinHash, hash_certificate, hash_subject_public_key_info};
use crate::validator::ChallengeDisposition;
use std::collections::HashSet;
use std::time::SystemTime;

/// Pinning policy for one domain (and optionally its subdomains).
///
/// Immutable once built; share it freely across handshakes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainConfiguration {
    domain: String,
    enforced: bool,
    include_subdomains: bool,
    pinning_hashes: HashSet<PinHash>,
    expiration: Option<SystemTime>,
}

impl DomainConfiguration {
    /// Create an enforced, exact-match configuration for `domain`.
    ///
    /// The domain is compared ASCII case-insensitively and a trailing root
    /// dot is ignored.
    pub fn new(
        domain: impl Into<String>,
        pinning_hashes: impl IntoIterator<Item = PinHash>,
    ) -> Self {
        let domain = normalize_domain(&domain.into());
        let pinning_hashes: HashSet<PinHash> = pinning_hashes.into_iter().collect();
        if pinning_hashes.is_empty() {
            tracing::warn!(
                domain = %domain,
                "pinning configuration has no hashes; no certificate will ever validate"
            );
        }
        Self {
            domain,
            enforced: true,
            include_subdomains: false,
            pinning_hashes,
            expiration: None,
        }
    }

    /// Create a configuration pinning the public keys of the given
    /// DER-encoded certificates.
    ///
    /// # Errors
    ///
    /// Returns [`PinningError::Certificate`] if any certificate cannot be
    /// hashed.
    pub fn from_certificates<I, C>(
        domain: impl Into<String>,
        certificates: I,
    ) -> Result<Self, PinningError>
    where
        I: IntoIterator<Item = C>,
        C: AsRef<[u8]>,
    {
        let domain = domain.into();
        let hashes = certificates
            .into_iter()
            .map(|der| {
                hash_certificate(der.as_ref()).map_err(|source| PinningError::Certificate {
                    domain: domain.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(domain, hashes))
    }

    /// Create a configuration from base64-encoded SHA-256 SPKI digests.
    ///
    /// # Errors
    ///
    /// Returns [`PinningError::InvalidPin`] if a pin is not valid base64 or
    /// not 32 bytes long.
    pub fn from_base64_pins<I, S>(domain: impl Into<String>, pins: I) -> Result<Self, PinningError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let domain = domain.into();
        let hashes = pins
            .into_iter()
            .map(|pin| {
                PinHash::from_base64(pin.as_ref()).map_err(|reason| PinningError::InvalidPin {
                    domain: domain.clone(),
                    reason,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(domain, hashes))
    }

    /// Set whether a failed pin aborts the handshake (default: true)
    #[must_use]
    pub fn with_enforced(mut self, enforced: bool) -> Self {
        self.enforced = enforced;
        self
    }

    /// Apply the policy to subdomains as well (default: false)
    #[must_use]
    pub fn with_subdomains(mut self, include_subdomains: bool) -> Self {
        self.include_subdomains = include_subdomains;
        self
    }

    /// Stop pinning at `expiration`; afterwards the domain is treated as
    /// unpinned
    #[must_use]
    pub fn with_expiration(mut self, expiration: Option<SystemTime>) -> Self {
        self.expiration = expiration;
        self
    }

    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    #[must_use]
    pub fn is_enforced(&self) -> bool {
        self.enforced
    }

    #[must_use]
    pub fn includes_subdomains(&self) -> bool {
        self.include_subdomains
    }

    #[must_use]
    pub fn expiration(&self) -> Option<SystemTime> {
        self.expiration
    }

    #[must_use]
    pub fn pinning_hashes(&self) -> &HashSet<PinHash> {
        &self.pinning_hashes
    }

    /// Whether this policy covers `host`, ignoring expiration
    #[must_use]
    pub fn should_validate_certificate(&self, host: &str) -> bool {
        let host = host.strip_suffix('.').unwrap_or(host);
        if host.eq_ignore_ascii_case(&self.domain) {
            return true;
        }
        if !self.include_subdomains || host.len() <= self.domain.len() + 1 {
            return false;
        }
        let split = host.len() - self.domain.len();
        host.is_char_boundary(split)
            && host.as_bytes()[split - 1] == b'.'
            && host[split..].eq_ignore_ascii_case(&self.domain)
    }

    /// Whether this policy covers `host` at instant `at`.
    ///
    /// Pins expire open: at or after the expiration instant the domain is no
    /// longer pinned.
    #[must_use]
    pub fn should_validate_certificate_at(&self, host: &str, at: SystemTime) -> bool {
        if let Some(expiration) = self.expiration
            && at >= expiration
        {
            return false;
        }
        self.should_validate_certificate(host)
    }

    /// Whether the DER certificate's public key is pinned.
    ///
    /// Certificates that cannot be hashed never validate.
    #[must_use]
    pub fn validate(&self, certificate: &[u8]) -> bool {
        match hash_certificate(certificate) {
            Ok(hash) => self.pinning_hashes.contains(&hash),
            Err(e) => {
                tracing::debug!(domain = %self.domain, error = %e, "certificate not hashable");
                false
            }
        }
    }

    /// Whether a DER `SubjectPublicKeyInfo`, such as a trust anchor's key, is
    /// pinned
    #[must_use]
    pub fn validate_public_key_info(&self, spki: &[u8]) -> bool {
        match hash_subject_public_key_info(spki) {
            Ok(hash) => self.pinning_hashes.contains(&hash),
            Err(e) => {
                tracing::debug!(domain = %self.domain, error = %e, "public key not hashable");
                false
            }
        }
    }

    /// Disposition to apply when no certificate in the chain is pinned
    #[must_use]
    pub fn disposition_on_failure(&self) -> ChallengeDisposition {
        if self.enforced {
            ChallengeDisposition::CancelAuthenticationChallenge
        } else {
            tracing::warn!(
                domain = %self.domain,
                "certificate pin validation failed; proceeding because pinning is not enforced"
            );
            ChallengeDisposition::PerformDefaultHandling
        }
    }

    fn overlaps(&self, other: &DomainConfiguration) -> bool {
        self.should_validate_certificate(&other.domain)
            || other.should_validate_certificate(&self.domain)
    }
}

fn normalize_domain(domain: &str) -> String {
    domain.strip_suffix('.').unwrap_or(domain).to_ascii_lowercase()
}

/// Ordered set of domain policies.
///
/// Lookup is first-match-wins in registration order.
#[derive(Debug, Clone, Default)]
pub struct TrustConfiguration {
    domains: Vec<DomainConfiguration>,
}

impl TrustConfiguration {
    /// Build a configuration from domain policies, keeping their order.
    ///
    /// # Errors
    ///
    /// Returns [`PinningError::DuplicateDomain`] if two policies name the
    /// same domain.
    pub fn new(
        domains: impl IntoIterator<Item = DomainConfiguration>,
    ) -> Result<Self, PinningError> {
        let mut ordered: Vec<DomainConfiguration> = Vec::new();
        for candidate in domains {
            if ordered.iter().any(|existing| existing.domain == candidate.domain) {
                return Err(PinningError::DuplicateDomain(candidate.domain));
            }
            for existing in ordered.iter().filter(|existing| existing.overlaps(&candidate)) {
                tracing::warn!(
                    first = %existing.domain,
                    second = %candidate.domain,
                    "overlapping pinning scopes; the earlier configuration wins"
                );
            }
            ordered.push(candidate);
        }
        Ok(Self { domains: ordered })
    }

    /// First policy covering `host`, if any
    #[must_use]
    pub fn domain_configuration(&self, host: &str) -> Option<&DomainConfiguration> {
        self.domains
            .iter()
            .find(|config| config.should_validate_certificate(host))
    }

    #[must_use]
    pub fn domains(&self) -> &[DomainConfiguration] {
        &self.domains
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}
