use crate::domain::{DomainConfiguration, TrustConfiguration};
use crate::error::PinningError;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Declarative pinning configuration, usually loaded from a config file.
///
/// ```json
/// {
///   "domains": [
///     {
///       "domain": "api.example.com",
///       "pins": ["nyRSibS9vPDwbPw9ad0sgtBHQ/ZpfB85rug2xV32564="],
///       "include_subdomains": true,
///       "expires": "2030-01-01T00:00:00Z"
///     }
///   ]
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PinningConfig {
    #[serde(default)]
    pub domains: Vec<DomainPinConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DomainPinConfig {
    pub domain: String,

    /// Base64 SHA-256 digests of pinned `SubjectPublicKeyInfo`s
    pub pins: Vec<String>,

    /// Abort the handshake when no pin matches (default: true)
    #[serde(default = "default_enforced")]
    pub enforced: bool,

    #[serde(default)]
    pub include_subdomains: bool,

    /// RFC 3339 instant after which the domain is no longer pinned
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub expires: Option<SystemTime>,
}

fn default_enforced() -> bool {
    true
}

impl PinningConfig {
    /// Validate pins and build the runtime configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PinningError::InvalidPin`] for malformed pins and
    /// [`PinningError::DuplicateDomain`] for repeated domains.
    pub fn into_trust_configuration(self) -> Result<TrustConfiguration, PinningError> {
        let domains = self
            .domains
            .into_iter()
            .map(DomainPinConfig::into_domain_configuration)
            .collect::<Result<Vec<_>, _>>()?;
        TrustConfiguration::new(domains)
    }
}

impl DomainPinConfig {
    /// # Errors
    ///
    /// Returns [`PinningError::InvalidPin`] if a pin does not decode to a
    /// 32-byte digest.
    pub fn into_domain_configuration(self) -> Result<DomainConfiguration, PinningError> {
        Ok(DomainConfiguration::from_base64_pins(self.domain, &self.pins)?
            .with_enforced(self.enforced)
            .with_subdomains(self.include_subdomains)
            .with_expiration(self.expires))
    }
}
