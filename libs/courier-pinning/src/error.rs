use thiserror::Error;

/// Failure to derive a pinning hash from a certificate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CertificateHashError {
    /// The certificate could not be parsed or carries no usable public key
    #[error("Unable to retrieve public key: {0}")]
    UnableToRetrievePublicKey(String),

    /// Key algorithm/size combination has no known SPKI header
    #[error("Unsupported public key algorithm {algorithm} ({bits} bits)")]
    UnsupportedAlgorithm {
        /// Dotted OID of the key algorithm
        algorithm: String,
        /// Key size derived from the key material
        bits: usize,
    },
}

/// Pinning configuration and TLS setup errors
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum PinningError {
    /// Two domain configurations share the same domain
    #[error("Duplicate pinning configuration for domain '{0}'")]
    DuplicateDomain(String),

    /// A configured pin is not a base64 SHA-256 digest
    #[error("Invalid pin for domain '{domain}': {reason}")]
    InvalidPin {
        /// Domain the pin was configured for
        domain: String,
        /// Diagnostic message (unstable format, for logging only)
        reason: String,
    },

    /// A pinned certificate could not be hashed
    #[error("Failed to hash pinned certificate for domain '{domain}': {source}")]
    Certificate {
        /// Domain the certificate was configured for
        domain: String,
        /// Underlying hashing failure
        #[source]
        source: CertificateHashError,
    },

    /// TLS verifier or client configuration failed
    #[error("TLS error: {0}")]
    Tls(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl From<rustls::Error> for PinningError {
    fn from(err: rustls::Error) -> Self {
        PinningError::Tls(Box::new(err))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_certificate_error_preserves_source() {
        let err = PinningError::Certificate {
            domain: "example.com".to_owned(),
            source: CertificateHashError::UnsupportedAlgorithm {
                algorithm: "1.3.101.112".to_owned(),
                bits: 256,
            },
        };

        let source = err.source().unwrap();
        let downcast = source.downcast_ref::<CertificateHashError>().unwrap();
        assert!(matches!(
            downcast,
            CertificateHashError::UnsupportedAlgorithm { bits: 256, .. }
        ));
    }

    #[test]
    fn test_tls_error_from_rustls() {
        let err: PinningError = rustls::Error::General("boom".to_owned()).into();
        assert!(matches!(err, PinningError::Tls(_)));
        assert!(err.to_string().contains("boom"));
    }
}
