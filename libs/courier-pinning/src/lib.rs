#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! Public-key pinning for TLS clients
//!
//! This crate decides whether a server's certificate chain may be trusted:
//! - Pins are SHA-256 digests of a certificate's `SubjectPublicKeyInfo`
//!   (RSA-2048/4096, EC P-256/P-384)
//! - Policies are scoped per domain, optionally covering subdomains, and may
//!   expire
//! - The chain must pass webpki validation *and* contain a pinned key
//!   (leaf, intermediate, or the trust anchor the chain verified to)
//!
//! # Example
//!
//! ```ignore
//! use courier_pinning::{
//!     DomainConfiguration, TrustConfiguration, TrustValidator, WebPkiChainEvaluator,
//!     pinned_client_config,
//! };
//! use std::sync::Arc;
//!
//! let trust = TrustConfiguration::new([
//!     DomainConfiguration::from_base64_pins("api.example.com", [PIN])?.with_subdomains(true),
//! ])?;
//! let evaluator = WebPkiChainEvaluator::new(roots.clone())?;
//! let validator = Arc::new(TrustValidator::new(trust, Arc::new(evaluator)));
//!
//! // Hand this to hyper-rustls or tokio-rustls
//! let tls = pinned_client_config(validator, roots)?;
//! ```

pub mod chain;
pub mod config;
pub mod domain;
pub mod error;
pub mod hash;
pub mod validator;
pub mod verifier;

pub use chain::{ChainEvaluator, VerifiedChain, WebPkiChainEvaluator, crypto_provider};
pub use config::{DomainPinConfig, PinningConfig};
pub use domain::{DomainConfiguration, TrustConfiguration};
pub use error::{CertificateHashError, PinningError};
pub use hash::{
    PinHash, PublicKeyAlgorithm, hash_certificate, hash_public_key, hash_subject_public_key_info,
};
pub use validator::{
    AuthenticationChallenge, AuthenticationMethod, ChallengeDisposition, ChallengeResponse,
    ServerCredential, ServerTrust, TrustDecision, TrustValidator,
};
pub use verifier::{PinningServerCertVerifier, pinned_client_config};

// Re-exported so callers can build chains without a direct dependency
pub use rustls_pki_types::CertificateDer;
