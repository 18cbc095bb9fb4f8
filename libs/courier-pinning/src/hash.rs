//! Public-key pinning hashes.
//!
//! A pin is the SHA-256 digest of a certificate's DER-encoded
//! `SubjectPublicKeyInfo`. The SPKI is rebuilt from a fixed per-algorithm
//! ASN.1 header and the raw subject-public-key bits, so two certificates
//! sharing a key share a pin regardless of serial, validity or issuer.

use crate::error::CertificateHashError;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use x509_parser::prelude::{FromDer, SubjectPublicKeyInfo, X509Certificate};
use x509_parser::public_key::PublicKey;

const OID_RSA_ENCRYPTION: &str = "1.2.840.113549.1.1.1";
const OID_EC_PUBLIC_KEY: &str = "1.2.840.10045.2.1";

/// Uncompressed SEC1 point marker
const EC_POINT_UNCOMPRESSED: u8 = 0x04;

const RSA_2048_HEADER: &[u8] = &[
    0x30, 0x82, 0x01, 0x22, 0x30, 0x0d, 0x06, 0x09, 0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01,
    0x01, 0x05, 0x00, 0x03, 0x82, 0x01, 0x0f, 0x00,
];

const RSA_4096_HEADER: &[u8] = &[
    0x30, 0x82, 0x02, 0x22, 0x30, 0x0d, 0x06, 0x09, 0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01,
    0x01, 0x05, 0x00, 0x03, 0x82, 0x02, 0x0f, 0x00,
];

const EC_P256_HEADER: &[u8] = &[
    0x30, 0x59, 0x30, 0x13, 0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01, 0x06, 0x08, 0x2a,
    0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07, 0x03, 0x42, 0x00,
];

const EC_P384_HEADER: &[u8] = &[
    0x30, 0x76, 0x30, 0x10, 0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01, 0x06, 0x05, 0x2b,
    0x81, 0x04, 0x00, 0x22, 0x03, 0x62, 0x00,
];

/// Key algorithms with a known SPKI header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PublicKeyAlgorithm {
    Rsa2048,
    Rsa4096,
    EcP256,
    EcP384,
}

impl PublicKeyAlgorithm {
    /// Resolve an algorithm from its OID and key size in bits.
    ///
    /// # Errors
    ///
    /// Returns [`CertificateHashError::UnsupportedAlgorithm`] for any
    /// combination outside RSA-2048/4096 and EC P-256/P-384.
    pub fn from_oid_and_size(oid: &str, bits: usize) -> Result<Self, CertificateHashError> {
        match (oid, bits) {
            (OID_RSA_ENCRYPTION, 2048) => Ok(Self::Rsa2048),
            (OID_RSA_ENCRYPTION, 4096) => Ok(Self::Rsa4096),
            (OID_EC_PUBLIC_KEY, 256) => Ok(Self::EcP256),
            (OID_EC_PUBLIC_KEY, 384) => Ok(Self::EcP384),
            _ => Err(CertificateHashError::UnsupportedAlgorithm {
                algorithm: oid.to_owned(),
                bits,
            }),
        }
    }

    /// DER prefix of the `SubjectPublicKeyInfo` up to the key bits
    #[must_use]
    pub fn asn1_header(self) -> &'static [u8] {
        match self {
            Self::Rsa2048 => RSA_2048_HEADER,
            Self::Rsa4096 => RSA_4096_HEADER,
            Self::EcP256 => EC_P256_HEADER,
            Self::EcP384 => EC_P384_HEADER,
        }
    }
}

/// SHA-256 digest of a certificate's `SubjectPublicKeyInfo`.
///
/// Displays and parses as standard base64, the format pins are usually
/// published in.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PinHash([u8; 32]);

impl PinHash {
    /// Wrap a raw 32-byte digest
    #[must_use]
    pub const fn new(digest: [u8; 32]) -> Self {
        Self(digest)
    }

    /// Parse a base64-encoded digest.
    ///
    /// # Errors
    ///
    /// Returns a diagnostic message if the input is not valid base64 or does
    /// not decode to exactly 32 bytes.
    pub fn from_base64(encoded: &str) -> Result<Self, String> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| format!("invalid base64: {e}"))?;
        let digest: [u8; 32] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| format!("expected 32 bytes, got {}", b.len()))?;
        Ok(Self(digest))
    }

    #[must_use]
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<[u8; 32]> for PinHash {
    fn from(digest: [u8; 32]) -> Self {
        Self(digest)
    }
}

impl FromStr for PinHash {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_base64(s)
    }
}

impl fmt::Display for PinHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

impl fmt::Debug for PinHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PinHash({})", self.to_base64())
    }
}

/// Compute the pinning hash of a DER-encoded X.509 certificate.
///
/// # Errors
///
/// - [`CertificateHashError::UnableToRetrievePublicKey`] if the certificate
///   does not parse or its key cannot be decoded
/// - [`CertificateHashError::UnsupportedAlgorithm`] if the key is not
///   RSA-2048, RSA-4096, EC P-256 or EC P-384
pub fn hash_certificate(der: &[u8]) -> Result<PinHash, CertificateHashError> {
    let (_, cert) = X509Certificate::from_der(der)
        .map_err(|e| CertificateHashError::UnableToRetrievePublicKey(e.to_string()))?;
    hash_spki(cert.public_key())
}

/// Compute the pinning hash of a DER-encoded `SubjectPublicKeyInfo`.
///
/// Used for trust anchors, which are known only by their key.
///
/// # Errors
///
/// Same as [`hash_certificate`].
pub fn hash_subject_public_key_info(der: &[u8]) -> Result<PinHash, CertificateHashError> {
    let (_, spki) = SubjectPublicKeyInfo::from_der(der)
        .map_err(|e| CertificateHashError::UnableToRetrievePublicKey(e.to_string()))?;
    hash_spki(&spki)
}

fn hash_spki(spki: &SubjectPublicKeyInfo<'_>) -> Result<PinHash, CertificateHashError> {
    let oid = spki.algorithm.algorithm.to_id_string();
    let raw_key: &[u8] = &spki.subject_public_key.data;

    let bits = match oid.as_str() {
        OID_RSA_ENCRYPTION => match spki.parsed() {
            Ok(PublicKey::RSA(rsa)) => rsa_modulus_bits(rsa.modulus),
            Ok(_) => {
                return Err(CertificateHashError::UnableToRetrievePublicKey(
                    "rsaEncryption key did not decode as RSA".to_owned(),
                ));
            }
            Err(e) => {
                return Err(CertificateHashError::UnableToRetrievePublicKey(
                    e.to_string(),
                ));
            }
        },
        OID_EC_PUBLIC_KEY => {
            ec_field_bits(raw_key).ok_or_else(|| CertificateHashError::UnsupportedAlgorithm {
                algorithm: format!("{oid} (compressed point)"),
                bits: raw_key.len().saturating_sub(1) * 8,
            })?
        }
        _ => raw_key.len() * 8,
    };

    let algorithm = PublicKeyAlgorithm::from_oid_and_size(&oid, bits)?;
    Ok(hash_public_key(algorithm, raw_key))
}

/// Hash raw subject-public-key bits under the given algorithm's SPKI header
#[must_use]
pub fn hash_public_key(algorithm: PublicKeyAlgorithm, raw_key: &[u8]) -> PinHash {
    let mut hasher = Sha256::new();
    hasher.update(algorithm.asn1_header());
    hasher.update(raw_key);
    PinHash(hasher.finalize().into())
}

fn rsa_modulus_bits(modulus: &[u8]) -> usize {
    let significant = modulus.iter().skip_while(|b| **b == 0).count();
    significant * 8
}

/// Field size of an uncompressed SEC1 point, `None` for any other encoding
fn ec_field_bits(point: &[u8]) -> Option<usize> {
    match point.split_first() {
        Some((&EC_POINT_UNCOMPRESSED, coordinates)) => Some(coordinates.len() * 4),
        _ => None,
    }
}
