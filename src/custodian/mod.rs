//! Interface to the remote key custodian.
//!
//! The custodian holds every CA private key. It creates keys behind pending
//! certificate operations, hands out signing requests for them, merges the
//! signed certificates back and signs digests on request. The engine never
//! sees private key material.

pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use bon::Builder;

use crate::cert::params::DistinguishedName;
use crate::cert::{Certificate, HashAlgorithm};
use crate::error::Result;

/// Addresses one version of a custodian-held key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct KeyLocator {
    pub key_id: String,
    pub version: String,
}

impl std::fmt::Display for KeyLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.key_id, self.version)
    }
}

/// Who signs the certificate for a pending operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PolicyIssuer {
    /// The custodian self-signs a placeholder certificate.
    SelfSigned,
    /// The certificate is signed elsewhere and merged later; the custodian
    /// answers with a signing request.
    Unknown,
}

/// Certificate policy attached to a key creation request.
///
/// # Fields
/// * `subject` - Subject of the certificate the custodian will track.
/// * `key_size` - RSA modulus length in bits.
/// * `issuer` - Self-signed placeholder or externally signed.
/// * `reuse_key` - Reuse the key of the current version instead of generating a new one.
/// * `exportable` - Whether the private key may ever leave the custodian.
/// * `tags` - Free-form labels stored with the certificate.
#[derive(Clone, Debug, PartialEq, Eq, Builder)]
pub struct CertificatePolicy {
    pub subject: DistinguishedName,
    #[builder(default = 2048)]
    pub key_size: usize,
    pub issuer: PolicyIssuer,
    #[builder(default)]
    pub reuse_key: bool,
    #[builder(default)]
    pub exportable: bool,
    #[builder(default)]
    pub tags: BTreeMap<String, String>,
}

/// Handle of a pending certificate operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperationHandle {
    pub certificate_id: String,
    pub request_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OperationStatus {
    InProgress,
    Completed,
    Failed(String),
}

/// Result of polling a pending operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperationState {
    pub status: OperationStatus,
    /// DER signing request over the operation's key, when the custodian offers one.
    pub csr: Option<Vec<u8>>,
}

/// Current version of a certificate held by the custodian.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CertificateBundle {
    pub version_id: String,
    pub cert_der: Vec<u8>,
    pub key: KeyLocator,
    pub enabled: bool,
}

impl CertificateBundle {
    pub fn certificate(&self) -> Result<Certificate> {
        Certificate::from_der(&self.cert_der)
    }
}

/// Signature algorithms the custodian can apply to a digest.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemoteSignatureAlgorithm {
    /// RSASSA-PKCS1-v1_5 with SHA-256.
    Rs256,
    /// RSASSA-PKCS1-v1_5 with SHA-384.
    Rs384,
    /// RSASSA-PKCS1-v1_5 with SHA-512.
    Rs512,
}

impl RemoteSignatureAlgorithm {
    /// The PKCS#1 v1.5 algorithm for `hash`; there is none for SHA-1.
    pub fn pkcs1_for(hash: HashAlgorithm) -> Option<Self> {
        match hash {
            HashAlgorithm::Sha1 => None,
            HashAlgorithm::Sha256 => Some(Self::Rs256),
            HashAlgorithm::Sha384 => Some(Self::Rs384),
            HashAlgorithm::Sha512 => Some(Self::Rs512),
        }
    }

    pub fn hash(&self) -> HashAlgorithm {
        match self {
            Self::Rs256 => HashAlgorithm::Sha256,
            Self::Rs384 => HashAlgorithm::Sha384,
            Self::Rs512 => HashAlgorithm::Sha512,
        }
    }
}

impl std::fmt::Display for RemoteSignatureAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Rs256 => "RS256",
            Self::Rs384 => "RS384",
            Self::Rs512 => "RS512",
        })
    }
}

/// Remote key custodian.
///
/// Implementations are expected to serialise conflicting operations on the
/// same certificate themselves. Repeated `sign` and `merge_certificate` calls
/// with the same input must be safe or fail with [`crate::error::CaError::Conflict`].
#[async_trait]
pub trait KeyCustodian: Send + Sync {
    /// Starts creating a key and pending certificate under `certificate_id`.
    async fn create_key(
        &self,
        certificate_id: &str,
        policy: &CertificatePolicy,
    ) -> Result<OperationHandle>;

    async fn poll_operation(&self, handle: &OperationHandle) -> Result<OperationState>;

    /// Deletes the pending operation of `certificate_id`; `NotFound` when there is none.
    async fn delete_operation(&self, certificate_id: &str) -> Result<()>;

    /// Latest enabled version of the certificate; `NotFound` when there is none.
    async fn get_certificate(&self, certificate_id: &str) -> Result<CertificateBundle>;

    /// Completes the pending operation with a certificate signed elsewhere.
    async fn merge_certificate(
        &self,
        certificate_id: &str,
        cert_der: &[u8],
    ) -> Result<CertificateBundle>;

    /// Signs a digest with the referenced key.
    async fn sign(
        &self,
        key: &KeyLocator,
        digest: &[u8],
        algorithm: RemoteSignatureAlgorithm,
    ) -> Result<Vec<u8>>;

    /// Number of versions stored under `certificate_id`, zero when unknown.
    async fn list_certificate_versions(&self, certificate_id: &str) -> Result<usize>;

    async fn disable_certificate(&self, certificate_id: &str, version_id: &str) -> Result<()>;

    /// Releases transport resources. Called once at shutdown.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
