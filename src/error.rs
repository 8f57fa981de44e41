//! use vaultca::error::CaError;

use thiserror::Error;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, CaError>;

/// Represents errors that can occur while validating requests, building
/// certificates or talking to the key custodian.
///
/// Messages never include private key material.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaError {
    /// The signing request is malformed or its self-signature does not verify.
    #[error("Invalid certificate signing request: {0}")]
    InvalidCsr(String),

    /// The request's public key does not have the configured size.
    #[error("Public key size {actual} does not match expected key size {expected}")]
    KeySizeMismatch { expected: usize, actual: usize },

    /// A hash/padding combination the signer cannot produce.
    #[error("Unsupported signature algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// A hash size that maps to no digest.
    #[error("Unsupported hash size: {0} bits")]
    UnsupportedHash(u32),

    /// The custodian failed to generate a key pair.
    #[error("Key generation failed: {0}")]
    KeyGenerationFailed(String),

    /// The custodian could not be reached or throttled the call.
    #[error("Remote key custodian unavailable: {0}")]
    RemoteUnavailable(String),

    /// A certificate lacks an extension required for issuance.
    #[error("Missing required extension: {0}")]
    MissingExtension(String),

    /// Error due to invalid input.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The named certificate, key or operation does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The custodian rejected a conflicting request.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The operation was cancelled before it finished.
    #[error("Operation cancelled")]
    Cancelled,

    /// Error during data encoding.
    #[error("Failed to encode data: {0}")]
    EncodingError(String),

    /// Error during data decoding.
    #[error("Failed to decode data: {0}")]
    DecodingError(String),
}

impl CaError {
    /// Whether the error is a transient custodian fault worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CaError::RemoteUnavailable(_) | CaError::KeyGenerationFailed(_)
        )
    }
}

impl From<der::Error> for CaError {
    /// Converts a `der::Error` into a `CaError`.
    fn from(err: der::Error) -> Self {
        CaError::DecodingError(err.to_string())
    }
}

impl From<rsa::Error> for CaError {
    fn from(err: rsa::Error) -> Self {
        CaError::InvalidArgument(format!("RSA error: {err}"))
    }
}

impl From<rsa::pkcs8::spki::Error> for CaError {
    fn from(err: rsa::pkcs8::spki::Error) -> Self {
        CaError::DecodingError(err.to_string())
    }
}

impl From<time::error::ComponentRange> for CaError {
    fn from(err: time::error::ComponentRange) -> Self {
        CaError::InvalidArgument(format!("time out of range: {err}"))
    }
}
