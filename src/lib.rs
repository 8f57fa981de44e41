//! # vaultca - A Certificate Authority Whose Keys Stay in the Vault
//!
//! vaultca issues X.509 certificates signed by CA keys that live in a remote
//! key custodian (a cloud key vault or HSM). The private key never reaches
//! this process: certificates are built locally with rustcrypto libraries,
//! their digest is sent to the custodian, and the returned signature is
//! assembled into the final certificate.
//!
//! ## Key Features
//!
//! - **PKCS#10 validation**: decode DER, PEM or bare base64 requests and verify their self-signature
//! - **X.509v3 extensions**: Basic Constraints, Subject/Authority Key Identifier, Key Usage,
//!   Extended Key Usage, CRL Distribution Points and Authority Information Access
//! - **Remote signing**: a [`signer::Signer`] capability with retrying, cancellable
//!   custodian-backed signatures
//! - **CA bootstrap**: create a root certificate from a custodian-held key without ever exporting it
//! - **In-memory custodian**: a complete custodian for tests and local development
//!
//! ## Quick Start
//!
//! ### Bootstrapping the issuing CA and signing a request
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use vaultca::{
//!     authority::CertificateAuthority,
//!     cert::{HashAlgorithm, params::{CertificateRole, DistinguishedName}},
//!     config::CaConfig,
//!     csr::build_request,
//!     custodian::memory::InMemoryCustodian,
//!     key::KeyPair,
//! };
//!
//! # async fn run() -> Result<(), vaultca::error::CaError> {
//! let config = CaConfig::builder()
//!     .issuing_ca("IssuingCA")
//!     .ca_key_size(2048)
//!     .extension_url_template("http://pki.example.com/%serial%.crl")
//!     .build();
//! let ca = CertificateAuthority::new(config, Arc::new(InMemoryCustodian::new()))?;
//!
//! ca.create_ca_certificate(&DistinguishedName::parse("CN=Example Issuing CA")?)
//!     .await?;
//!
//! // A device generates its own key and request.
//! let device_key = KeyPair::generate_rsa(2048)?;
//! let csr = build_request(
//!     &DistinguishedName::parse("CN=device1")?,
//!     &device_key,
//!     HashAlgorithm::Sha256,
//! )?;
//!
//! let certificate = ca.sign_request(&csr, CertificateRole::Leaf).await?;
//! println!("{}", certificate.to_pem()?);
//!
//! ca.shutdown().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! All fallible operations return [`error::CaError`]. Transient custodian
//! faults are retried internally; everything else is reported at once:
//!
//! ```rust
//! use vaultca::{csr, error::CaError};
//!
//! match csr::validate(b"not a request") {
//!     Ok(request) => println!("request from {}", request.subject),
//!     Err(CaError::InvalidCsr(msg)) => println!("rejected: {}", msg),
//!     Err(e) => println!("Other error: {}", e),
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`authority`]: The certificate authority service
//! - [`bootstrap`]: CA certificate bootstrap against the custodian
//! - [`cert`]: Certificates, algorithms, parameters and extensions
//! - [`config`]: Configuration and its defaults
//! - [`csr`]: Signing request validation and construction
//! - [`custodian`]: The remote key custodian interface and an in-memory implementation
//! - [`error`]: Error types
//! - [`issuer`]: The certificate builder
//! - [`key`]: RSA public keys and local key pairs
//! - [`retry`]: Backoff, polling and cancellation
//! - [`signer`]: Local and remote signers
//! - [`tbs_certificate`]: The unsigned certificate body and the signing step

pub mod authority;
pub mod bootstrap;
pub mod cert;
pub mod config;
pub mod csr;
pub mod custodian;
pub mod error;
pub mod issuer;
pub mod key;
pub mod pem_utils;
pub mod retry;
pub mod signer;
pub mod tbs_certificate;
