pub mod extensions;
pub mod params;

use const_oid::ObjectIdentifier;
use der::asn1::Any;
use der::{Decode, Encode, EncodePem};
use extensions::{BasicConstraints, ExtendedKeyUsage, SubjectKeyIdentifier, ToAndFromX509Extension};
use params::{DistinguishedName, ExtensionParam, Validity};
use sha2::Digest;
use x509_cert::certificate::CertificateInner;
use x509_cert::spki::AlgorithmIdentifierOwned;

use crate::error::{CaError, Result};
use crate::key::PublicKey;

/// Digest used for the certificate signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    /// Picks the digest for a requested hash size, rounding up to the nearest
    /// tier: ≤160 → SHA-1, ≤256 → SHA-256, ≤384 → SHA-384, else SHA-512.
    pub fn from_bits(bits: u32) -> Result<Self> {
        match bits {
            0 => Err(CaError::UnsupportedHash(bits)),
            1..=160 => Ok(HashAlgorithm::Sha1),
            161..=256 => Ok(HashAlgorithm::Sha256),
            257..=384 => Ok(HashAlgorithm::Sha384),
            _ => Ok(HashAlgorithm::Sha512),
        }
    }

    pub fn output_len(&self) -> usize {
        match self {
            HashAlgorithm::Sha1 => 20,
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha384 => 48,
            HashAlgorithm::Sha512 => 64,
        }
    }

    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            HashAlgorithm::Sha1 => sha1::Sha1::digest(data).to_vec(),
            HashAlgorithm::Sha256 => sha2::Sha256::digest(data).to_vec(),
            HashAlgorithm::Sha384 => sha2::Sha384::digest(data).to_vec(),
            HashAlgorithm::Sha512 => sha2::Sha512::digest(data).to_vec(),
        }
    }

    /// PKCS#1 v1.5 padding scheme carrying this digest's DigestInfo prefix.
    pub(crate) fn pkcs1v15(&self) -> rsa::Pkcs1v15Sign {
        match self {
            HashAlgorithm::Sha1 => rsa::Pkcs1v15Sign::new::<sha1::Sha1>(),
            HashAlgorithm::Sha256 => rsa::Pkcs1v15Sign::new::<sha2::Sha256>(),
            HashAlgorithm::Sha384 => rsa::Pkcs1v15Sign::new::<sha2::Sha384>(),
            HashAlgorithm::Sha512 => rsa::Pkcs1v15Sign::new::<sha2::Sha512>(),
        }
    }
}

impl std::fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            HashAlgorithm::Sha1 => "SHA-1",
            HashAlgorithm::Sha256 => "SHA-256",
            HashAlgorithm::Sha384 => "SHA-384",
            HashAlgorithm::Sha512 => "SHA-512",
        };
        f.write_str(name)
    }
}

/// Represents the supported signature algorithms for certificates.
///
/// This enum provides a mapping to the corresponding OIDs for each algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    /// SHA-1 with RSA encryption.
    Sha1WithRSA,
    /// SHA-256 with RSA encryption.
    Sha256WithRSA,
    /// SHA-384 with RSA encryption.
    Sha384WithRSA,
    /// SHA-512 with RSA encryption.
    Sha512WithRSA,
}

impl SignatureAlgorithm {
    pub fn rsa_pkcs1(hash: HashAlgorithm) -> Self {
        match hash {
            HashAlgorithm::Sha1 => SignatureAlgorithm::Sha1WithRSA,
            HashAlgorithm::Sha256 => SignatureAlgorithm::Sha256WithRSA,
            HashAlgorithm::Sha384 => SignatureAlgorithm::Sha384WithRSA,
            HashAlgorithm::Sha512 => SignatureAlgorithm::Sha512WithRSA,
        }
    }

    /// Looks up the algorithm for a signature OID, as found in a signing request.
    pub fn from_oid(oid: ObjectIdentifier) -> Option<Self> {
        [
            SignatureAlgorithm::Sha1WithRSA,
            SignatureAlgorithm::Sha256WithRSA,
            SignatureAlgorithm::Sha384WithRSA,
            SignatureAlgorithm::Sha512WithRSA,
        ]
        .into_iter()
        .find(|alg| alg.oid() == oid)
    }

    pub fn oid(&self) -> ObjectIdentifier {
        match self {
            Self::Sha1WithRSA => const_oid::db::rfc5912::SHA_1_WITH_RSA_ENCRYPTION,
            Self::Sha256WithRSA => const_oid::db::rfc5912::SHA_256_WITH_RSA_ENCRYPTION,
            Self::Sha384WithRSA => const_oid::db::rfc5912::SHA_384_WITH_RSA_ENCRYPTION,
            Self::Sha512WithRSA => const_oid::db::rfc5912::SHA_512_WITH_RSA_ENCRYPTION,
        }
    }

    pub fn hash(&self) -> HashAlgorithm {
        match self {
            SignatureAlgorithm::Sha1WithRSA => HashAlgorithm::Sha1,
            SignatureAlgorithm::Sha256WithRSA => HashAlgorithm::Sha256,
            SignatureAlgorithm::Sha384WithRSA => HashAlgorithm::Sha384,
            SignatureAlgorithm::Sha512WithRSA => HashAlgorithm::Sha512,
        }
    }
}

impl From<SignatureAlgorithm> for AlgorithmIdentifierOwned {
    /// Converts a `SignatureAlgorithm` into an `AlgorithmIdentifierOwned`.
    ///
    /// RSA PKCS#1 v1.5 identifiers carry an explicit NULL parameter.
    fn from(value: SignatureAlgorithm) -> Self {
        AlgorithmIdentifierOwned {
            oid: value.oid(),
            parameters: Some(Any::null()),
        }
    }
}

/// Represents an X.509 certificate.
///
/// This struct provides methods to encode the certificate into DER or PEM formats
/// and to read back the fields the issuance logic depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    /// The inner representation of the certificate.
    pub inner: CertificateInner,
}

impl Certificate {
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let inner = CertificateInner::from_der(der)
            .map_err(|e| CaError::DecodingError(format!("certificate: {e}")))?;
        Ok(Self { inner })
    }

    /// Encodes the certificate into DER format.
    pub fn to_der(&self) -> Result<Vec<u8>> {
        self.inner
            .to_der()
            .map_err(|e| CaError::EncodingError(e.to_string()))
    }

    /// Encodes the certificate into PEM format.
    pub fn to_pem(&self) -> Result<String> {
        self.inner
            .to_pem(pkcs8::LineEnding::LF)
            .map_err(|e| CaError::EncodingError(e.to_string()))
    }

    pub fn subject(&self) -> DistinguishedName {
        DistinguishedName::from_x509_name(&self.inner.tbs_certificate.subject)
    }

    pub fn issuer(&self) -> DistinguishedName {
        DistinguishedName::from_x509_name(&self.inner.tbs_certificate.issuer)
    }

    /// Serial number bytes as they appear in the DER INTEGER.
    pub fn serial_number(&self) -> &[u8] {
        self.inner.tbs_certificate.serial_number.as_bytes()
    }

    pub fn validity(&self) -> Result<Validity> {
        Validity::from_x509(&self.inner.tbs_certificate.validity)
    }

    pub fn public_key(&self) -> Result<PublicKey> {
        PublicKey::from_x509spki(&self.inner.tbs_certificate.subject_public_key_info)
    }

    pub fn extensions(&self) -> Vec<ExtensionParam> {
        self.inner
            .tbs_certificate
            .extensions
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(ExtensionParam::from_x509)
            .collect()
    }

    /// Decodes the extension of type `E`, if present.
    pub fn extension<E: ToAndFromX509Extension>(&self) -> Result<Option<E>> {
        self.extensions()
            .iter()
            .find(|ext| ext.oid == E::OID)
            .map(|ext| ext.to_extension())
            .transpose()
    }

    /// The Subject Key Identifier value; issuance under this certificate needs it.
    pub fn subject_key_identifier(&self) -> Result<Vec<u8>> {
        self.extension::<SubjectKeyIdentifier>()?
            .map(|ski| ski.0)
            .ok_or_else(|| CaError::MissingExtension("subject key identifier".to_string()))
    }

    pub fn basic_constraints(&self) -> Result<Option<BasicConstraints>> {
        self.extension::<BasicConstraints>()
    }

    pub fn extended_key_usage(&self) -> Result<Option<ExtendedKeyUsage>> {
        self.extension::<ExtendedKeyUsage>()
    }
}

/// A certificate produced by the builder and its signer.
///
/// Immutable once created; the DER bytes are what gets handed to callers.
#[derive(Debug, Clone)]
pub struct SignedCertificate {
    certificate: Certificate,
    der: Vec<u8>,
}

impl SignedCertificate {
    pub(crate) fn new(certificate: Certificate) -> Result<Self> {
        let der = certificate.to_der()?;
        Ok(Self { certificate, der })
    }

    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    pub fn serial_number(&self) -> &[u8] {
        self.certificate.serial_number()
    }

    pub fn to_der(&self) -> &[u8] {
        &self.der
    }

    pub fn into_der(self) -> Vec<u8> {
        self.der
    }

    pub fn to_pem(&self) -> Result<String> {
        self.certificate.to_pem()
    }
}
