//! PKCS#10 certificate signing requests.

use der::asn1::BitString;
use der::{Decode, Encode};
use tracing::debug;
use x509_cert::request::{CertReq, CertReqInfo, Version};

use crate::cert::params::DistinguishedName;
use crate::cert::{HashAlgorithm, SignatureAlgorithm};
use crate::error::{CaError, Result};
use crate::key::{KeyPair, PublicKey};

/// A signing request whose self-signature has been verified.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SigningRequest {
    pub subject: DistinguishedName,
    pub public_key: PublicKey,
    pub signature_algorithm: SignatureAlgorithm,
    /// The request exactly as received.
    pub der: Vec<u8>,
}

/// Decodes a DER PKCS#10 request and verifies its self-signature.
///
/// Every failure, including an unsupported signature algorithm, is reported as
/// [`CaError::InvalidCsr`].
pub fn validate(raw: &[u8]) -> Result<SigningRequest> {
    let request = CertReq::from_der(raw)
        .map_err(|e| CaError::InvalidCsr(format!("malformed request: {e}")))?;

    let signature_algorithm = SignatureAlgorithm::from_oid(request.algorithm.oid).ok_or_else(|| {
        CaError::InvalidCsr(format!(
            "unsupported signature algorithm {}",
            request.algorithm.oid
        ))
    })?;

    let public_key = PublicKey::from_x509spki(&request.info.public_key)
        .map_err(|e| CaError::InvalidCsr(format!("public key: {e}")))?;

    let info_der = request
        .info
        .to_der()
        .map_err(|e| CaError::InvalidCsr(format!("request info: {e}")))?;
    let signature = request
        .signature
        .as_bytes()
        .ok_or_else(|| CaError::InvalidCsr("signature is not octet aligned".to_string()))?;

    let hash = signature_algorithm.hash();
    public_key
        .verify_digest(hash, &hash.digest(&info_der), signature)
        .map_err(|_| CaError::InvalidCsr("signature does not verify".to_string()))?;

    let subject = DistinguishedName::from_x509_name(&request.info.subject);
    debug!(%subject, key_bits = public_key.size_bits(), %hash, "signing request verified");

    Ok(SigningRequest {
        subject,
        public_key,
        signature_algorithm,
        der: raw.to_vec(),
    })
}

/// Builds and self-signs a DER PKCS#10 request with no attributes.
pub fn build_request(
    subject: &DistinguishedName,
    key: &KeyPair,
    hash: HashAlgorithm,
) -> Result<Vec<u8>> {
    let info = CertReqInfo {
        version: Version::V1,
        subject: subject.as_x509_name(),
        public_key: key.public_key().as_spki()?,
        attributes: Default::default(),
    };
    let info_der = info
        .to_der()
        .map_err(|e| CaError::EncodingError(e.to_string()))?;
    let signature = key.private().sign(hash.pkcs1v15(), &hash.digest(&info_der))?;

    let request = CertReq {
        info,
        algorithm: SignatureAlgorithm::rsa_pkcs1(hash).into(),
        signature: BitString::from_bytes(&signature)?,
    };
    request
        .to_der()
        .map_err(|e| CaError::EncodingError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(hash: HashAlgorithm) -> (KeyPair, Vec<u8>) {
        let key = KeyPair::generate_rsa(2048).unwrap();
        let subject = DistinguishedName::parse("CN=device1,O=Contoso").unwrap();
        let der = build_request(&subject, &key, hash).unwrap();
        (key, der)
    }

    #[test]
    fn test_validate_roundtrip() {
        let (key, der) = request(HashAlgorithm::Sha256);
        let csr = validate(&der).unwrap();
        assert_eq!(csr.subject.common_name().as_deref(), Some("device1"));
        assert_eq!(csr.public_key, key.public_key());
        assert_eq!(csr.signature_algorithm, SignatureAlgorithm::Sha256WithRSA);
        assert_eq!(csr.der, der);
    }

    #[test]
    fn test_validate_rejects_tampered_signature() {
        let (_, mut der) = request(HashAlgorithm::Sha512);
        let last = der.len() - 1;
        der[last] ^= 0x01;
        assert!(matches!(validate(&der), Err(CaError::InvalidCsr(_))));
    }

    #[test]
    fn test_validate_rejects_garbage() {
        assert!(matches!(
            validate(b"not a csr"),
            Err(CaError::InvalidCsr(_))
        ));
        assert!(matches!(validate(&[]), Err(CaError::InvalidCsr(_))));
    }

    #[test]
    fn test_validate_rejects_unknown_algorithm() {
        let (_, der) = request(HashAlgorithm::Sha256);
        let mut parsed = CertReq::from_der(&der).unwrap();
        parsed.algorithm.oid = const_oid::db::rfc5912::ECDSA_WITH_SHA_256;
        let der = parsed.to_der().unwrap();

        let err = validate(&der).unwrap_err();
        assert!(matches!(err, CaError::InvalidCsr(_)));
        assert!(err.to_string().contains("unsupported"));
    }
}
