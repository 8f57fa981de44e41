use der::Encode;
use der::asn1::BitString;
use tracing::debug;
use x509_cert::Version;
use x509_cert::certificate::{CertificateInner, TbsCertificateInner};
use x509_cert::serial_number::SerialNumber;

use crate::cert::params::{DistinguishedName, ExtensionSet, Validity};
use crate::cert::{Certificate, HashAlgorithm, SignatureAlgorithm, SignedCertificate};
use crate::error::{CaError, Result};
use crate::key::PublicKey;
use crate::signer::Signer;

/// Length of freshly generated serial numbers before DER canonicalisation.
pub const SERIAL_NUMBER_LEN: usize = 20;

/// Represents the "To Be Signed" (TBS) portion of an X.509 certificate.
/// This struct contains all the fields required to generate a valid X.509 certificate.
///
/// # Fields
/// * `serial_number` - The unique identifier for the certificate.
/// * `signature_algorithm` - The algorithm used to sign the certificate.
/// * `issuer` - The distinguished name of the certificate issuer.
/// * `validity` - The certificate's validity period.
/// * `subject` - The distinguished name of the certificate subject.
/// * `subject_public_key` - The public key of the certificate subject.
/// * `extensions` - X.509 extensions in emission order.
#[derive(Clone, Debug)]
pub struct TbsCertificate {
    /// Certificate serial number, big-endian and non-negative
    pub serial_number: Vec<u8>,
    pub signature_algorithm: SignatureAlgorithm,
    pub issuer: DistinguishedName,
    pub validity: Validity,
    pub subject: DistinguishedName,
    pub subject_public_key: PublicKey,
    pub extensions: ExtensionSet,
}

impl TbsCertificate {
    /// Converts the `TbsCertificate` into a `TbsCertificateInner` for DER encoding.
    pub fn to_tbs_certificate_inner(&self) -> Result<TbsCertificateInner> {
        let extensions = self
            .extensions
            .iter()
            .map(|ext| ext.to_x509())
            .collect::<Result<Vec<_>>>()?;

        let serial_number = SerialNumber::new(self.serial_number.as_slice())
            .map_err(|e| CaError::EncodingError(format!("serial number: {e}")))?;

        Ok(TbsCertificateInner {
            version: Version::V3,
            serial_number,
            signature: self.signature_algorithm.into(),
            issuer: self.issuer.as_x509_name(),
            validity: self.validity.to_x509()?,
            subject: self.subject.as_x509_name(),
            subject_public_key_info: self.subject_public_key.as_spki()?,
            issuer_unique_id: None,
            subject_unique_id: None,
            extensions: (!extensions.is_empty()).then_some(extensions),
        })
    }

    /// Encodes the `TbsCertificate` into DER format.
    pub fn to_der(&self) -> Result<Vec<u8>> {
        self.to_tbs_certificate_inner()?
            .to_der()
            .map_err(|e| CaError::EncodingError(e.to_string()))
    }
}

/// Generates a fresh random serial number.
///
/// The sign bit of the first octet is cleared so the INTEGER is never negative,
/// then the value is canonicalised so it encodes in minimal DER form.
pub fn generate_serial_number() -> Vec<u8> {
    canonical_serial_number(rand::random::<[u8; SERIAL_NUMBER_LEN]>().to_vec())
}

/// Clears the sign bit and strips leading zero octets that DER would reject.
pub fn canonical_serial_number(mut serial: Vec<u8>) -> Vec<u8> {
    if serial.is_empty() {
        return vec![0];
    }
    serial[0] &= 0x7F;
    let redundant = serial
        .windows(2)
        .take_while(|pair| pair[0] == 0 && pair[1] < 0x80)
        .count();
    serial.drain(..redundant);
    serial
}

/// A fully populated certificate body waiting for its signature.
///
/// Produced by the certificate builder; the builder never sees key material.
#[derive(Clone, Debug)]
pub struct UnsignedCertificate {
    tbs: TbsCertificate,
    hash: HashAlgorithm,
}

impl UnsignedCertificate {
    pub(crate) fn new(tbs: TbsCertificate, hash: HashAlgorithm) -> Self {
        Self { tbs, hash }
    }

    pub fn tbs(&self) -> &TbsCertificate {
        &self.tbs
    }

    pub fn hash(&self) -> HashAlgorithm {
        self.hash
    }

    pub fn serial_number(&self) -> &[u8] {
        &self.tbs.serial_number
    }

    /// Signs the certificate body with `signer`.
    ///
    /// The signer is asked for its algorithm first, so an unsupported digest
    /// fails before anything is encoded or sent. The digest over the DER TBS is
    /// computed here and only the digest is handed to the signer.
    pub async fn sign(mut self, signer: &dyn Signer) -> Result<SignedCertificate> {
        let algorithm = signer.signature_algorithm(self.hash)?;
        self.tbs.signature_algorithm = algorithm;

        let tbs_certificate = self.tbs.to_tbs_certificate_inner()?;
        let tbs_der = tbs_certificate
            .to_der()
            .map_err(|e| CaError::EncodingError(e.to_string()))?;
        let digest = self.hash.digest(&tbs_der);

        let signature = signer.sign(&digest, self.hash).await?;
        debug!(
            serial = %hex::encode(&self.tbs.serial_number),
            algorithm = ?algorithm,
            signature_len = signature.len(),
            "certificate signed"
        );

        let inner = CertificateInner {
            tbs_certificate,
            signature_algorithm: algorithm.into(),
            signature: BitString::from_bytes(&signature)
                .map_err(|e| CaError::EncodingError(e.to_string()))?,
        };
        SignedCertificate::new(Certificate { inner })
    }
}
