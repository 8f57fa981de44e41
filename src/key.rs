use der::Encode;
use rsa::pkcs8::DecodePublicKey;
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha1::{Digest, Sha1};
use x509_cert::spki::SubjectPublicKeyInfoOwned;

use crate::cert::HashAlgorithm;
use crate::error::{CaError, Result};

/// Subject public key of a certificate or signing request.
///
/// Only RSA keys are issued; the custodian creates RSA keys and requests carry
/// them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    rsa: RsaPublicKey,
}

impl PublicKey {
    pub fn from_rsa(rsa: RsaPublicKey) -> Self {
        Self { rsa }
    }

    /// Decodes the key from an X.509 `SubjectPublicKeyInfo`.
    pub fn from_x509spki(spki: &SubjectPublicKeyInfoOwned) -> Result<Self> {
        if spki.algorithm.oid != const_oid::db::rfc5912::RSA_ENCRYPTION {
            return Err(CaError::UnsupportedAlgorithm(format!(
                "public key algorithm {} is not RSA",
                spki.algorithm.oid
            )));
        }
        let der = spki.to_der()?;
        let rsa = RsaPublicKey::from_public_key_der(&der)?;
        Ok(Self { rsa })
    }

    pub fn as_spki(&self) -> Result<SubjectPublicKeyInfoOwned> {
        Ok(SubjectPublicKeyInfoOwned::from_key(self.rsa.clone())?)
    }

    pub fn as_rsa(&self) -> &RsaPublicKey {
        &self.rsa
    }

    /// Modulus length in bits.
    pub fn size_bits(&self) -> usize {
        self.rsa.n().bits()
    }

    /// Verifies a PKCS#1 v1.5 signature over an already computed digest.
    pub fn verify_digest(
        &self,
        hash: HashAlgorithm,
        digest: &[u8],
        signature: &[u8],
    ) -> Result<()> {
        self.rsa
            .verify(hash.pkcs1v15(), digest, signature)
            .map_err(|e| CaError::InvalidArgument(format!("signature verification failed: {e}")))
    }

    /// RFC 5280 method 1 key identifier: SHA-1 over the `subjectPublicKey` bits.
    pub fn key_identifier(&self) -> Result<Vec<u8>> {
        let spki = self.as_spki()?;
        Ok(Sha1::digest(spki.subject_public_key.raw_bytes()).to_vec())
    }
}

/// An RSA key pair held in process memory.
///
/// Never used for production issuance: the in-memory custodian and the local
/// signer are its only owners.
#[derive(Clone)]
pub struct KeyPair {
    private: Box<RsaPrivateKey>,
    public: RsaPublicKey,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("bits", &self.public.n().bits())
            .finish_non_exhaustive()
    }
}

impl KeyPair {
    /// Generate an RSA key pair with the specified number of bits.
    pub fn generate_rsa(bits: usize) -> Result<Self> {
        let mut rng = rand_core::OsRng;
        let private = RsaPrivateKey::new(&mut rng, bits)
            .map_err(|e| CaError::KeyGenerationFailed(e.to_string()))?;
        Ok(Self::from_private(private))
    }

    pub fn from_private(private: RsaPrivateKey) -> Self {
        let public = RsaPublicKey::from(&private);
        Self {
            private: Box::new(private),
            public,
        }
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::from_rsa(self.public.clone())
    }

    pub(crate) fn private(&self) -> &RsaPrivateKey {
        &self.private
    }
}
