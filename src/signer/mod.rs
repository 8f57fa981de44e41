//! Signature capability used by the signing step of certificate issuance.
//!
//! The certificate builder only ever sees a [`Signer`]; whether the key lives
//! in process ([`LocalSigner`]) or in a remote custodian
//! ([`remote::RemoteSignatureProvider`]) is up to the caller.

pub mod remote;

use async_trait::async_trait;

use crate::cert::{HashAlgorithm, SignatureAlgorithm};
use crate::error::{CaError, Result};
use crate::key::{KeyPair, PublicKey};

/// Produces RSA signatures over digests computed by the caller.
#[async_trait]
pub trait Signer: Send + Sync {
    /// The signature algorithm this signer emits for `hash`.
    ///
    /// Fails when the signer cannot produce that combination.
    fn signature_algorithm(&self, hash: HashAlgorithm) -> Result<SignatureAlgorithm> {
        Ok(SignatureAlgorithm::rsa_pkcs1(hash))
    }

    /// Signs `digest`, which must be the output of `hash`.
    async fn sign(&self, digest: &[u8], hash: HashAlgorithm) -> Result<Vec<u8>>;
}

pub(crate) fn check_digest(digest: &[u8], hash: HashAlgorithm) -> Result<()> {
    if digest.len() != hash.output_len() {
        return Err(CaError::InvalidArgument(format!(
            "{hash} digest must be {} bytes, got {}",
            hash.output_len(),
            digest.len()
        )));
    }
    Ok(())
}

/// Signs with an RSA key held in process memory.
#[derive(Debug, Clone)]
pub struct LocalSigner {
    key: KeyPair,
}

impl LocalSigner {
    pub fn new(key: KeyPair) -> Self {
        Self { key }
    }

    pub fn public_key(&self) -> PublicKey {
        self.key.public_key()
    }
}

#[async_trait]
impl Signer for LocalSigner {
    async fn sign(&self, digest: &[u8], hash: HashAlgorithm) -> Result<Vec<u8>> {
        check_digest(digest, hash)?;
        Ok(self.key.private().sign(hash.pkcs1v15(), digest)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_signer_signs_digest() {
        let key = KeyPair::generate_rsa(2048).unwrap();
        let signer = LocalSigner::new(key);
        let digest = HashAlgorithm::Sha384.digest(b"payload");

        let signature = signer.sign(&digest, HashAlgorithm::Sha384).await.unwrap();
        assert_eq!(signature.len(), 256);
        signer
            .public_key()
            .verify_digest(HashAlgorithm::Sha384, &digest, &signature)
            .unwrap();

        let wrong = signer.sign(&digest, HashAlgorithm::Sha256).await;
        assert!(matches!(wrong, Err(CaError::InvalidArgument(_))));
    }
}
