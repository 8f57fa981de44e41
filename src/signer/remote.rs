use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{Signer, check_digest};
use crate::cert::{HashAlgorithm, SignatureAlgorithm};
use crate::custodian::{KeyCustodian, KeyLocator, RemoteSignatureAlgorithm};
use crate::error::{CaError, Result};
use crate::retry::{RetryPolicy, Sleeper, TokioSleeper, retry};

/// RSA signature padding.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Padding {
    #[default]
    Pkcs1v15,
    Pss,
}

/// Signs digests with a key held by a [`KeyCustodian`].
///
/// Lives for one issuance: it is built with the issuer's key locator, used by
/// the signing step and dropped. Transient custodian faults are retried with
/// the configured backoff; unsupported algorithms fail before any remote call.
pub struct RemoteSignatureProvider<C: KeyCustodian + ?Sized> {
    custodian: Arc<C>,
    key: KeyLocator,
    padding: Padding,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    cancel: CancellationToken,
}

impl<C: KeyCustodian + ?Sized> std::fmt::Debug for RemoteSignatureProvider<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSignatureProvider")
            .field("key", &self.key)
            .field("padding", &self.padding)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl<C: KeyCustodian + ?Sized> RemoteSignatureProvider<C> {
    pub fn new(custodian: Arc<C>, key: KeyLocator) -> Self {
        Self {
            custodian,
            key,
            padding: Padding::default(),
            retry: RetryPolicy::default(),
            sleeper: Arc::new(TokioSleeper),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_padding(mut self, padding: Padding) -> Self {
        self.padding = padding;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn key(&self) -> &KeyLocator {
        &self.key
    }

    /// Maps a digest and the configured padding to the custodian's algorithm.
    pub fn remote_algorithm(&self, hash: HashAlgorithm) -> Result<RemoteSignatureAlgorithm> {
        if self.padding == Padding::Pss {
            return Err(CaError::UnsupportedAlgorithm(format!(
                "PSS padding with {hash} is not supported by the custodian signer"
            )));
        }
        RemoteSignatureAlgorithm::pkcs1_for(hash).ok_or_else(|| {
            CaError::UnsupportedAlgorithm(format!("{hash} with PKCS#1 v1.5 padding"))
        })
    }

    /// Digests `data` locally and has the custodian sign the digest.
    pub async fn sign_data(&self, data: &[u8], hash: HashAlgorithm) -> Result<Vec<u8>> {
        self.remote_algorithm(hash)?;
        let digest = hash.digest(data);
        self.sign(&digest, hash).await
    }
}

#[async_trait]
impl<C: KeyCustodian + ?Sized> Signer for RemoteSignatureProvider<C> {
    fn signature_algorithm(&self, hash: HashAlgorithm) -> Result<SignatureAlgorithm> {
        self.remote_algorithm(hash)?;
        Ok(SignatureAlgorithm::rsa_pkcs1(hash))
    }

    async fn sign(&self, digest: &[u8], hash: HashAlgorithm) -> Result<Vec<u8>> {
        let algorithm = self.remote_algorithm(hash)?;
        check_digest(digest, hash)?;

        debug!(key = %self.key, %algorithm, "requesting remote signature");
        let custodian = self.custodian.as_ref();
        let key = &self.key;
        retry(
            &self.retry,
            self.sleeper.as_ref(),
            &self.cancel,
            "sign",
            move || custodian.sign(key, digest, algorithm),
        )
        .await
    }
}
