#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use time::{Duration, OffsetDateTime};
use vaultca::cert::params::{CertificateRole, CertificateSpec, DistinguishedName, Validity};
use vaultca::cert::{Certificate, HashAlgorithm};
use vaultca::config::CaConfig;
use vaultca::csr::build_request;
use vaultca::custodian::memory::InMemoryCustodian;
use vaultca::custodian::{
    CertificateBundle, CertificatePolicy, KeyCustodian, KeyLocator, OperationHandle,
    OperationState, OperationStatus, RemoteSignatureAlgorithm,
};
use vaultca::error::{CaError, Result};
use vaultca::issuer::{BuilderOptions, CertificateBuilder};
use vaultca::key::KeyPair;
use vaultca::retry::{PollPolicy, RetryPolicy};
use vaultca::signer::LocalSigner;

pub const ISSUING_CA: &str = "IssuingCA";
pub const URL_TEMPLATE: &str = "http://pki.contoso.test/%serial%.crt";

pub fn ca_key() -> &'static KeyPair {
    static KEY: OnceLock<KeyPair> = OnceLock::new();
    KEY.get_or_init(|| KeyPair::generate_rsa(2048).unwrap())
}

pub fn device_key() -> &'static KeyPair {
    static KEY: OnceLock<KeyPair> = OnceLock::new();
    KEY.get_or_init(|| KeyPair::generate_rsa(2048).unwrap())
}

pub fn device_csr(subject: &str) -> Vec<u8> {
    let subject = DistinguishedName::parse(subject).unwrap();
    build_request(&subject, device_key(), HashAlgorithm::Sha256).unwrap()
}

/// Retries without jitter so that backoff delays are exact.
pub fn no_jitter() -> RetryPolicy {
    RetryPolicy {
        max_jitter_ms: 0,
        ..RetryPolicy::default()
    }
}

pub fn test_config() -> CaConfig {
    CaConfig::builder()
        .issuing_ca(ISSUING_CA)
        .ca_key_size(2048)
        .extension_url_template(URL_TEMPLATE)
        .ocsp_url("http://ocsp.contoso.test")
        .retry(no_jitter())
        .poll(PollPolicy {
            interval_ms: 2000,
            max_polls: 5,
        })
        .build()
}

/// Self-signed CA certificate over [`ca_key`] valid for `days` from two days ago.
pub async fn local_ca_certificate(subject: &str, days: i64) -> Certificate {
    let not_before = OffsetDateTime::now_utc() - Duration::days(2);
    let spec = CertificateSpec::builder()
        .subject(DistinguishedName::parse(subject).unwrap())
        .public_key(ca_key().public_key())
        .validity(Validity::for_days(not_before, days).unwrap())
        .role(CertificateRole::Root)
        .build();
    let unsigned = CertificateBuilder::new(BuilderOptions::default())
        .build(&spec, None, vec![])
        .unwrap();
    let signed = unsigned.sign(&LocalSigner::new(ca_key().clone())).await.unwrap();
    signed.certificate().clone()
}

/// An in-memory custodian holding a local issuing CA under [`ISSUING_CA`].
pub async fn custodian_with_issuer(days: i64) -> (Arc<InMemoryCustodian>, Certificate) {
    let custodian = Arc::new(InMemoryCustodian::new());
    let issuer = local_ca_certificate("CN=Contoso Issuing CA,O=Contoso", days).await;
    custodian
        .import_certificate(ISSUING_CA, ca_key().clone(), &issuer.to_der().unwrap())
        .await
        .unwrap();
    (custodian, issuer)
}

/// Verifies the certificate signature against `issuer`'s public key.
pub fn verify_signed_by(cert: &Certificate, issuer: &Certificate) {
    use der::Encode;

    let hash = vaultca::cert::SignatureAlgorithm::from_oid(cert.inner.signature_algorithm.oid)
        .unwrap()
        .hash();
    let tbs = cert.inner.tbs_certificate.to_der().unwrap();
    issuer
        .public_key()
        .unwrap()
        .verify_digest(hash, &hash.digest(&tbs), cert.inner.signature.raw_bytes())
        .unwrap();
}

fn take(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Wraps an [`InMemoryCustodian`] and injects faults.
#[derive(Debug, Default)]
pub struct FlakyCustodian {
    pub inner: InMemoryCustodian,
    /// Sign calls still to fail with `RemoteUnavailable`.
    pub sign_failures: AtomicUsize,
    /// Polls still to report a failed operation.
    pub poll_failures: AtomicUsize,
    pub sign_attempts: AtomicUsize,
    pub fail_merge: AtomicBool,
    pub fail_disable: AtomicBool,
}

impl FlakyCustodian {
    pub fn failing_signs(failures: usize) -> Self {
        let custodian = Self::default();
        custodian.sign_failures.store(failures, Ordering::SeqCst);
        custodian
    }

    pub fn sign_attempts(&self) -> usize {
        self.sign_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyCustodian for FlakyCustodian {
    async fn create_key(
        &self,
        certificate_id: &str,
        policy: &CertificatePolicy,
    ) -> Result<OperationHandle> {
        self.inner.create_key(certificate_id, policy).await
    }

    async fn poll_operation(&self, handle: &OperationHandle) -> Result<OperationState> {
        if take(&self.poll_failures) {
            return Ok(OperationState {
                status: OperationStatus::Failed("HSM busy".to_string()),
                csr: None,
            });
        }
        self.inner.poll_operation(handle).await
    }

    async fn delete_operation(&self, certificate_id: &str) -> Result<()> {
        self.inner.delete_operation(certificate_id).await
    }

    async fn get_certificate(&self, certificate_id: &str) -> Result<CertificateBundle> {
        self.inner.get_certificate(certificate_id).await
    }

    async fn merge_certificate(
        &self,
        certificate_id: &str,
        cert_der: &[u8],
    ) -> Result<CertificateBundle> {
        if self.fail_merge.load(Ordering::SeqCst) {
            return Err(CaError::Conflict("merge rejected".to_string()));
        }
        self.inner.merge_certificate(certificate_id, cert_der).await
    }

    async fn sign(
        &self,
        key: &KeyLocator,
        digest: &[u8],
        algorithm: RemoteSignatureAlgorithm,
    ) -> Result<Vec<u8>> {
        self.sign_attempts.fetch_add(1, Ordering::SeqCst);
        if take(&self.sign_failures) {
            return Err(CaError::RemoteUnavailable(
                "429 too many requests".to_string(),
            ));
        }
        self.inner.sign(key, digest, algorithm).await
    }

    async fn list_certificate_versions(&self, certificate_id: &str) -> Result<usize> {
        self.inner.list_certificate_versions(certificate_id).await
    }

    async fn disable_certificate(&self, certificate_id: &str, version_id: &str) -> Result<()> {
        if self.fail_disable.load(Ordering::SeqCst) {
            return Err(CaError::RemoteUnavailable("disable timed out".to_string()));
        }
        self.inner
            .disable_certificate(certificate_id, version_id)
            .await
    }
}
