use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::{
    CertificateBundle, CertificatePolicy, KeyCustodian, KeyLocator, OperationHandle,
    OperationState, OperationStatus, PolicyIssuer, RemoteSignatureAlgorithm,
};
use crate::cert::params::{CertificateRole, CertificateSpec, Validity};
use crate::cert::{Certificate, HashAlgorithm};
use crate::csr::build_request;
use crate::error::{CaError, Result};
use crate::issuer::CertificateBuilder;
use crate::key::KeyPair;
use crate::signer::{LocalSigner, Signer};

/// Validity of the self-signed placeholder certificates, in months.
const PLACEHOLDER_VALIDITY_MONTHS: u32 = 12;

#[derive(Debug, Clone)]
struct StoredVersion {
    version_id: String,
    cert_der: Vec<u8>,
    key_version: String,
    enabled: bool,
    tags: BTreeMap<String, String>,
}

#[derive(Debug)]
struct PendingOperation {
    request_id: String,
    issuer: PolicyIssuer,
    key_version: String,
    polls_remaining: u32,
    /// Self-signed placeholder, stored as a new version on completion.
    placeholder: Option<Vec<u8>>,
    csr: Option<Vec<u8>>,
    tags: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct Entry {
    versions: Vec<StoredVersion>,
    pending: Option<PendingOperation>,
}

impl Entry {
    fn current(&self) -> Option<&StoredVersion> {
        self.versions.iter().rev().find(|v| v.enabled)
    }
}

/// In-process key custodian.
///
/// Keeps RSA keys, versioned certificates and pending operations in memory.
/// Suitable for tests and local development; nothing is persisted.
#[derive(Debug, Default)]
pub struct InMemoryCustodian {
    entries: RwLock<HashMap<String, Entry>>,
    keys: RwLock<HashMap<KeyLocator, KeyPair>>,
    version_counter: AtomicU64,
    polls_until_complete: u32,
    create_key_calls: AtomicUsize,
    sign_calls: AtomicUsize,
}

impl InMemoryCustodian {
    /// Create a new in-memory custodian whose key operations complete on the first poll.
    pub fn new() -> Self {
        Self::default()
    }

    /// Key creation reports `InProgress` for `polls` polls before completing.
    pub fn with_polls_until_complete(mut self, polls: u32) -> Self {
        self.polls_until_complete = polls;
        self
    }

    pub fn create_key_calls(&self) -> usize {
        self.create_key_calls.load(Ordering::SeqCst)
    }

    pub fn sign_calls(&self) -> usize {
        self.sign_calls.load(Ordering::SeqCst)
    }

    /// Stores an externally created certificate and its key as a new version.
    pub async fn import_certificate(
        &self,
        certificate_id: &str,
        key: KeyPair,
        cert_der: &[u8],
    ) -> Result<CertificateBundle> {
        let certificate = Certificate::from_der(cert_der)?;
        if certificate.public_key()? != key.public_key() {
            return Err(CaError::InvalidArgument(
                "certificate does not match the imported key".to_string(),
            ));
        }

        let key_version = self.next_version();
        self.keys
            .write()
            .await
            .insert(locator(certificate_id, &key_version), key);

        let stored = StoredVersion {
            version_id: key_version.clone(),
            cert_der: cert_der.to_vec(),
            key_version,
            enabled: true,
            tags: BTreeMap::new(),
        };
        let mut entries = self.entries.write().await;
        entries
            .entry(certificate_id.to_string())
            .or_default()
            .versions
            .push(stored.clone());
        Ok(bundle(certificate_id, &stored))
    }

    /// All versions of a certificate, oldest first.
    pub async fn versions(&self, certificate_id: &str) -> Vec<CertificateBundle> {
        let entries = self.entries.read().await;
        entries
            .get(certificate_id)
            .map(|entry| {
                entry
                    .versions
                    .iter()
                    .map(|v| bundle(certificate_id, v))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Tags stored with the current version of a certificate.
    pub async fn tags(&self, certificate_id: &str) -> BTreeMap<String, String> {
        let entries = self.entries.read().await;
        entries
            .get(certificate_id)
            .and_then(Entry::current)
            .map(|v| v.tags.clone())
            .unwrap_or_default()
    }

    /// Whether `certificate_id` has an operation waiting for completion or merge.
    pub async fn has_pending_operation(&self, certificate_id: &str) -> bool {
        let entries = self.entries.read().await;
        entries
            .get(certificate_id)
            .is_some_and(|entry| entry.pending.is_some())
    }

    fn next_version(&self) -> String {
        format!(
            "{:016x}",
            self.version_counter.fetch_add(1, Ordering::SeqCst) + 1
        )
    }

    async fn key_for(
        &self,
        certificate_id: &str,
        policy: &CertificatePolicy,
        current: Option<String>,
    ) -> Result<(String, KeyPair)> {
        if policy.reuse_key {
            if let Some(version) = current {
                let keys = self.keys.read().await;
                if let Some(key) = keys.get(&locator(certificate_id, &version)) {
                    return Ok((version, key.clone()));
                }
            }
        }

        let key = KeyPair::generate_rsa(policy.key_size)?;
        let version = self.next_version();
        self.keys
            .write()
            .await
            .insert(locator(certificate_id, &version), key.clone());
        Ok((version, key))
    }
}

fn locator(certificate_id: &str, version: &str) -> KeyLocator {
    KeyLocator {
        key_id: certificate_id.to_string(),
        version: version.to_string(),
    }
}

fn bundle(certificate_id: &str, version: &StoredVersion) -> CertificateBundle {
    CertificateBundle {
        version_id: version.version_id.clone(),
        cert_der: version.cert_der.clone(),
        key: locator(certificate_id, &version.key_version),
        enabled: version.enabled,
    }
}

async fn placeholder_certificate(policy: &CertificatePolicy, key: &KeyPair) -> Result<Vec<u8>> {
    let spec = CertificateSpec::builder()
        .subject(policy.subject.clone())
        .public_key(key.public_key())
        .validity(Validity::for_months(
            Validity::backdated_now(),
            PLACEHOLDER_VALIDITY_MONTHS,
        )?)
        .key_size_bits(policy.key_size)
        .role(CertificateRole::Leaf)
        .build();
    let unsigned = CertificateBuilder::default().build(&spec, None, vec![])?;
    let signed = unsigned.sign(&LocalSigner::new(key.clone())).await?;
    Ok(signed.into_der())
}

#[async_trait]
impl KeyCustodian for InMemoryCustodian {
    async fn create_key(
        &self,
        certificate_id: &str,
        policy: &CertificatePolicy,
    ) -> Result<OperationHandle> {
        self.create_key_calls.fetch_add(1, Ordering::SeqCst);

        let current = {
            let entries = self.entries.read().await;
            let entry = entries.get(certificate_id);
            if entry.is_some_and(|e| e.pending.is_some()) {
                return Err(CaError::Conflict(format!(
                    "certificate {certificate_id} already has a pending operation"
                )));
            }
            entry.and_then(Entry::current).map(|v| v.key_version.clone())
        };

        let (key_version, key) = self.key_for(certificate_id, policy, current).await?;
        let (placeholder, csr, polls_remaining) = match policy.issuer {
            PolicyIssuer::SelfSigned => (
                Some(placeholder_certificate(policy, &key).await?),
                None,
                self.polls_until_complete,
            ),
            PolicyIssuer::Unknown => (
                None,
                Some(build_request(&policy.subject, &key, HashAlgorithm::Sha256)?),
                0,
            ),
        };

        let request_id = self.next_version();
        let mut entries = self.entries.write().await;
        let entry = entries.entry(certificate_id.to_string()).or_default();
        if entry.pending.is_some() {
            return Err(CaError::Conflict(format!(
                "certificate {certificate_id} already has a pending operation"
            )));
        }
        entry.pending = Some(PendingOperation {
            request_id: request_id.clone(),
            issuer: policy.issuer,
            key_version,
            polls_remaining,
            placeholder,
            csr,
            tags: policy.tags.clone(),
        });
        debug!(certificate_id, request_id, issuer = ?policy.issuer, "key operation created");

        Ok(OperationHandle {
            certificate_id: certificate_id.to_string(),
            request_id,
        })
    }

    async fn poll_operation(&self, handle: &OperationHandle) -> Result<OperationState> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(&handle.certificate_id)
            .ok_or_else(|| CaError::NotFound(handle.certificate_id.clone()))?;
        let pending = entry
            .pending
            .as_mut()
            .filter(|p| p.request_id == handle.request_id)
            .ok_or_else(|| CaError::NotFound(format!("operation {}", handle.request_id)))?;

        if pending.issuer == PolicyIssuer::Unknown || pending.polls_remaining > 0 {
            pending.polls_remaining = pending.polls_remaining.saturating_sub(1);
            return Ok(OperationState {
                status: OperationStatus::InProgress,
                csr: pending.csr.clone(),
            });
        }

        let Some(pending) = entry.pending.take() else {
            return Err(CaError::NotFound(format!(
                "operation {}",
                handle.request_id
            )));
        };
        let cert_der = pending.placeholder.unwrap_or_default();
        entry.versions.push(StoredVersion {
            version_id: pending.key_version.clone(),
            cert_der,
            key_version: pending.key_version,
            enabled: true,
            tags: pending.tags,
        });
        Ok(OperationState {
            status: OperationStatus::Completed,
            csr: None,
        })
    }

    async fn delete_operation(&self, certificate_id: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries
            .get_mut(certificate_id)
            .and_then(|entry| entry.pending.take())
            .map(|_| ())
            .ok_or_else(|| CaError::NotFound(format!("pending operation for {certificate_id}")))
    }

    async fn get_certificate(&self, certificate_id: &str) -> Result<CertificateBundle> {
        let entries = self.entries.read().await;
        entries
            .get(certificate_id)
            .and_then(Entry::current)
            .map(|v| bundle(certificate_id, v))
            .ok_or_else(|| CaError::NotFound(format!("certificate {certificate_id}")))
    }

    async fn merge_certificate(
        &self,
        certificate_id: &str,
        cert_der: &[u8],
    ) -> Result<CertificateBundle> {
        let certificate = Certificate::from_der(cert_der)?;
        let keys = self.keys.read().await;
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(certificate_id)
            .ok_or_else(|| CaError::NotFound(format!("certificate {certificate_id}")))?;

        let (key_version, tags) = match &entry.pending {
            Some(pending) if pending.issuer == PolicyIssuer::Unknown => {
                (pending.key_version.clone(), pending.tags.clone())
            }
            _ => {
                return Err(CaError::NotFound(format!(
                    "no operation awaiting merge for {certificate_id}"
                )));
            }
        };
        let key = keys
            .get(&locator(certificate_id, &key_version))
            .ok_or_else(|| CaError::NotFound(format!("key {certificate_id}/{key_version}")))?;
        if certificate.public_key()? != key.public_key() {
            return Err(CaError::Conflict(
                "merged certificate does not match the pending key".to_string(),
            ));
        }

        entry.pending = None;
        let stored = StoredVersion {
            version_id: self.next_version(),
            cert_der: cert_der.to_vec(),
            key_version,
            enabled: true,
            tags,
        };
        entry.versions.push(stored.clone());
        debug!(certificate_id, version = %stored.version_id, "certificate merged");
        Ok(bundle(certificate_id, &stored))
    }

    async fn sign(
        &self,
        key: &KeyLocator,
        digest: &[u8],
        algorithm: RemoteSignatureAlgorithm,
    ) -> Result<Vec<u8>> {
        self.sign_calls.fetch_add(1, Ordering::SeqCst);
        let signer = {
            let keys = self.keys.read().await;
            let pair = keys
                .get(key)
                .ok_or_else(|| CaError::NotFound(format!("key {key}")))?;
            LocalSigner::new(pair.clone())
        };
        signer.sign(digest, algorithm.hash()).await
    }

    async fn list_certificate_versions(&self, certificate_id: &str) -> Result<usize> {
        let entries = self.entries.read().await;
        Ok(entries.get(certificate_id).map_or(0, |e| e.versions.len()))
    }

    async fn disable_certificate(&self, certificate_id: &str, version_id: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        let version = entries
            .get_mut(certificate_id)
            .and_then(|e| e.versions.iter_mut().find(|v| v.version_id == version_id))
            .ok_or_else(|| CaError::NotFound(format!("{certificate_id}/{version_id}")))?;
        version.enabled = false;
        Ok(())
    }
}
