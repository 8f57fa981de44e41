//! Creation of a CA certificate whose private key never leaves the custodian.
//!
//! The custodian first generates a key behind a self-signed placeholder, then
//! produces a signing request over that same key. The request is verified,
//! the real CA certificate is built and signed remotely with the placeholder's
//! key, merged back, and the placeholder version is disabled.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use bon::Builder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cert::SignedCertificate;
use crate::cert::params::{CertificateRole, CertificateSpec, DistinguishedName, Validity};
use crate::csr;
use crate::custodian::{
    CertificateBundle, CertificatePolicy, KeyCustodian, OperationHandle, OperationState,
    OperationStatus, PolicyIssuer,
};
use crate::error::{CaError, Result};
use crate::issuer::CertificateBuilder;
use crate::retry::{PollPolicy, RetryPolicy, Sleeper, TokioSleeper, retry, sleep_cancellable};
use crate::signer::remote::RemoteSignatureProvider;

/// Progress of a bootstrap run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BootstrapState {
    #[default]
    Idle,
    TempKeyRequested,
    TempKeyReady,
    CsrRequested,
    CsrVerified,
    SelfSigned,
    Merged,
    TempDisabled,
}

#[derive(Clone, Debug)]
pub enum BootstrapOutcome {
    Created(SignedCertificate),
    /// The certificate already had at least one version; nothing was changed.
    AlreadyExists,
}

/// What to bootstrap.
///
/// # Fields
/// * `certificate_id` - Custodian name of the CA certificate.
/// * `subject` - Subject, and issuer, of the self-signed certificate.
/// * `validity` - Validity window of the CA certificate.
/// * `key_size_bits` - RSA key size requested from the custodian.
/// * `hash_size_bits` - Digest size of the certificate signature.
/// * `path_length` - Path length constraint.
#[derive(Clone, Debug, Builder)]
pub struct CaBootstrapRequest {
    #[builder(into)]
    pub certificate_id: String,
    pub subject: DistinguishedName,
    pub validity: Validity,
    #[builder(default = 4096)]
    pub key_size_bits: usize,
    #[builder(default = 256)]
    pub hash_size_bits: u32,
    #[builder(default)]
    pub path_length: u8,
}

/// Runs the CA bootstrap protocol against a [`KeyCustodian`].
pub struct CaBootstrap<C: KeyCustodian + ?Sized> {
    custodian: Arc<C>,
    builder: CertificateBuilder,
    retry: RetryPolicy,
    poll: PollPolicy,
    sleeper: Arc<dyn Sleeper>,
    cancel: CancellationToken,
    state: Mutex<BootstrapState>,
}

impl<C: KeyCustodian + ?Sized> CaBootstrap<C> {
    pub fn new(custodian: Arc<C>, builder: CertificateBuilder) -> Self {
        Self {
            custodian,
            builder,
            retry: RetryPolicy::default(),
            poll: PollPolicy::default(),
            sleeper: Arc::new(TokioSleeper),
            cancel: CancellationToken::new(),
            state: Mutex::new(BootstrapState::Idle),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_poll(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
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

    /// The last state reached.
    pub fn state(&self) -> BootstrapState {
        *self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn enter(&self, certificate_id: &str, next: BootstrapState) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        debug!(certificate_id, from = ?*state, to = ?next, "bootstrap state");
        *state = next;
    }

    /// Creates the CA certificate unless one already exists.
    pub async fn run(&self, request: &CaBootstrapRequest) -> Result<BootstrapOutcome> {
        let id = request.certificate_id.as_str();
        self.enter(id, BootstrapState::Idle);
        info!(certificate_id = id, subject = %request.subject, "bootstrapping CA certificate");

        let versions = retry(
            &self.retry,
            self.sleeper.as_ref(),
            &self.cancel,
            "list_certificate_versions",
            || self.custodian.list_certificate_versions(id),
        )
        .await?;
        if versions > 0 {
            info!(
                certificate_id = id,
                versions,
                "CA certificate already exists"
            );
            return Ok(BootstrapOutcome::AlreadyExists);
        }

        let temp_policy = CertificatePolicy::builder()
            .subject(request.subject.clone())
            .key_size(request.key_size_bits)
            .issuer(PolicyIssuer::SelfSigned)
            .build();
        let temp = retry(
            &self.retry,
            self.sleeper.as_ref(),
            &self.cancel,
            "create_temporary_key",
            || self.create_temporary_key(id, &temp_policy),
        )
        .await?;
        self.enter(id, BootstrapState::TempKeyReady);

        let result = self.issue(request, &temp).await;

        match self
            .custodian
            .disable_certificate(id, &temp.version_id)
            .await
        {
            Ok(()) => {
                if result.is_ok() {
                    self.enter(id, BootstrapState::TempDisabled);
                }
                debug!(
                    certificate_id = id,
                    version = %temp.version_id,
                    "temporary certificate disabled"
                );
            }
            Err(err) => warn!(
                certificate_id = id,
                version = %temp.version_id,
                error = %err,
                "failed to disable temporary certificate"
            ),
        }

        let signed = result?;
        info!(
            certificate_id = id,
            serial = %hex::encode(signed.serial_number()),
            "CA certificate created"
        );
        Ok(BootstrapOutcome::Created(signed))
    }

    async fn create_temporary_key(
        &self,
        id: &str,
        policy: &CertificatePolicy,
    ) -> Result<CertificateBundle> {
        let handle = self.start_operation(id, policy).await?;
        self.enter(id, BootstrapState::TempKeyRequested);
        self.await_operation(&handle, |state| state.status == OperationStatus::Completed)
            .await?;
        self.custodian.get_certificate(id).await
    }

    async fn request_csr(&self, id: &str, policy: &CertificatePolicy) -> Result<Vec<u8>> {
        let handle = self.start_operation(id, policy).await?;
        self.enter(id, BootstrapState::CsrRequested);
        let state = self
            .await_operation(&handle, |state| {
                state.csr.is_some() || state.status == OperationStatus::Completed
            })
            .await?;
        state
            .csr
            .ok_or_else(|| CaError::InvalidCsr("custodian returned no signing request".to_string()))
    }

    async fn issue(
        &self,
        request: &CaBootstrapRequest,
        temp: &CertificateBundle,
    ) -> Result<SignedCertificate> {
        let id = request.certificate_id.as_str();

        let csr_policy = CertificatePolicy::builder()
            .subject(request.subject.clone())
            .key_size(request.key_size_bits)
            .issuer(PolicyIssuer::Unknown)
            .reuse_key(true)
            .tags(BTreeMap::from([(id.to_string(), "Issuer".to_string())]))
            .build();
        let csr_der = retry(
            &self.retry,
            self.sleeper.as_ref(),
            &self.cancel,
            "request_csr",
            || self.request_csr(id, &csr_policy),
        )
        .await?;

        let csr = csr::validate(&csr_der)?;
        self.enter(id, BootstrapState::CsrVerified);

        let spec = CertificateSpec::builder()
            .subject(request.subject.clone())
            .public_key(csr.public_key)
            .validity(request.validity)
            .key_size_bits(request.key_size_bits)
            .hash_size_bits(request.hash_size_bits)
            .role(CertificateRole::Root)
            .path_length(request.path_length)
            .build();
        let unsigned = self.builder.build(&spec, None, vec![])?;

        let signer = RemoteSignatureProvider::new(self.custodian.clone(), temp.key.clone())
            .with_retry(self.retry.clone())
            .with_sleeper(self.sleeper.clone())
            .with_cancellation(self.cancel.clone());
        let signed = unsigned.sign(&signer).await?;
        self.enter(id, BootstrapState::SelfSigned);

        retry(
            &self.retry,
            self.sleeper.as_ref(),
            &self.cancel,
            "merge_certificate",
            || self.custodian.merge_certificate(id, signed.to_der()),
        )
        .await?;
        self.enter(id, BootstrapState::Merged);

        Ok(signed)
    }

    /// Clears any stale pending operation, then starts a new one.
    async fn start_operation(
        &self,
        id: &str,
        policy: &CertificatePolicy,
    ) -> Result<OperationHandle> {
        match self.custodian.delete_operation(id).await {
            Ok(()) => debug!(certificate_id = id, "deleted stale pending operation"),
            Err(CaError::NotFound(_)) => {}
            Err(err) => debug!(
                certificate_id = id,
                error = %err,
                "ignoring failure to delete stale pending operation"
            ),
        }
        self.custodian.create_key(id, policy).await
    }

    /// Polls `handle` until `ready` holds, bounded by the poll policy.
    async fn await_operation(
        &self,
        handle: &OperationHandle,
        ready: impl Fn(&OperationState) -> bool,
    ) -> Result<OperationState> {
        for poll in 1..=self.poll.max_polls {
            let state = self.custodian.poll_operation(handle).await?;
            if let OperationStatus::Failed(reason) = &state.status {
                return Err(CaError::KeyGenerationFailed(reason.clone()));
            }
            if ready(&state) {
                return Ok(state);
            }
            debug!(
                certificate_id = %handle.certificate_id,
                request_id = %handle.request_id,
                poll,
                "operation in progress"
            );
            if poll < self.poll.max_polls {
                sleep_cancellable(self.sleeper.as_ref(), &self.cancel, self.poll.interval())
                    .await?;
            }
        }
        Err(CaError::RemoteUnavailable(format!(
            "operation {} on {} did not finish after {} polls",
            handle.request_id, handle.certificate_id, self.poll.max_polls
        )))
    }
}
