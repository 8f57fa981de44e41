//! The certificate authority service.
//!
//! Owns the custodian client for the lifetime of the process and exposes the
//! operations a protocol front end needs: bootstrap of the issuing CA, signing
//! of requests and the CA bundle.

use std::sync::Arc;

use time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::bootstrap::{BootstrapOutcome, CaBootstrap, CaBootstrapRequest};
use crate::cert::params::{CertificateRole, CertificateSpec, DistinguishedName, Validity};
use crate::cert::{Certificate, SignedCertificate};
use crate::config::CaConfig;
use crate::custodian::{CertificateBundle, KeyCustodian};
use crate::error::Result;
use crate::issuer::CertificateBuilder;
use crate::pem_utils::decode_request_body;
use crate::retry::{Sleeper, TokioSleeper, retry};
use crate::signer::remote::RemoteSignatureProvider;

/// Certificate authority backed by a remote key custodian.
pub struct CertificateAuthority<C: KeyCustodian + ?Sized> {
    config: CaConfig,
    custodian: Arc<C>,
    builder: CertificateBuilder,
    sleeper: Arc<dyn Sleeper>,
    cancel: CancellationToken,
}

impl<C: KeyCustodian + ?Sized> CertificateAuthority<C> {
    /// Validates `config` and takes ownership of the custodian client.
    pub fn new(config: CaConfig, custodian: Arc<C>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            builder: CertificateBuilder::new(config.builder_options()),
            config,
            custodian,
            sleeper: Arc::new(TokioSleeper),
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn config(&self) -> &CaConfig {
        &self.config
    }

    pub fn custodian(&self) -> &Arc<C> {
        &self.custodian
    }

    /// Token cancelled by [`Self::shutdown`]; outstanding work observes it.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Bootstraps the issuing CA certificate named in the configuration.
    ///
    /// Returns [`BootstrapOutcome::AlreadyExists`] when it is already present.
    #[instrument(skip(self), fields(issuing_ca = %self.config.issuing_ca))]
    pub async fn create_ca_certificate(
        &self,
        subject: &DistinguishedName,
    ) -> Result<BootstrapOutcome> {
        let validity =
            Validity::for_months(Validity::backdated_now(), self.config.ca_validity_months)?;
        let request = CaBootstrapRequest::builder()
            .certificate_id(self.config.issuing_ca.clone())
            .subject(subject.clone())
            .validity(validity)
            .key_size_bits(self.config.ca_key_size)
            .hash_size_bits(self.config.hash_size)
            .path_length(self.config.cert_path_length)
            .build();

        CaBootstrap::new(self.custodian.clone(), self.builder.clone())
            .with_retry(self.config.retry.clone())
            .with_poll(self.config.poll.clone())
            .with_sleeper(self.sleeper.clone())
            .with_cancellation(self.cancel.clone())
            .run(&request)
            .await
    }

    /// Validates a signing request and issues a certificate for it under the
    /// issuing CA.
    ///
    /// `body` may be DER, PEM or bare base64.
    #[instrument(skip(self, body), fields(issuing_ca = %self.config.issuing_ca))]
    pub async fn sign_request(
        &self,
        body: &[u8],
        role: CertificateRole,
    ) -> Result<SignedCertificate> {
        let csr = crate::csr::validate(&decode_request_body(body)?)?;

        let bundle = self.issuer_bundle().await?;
        let issuer = bundle.certificate()?;

        let not_before = Validity::backdated_now();
        let validity = Validity::new(
            not_before,
            not_before + Duration::days(i64::from(self.config.cert_validity_days)),
        )?;
        let spec = CertificateSpec::builder()
            .subject(csr.subject)
            .public_key(csr.public_key)
            .validity(validity)
            .key_size_bits(self.config.leaf_key_size)
            .hash_size_bits(self.config.hash_size)
            .role(role)
            .path_length(self.config.cert_path_length)
            .build();
        let unsigned = self.builder.build(&spec, Some(&issuer), vec![])?;

        let signer = RemoteSignatureProvider::new(self.custodian.clone(), bundle.key.clone())
            .with_retry(self.config.retry.clone())
            .with_sleeper(self.sleeper.clone())
            .with_cancellation(self.cancel.clone());
        let signed = unsigned.sign(&signer).await?;

        info!(
            subject = %spec.subject,
            serial = %hex::encode(signed.serial_number()),
            role = ?role,
            "certificate issued"
        );
        Ok(signed)
    }

    /// The current issuing CA certificate.
    pub async fn issuer_certificate(&self) -> Result<Certificate> {
        self.issuer_bundle().await?.certificate()
    }

    /// The certificates of the CA bundle, in configuration order.
    pub async fn ca_certificates(&self) -> Result<Vec<Certificate>> {
        let mut certificates = Vec::new();
        for name in self.config.ca_bundle_names() {
            let bundle = self.fetch_bundle(&name).await?;
            certificates.push(bundle.certificate()?);
        }
        Ok(certificates)
    }

    /// Cancels outstanding work and closes the custodian client.
    pub async fn shutdown(&self) -> Result<()> {
        self.cancel.cancel();
        info!("certificate authority shutting down");
        self.custodian.close().await
    }

    async fn issuer_bundle(&self) -> Result<CertificateBundle> {
        self.fetch_bundle(&self.config.issuing_ca).await
    }

    async fn fetch_bundle(&self, name: &str) -> Result<CertificateBundle> {
        retry(
            &self.config.retry,
            self.sleeper.as_ref(),
            &self.cancel,
            "get_certificate",
            || self.custodian.get_certificate(name),
        )
        .await
    }
}
