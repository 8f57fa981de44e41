//! Configuration of the certificate authority.
//!
//! Loading it from files or the environment is the embedding application's
//! job; this module only defines the shape, the defaults and validation.

use bon::Builder;
use serde::{Deserialize, Serialize};

use crate::error::{CaError, Result};
use crate::issuer::BuilderOptions;
use crate::retry::{PollPolicy, RetryPolicy};

/// RSA modulus lengths the custodian accepts.
pub const SUPPORTED_KEY_SIZES: [usize; 3] = [2048, 3072, 4096];

/// Longest validity, in days, of an issued leaf certificate.
pub const MAX_CERT_VALIDITY_DAYS: u32 = 365;

/// Settings of a [`crate::authority::CertificateAuthority`].
///
/// # Fields
/// * `issuing_ca` - Custodian name of the CA certificate that signs requests.
/// * `leaf_key_size` - Required key size of signing requests.
/// * `ca_key_size` - Key size of bootstrapped CA keys.
/// * `hash_size` - Digest size in bits, rounded up to a SHA tier.
/// * `cert_validity_days` - Validity of issued leaf certificates.
/// * `ca_validity_months` - Validity of bootstrapped CA certificates.
/// * `cert_path_length` - Path length constraint of CA certificates.
/// * `extension_url_template` - CRL/AIA URL with an optional `%serial%` placeholder.
/// * `ocsp_url` - OCSP responder placed in the AIA of leaf certificates.
/// * `ca_certs` - Custodian names of the certificates served as the CA bundle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[serde(default)]
pub struct CaConfig {
    #[builder(into)]
    pub issuing_ca: String,
    #[builder(default = 2048)]
    pub leaf_key_size: usize,
    #[builder(default = 4096)]
    pub ca_key_size: usize,
    #[builder(default = 256)]
    pub hash_size: u32,
    #[builder(default = 365)]
    pub cert_validity_days: u32,
    #[builder(default = 48)]
    pub ca_validity_months: u32,
    #[builder(default)]
    pub cert_path_length: u8,
    #[builder(into)]
    pub extension_url_template: Option<String>,
    #[builder(into)]
    pub ocsp_url: Option<String>,
    #[builder(default)]
    pub ca_certs: Vec<String>,
    #[builder(default)]
    pub retry: RetryPolicy,
    #[builder(default)]
    pub poll: PollPolicy,
}

impl Default for CaConfig {
    fn default() -> Self {
        Self::builder().issuing_ca("IssuingCA").build()
    }
}

impl CaConfig {
    pub fn validate(&self) -> Result<()> {
        if self.issuing_ca.trim().is_empty() {
            return Err(CaError::InvalidArgument(
                "issuing CA name must not be empty".to_string(),
            ));
        }
        for (name, size) in [
            ("leaf_key_size", self.leaf_key_size),
            ("ca_key_size", self.ca_key_size),
        ] {
            if !SUPPORTED_KEY_SIZES.contains(&size) {
                return Err(CaError::InvalidArgument(format!(
                    "{name} {size} is not one of {SUPPORTED_KEY_SIZES:?}"
                )));
            }
        }
        if self.hash_size == 0 {
            return Err(CaError::UnsupportedHash(0));
        }
        if !(1..=MAX_CERT_VALIDITY_DAYS).contains(&self.cert_validity_days) {
            return Err(CaError::InvalidArgument(format!(
                "cert_validity_days must be between 1 and {MAX_CERT_VALIDITY_DAYS}, got {}",
                self.cert_validity_days
            )));
        }
        if self.ca_validity_months == 0 {
            return Err(CaError::InvalidArgument(
                "ca_validity_months must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn builder_options(&self) -> BuilderOptions {
        BuilderOptions {
            extension_url_template: self.extension_url_template.clone(),
            ocsp_url: self.ocsp_url.clone(),
        }
    }

    /// Names served as the CA bundle; the issuing CA when none are configured.
    pub fn ca_bundle_names(&self) -> Vec<String> {
        if self.ca_certs.is_empty() {
            vec![self.issuing_ca.clone()]
        } else {
            self.ca_certs.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CaConfig::default();
        assert_eq!(config.issuing_ca, "IssuingCA");
        assert_eq!(config.leaf_key_size, 2048);
        assert_eq!(config.ca_key_size, 4096);
        assert_eq!(config.cert_validity_days, 365);
        assert_eq!(config.retry.max_retries, 6);
        assert_eq!(config.poll.max_polls, 150);
        config.validate().unwrap();
    }

    #[test]
    fn test_deserialize_partial() {
        let config: CaConfig = serde_json::from_str(
            r#"{
                "issuing_ca": "Contoso",
                "cert_validity_days": 30,
                "extension_url_template": "http://pki.contoso/%serial%.crl",
                "retry": {"max_retries": 2}
            }"#,
        )
        .unwrap();
        assert_eq!(config.issuing_ca, "Contoso");
        assert_eq!(config.cert_validity_days, 30);
        assert_eq!(config.hash_size, 256);
        assert_eq!(config.retry.max_retries, 2);
        assert_eq!(config.retry.base_delay_ms, 1000);
        assert_eq!(config.ca_bundle_names(), vec!["Contoso".to_string()]);
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let base = || CaConfig::builder().issuing_ca("ca");
        let bad = [
            CaConfig::builder().issuing_ca(" ").build(),
            base().leaf_key_size(1024).build(),
            base().ca_key_size(8192).build(),
            base().cert_validity_days(0).build(),
            base().cert_validity_days(366).build(),
            base().ca_validity_months(0).build(),
        ];
        for config in bad {
            assert!(
                matches!(config.validate(), Err(CaError::InvalidArgument(_))),
                "{config:?}"
            );
        }
        let config = CaConfig::builder().issuing_ca("ca").hash_size(0).build();
        assert_eq!(config.validate(), Err(CaError::UnsupportedHash(0)));
    }
}
