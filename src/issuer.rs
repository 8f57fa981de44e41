use der::flagset::FlagSet;
use tracing::debug;

use crate::cert::extensions::{
    AuthorityInformationAccess, AuthorityKeyIdentifier, BasicConstraints, CrlDistributionPoints,
    ExtendedKeyUsage, ExtendedKeyUsageOption, KeyUsage, KeyUsages, SubjectKeyIdentifier,
    patch_extension_url,
};
use crate::cert::params::{CertificateRole, CertificateSpec, ExtensionParam, ExtensionSet};
use crate::cert::{Certificate, HashAlgorithm, SignatureAlgorithm};
use crate::error::{CaError, Result};
use crate::tbs_certificate::{TbsCertificate, UnsignedCertificate, generate_serial_number};

/// Issuer-independent settings of the certificate builder.
///
/// # Fields
/// * `extension_url_template` - CRL/AIA URL; `%serial%` is replaced by a hex serial number.
/// * `ocsp_url` - OCSP responder added to the AIA of leaf certificates.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BuilderOptions {
    pub extension_url_template: Option<String>,
    pub ocsp_url: Option<String>,
}

/// Turns a [`CertificateSpec`] into an [`UnsignedCertificate`].
///
/// The builder decides the serial number, the extensions and the final
/// validity window. Signing is left to a [`crate::signer::Signer`]; the
/// builder never touches key material.
#[derive(Clone, Debug, Default)]
pub struct CertificateBuilder {
    options: BuilderOptions,
}

impl CertificateBuilder {
    pub fn new(options: BuilderOptions) -> Self {
        Self { options }
    }

    /// Builds the certificate body.
    ///
    /// # Arguments
    /// * `spec` - Subject, key, requested validity and role.
    /// * `issuer` - The issuing CA certificate, or `None` for a self-signed certificate.
    /// * `extra` - Additional extensions, emitted after the generated ones.
    pub fn build(
        &self,
        spec: &CertificateSpec,
        issuer: Option<&Certificate>,
        extra: Vec<ExtensionParam>,
    ) -> Result<UnsignedCertificate> {
        let actual = spec.public_key.size_bits();
        if actual != spec.key_size_bits {
            return Err(CaError::KeySizeMismatch {
                expected: spec.key_size_bits,
                actual,
            });
        }
        let hash = HashAlgorithm::from_bits(spec.hash_size_bits)?;
        spec.validity.check()?;

        let serial_number = generate_serial_number();
        let subject_key_id = spec.public_key.key_identifier()?;

        let mut extensions = ExtensionSet::new();

        let basic_constraints = BasicConstraints {
            is_ca: spec.role.is_ca(),
            max_path_length: spec.role.is_ca().then_some(spec.path_length),
        };
        extensions.push(&basic_constraints, true)?;
        extensions.push(&SubjectKeyIdentifier(subject_key_id.clone()), false)?;

        let authority_key_id = match issuer {
            Some(issuer) => AuthorityKeyIdentifier::from_issuer(issuer)?,
            None => {
                AuthorityKeyIdentifier::self_signed(&spec.subject, &serial_number, &subject_key_id)
            }
        };
        extensions.push(&authority_key_id, false)?;

        extensions.push(&KeyUsage(key_usages(spec.role, issuer.is_none())), true)?;
        if spec.role == CertificateRole::Leaf {
            let eku = ExtendedKeyUsage {
                usage: vec![
                    ExtendedKeyUsageOption::ServerAuth,
                    ExtendedKeyUsageOption::ClientAuth,
                ],
            };
            extensions.push(&eku, true)?;
        }

        if let Some(template) = self.options.extension_url_template.as_deref() {
            if spec.role.is_ca() {
                let crl = CrlDistributionPoints {
                    url: patch_extension_url(template, &serial_number),
                };
                extensions.push(&crl, false)?;
            } else if let Some(issuer) = issuer {
                let aia = AuthorityInformationAccess {
                    ca_issuers: vec![patch_extension_url(template, issuer.serial_number())],
                    ocsp: self.options.ocsp_url.clone(),
                };
                extensions.push(&aia, false)?;
            }
        }

        for extension in extra {
            extensions.insert(extension)?;
        }

        let (issuer_name, validity) = match issuer {
            Some(issuer) => (issuer.subject(), spec.validity.clamp_to(&issuer.validity()?)?),
            None => (spec.subject.clone(), spec.validity),
        };

        debug!(
            subject = %spec.subject,
            issuer = %issuer_name,
            role = ?spec.role,
            serial = %hex::encode(&serial_number),
            %hash,
            extensions = extensions.len(),
            "certificate built"
        );

        let tbs = TbsCertificate {
            serial_number,
            signature_algorithm: SignatureAlgorithm::rsa_pkcs1(hash),
            issuer: issuer_name,
            validity,
            subject: spec.subject.clone(),
            subject_public_key: spec.public_key.clone(),
            extensions,
        };
        Ok(UnsignedCertificate::new(tbs, hash))
    }
}

fn key_usages(role: CertificateRole, self_issued: bool) -> FlagSet<KeyUsages> {
    if role.is_ca() {
        return KeyUsages::DigitalSignature | KeyUsages::KeyCertSign | KeyUsages::CRLSign;
    }
    let mut usages = KeyUsages::DigitalSignature
        | KeyUsages::DataEncipherment
        | KeyUsages::NonRepudiation
        | KeyUsages::KeyEncipherment;
    if self_issued {
        usages |= KeyUsages::KeyCertSign;
    }
    usages
}
