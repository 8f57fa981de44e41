use const_oid::AssociatedOid;
use der::{
    Decode, Encode,
    asn1::{Ia5String, OctetString},
    oid::ObjectIdentifier,
};
use x509_cert::ext::pkix::crl::dp::DistributionPoint;
use x509_cert::ext::pkix::name::{DistributionPointName, GeneralName};
use x509_cert::ext::pkix::{
    AccessDescription, AuthorityInfoAccessSyntax,
    CrlDistributionPoints as X509CrlDistributionPoints,
};
use x509_cert::serial_number::SerialNumber;

use super::Certificate;
use super::params::DistinguishedName;
use crate::error::CaError;

/// An X.509v3 extension value with a fixed OID.
///
/// Implementors encode to and decode from the DER `extnValue` contents; the
/// criticality flag is decided by whoever adds the extension to a certificate.
///
/// # Example
/// ```
/// use vaultca::cert::extensions::{CrlDistributionPoints, ToAndFromX509Extension};
/// let dp = CrlDistributionPoints { url: "http://pki.example.com/ca.crl".to_string() };
/// let encoded = dp.to_x509_extension_value().unwrap();
/// assert_eq!(CrlDistributionPoints::from_x509_extension_value(&encoded).unwrap(), dp);
/// ```
pub trait ToAndFromX509Extension {
    const OID: ObjectIdentifier;

    fn to_x509_extension_value(&self) -> Result<Vec<u8>, CaError>;

    fn from_x509_extension_value(extension: &[u8]) -> Result<Self, CaError>
    where
        Self: Sized;
}

fn uri(url: &str) -> Result<GeneralName, CaError> {
    Ia5String::new(url)
        .map(GeneralName::UniformResourceIdentifier)
        .map_err(|e| CaError::InvalidArgument(format!("URL '{url}' is not IA5: {e}")))
}

/// Substitutes `%serial%` in an extension URL template with the lowercase hex
/// serial number.
pub fn patch_extension_url(template: &str, serial_number: &[u8]) -> String {
    template.replace("%serial%", &hex::encode(serial_number))
}

/// Represents the Basic Constraints extension.
///
/// This extension indicates whether the certificate is a CA certificate and its path length.
///
/// # Fields
/// * `is_ca` - Indicates if the certificate is a CA.
/// * `max_path_length` - The maximum number of intermediate CAs allowed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BasicConstraints {
    pub is_ca: bool,
    pub max_path_length: Option<u8>,
}

impl ToAndFromX509Extension for BasicConstraints {
    const OID: ObjectIdentifier = x509_cert::ext::pkix::BasicConstraints::OID;

    fn to_x509_extension_value(&self) -> Result<Vec<u8>, CaError> {
        let bc = x509_cert::ext::pkix::BasicConstraints {
            ca: self.is_ca,
            path_len_constraint: self.max_path_length,
        };

        Ok(bc.to_der()?)
    }

    fn from_x509_extension_value(der_bytes: &[u8]) -> Result<Self, CaError> {
        let bc = x509_cert::ext::pkix::BasicConstraints::from_der(der_bytes)?;
        Ok(Self {
            is_ca: bc.ca,
            max_path_length: bc.path_len_constraint,
        })
    }
}

/// Represents the Subject Key Identifier extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectKeyIdentifier(pub Vec<u8>);

impl ToAndFromX509Extension for SubjectKeyIdentifier {
    const OID: ObjectIdentifier = x509_cert::ext::pkix::SubjectKeyIdentifier::OID;

    fn to_x509_extension_value(&self) -> Result<Vec<u8>, CaError> {
        let ski = x509_cert::ext::pkix::SubjectKeyIdentifier(OctetString::new(self.0.as_slice())?);
        Ok(ski.to_der()?)
    }

    fn from_x509_extension_value(extension: &[u8]) -> Result<Self, CaError> {
        let ski = x509_cert::ext::pkix::SubjectKeyIdentifier::from_der(extension)?;
        Ok(Self(ski.0.as_bytes().to_vec()))
    }
}

pub use der::flagset::FlagSet;
use x509_cert::ext::pkix::KeyUsage as X509KeyUsage;
pub use x509_cert::ext::pkix::KeyUsages;

/// Represents the Key Usage extension.
///
/// This extension defines the purpose of the key contained in the certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyUsage(pub FlagSet<KeyUsages>);

impl ToAndFromX509Extension for KeyUsage {
    const OID: ObjectIdentifier = <X509KeyUsage as AssociatedOid>::OID;

    fn to_x509_extension_value(&self) -> Result<Vec<u8>, CaError> {
        let ku = X509KeyUsage::from(self.0);
        Ok(ku.to_der()?)
    }

    fn from_x509_extension_value(extension: &[u8]) -> Result<Self, CaError> {
        let ku = X509KeyUsage::from_der(extension)?;
        Ok(Self(ku.0))
    }
}

/// Represents the Extended Key Usage extension.
///
/// This extension indicates purposes for which the public key may be used.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtendedKeyUsage {
    pub usage: Vec<ExtendedKeyUsageOption>,
}

impl ToAndFromX509Extension for ExtendedKeyUsage {
    const OID: ObjectIdentifier = x509_cert::ext::pkix::ExtendedKeyUsage::OID;

    fn to_x509_extension_value(&self) -> Result<Vec<u8>, CaError> {
        let oids = self.usage.iter().map(|usage| usage.oid()).collect();
        Ok(x509_cert::ext::pkix::ExtendedKeyUsage(oids).to_der()?)
    }

    fn from_x509_extension_value(extension: &[u8]) -> Result<Self, CaError> {
        let eku = x509_cert::ext::pkix::ExtendedKeyUsage::from_der(extension)?;
        let usage = eku
            .0
            .iter()
            .map(|oid| {
                ExtendedKeyUsageOption::from_oid(*oid).ok_or_else(|| {
                    CaError::DecodingError(format!("unknown extended key usage {oid}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { usage })
    }
}

/// Key purposes understood by the builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtendedKeyUsageOption {
    ServerAuth,
    ClientAuth,
    CodeSigning,
    EmailProtection,
    TimeStamping,
    OcspSigning,
}

impl ExtendedKeyUsageOption {
    const ALL: [Self; 6] = [
        Self::ServerAuth,
        Self::ClientAuth,
        Self::CodeSigning,
        Self::EmailProtection,
        Self::TimeStamping,
        Self::OcspSigning,
    ];

    pub fn oid(&self) -> ObjectIdentifier {
        use const_oid::db::rfc5912::*;
        match self {
            Self::ServerAuth => ID_KP_SERVER_AUTH,
            Self::ClientAuth => ID_KP_CLIENT_AUTH,
            Self::CodeSigning => ID_KP_CODE_SIGNING,
            Self::EmailProtection => ID_KP_EMAIL_PROTECTION,
            Self::TimeStamping => ID_KP_TIME_STAMPING,
            Self::OcspSigning => ID_KP_OCSP_SIGNING,
        }
    }

    pub fn from_oid(oid: ObjectIdentifier) -> Option<Self> {
        Self::ALL.into_iter().find(|usage| usage.oid() == oid)
    }
}

/// Represents the Authority Key Identifier (AKI) extension.
///
/// This extension identifies the public key corresponding to the private key
/// used to sign the certificate.
///
/// # Fields
/// * `key_identifier` - The key identifier.
/// * `authority_cert_issuer` - The issuer's distinguished name.
/// * `authority_cert_serial_number` - The issuer's certificate serial number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorityKeyIdentifier {
    pub key_identifier: Vec<u8>,
    pub authority_cert_issuer: DistinguishedName,
    pub authority_cert_serial_number: Vec<u8>,
}

impl AuthorityKeyIdentifier {
    /// Links to an issuing CA certificate through its SKI, its own issuer name
    /// and its serial.
    ///
    /// Fails with [`CaError::MissingExtension`] when the issuer has no SKI.
    pub fn from_issuer(issuer: &Certificate) -> Result<Self, CaError> {
        Ok(Self {
            key_identifier: issuer.subject_key_identifier()?,
            authority_cert_issuer: issuer.issuer(),
            authority_cert_serial_number: issuer.serial_number().to_vec(),
        })
    }

    /// Self-referential form for a self-signed certificate: its own SKI, its own
    /// subject and its own serial, big-endian as encoded in the certificate.
    pub fn self_signed(
        subject: &DistinguishedName,
        serial_number: &[u8],
        subject_key_identifier: &[u8],
    ) -> Self {
        Self {
            key_identifier: subject_key_identifier.to_vec(),
            authority_cert_issuer: subject.clone(),
            authority_cert_serial_number: serial_number.to_vec(),
        }
    }
}

impl ToAndFromX509Extension for AuthorityKeyIdentifier {
    const OID: ObjectIdentifier = x509_cert::ext::pkix::AuthorityKeyIdentifier::OID;

    fn to_x509_extension_value(&self) -> Result<Vec<u8>, CaError> {
        let general_names = vec![GeneralName::DirectoryName(
            self.authority_cert_issuer.as_x509_name(),
        )];

        let aki = x509_cert::ext::pkix::AuthorityKeyIdentifier {
            key_identifier: Some(OctetString::new(self.key_identifier.as_slice())?),
            authority_cert_issuer: Some(general_names),
            authority_cert_serial_number: Some(SerialNumber::new(
                self.authority_cert_serial_number.as_slice(),
            )?),
        };

        Ok(aki.to_der()?)
    }

    fn from_x509_extension_value(extension: &[u8]) -> Result<Self, CaError> {
        let aki = x509_cert::ext::pkix::AuthorityKeyIdentifier::from_der(extension)?;

        let authority_cert_issuer = aki
            .authority_cert_issuer
            .as_ref()
            .and_then(|names| {
                names.iter().find_map(|name| match name {
                    GeneralName::DirectoryName(dn) => Some(DistinguishedName::from_x509_name(dn)),
                    _ => None,
                })
            })
            .ok_or_else(|| {
                CaError::MissingExtension("authority key identifier issuer name".to_string())
            })?;

        Ok(Self {
            key_identifier: aki
                .key_identifier
                .map(|id| id.as_bytes().to_vec())
                .unwrap_or_default(),
            authority_cert_issuer,
            authority_cert_serial_number: aki
                .authority_cert_serial_number
                .map(|sn| sn.as_bytes().to_vec())
                .unwrap_or_default(),
        })
    }
}

/// Represents the CRL Distribution Points extension for a single URL.
///
/// ```text
/// SEQUENCE { DistributionPoint { [0] fullName { [0] { [6] IA5String } } } }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrlDistributionPoints {
    pub url: String,
}

impl ToAndFromX509Extension for CrlDistributionPoints {
    const OID: ObjectIdentifier = X509CrlDistributionPoints::OID;

    fn to_x509_extension_value(&self) -> Result<Vec<u8>, CaError> {
        let dp = DistributionPoint {
            distribution_point: Some(DistributionPointName::FullName(vec![uri(&self.url)?])),
            reasons: None,
            crl_issuer: None,
        };
        Ok(X509CrlDistributionPoints(vec![dp]).to_der()?)
    }

    fn from_x509_extension_value(extension: &[u8]) -> Result<Self, CaError> {
        let points = X509CrlDistributionPoints::from_der(extension)?;
        points
            .0
            .iter()
            .filter_map(|dp| match &dp.distribution_point {
                Some(DistributionPointName::FullName(names)) => Some(names),
                _ => None,
            })
            .flatten()
            .find_map(|name| match name {
                GeneralName::UniformResourceIdentifier(url) => Some(Self {
                    url: url.to_string(),
                }),
                _ => None,
            })
            .ok_or_else(|| CaError::DecodingError("no URI distribution point".to_string()))
    }
}

/// Represents the Authority Information Access extension.
///
/// CA issuer locations are written first, the OCSP responder last.
///
/// # Fields
/// * `ca_issuers` - URLs where the issuing CA certificate can be fetched.
/// * `ocsp` - Optional OCSP responder URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorityInformationAccess {
    pub ca_issuers: Vec<String>,
    pub ocsp: Option<String>,
}

impl ToAndFromX509Extension for AuthorityInformationAccess {
    const OID: ObjectIdentifier = AuthorityInfoAccessSyntax::OID;

    fn to_x509_extension_value(&self) -> Result<Vec<u8>, CaError> {
        let ocsp = self.ocsp.as_deref().filter(|url| !url.is_empty());
        if self.ca_issuers.is_empty() && ocsp.is_none() {
            return Err(CaError::InvalidArgument(
                "one CA issuer URL or OCSP responder is required".to_string(),
            ));
        }

        let mut descriptions = self
            .ca_issuers
            .iter()
            .map(|url| {
                Ok(AccessDescription {
                    access_method: const_oid::db::rfc5912::ID_AD_CA_ISSUERS,
                    access_location: uri(url)?,
                })
            })
            .collect::<Result<Vec<_>, CaError>>()?;
        if let Some(url) = ocsp {
            descriptions.push(AccessDescription {
                access_method: const_oid::db::rfc5912::ID_AD_OCSP,
                access_location: uri(url)?,
            });
        }

        Ok(AuthorityInfoAccessSyntax(descriptions).to_der()?)
    }

    fn from_x509_extension_value(extension: &[u8]) -> Result<Self, CaError> {
        let aia = AuthorityInfoAccessSyntax::from_der(extension)?;
        let mut result = Self::default();
        for description in aia.0 {
            let GeneralName::UniformResourceIdentifier(url) = description.access_location else {
                continue;
            };
            if description.access_method == const_oid::db::rfc5912::ID_AD_CA_ISSUERS {
                result.ca_issuers.push(url.to_string());
            } else if description.access_method == const_oid::db::rfc5912::ID_AD_OCSP {
                result.ocsp = Some(url.to_string());
            }
        }
        Ok(result)
    }
}
