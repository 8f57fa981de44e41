use std::str::FromStr;
use std::time::Duration as StdDuration;

use bon::Builder;
use const_oid::ObjectIdentifier;
use der::asn1::{GeneralizedTime, OctetString, PrintableStringRef, UtcTime};
use time::{Duration, OffsetDateTime};
use x509_cert::name::{Name, RdnSequence};
use x509_cert::time::Time;

use super::extensions::ToAndFromX509Extension;
use crate::error::{CaError, Result};
use crate::key::PublicKey;

/// Parameters for building an X.509 certificate.
///
/// # Fields
/// * `subject` - The distinguished name of the certificate subject.
/// * `public_key` - The public key of the certificate subject.
/// * `validity` - The requested validity window, clamped to the issuer's.
/// * `key_size_bits` - The expected size of `public_key`.
/// * `hash_size_bits` - Requested digest size, rounded to a SHA tier.
/// * `role` - Root CA, intermediate CA or leaf.
/// * `path_length` - Path length constraint, only emitted for CA roles.
#[derive(Clone, Debug, Builder)]
pub struct CertificateSpec {
    pub subject: DistinguishedName,
    pub public_key: PublicKey,
    pub validity: Validity,
    #[builder(default = 2048)]
    pub key_size_bits: usize,
    #[builder(default = 256)]
    pub hash_size_bits: u32,
    #[builder(default)]
    pub role: CertificateRole,
    #[builder(default)]
    pub path_length: u8,
}

/// What the issued certificate is allowed to do.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CertificateRole {
    /// Self-signed trust anchor.
    Root,
    /// CA certificate issued by another CA.
    Intermediate,
    /// End-entity certificate.
    #[default]
    Leaf,
}

impl CertificateRole {
    pub fn is_ca(&self) -> bool {
        !matches!(self, CertificateRole::Leaf)
    }
}

/// Distinguished name of a certificate subject or issuer.
///
/// Keeps the full RDN sequence so that names decoded from a signing request
/// are reproduced byte for byte in the certificate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DistinguishedName(Name);

impl DistinguishedName {
    /// Parses an RFC 4514 string such as `CN=device1,O=Contoso`.
    pub fn parse(name: &str) -> Result<Self> {
        RdnSequence::from_str(name)
            .map(Self)
            .map_err(|e| CaError::InvalidArgument(format!("distinguished name '{name}': {e}")))
    }

    /// Converts the distinguished name to an X.509-compatible format.
    pub fn as_x509_name(&self) -> Name {
        self.0.clone()
    }

    /// Creates a `DistinguishedName` from an X.509-compatible format.
    pub fn from_x509_name(x509dn: &Name) -> Self {
        Self(x509dn.clone())
    }

    /// The first common name (CN) attribute, if any.
    pub fn common_name(&self) -> Option<String> {
        self.0
            .0
            .iter()
            .flat_map(|rdn| rdn.0.iter())
            .filter(|attr| attr.oid == const_oid::db::rfc4519::CN)
            .find_map(|attr| {
                attr.value.decode_as::<String>().ok().or_else(|| {
                    attr.value
                        .decode_as::<PrintableStringRef<'_>>()
                        .ok()
                        .map(|s| s.to_string())
                })
            })
    }
}

impl std::fmt::Display for DistinguishedName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

/// Certificate validity period.
///
/// # Fields
/// * `not_before` - The start of the validity period.
/// * `not_after` - The end of the validity period.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Validity {
    pub not_before: OffsetDateTime,
    pub not_after: OffsetDateTime,
}

impl Validity {
    pub fn new(not_before: OffsetDateTime, not_after: OffsetDateTime) -> Result<Self> {
        let validity = Self {
            not_before: truncate_to_seconds(not_before)?,
            not_after: truncate_to_seconds(not_after)?,
        };
        validity.check()?;
        Ok(validity)
    }

    /// Creates a validity period starting at `not_before` for the given number of days.
    pub fn for_days(not_before: OffsetDateTime, days: i64) -> Result<Self> {
        Self::new(not_before, not_before + Duration::days(days))
    }

    /// Creates a validity period starting at `not_before` for the given number of
    /// calendar months. The day of month is clamped to the target month's length.
    pub fn for_months(not_before: OffsetDateTime, months: u32) -> Result<Self> {
        Self::new(not_before, add_months(not_before, months)?)
    }

    /// Backdated start used for issuance: one day before now, absorbing clock skew.
    pub fn backdated_now() -> OffsetDateTime {
        OffsetDateTime::now_utc() - Duration::days(1)
    }

    pub fn check(&self) -> Result<()> {
        if self.not_before >= self.not_after {
            return Err(CaError::InvalidArgument(format!(
                "validity window is empty: not_before {} is not before not_after {}",
                self.not_before, self.not_after
            )));
        }
        Ok(())
    }

    /// Restricts this window to lie inside `outer`.
    pub fn clamp_to(&self, outer: &Validity) -> Result<Self> {
        let clamped = Self {
            not_before: self.not_before.max(outer.not_before),
            not_after: self.not_after.min(outer.not_after),
        };
        clamped.check()?;
        Ok(clamped)
    }

    pub fn duration(&self) -> Duration {
        self.not_after - self.not_before
    }

    pub fn to_x509(&self) -> Result<x509_cert::time::Validity> {
        Ok(x509_cert::time::Validity {
            not_before: to_x509_time(self.not_before)?,
            not_after: to_x509_time(self.not_after)?,
        })
    }

    pub fn from_x509(validity: &x509_cert::time::Validity) -> Result<Self> {
        Ok(Self {
            not_before: from_x509_time(&validity.not_before)?,
            not_after: from_x509_time(&validity.not_after)?,
        })
    }
}

fn truncate_to_seconds(t: OffsetDateTime) -> Result<OffsetDateTime> {
    Ok(t.replace_nanosecond(0)?)
}

fn add_months(t: OffsetDateTime, months: u32) -> Result<OffsetDateTime> {
    let total = t.year() * 12 + (u8::from(t.month()) as i32 - 1) + months as i32;
    let year = total.div_euclid(12);
    let month = time::Month::try_from((total.rem_euclid(12) + 1) as u8)?;
    let day = t.day().min(month.length(year));
    let date = time::Date::from_calendar_date(year, month, day)?;
    Ok(t.replace_date(date))
}

/// RFC 5280: UTCTime through 2049, GeneralizedTime from 2050 on.
fn to_x509_time(t: OffsetDateTime) -> Result<Time> {
    let secs = u64::try_from(t.unix_timestamp()).map_err(|_| {
        CaError::InvalidArgument(format!("time {t} predates the unix epoch"))
    })?;
    let dt = der::DateTime::from_unix_duration(StdDuration::from_secs(secs))?;
    if dt.year() < 2050 {
        Ok(Time::UtcTime(UtcTime::from_date_time(dt)?))
    } else {
        Ok(Time::GeneralTime(GeneralizedTime::from_date_time(dt)))
    }
}

fn from_x509_time(t: &Time) -> Result<OffsetDateTime> {
    let secs = t.to_unix_duration().as_secs();
    let secs = i64::try_from(secs)
        .map_err(|_| CaError::DecodingError(format!("time {secs} out of range")))?;
    Ok(OffsetDateTime::from_unix_timestamp(secs)?)
}

/// Represents an X.509 extension.
///
/// # Fields
/// * `oid` - The object identifier of the extension.
/// * `critical` - Indicates if the extension is critical.
/// * `value` - The DER-encoded value of the extension.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtensionParam {
    pub oid: ObjectIdentifier,
    pub critical: bool,
    /// DER-encoded extension value
    pub value: Vec<u8>,
}

impl ExtensionParam {
    /// Creates an `ExtensionParam` from a specific extension.
    pub fn from_extension<E: ToAndFromX509Extension>(
        extension: &E,
        critical: bool,
    ) -> Result<Self> {
        Ok(Self {
            oid: E::OID,
            critical,
            value: extension.to_x509_extension_value()?,
        })
    }

    /// Decodes an `ExtensionParam` into a specific extension.
    pub fn to_extension<E: ToAndFromX509Extension>(&self) -> Result<E> {
        E::from_x509_extension_value(&self.value)
    }

    pub fn from_x509(ext: &x509_cert::ext::Extension) -> Self {
        Self {
            oid: ext.extn_id,
            critical: ext.critical,
            value: ext.extn_value.as_bytes().to_vec(),
        }
    }

    pub fn to_x509(&self) -> Result<x509_cert::ext::Extension> {
        Ok(x509_cert::ext::Extension {
            extn_id: self.oid,
            critical: self.critical,
            extn_value: OctetString::new(self.value.clone())?,
        })
    }
}

/// Ordered set of extensions, at most one per OID.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExtensionSet {
    extensions: Vec<ExtensionParam>,
}

impl ExtensionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, extension: ExtensionParam) -> Result<()> {
        if self.contains(&extension.oid) {
            return Err(CaError::InvalidArgument(format!(
                "duplicate extension {}",
                extension.oid
            )));
        }
        self.extensions.push(extension);
        Ok(())
    }

    pub fn push<E: ToAndFromX509Extension>(&mut self, extension: &E, critical: bool) -> Result<()> {
        self.insert(ExtensionParam::from_extension(extension, critical)?)
    }

    pub fn contains(&self, oid: &ObjectIdentifier) -> bool {
        self.extensions.iter().any(|ext| &ext.oid == oid)
    }

    pub fn get(&self, oid: &ObjectIdentifier) -> Option<&ExtensionParam> {
        self.extensions.iter().find(|ext| &ext.oid == oid)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExtensionParam> {
        self.extensions.iter()
    }

    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }
}
