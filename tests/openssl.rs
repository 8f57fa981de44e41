mod util;

use std::fs;
use std::process::Command;
use std::sync::Arc;

use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::PKey;
use openssl::rsa::Rsa;
use openssl::x509::{X509, X509NameBuilder, X509Req, X509ReqBuilder};
use regex::Regex;
use vaultca::authority::CertificateAuthority;
use vaultca::cert::params::CertificateRole;
use vaultca::pem_utils::der_to_pem;
use vaultca::retry::InstantSleeper;

/// Issues a leaf for `csr` and returns it with its issuer, both DER encoded.
async fn issue(csr: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let (custodian, issuer) = util::custodian_with_issuer(3650).await;
    let ca = CertificateAuthority::new(util::test_config(), custodian)
        .unwrap()
        .with_sleeper(Arc::new(InstantSleeper::new()));
    let signed = ca.sign_request(csr, CertificateRole::Leaf).await.unwrap();
    (signed.into_der(), issuer.to_der().unwrap())
}

fn openssl_request(common_name: &str) -> Vec<u8> {
    let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_nid(Nid::COMMONNAME, common_name).unwrap();
    let name = name.build();

    let mut req = X509ReqBuilder::new().unwrap();
    req.set_version(0).unwrap();
    req.set_subject_name(&name).unwrap();
    req.set_pubkey(&key).unwrap();
    req.sign(&key, MessageDigest::sha256()).unwrap();
    req.build().to_der().unwrap()
}

#[test]
fn test_openssl_accepts_generated_request() {
    let der = util::device_csr("CN=device1,O=Contoso");
    let req = X509Req::from_der(&der).expect("Failed to parse request");
    let key = req.public_key().unwrap();
    assert!(req.verify(&key).unwrap(), "Request self-signature rejected");
}

#[tokio::test]
async fn test_openssl_crate_validate_cert() {
    let (leaf, issuer) = issue(&openssl_request("device.contoso.test")).await;

    let x509 = X509::from_der(&leaf).expect("Failed to parse certificate");
    let issuer = X509::from_der(&issuer).expect("Failed to parse issuer");

    let subject = x509
        .subject_name()
        .entries_by_nid(Nid::COMMONNAME)
        .next()
        .unwrap()
        .data()
        .to_string()
        .unwrap();
    assert_eq!(subject, "device.contoso.test", "Subject CN mismatch");

    let issuer_cn = x509
        .issuer_name()
        .entries_by_nid(Nid::COMMONNAME)
        .next()
        .unwrap()
        .data()
        .to_string()
        .unwrap();
    assert_eq!(issuer_cn, "Contoso Issuing CA", "Issuer CN mismatch");

    assert_eq!(
        x509.version(),
        2,
        "X509 version should be 3 (0-based index)"
    );

    let serial = x509.serial_number().to_bn().unwrap();
    assert!(!serial.is_negative(), "Serial number must be positive");

    assert_eq!(
        x509.signature_algorithm().object().nid(),
        Nid::SHA256WITHRSAENCRYPTION,
        "Signature algorithm should be sha256WithRSAEncryption"
    );

    let issuer_key = issuer.public_key().unwrap();
    assert!(
        x509.verify(&issuer_key).unwrap(),
        "Signature does not verify"
    );
}

#[tokio::test]
async fn test_openssl_validate_cert() {
    let (leaf, issuer) = issue(&util::device_csr("CN=device1")).await;

    let dir = std::env::temp_dir().join(format!("vaultca-openssl-{}", std::process::id()));
    fs::create_dir_all(&dir).expect("Failed to create temporary directory");
    let cert_path = dir.join("leaf.pem");
    let ca_path = dir.join("ca.pem");
    fs::write(&cert_path, der_to_pem(&leaf, "CERTIFICATE"))
        .expect("Failed to write certificate");
    fs::write(&ca_path, der_to_pem(&issuer, "CERTIFICATE"))
        .expect("Failed to write CA certificate");

    let output = Command::new("openssl")
        .arg("x509")
        .arg("-in")
        .arg(&cert_path)
        .arg("-noout")
        .arg("-text")
        .output()
        .expect("Failed to execute OpenSSL command");
    assert!(
        output.status.success(),
        "OpenSSL command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let output_text = String::from_utf8_lossy(&output.stdout);

    assert!(
        output_text.contains("Version: 3 (0x2)"),
        "Version field is incorrect"
    );
    assert!(
        output_text.contains("Signature Algorithm: sha256WithRSAEncryption"),
        "Signature Algorithm field is incorrect"
    );
    assert!(
        output_text.contains("CA:FALSE"),
        "Basic constraints are incorrect"
    );
    assert!(
        output_text.contains("TLS Web Server Authentication, TLS Web Client Authentication"),
        "Extended key usage is incorrect"
    );
    assert!(
        output_text.contains("OCSP - URI:http://ocsp.contoso.test"),
        "OCSP responder is missing"
    );

    let ca_issuers =
        Regex::new(r"CA Issuers - URI:http://pki\.contoso\.test/[0-9a-f]+\.crt").unwrap();
    assert!(
        ca_issuers.is_match(&output_text),
        "CA issuers URL is incorrect"
    );
    let public_key = Regex::new(r"Public-Key: \(2048 bit\)").unwrap();
    assert!(
        public_key.is_match(&output_text),
        "Public key size is incorrect"
    );

    let output = Command::new("openssl")
        .arg("verify")
        .arg("-CAfile")
        .arg(&ca_path)
        .arg(&cert_path)
        .output()
        .expect("Failed to execute OpenSSL command");
    assert!(
        output.status.success(),
        "OpenSSL verification failed: {}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );

    fs::remove_dir_all(&dir).expect("Failed to remove temporary files");
}
