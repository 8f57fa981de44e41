mod util;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use vaultca::authority::CertificateAuthority;
use vaultca::bootstrap::{BootstrapOutcome, BootstrapState, CaBootstrap, CaBootstrapRequest};
use vaultca::cert::extensions::AuthorityKeyIdentifier;
use vaultca::cert::params::{DistinguishedName, Validity};
use vaultca::custodian::memory::InMemoryCustodian;
use vaultca::custodian::{CertificatePolicy, KeyCustodian, PolicyIssuer};
use vaultca::error::CaError;
use vaultca::issuer::{BuilderOptions, CertificateBuilder};
use vaultca::retry::{InstantSleeper, PollPolicy, RetryPolicy};

fn request() -> CaBootstrapRequest {
    let subject = DistinguishedName::parse("CN=Contoso Root CA,O=Contoso").unwrap();
    CaBootstrapRequest::builder()
        .certificate_id("RootCA")
        .subject(subject)
        .validity(Validity::for_months(Validity::backdated_now(), 48).unwrap())
        .key_size_bits(2048)
        .path_length(1)
        .build()
}

fn bootstrap<C: KeyCustodian + ?Sized>(
    custodian: Arc<C>,
    sleeper: Arc<InstantSleeper>,
) -> CaBootstrap<C> {
    let builder = CertificateBuilder::new(BuilderOptions {
        extension_url_template: Some(util::URL_TEMPLATE.to_string()),
        ocsp_url: None,
    });
    CaBootstrap::new(custodian, builder)
        .with_retry(util::no_jitter())
        .with_poll(PollPolicy {
            interval_ms: 2000,
            max_polls: 5,
        })
        .with_sleeper(sleeper)
}

#[tokio::test]
async fn creates_self_signed_root() {
    let custodian = Arc::new(InMemoryCustodian::new().with_polls_until_complete(2));
    let sleeper = Arc::new(InstantSleeper::new());
    let bootstrap = bootstrap(custodian.clone(), sleeper.clone());

    let outcome = bootstrap.run(&request()).await.unwrap();
    let BootstrapOutcome::Created(signed) = outcome else {
        panic!("expected a new certificate");
    };
    assert_eq!(bootstrap.state(), BootstrapState::TempDisabled);

    let root = signed.certificate();
    assert_eq!(root.issuer(), root.subject());
    let bc = root.basic_constraints().unwrap().unwrap();
    assert!(bc.is_ca);
    assert_eq!(bc.max_path_length, Some(1));
    let aki = root.extension::<AuthorityKeyIdentifier>().unwrap().unwrap();
    assert_eq!(aki.key_identifier, root.subject_key_identifier().unwrap());
    assert_eq!(aki.authority_cert_serial_number, root.serial_number());
    util::verify_signed_by(root, root);

    // Placeholder disabled, merged root current, no pending operation left.
    let versions = custodian.versions("RootCA").await;
    assert_eq!(versions.len(), 2);
    assert!(!versions[0].enabled);
    assert!(versions[1].enabled);
    assert_eq!(versions[0].key, versions[1].key);
    let current = custodian.get_certificate("RootCA").await.unwrap();
    assert_eq!(current.cert_der, signed.to_der());
    assert!(!custodian.has_pending_operation("RootCA").await);
    assert_eq!(
        custodian.tags("RootCA").await,
        BTreeMap::from([("RootCA".to_string(), "Issuer".to_string())])
    );

    assert_eq!(custodian.create_key_calls(), 2);
    assert_eq!(custodian.sign_calls(), 1);
    assert_eq!(sleeper.delays(), vec![Duration::from_millis(2000); 2]);
}

#[tokio::test]
async fn second_run_reports_already_exists() {
    let custodian = Arc::new(InMemoryCustodian::new());
    let sleeper = Arc::new(InstantSleeper::new());
    let bootstrap = bootstrap(custodian.clone(), sleeper);

    assert!(matches!(
        bootstrap.run(&request()).await.unwrap(),
        BootstrapOutcome::Created(_)
    ));
    let calls = custodian.create_key_calls();

    assert!(matches!(
        bootstrap.run(&request()).await.unwrap(),
        BootstrapOutcome::AlreadyExists
    ));
    assert_eq!(custodian.create_key_calls(), calls);
    assert_eq!(
        custodian.list_certificate_versions("RootCA").await.unwrap(),
        2
    );
}

#[tokio::test]
async fn authority_creates_issuing_ca_once() {
    let custodian = Arc::new(InMemoryCustodian::new());
    let ca = CertificateAuthority::new(util::test_config(), custodian.clone())
        .unwrap()
        .with_sleeper(Arc::new(InstantSleeper::new()));
    let subject = DistinguishedName::parse("CN=Contoso Issuing CA").unwrap();

    let outcome = ca.create_ca_certificate(&subject).await.unwrap();
    let BootstrapOutcome::Created(signed) = outcome else {
        panic!("expected a new certificate");
    };
    let validity = signed.certificate().validity().unwrap();
    assert!(validity.duration() >= time::Duration::days(365 * 4));
    assert_eq!(custodian.create_key_calls(), 2);

    assert!(matches!(
        ca.create_ca_certificate(&subject).await.unwrap(),
        BootstrapOutcome::AlreadyExists
    ));
    assert_eq!(custodian.create_key_calls(), 2);

    // The new CA can issue immediately.
    let leaf = ca
        .sign_request(
            &util::device_csr("CN=device1"),
            vaultca::cert::params::CertificateRole::Leaf,
        )
        .await
        .unwrap();
    util::verify_signed_by(leaf.certificate(), signed.certificate());
}

#[tokio::test]
async fn stale_pending_operation_is_replaced() {
    let custodian = Arc::new(InMemoryCustodian::new());
    let stale = CertificatePolicy::builder()
        .subject(DistinguishedName::parse("CN=Stale").unwrap())
        .issuer(PolicyIssuer::Unknown)
        .build();
    custodian.create_key("RootCA", &stale).await.unwrap();

    let bootstrap = bootstrap(custodian.clone(), Arc::new(InstantSleeper::new()));
    assert!(matches!(
        bootstrap.run(&request()).await.unwrap(),
        BootstrapOutcome::Created(_)
    ));
}

#[tokio::test]
async fn disable_failure_is_swallowed() {
    let custodian = Arc::new(util::FlakyCustodian::default());
    custodian.fail_disable.store(true, Ordering::SeqCst);
    let bootstrap = bootstrap(custodian.clone(), Arc::new(InstantSleeper::new()));

    assert!(matches!(
        bootstrap.run(&request()).await.unwrap(),
        BootstrapOutcome::Created(_)
    ));
    assert_eq!(bootstrap.state(), BootstrapState::Merged);
    assert!(custodian.inner.versions("RootCA").await[0].enabled);
}

#[tokio::test]
async fn temporary_certificate_disabled_after_failure() {
    let custodian = Arc::new(util::FlakyCustodian::default());
    custodian.fail_merge.store(true, Ordering::SeqCst);
    let bootstrap = bootstrap(custodian.clone(), Arc::new(InstantSleeper::new()));

    let err = bootstrap.run(&request()).await.unwrap_err();
    assert!(matches!(err, CaError::Conflict(_)));
    assert_eq!(bootstrap.state(), BootstrapState::SelfSigned);

    let versions = custodian.inner.versions("RootCA").await;
    assert_eq!(versions.len(), 1);
    assert!(!versions[0].enabled);
}

#[tokio::test]
async fn key_generation_failure_is_retried() {
    let custodian = Arc::new(util::FlakyCustodian::default());
    custodian.poll_failures.store(1, Ordering::SeqCst);
    let sleeper = Arc::new(InstantSleeper::new());
    let bootstrap = bootstrap(custodian.clone(), sleeper.clone());

    assert!(matches!(
        bootstrap.run(&request()).await.unwrap(),
        BootstrapOutcome::Created(_)
    ));
    // The failed temporary key operation was deleted and requested again.
    assert_eq!(custodian.inner.create_key_calls(), 3);
    assert_eq!(sleeper.delays(), vec![Duration::from_millis(1000)]);
}

#[tokio::test]
async fn unfinished_key_generation_times_out() {
    let custodian = Arc::new(InMemoryCustodian::new().with_polls_until_complete(10));
    let sleeper = Arc::new(InstantSleeper::new());
    let bootstrap = bootstrap(custodian.clone(), sleeper.clone()).with_retry(RetryPolicy::none());

    let err = bootstrap.run(&request()).await.unwrap_err();
    assert!(matches!(err, CaError::RemoteUnavailable(_)));
    assert_eq!(bootstrap.state(), BootstrapState::TempKeyRequested);
    assert_eq!(custodian.create_key_calls(), 1);
    // Five polls, four waits between them.
    assert_eq!(sleeper.delays().len(), 4);
}

#[tokio::test]
async fn cancelled_bootstrap_creates_nothing() {
    let custodian = Arc::new(InMemoryCustodian::new());
    let cancel = CancellationToken::new();
    cancel.cancel();
    let bootstrap =
        bootstrap(custodian.clone(), Arc::new(InstantSleeper::new())).with_cancellation(cancel);

    assert_eq!(
        bootstrap.run(&request()).await.unwrap_err(),
        CaError::Cancelled
    );
    assert_eq!(custodian.create_key_calls(), 0);
}
