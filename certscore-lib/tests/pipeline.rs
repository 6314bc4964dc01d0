#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! End-to-end submissions against a local TLS listener.
//!
//! A throwaway root issues a leaf for 127.0.0.1; a tokio-rustls acceptor
//! serves it on an ephemeral port. The real fetcher, evaluator and a JSON
//! file store then run exactly as the CLI wires them.

use certscore_lib::*;
use rcgen::{
    BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose,
};
use rustls::pki_types::{CertificateDer, PrivatePkcs8KeyDer};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

struct TestServer {
    addr: SocketAddr,
    root_pem: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    fn url(&self) -> String {
        format!("https://{}/", self.addr)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Root → leaf for 127.0.0.1 valid from yesterday for 90 days.
async fn start_server() -> TestServer {
    let root_key = KeyPair::generate().unwrap();
    let mut root_params = CertificateParams::new(Vec::new()).unwrap();
    root_params
        .distinguished_name
        .push(DnType::CommonName, "certscore pipeline root");
    root_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    root_params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
    let root = root_params.self_signed(&root_key).unwrap();

    let now = OffsetDateTime::now_utc();
    let leaf_key = KeyPair::generate().unwrap();
    let mut leaf_params = CertificateParams::new(vec!["127.0.0.1".to_string()]).unwrap();
    leaf_params
        .distinguished_name
        .push(DnType::CommonName, "127.0.0.1");
    leaf_params.not_before = now - time::Duration::days(1);
    leaf_params.not_after = now + time::Duration::days(90);
    leaf_params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
    leaf_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
    leaf_params.use_authority_key_identifier_extension = true;
    let leaf = leaf_params.signed_by(&leaf_key, &root, &root_key).unwrap();

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(
            vec![CertificateDer::from(leaf.der().to_vec())],
            PrivatePkcs8KeyDer::from(leaf_key.serialize_der()).into(),
        )
        .unwrap();
    let acceptor = TlsAcceptor::from(Arc::new(config));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        loop {
            let Ok((tcp, _)) = listener.accept().await else {
                return;
            };
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                // The client hangs up right after the handshake.
                let _ = acceptor.accept(tcp).await;
            });
        }
    });

    TestServer {
        addr,
        root_pem: root.pem(),
        handle,
    }
}

/// An address nothing listens on.
fn closed_port_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("https://127.0.0.1:{port}/")
}

fn evaluator_for(server: &TestServer) -> TrustStoreEvaluator {
    let roots = || TrustStore::from_pem(server.root_pem.as_bytes()).unwrap();
    TrustStoreEvaluator::from_stores(vec![
        (
            TrustStoreId::Mozilla,
            roots(),
            StorePolicy::defaults_for(&TrustStoreId::Mozilla),
        ),
        (
            TrustStoreId::Chrome,
            roots(),
            StorePolicy::defaults_for(&TrustStoreId::Chrome),
        ),
        (
            TrustStoreId::Microsoft,
            TrustStore::new(),
            StorePolicy::default(),
        ),
    ])
}

fn context(server: &TestServer, store_path: &std::path::Path) -> AppContext {
    let config = CertscoreConfig {
        fetch_timeout: Duration::from_secs(5),
        submission_deadline: Duration::from_secs(30),
        store_path: store_path.to_path_buf(),
        ..CertscoreConfig::default()
    };
    let store = certscore_lib::config::open_store(store_path).unwrap();
    AppContext::with_parts(config, store, evaluator_for(server)).unwrap()
}

#[tokio::test]
async fn reachable_and_unreachable_urls() {
    let server = start_server().await;
    let dir = tempfile::tempdir().unwrap();
    let store_path = dir.path().join("links.json");
    let ctx = context(&server, &store_path);

    let request = SubmitRequest {
        url: Some(server.url()),
        file_urls: Some(vec![closed_port_url()]),
    };
    let submission =
        Submission::from_request(request, &ctx.config.batch_limits()).expect("valid request");
    let report = ctx.orchestrator().submit(submission).await.unwrap();

    assert_eq!(report.accepted, 1, "{:?}", report.failures);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].kind, FailureKind::Connection);

    let outcome = &report.outcomes[0];
    assert_eq!(outcome.url, server.url());
    assert_eq!(outcome.certificate.subject, "CN = 127.0.0.1");

    let mozilla = &outcome.verdicts[&TrustStoreId::Mozilla];
    assert_eq!(mozilla.verdict, TrustVerdict::FullyTrusted, "{:?}", mozilla.findings);
    assert!(mozilla.score >= Some(2));

    // Same root, but no SCTs.
    let chrome = &outcome.verdicts[&TrustStoreId::Chrome];
    assert_eq!(chrome.verdict, TrustVerdict::PartiallyTrusted);
    assert_eq!(chrome.score, Some(1));

    // Unknown issuer.
    let microsoft = &outcome.verdicts[&TrustStoreId::Microsoft];
    assert_eq!(microsoft.verdict, TrustVerdict::Untrusted);
    assert_eq!(microsoft.score, Some(0));

    let reopened = JsonFileStore::open(&store_path).unwrap();
    let links = reopened.list_all().unwrap();
    assert_eq!(links, report.links);
    assert_eq!(links[0].url, server.url());
}

#[tokio::test]
async fn resubmitting_creates_a_new_link_and_clear_removes_all() {
    let server = start_server().await;
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(&server, &dir.path().join("links.json"));
    let orch = ctx.orchestrator();

    for _ in 0..2 {
        let sub = Submission::single(validate(&server.url()).unwrap());
        assert_eq!(orch.submit(sub).await.unwrap().accepted, 1);
    }
    let links = orch.list_all().unwrap();
    assert_eq!(links.len(), 2);
    assert_ne!(links[0].id, links[1].id);

    assert_eq!(orch.clear_all().unwrap(), 2);
    assert_eq!(orch.clear_all().unwrap(), 0);
}

#[tokio::test]
async fn batch_of_same_endpoint_is_fetched_once() {
    let server = start_server().await;
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(&server, &dir.path().join("links.json"));

    let body = format!("{0}\n{0}\n", server.url());
    let file = BatchFile::new("urls.txt", "text/plain", body.into_bytes());
    let urls = BatchUrlParser::new(ctx.config.batch_limits())
        .parse(&file)
        .unwrap();
    assert_eq!(urls.len(), 2);

    let report = ctx
        .orchestrator()
        .submit(Submission::batch(urls))
        .await
        .unwrap();
    assert_eq!(report.accepted, 1);
    assert!(report.is_complete_success());
}

#[tokio::test]
async fn direct_fetch_returns_presented_chain() {
    let server = start_server().await;
    let fetcher = CertificateFetcher::new().unwrap();
    let url = validate(&server.url()).unwrap();
    let peer = fetcher.fetch(&url, Duration::from_secs(5)).await.unwrap();
    assert_eq!(peer.server_name(), "127.0.0.1");
    assert_eq!(peer.chain().len(), 1);
    assert!(peer.to_pem().starts_with("-----BEGIN CERTIFICATE-----"));
}
