//! Throwaway PKIs for evaluator tests. Everything is generated per test, so
//! nothing expires on disk.

#![allow(clippy::unwrap_used)]

use super::TrustStore;
use crate::certificate::PeerCertificate;
use rcgen::{
    date_time_ymd, BasicConstraints, Certificate, CertificateParams, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose, SerialNumber,
};

/// 2025-03-01T00:00:00Z, inside every leaf's validity window.
pub(crate) const EVAL_AT: i64 = 1_740_787_200;

pub(crate) struct TestPki {
    pub host: String,
    pub root_der: Vec<u8>,
    pub root_pem: String,
    /// Empty when the leaf is issued directly by the root.
    pub inter_der: Vec<u8>,
    pub leaf_der: Vec<u8>,
}

impl TestPki {
    pub fn direct(host: &str) -> Self {
        Self::build(host, false, |_| {})
    }

    pub fn with_intermediate(host: &str) -> Self {
        Self::build(host, true, |_| {})
    }

    /// Root (2020–2040) → optional intermediate → leaf (2025-01-01 to
    /// 2025-06-01, serverAuth, SAN = host). `tweak_leaf` runs last.
    pub fn build(
        host: &str,
        intermediate: bool,
        tweak_leaf: impl FnOnce(&mut CertificateParams),
    ) -> Self {
        let root_key = KeyPair::generate().unwrap();
        let root = ca_params(&format!("Root for {host}"))
            .self_signed(&root_key)
            .unwrap();

        let (inter, inter_key) = if intermediate {
            let key = KeyPair::generate().unwrap();
            let mut params = ca_params(&format!("Intermediate for {host}"));
            params.use_authority_key_identifier_extension = true;
            let cert = params.signed_by(&key, &root, &root_key).unwrap();
            (Some(cert), Some(key))
        } else {
            (None, None)
        };

        let leaf_key = KeyPair::generate().unwrap();
        let mut leaf_params = CertificateParams::new(vec![host.to_string()]).unwrap();
        leaf_params.distinguished_name.push(DnType::CommonName, host);
        leaf_params.not_before = date_time_ymd(2025, 1, 1);
        leaf_params.not_after = date_time_ymd(2025, 6, 1);
        leaf_params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        leaf_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        leaf_params.use_authority_key_identifier_extension = true;
        tweak_leaf(&mut leaf_params);

        let leaf = match (&inter, &inter_key) {
            (Some(issuer), Some(issuer_key)) => leaf_params.signed_by(&leaf_key, issuer, issuer_key),
            _ => leaf_params.signed_by(&leaf_key, &root, &root_key),
        }
        .unwrap();

        Self {
            host: host.to_string(),
            root_der: root.der().to_vec(),
            root_pem: root.pem(),
            inter_der: inter.map(|c: Certificate| c.der().to_vec()).unwrap_or_default(),
            leaf_der: leaf.der().to_vec(),
        }
    }

    pub fn roots(&self) -> TrustStore {
        TrustStore::from_pem(self.root_pem.as_bytes()).unwrap()
    }

    /// The chain a well-configured server would present: leaf, then any
    /// intermediate, without the root.
    pub fn peer(&self) -> PeerCertificate {
        let mut chain = vec![self.leaf_der.clone()];
        if !self.inter_der.is_empty() {
            chain.push(self.inter_der.clone());
        }
        PeerCertificate::from_der_chain(self.host.clone(), chain).unwrap()
    }
}

/// `count` self-issued CA certificates sharing one subject and one key, so
/// each verifies under every other, plus a leaf issued under that subject.
/// No store holds them. Returns `(leaf_der, loop_ders)`.
pub(crate) fn cross_signed_loop(host: &str, count: u64) -> (Vec<u8>, Vec<Vec<u8>>) {
    let key = KeyPair::generate().unwrap();
    let certs: Vec<Certificate> = (1..=count)
        .map(|serial| {
            let mut params = ca_params(&format!("Loop CA for {host}"));
            params.serial_number = Some(SerialNumber::from(serial));
            params.self_signed(&key).unwrap()
        })
        .collect();

    let leaf_key = KeyPair::generate().unwrap();
    let mut leaf_params = CertificateParams::new(vec![host.to_string()]).unwrap();
    leaf_params.distinguished_name.push(DnType::CommonName, host);
    leaf_params.not_before = date_time_ymd(2025, 1, 1);
    leaf_params.not_after = date_time_ymd(2025, 6, 1);
    leaf_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
    let issuer = certs.first().unwrap();
    let leaf = leaf_params.signed_by(&leaf_key, issuer, &key).unwrap();

    (
        leaf.der().to_vec(),
        certs.iter().map(|c| c.der().to_vec()).collect(),
    )
}

fn ca_params(cn: &str) -> CertificateParams {
    let mut params = CertificateParams::new(Vec::new()).unwrap();
    params.distinguished_name.push(DnType::CommonName, cn);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.not_before = date_time_ymd(2020, 1, 1);
    params.not_after = date_time_ymd(2040, 1, 1);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    params
}
