//! The peer certificate chain captured from a TLS handshake, and a compact
//! summary of its leaf.

use crate::oid;
use crate::util;
use crate::CertscoreError;
use digest::Digest;
use serde::Serialize;
use x509_parser::prelude::*;
use x509_parser::public_key::PublicKey;

/// Chain presented by a server, leaf first, plus the name it was reached by.
///
/// Owned by the fetch that produced it and consumed by the evaluator; it is
/// never persisted raw.
#[derive(Debug, Clone)]
pub struct PeerCertificate {
    server_name: String,
    chain_der: Vec<Vec<u8>>,
    summary: CertSummary,
}

/// Leaf fields worth showing next to a verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CertSummary {
    pub subject: String,
    pub issuer: String,
    pub serial: String,
    pub not_before: String,
    pub not_after: String,
    pub not_before_ts: i64,
    pub not_after_ts: i64,
    pub public_key_algorithm: String,
    pub public_key_bits: Option<u32>,
    pub signature_algorithm: String,
    pub sha256_fingerprint: String,
}

impl PeerCertificate {
    /// Build from a DER chain (leaf first). Fails if the chain is empty or
    /// the leaf does not parse; intermediates are parsed lazily by the
    /// evaluator.
    pub fn from_der_chain(
        server_name: impl Into<String>,
        chain_der: Vec<Vec<u8>>,
    ) -> Result<Self, CertscoreError> {
        let leaf = chain_der
            .first()
            .ok_or_else(|| CertscoreError::ParseError("empty certificate chain".into()))?;
        let summary = summarize(leaf)?;
        Ok(Self {
            server_name: server_name.into(),
            chain_der,
            summary,
        })
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// DER-encoded chain, leaf first.
    pub fn chain(&self) -> &[Vec<u8>] {
        &self.chain_der
    }

    #[allow(clippy::indexing_slicing)] // constructor guarantees a non-empty chain
    pub fn leaf_der(&self) -> &[u8] {
        &self.chain_der[0]
    }

    pub fn summary(&self) -> &CertSummary {
        &self.summary
    }

    /// PEM bundle of the whole presented chain.
    pub fn to_pem(&self) -> String {
        self.chain_der.iter().map(|der| util::der_to_pem(der)).collect()
    }
}

/// Parse a DER leaf into a [`CertSummary`].
pub(crate) fn summarize(der: &[u8]) -> Result<CertSummary, CertscoreError> {
    let (remaining, x509) =
        X509Certificate::from_der(der).map_err(|e| CertscoreError::DerError(format!("{}", e)))?;

    // Fingerprint only the certificate bytes, not trailing data.
    let cert_len = der.len() - remaining.len();
    let cert_der = der.get(..cert_len).unwrap_or(der);

    let (public_key_algorithm, public_key_bits) = public_key_info(x509.public_key());
    let validity = x509.validity();

    Ok(CertSummary {
        subject: dn_oneline(x509.subject()),
        issuer: dn_oneline(x509.issuer()),
        serial: format_serial(x509.raw_serial()),
        not_before: format_time(&validity.not_before),
        not_after: format_time(&validity.not_after),
        not_before_ts: validity.not_before.timestamp(),
        not_after_ts: validity.not_after.timestamp(),
        public_key_algorithm,
        public_key_bits,
        signature_algorithm: signature_algorithm_name(&x509.signature_algorithm),
        sha256_fingerprint: util::hex_colon_upper(&sha2::Sha256::digest(cert_der)),
    })
}

/// Format a DN as "C = US, O = Org, CN = example.com", escaping separators.
pub(crate) fn dn_oneline(name: &X509Name) -> String {
    let mut result = String::new();
    for (i, attr) in name.iter_attributes().enumerate() {
        if i > 0 {
            result.push_str(", ");
        }
        result.push_str(&util::oid_short_name(&attr.attr_type().to_id_string()));
        result.push_str(" = ");
        for ch in attr.as_str().unwrap_or("<binary>").chars() {
            match ch {
                '\\' => result.push_str("\\\\"),
                ',' => result.push_str("\\,"),
                '=' => result.push_str("\\="),
                _ => result.push(ch),
            }
        }
    }
    result
}

/// Serial as colon-separated hex, leading zero bytes stripped (at least one kept).
pub(crate) fn format_serial(raw: &[u8]) -> String {
    let stripped = match raw.iter().position(|&b| b != 0) {
        Some(pos) => raw.get(pos..).unwrap_or(raw),
        None => raw.get(raw.len().saturating_sub(1)..).unwrap_or(raw),
    };
    util::hex_colon_upper(stripped)
}

fn format_time(t: &ASN1Time) -> String {
    let ts = t.timestamp();
    match ::time::OffsetDateTime::from_unix_timestamp(ts) {
        Ok(dt) => dt
            .format(&::time::format_description::well_known::Rfc3339)
            .unwrap_or_else(|_| ts.to_string()),
        Err(_) => ts.to_string(),
    }
}

pub(crate) fn signature_algorithm_name(algo: &AlgorithmIdentifier) -> String {
    match algo.algorithm.to_id_string().as_str() {
        oid::MD5_WITH_RSA => "md5WithRSAEncryption".into(),
        oid::SHA1_WITH_RSA => "sha1WithRSAEncryption".into(),
        oid::SHA256_WITH_RSA => "sha256WithRSAEncryption".into(),
        oid::SHA384_WITH_RSA => "sha384WithRSAEncryption".into(),
        oid::SHA512_WITH_RSA => "sha512WithRSAEncryption".into(),
        oid::RSASSA_PSS => "rsassaPss".into(),
        oid::ECDSA_WITH_SHA1 => "ecdsa-with-SHA1".into(),
        oid::ECDSA_WITH_SHA256 => "ecdsa-with-SHA256".into(),
        oid::ECDSA_WITH_SHA384 => "ecdsa-with-SHA384".into(),
        oid::ECDSA_WITH_SHA512 => "ecdsa-with-SHA512".into(),
        oid::ED25519 => "Ed25519".into(),
        oid::ED448 => "Ed448".into(),
        other => other.to_string(),
    }
}

/// Algorithm name and key size in bits, where the size can be determined.
pub(crate) fn public_key_info(spki: &SubjectPublicKeyInfo) -> (String, Option<u32>) {
    match spki.algorithm.algorithm.to_id_string().as_str() {
        oid::RSA_ENCRYPTION => ("RSA".into(), rsa_modulus_bits(spki)),
        oid::EC_PUBLIC_KEY => {
            let bits = spki
                .algorithm
                .parameters
                .as_ref()
                .and_then(|p| p.as_oid().ok())
                .and_then(|curve| match curve.to_id_string().as_str() {
                    oid::CURVE_P192 => Some(192),
                    oid::CURVE_P256 => Some(256),
                    oid::CURVE_P384 => Some(384),
                    oid::CURVE_P521 => Some(521),
                    _ => None,
                });
            ("EC".into(), bits)
        }
        oid::DSA => ("DSA".into(), None),
        oid::ED25519 => ("Ed25519".into(), Some(256)),
        oid::ED448 => ("Ed448".into(), Some(448)),
        other => (other.to_string(), None),
    }
}

fn rsa_modulus_bits(spki: &SubjectPublicKeyInfo) -> Option<u32> {
    match spki.parsed() {
        Ok(PublicKey::RSA(rsa)) => Some(rsa.key_size() as u32),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use rcgen::{CertificateParams, DnType, KeyPair};

    fn self_signed_der() -> Vec<u8> {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(vec!["leaf.example".to_string()]).unwrap();
        params
            .distinguished_name
            .push(DnType::CommonName, "leaf.example");
        params
            .distinguished_name
            .push(DnType::OrganizationName, "Acme, Inc.");
        params.self_signed(&key).unwrap().der().to_vec()
    }

    #[test]
    fn summary_extracts_leaf_fields() {
        let der = self_signed_der();
        let peer = PeerCertificate::from_der_chain("leaf.example", vec![der.clone()]).unwrap();
        let s = peer.summary();
        assert!(s.subject.contains("CN = leaf.example"));
        assert!(s.subject.contains("O = Acme\\, Inc."));
        assert_eq!(s.subject, s.issuer);
        assert_eq!(s.public_key_algorithm, "EC");
        assert_eq!(s.public_key_bits, Some(256));
        assert_eq!(s.signature_algorithm, "ecdsa-with-SHA256");
        assert_eq!(s.sha256_fingerprint.split(':').count(), 32);
        assert!(s.not_before_ts < s.not_after_ts);
        assert_eq!(peer.leaf_der(), der.as_slice());
        assert_eq!(peer.server_name(), "leaf.example");
    }

    #[test]
    fn empty_chain_is_rejected() {
        assert!(PeerCertificate::from_der_chain("x", Vec::new()).is_err());
    }

    #[test]
    fn garbage_leaf_is_rejected() {
        assert!(PeerCertificate::from_der_chain("x", vec![vec![0x30, 0x03, 0x01]]).is_err());
    }

    #[test]
    fn serial_strips_leading_zeros() {
        assert_eq!(format_serial(&[0x00, 0x01, 0xab]), "01:AB");
        assert_eq!(format_serial(&[0x00, 0x00]), "00");
    }

    #[test]
    fn pem_bundle_has_one_block_per_cert() {
        let der = self_signed_der();
        let peer = PeerCertificate::from_der_chain("x", vec![der.clone(), der]).unwrap();
        assert_eq!(peer.to_pem().matches("BEGIN CERTIFICATE").count(), 2);
    }
}
