//! Per-program policy on top of a valid path, and the strict CA/B Forum
//! and RFC 5280 profile that separates score 3 from score 2.

use super::checks::{is_critical, ParsedPath};
use super::helpers::{find_extension, is_self_issued};
use super::TrustStoreId;
use crate::certificate::{public_key_info, signature_algorithm_name};
use crate::oid;
use serde::{Deserialize, Serialize};
use x509_parser::prelude::*;

const SECONDS_PER_DAY: i64 = 86_400;

/// Weak-parameter rules a root program applies to otherwise valid chains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorePolicy {
    pub min_rsa_bits: u32,
    pub min_ec_bits: u32,
    pub allow_sha1: bool,
    pub max_leaf_validity_days: u32,
    /// Leaf must carry embedded Signed Certificate Timestamps.
    pub require_sct: bool,
    /// Limit on non-self-issued intermediates, also used to bound path search.
    pub max_chain_depth: usize,
}

impl Default for StorePolicy {
    fn default() -> Self {
        Self {
            min_rsa_bits: 2048,
            min_ec_bits: 256,
            allow_sha1: false,
            max_leaf_validity_days: 398,
            require_sct: false,
            max_chain_depth: 8,
        }
    }
}

impl StorePolicy {
    /// Chrome enforces Certificate Transparency; the others use the baseline.
    pub fn defaults_for(id: &TrustStoreId) -> Self {
        Self {
            require_sct: matches!(id, TrustStoreId::Chrome),
            ..Self::default()
        }
    }

    /// Findings that downgrade a valid path to partially trusted.
    pub(crate) fn check(&self, path: &ParsedPath, anchor: Option<&X509Certificate>) -> Vec<String> {
        let mut findings = Vec::new();

        for (depth, cert) in path.certs().iter().enumerate() {
            let who = format!("certificate at depth {} ({})", depth, path.subject(depth));
            // A self-signed root's own signature carries no trust.
            if !is_self_issued(cert) {
                if let Some(problem) = self.signature_problem(cert) {
                    findings.push(format!("{} {}", who, problem));
                }
            }
            if let Some(problem) = self.key_problem(cert) {
                findings.push(format!("{} {}", who, problem));
            }
        }
        if let Some(anchor) = anchor {
            if let Some(problem) = self.key_problem(anchor) {
                findings.push(format!(
                    "trusted root ({}) {}",
                    crate::certificate::dn_oneline(anchor.subject()),
                    problem
                ));
            }
        }

        if let Some(leaf) = path.leaf() {
            let validity = leaf.validity();
            let lifetime_days =
                (validity.not_after.timestamp() - validity.not_before.timestamp()) / SECONDS_PER_DAY;
            if lifetime_days > i64::from(self.max_leaf_validity_days) {
                findings.push(format!(
                    "leaf certificate is valid for {} days, more than the allowed {}",
                    lifetime_days, self.max_leaf_validity_days
                ));
            }
            if self.require_sct && find_extension(leaf, oid::EXT_SCT_LIST).is_none() {
                findings.push("leaf certificate has no embedded SCT list".to_string());
            }
        }

        findings
    }

    fn signature_problem(&self, cert: &X509Certificate) -> Option<String> {
        match cert.signature_algorithm.algorithm.to_id_string().as_str() {
            oid::MD5_WITH_RSA => Some("is signed with MD5".into()),
            oid::SHA1_WITH_RSA | oid::ECDSA_WITH_SHA1 if !self.allow_sha1 => Some(format!(
                "is signed with SHA-1 ({})",
                signature_algorithm_name(&cert.signature_algorithm)
            )),
            _ => None,
        }
    }

    fn key_problem(&self, cert: &X509Certificate) -> Option<String> {
        let spki = cert.public_key();
        if spki.algorithm.algorithm.to_id_string() == oid::DSA {
            return Some("uses a DSA key".into());
        }
        match public_key_info(spki) {
            (alg, Some(bits)) if alg == "RSA" && bits < self.min_rsa_bits => Some(format!(
                "has a {}-bit RSA key, below the minimum of {}",
                bits, self.min_rsa_bits
            )),
            (alg, Some(bits)) if alg == "EC" && bits < self.min_ec_bits => Some(format!(
                "has a {}-bit EC key, below the minimum of {}",
                bits, self.min_ec_bits
            )),
            (alg, None) if alg == "EC" => Some("uses an unrecognized elliptic curve".into()),
            _ => None,
        }
    }
}

/// Strict profile checks (CABF Baseline Requirements plus RFC 5280 "MUST"s
/// that path validation tolerates). Empty means the chain earns score 3.
pub(crate) fn strict_profile_findings(
    path: &ParsedPath,
    anchor: Option<&X509Certificate>,
) -> Vec<String> {
    let mut findings = Vec::new();

    if let Some(leaf) = path.leaf() {
        let subject = path.subject(0);
        if find_extension(leaf, oid::EXT_SUBJECT_ALT_NAME).is_none() {
            findings.push(format!("leaf ({}) has no SAN extension", subject));
        }
        match leaf.extended_key_usage() {
            Ok(Some(eku)) => {
                if eku.value.any {
                    findings.push(format!("leaf ({}) has anyExtendedKeyUsage", subject));
                }
                if eku.critical {
                    findings.push(format!("leaf ({}) has a critical EKU extension", subject));
                }
            }
            _ => findings.push(format!("leaf ({}) has no EKU extension", subject)),
        }
        if leaf
            .basic_constraints()
            .ok()
            .flatten()
            .is_some_and(|bc| bc.value.ca)
        {
            findings.push(format!("leaf ({}) is marked as a CA", subject));
        }
        for name in super::helpers::san_dns_names(leaf) {
            if name.strip_prefix("*.").is_some_and(|base| !base.contains('.')) {
                findings.push(format!(
                    "leaf ({}) has a wildcard on a public suffix: {}",
                    subject, name
                ));
            }
        }
    }

    for (depth, cert) in path.certs().iter().enumerate() {
        let who = format!("certificate at depth {} ({})", depth, path.subject(depth));
        let is_leaf = depth == 0;

        if cert.version().0 < 2 {
            findings.push(format!("{} is not X.509 v3", who));
        }

        match find_extension(cert, oid::EXT_AUTHORITY_KEY_ID) {
            None if !is_self_issued(cert) => {
                findings.push(format!("{} is missing Authority Key Identifier", who))
            }
            Some(ext) if ext.critical => {
                findings.push(format!("{} has a critical Authority Key Identifier", who))
            }
            _ => {}
        }
        match find_extension(cert, oid::EXT_SUBJECT_KEY_ID) {
            None if !is_leaf => findings.push(format!("{} is a CA without Subject Key Identifier", who)),
            Some(ext) if ext.critical => {
                findings.push(format!("{} has a critical Subject Key Identifier", who))
            }
            _ => {}
        }

        if let Some(problem) = serial_problem(cert.raw_serial()) {
            findings.push(format!("{} {}", who, problem));
        }
    }

    if let Some(anchor) = anchor {
        let who = format!(
            "trusted root ({})",
            crate::certificate::dn_oneline(anchor.subject())
        );
        if !is_critical(anchor, oid::EXT_BASIC_CONSTRAINTS) {
            findings.push(format!("{} BasicConstraints is missing or not critical", who));
        }
        if anchor.extended_key_usage().ok().flatten().is_some() {
            findings.push(format!("{} has an EKU extension", who));
        }
        if let Some(problem) = serial_problem(anchor.raw_serial()) {
            findings.push(format!("{} {}", who, problem));
        }
    }

    findings
}

/// RFC 5280 §4.1.2.2: at most 20 octets and non-zero.
fn serial_problem(serial: &[u8]) -> Option<String> {
    if serial.len() > 20 {
        Some(format!("has a {}-octet serial number (max 20)", serial.len()))
    } else if serial.iter().all(|&b| b == 0) {
        Some("has a zero serial number".into())
    } else {
        None
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::trust::test_pki::TestPki;

    fn policy_findings(policy: &StorePolicy, pki: &TestPki) -> Vec<String> {
        let ders = vec![pki.leaf_der.clone()];
        let path = ParsedPath::parse(&ders).unwrap();
        let (_, root) = X509Certificate::from_der(&pki.root_der).unwrap();
        policy.check(&path, Some(&root))
    }

    #[test]
    fn chrome_requires_sct_by_default() {
        assert!(StorePolicy::defaults_for(&TrustStoreId::Chrome).require_sct);
        assert!(!StorePolicy::defaults_for(&TrustStoreId::Mozilla).require_sct);
        assert!(!StorePolicy::defaults_for(&TrustStoreId::Microsoft).require_sct);
    }

    #[test]
    fn short_lived_ec_leaf_passes_baseline() {
        let pki = TestPki::direct("ok.test");
        assert_eq!(policy_findings(&StorePolicy::default(), &pki), Vec::<String>::new());
    }

    #[test]
    fn missing_sct_is_flagged_when_required() {
        let pki = TestPki::direct("ct.test");
        let chrome = StorePolicy::defaults_for(&TrustStoreId::Chrome);
        let findings = policy_findings(&chrome, &pki);
        assert_eq!(findings.len(), 1);
        assert!(findings[0].contains("SCT"));
    }

    #[test]
    fn long_lived_leaf_is_flagged() {
        let pki = TestPki::build("long.test", false, |p| {
            p.not_after = rcgen::date_time_ymd(2027, 1, 1);
        });
        let findings = policy_findings(&StorePolicy::default(), &pki);
        assert!(findings.iter().any(|f| f.contains("days")), "{findings:?}");
    }

    #[test]
    fn ec_minimum_is_configurable() {
        let pki = TestPki::direct("p256.test");
        let policy = StorePolicy {
            min_ec_bits: 384,
            ..StorePolicy::default()
        };
        let findings = policy_findings(&policy, &pki);
        // Leaf and root both use P-256.
        assert_eq!(findings.len(), 2, "{findings:?}");
        assert!(findings.iter().all(|f| f.contains("256-bit EC key")));
    }

    #[test]
    fn policy_deserializes_with_partial_fields() {
        let policy: StorePolicy = toml::from_str("require_sct = true\nmax_chain_depth = 3").unwrap();
        assert!(policy.require_sct);
        assert_eq!(policy.max_chain_depth, 3);
        assert_eq!(policy.min_rsa_bits, 2048);
    }

    #[test]
    fn strict_profile_flags_missing_eku() {
        let pki = TestPki::build("noeku.test", false, |p| p.extended_key_usages.clear());
        let ders = vec![pki.leaf_der.clone()];
        let path = ParsedPath::parse(&ders).unwrap();
        let (_, root) = X509Certificate::from_der(&pki.root_der).unwrap();
        let findings = strict_profile_findings(&path, Some(&root));
        assert!(findings.iter().any(|f| f.contains("no EKU")), "{findings:?}");
    }

    #[test]
    fn strict_profile_flags_wildcard_on_tld() {
        let pki = TestPki::build("wild.test", false, |p| {
            p.subject_alt_names.push(rcgen::SanType::DnsName("*.test".try_into().unwrap()));
        });
        let ders = vec![pki.leaf_der.clone()];
        let path = ParsedPath::parse(&ders).unwrap();
        let findings = strict_profile_findings(&path, None);
        assert!(findings.iter().any(|f| f.contains("public suffix")));
    }

    #[test]
    fn serial_rules() {
        assert!(serial_problem(&[0u8; 21]).is_some());
        assert!(serial_problem(&[0, 0]).is_some());
        assert!(serial_problem(&[0x01]).is_none());
    }
}
