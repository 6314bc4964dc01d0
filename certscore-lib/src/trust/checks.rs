//! Path validation checks. Any finding from this module makes the chain
//! untrusted in the store being evaluated.

use super::helpers::{
    find_extension, is_known_extension, is_self_issued, is_self_signed,
    leaf_matches_server_name, san_dns_names, short_name,
};
use super::{ChainCertInfo, TrustStore};
use crate::certificate::{dn_oneline, format_serial};
use x509_parser::prelude::*;

/// A candidate path, leaf first, parsed once and shared by every check.
pub(crate) struct ParsedPath<'a> {
    certs: Vec<X509Certificate<'a>>,
    subjects: Vec<String>,
}

impl<'a> ParsedPath<'a> {
    pub(crate) fn parse(ders: &'a [Vec<u8>]) -> Result<Self, String> {
        let certs = ders
            .iter()
            .enumerate()
            .map(|(depth, der)| {
                X509Certificate::from_der(der)
                    .map(|(_, cert)| cert)
                    .map_err(|e| format!("certificate at depth {} does not parse: {}", depth, e))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if certs.is_empty() {
            return Err("empty certificate chain".into());
        }
        let subjects = certs.iter().map(|c| dn_oneline(c.subject())).collect();
        Ok(Self { certs, subjects })
    }

    pub(crate) fn certs(&self) -> &[X509Certificate<'a>] {
        &self.certs
    }

    pub(crate) fn leaf(&self) -> Option<&X509Certificate<'a>> {
        self.certs.first()
    }

    pub(crate) fn subject(&self, depth: usize) -> &str {
        self.subjects.get(depth).map(String::as_str).unwrap_or("?")
    }

    /// Display rows for the path, optionally followed by the store anchor.
    pub(crate) fn chain_info(&self, anchor: Option<&X509Certificate>) -> Vec<ChainCertInfo> {
        let mut rows: Vec<ChainCertInfo> = self
            .certs
            .iter()
            .enumerate()
            .map(|(depth, cert)| chain_row(depth, cert))
            .collect();
        if let Some(anchor) = anchor {
            rows.push(chain_row(self.certs.len(), anchor));
        }
        rows
    }
}

fn chain_row(depth: usize, cert: &X509Certificate) -> ChainCertInfo {
    ChainCertInfo {
        depth,
        subject: dn_oneline(cert.subject()),
        issuer: dn_oneline(cert.issuer()),
        short_name: short_name(cert),
        serial: format_serial(cert.raw_serial()),
    }
}

/// Non-self-issued intermediates must not exceed `max`.
pub(crate) fn check_depth(path: &ParsedPath, max: usize, errors: &mut Vec<String>) {
    let intermediates = path
        .certs()
        .iter()
        .skip(1)
        .filter(|c| !is_self_issued(c))
        .count();
    if intermediates > max {
        errors.push(format!(
            "chain has {} intermediates, more than the allowed {}",
            intermediates, max
        ));
    }
}

pub(crate) fn check_validity_period(path: &ParsedPath, now_ts: i64, errors: &mut Vec<String>) {
    for (depth, cert) in path.certs().iter().enumerate() {
        if let Some(problem) = validity_problem(cert, now_ts) {
            errors.push(format!(
                "certificate at depth {} ({}) {}",
                depth,
                path.subject(depth),
                problem
            ));
        }
    }
}

fn validity_problem(cert: &X509Certificate, now_ts: i64) -> Option<&'static str> {
    let validity = cert.validity();
    if now_ts < validity.not_before.timestamp() {
        Some("is not yet valid")
    } else if now_ts > validity.not_after.timestamp() {
        Some("has expired")
    } else {
        None
    }
}

/// Every issuer in the path must be a CA allowed to sign certificates, and
/// its pathLenConstraint must cover the non-self-issued CAs below it.
pub(crate) fn check_issuers(path: &ParsedPath, errors: &mut Vec<String>) {
    let certs = path.certs();
    for (depth, cert) in certs.iter().enumerate().skip(1) {
        let subject = path.subject(depth);
        match cert.basic_constraints().ok().flatten().map(|bc| bc.value) {
            Some(bc) if !bc.ca => errors.push(format!(
                "certificate at depth {} ({}) is not a CA but is used as issuer",
                depth, subject
            )),
            Some(bc) => {
                if let Some(pathlen) = bc.path_len_constraint {
                    let below = certs
                        .iter()
                        .take(depth)
                        .skip(1)
                        .filter(|c| !is_self_issued(c))
                        .count() as u32;
                    if below > pathlen {
                        errors.push(format!(
                            "certificate at depth {} ({}) allows {} CAs below it but has {}",
                            depth, subject, pathlen, below
                        ));
                    }
                }
            }
            // v1/v2 certificates predate extensions and are tolerated as issuers
            None if cert.version().0 >= 2 => errors.push(format!(
                "certificate at depth {} ({}) has no BasicConstraints but is used as issuer",
                depth, subject
            )),
            None => {}
        }

        if let Ok(Some(ku)) = cert.key_usage() {
            if !ku.value.key_cert_sign() {
                errors.push(format!(
                    "certificate at depth {} ({}) is a CA but Key Usage lacks keyCertSign",
                    depth, subject
                ));
            }
        }
    }
}

pub(crate) fn check_critical_extensions(path: &ParsedPath, errors: &mut Vec<String>) {
    for (depth, cert) in path.certs().iter().enumerate() {
        if let Some(ext) = unknown_critical_extension(cert) {
            errors.push(format!(
                "certificate at depth {} ({}) has unrecognized critical extension {}",
                depth,
                path.subject(depth),
                ext
            ));
        }
    }
}

fn unknown_critical_extension(cert: &X509Certificate) -> Option<String> {
    cert.extensions()
        .iter()
        .find(|ext| ext.critical && !is_known_extension(&ext.oid.to_id_string()))
        .map(|ext| ext.oid.to_id_string())
}

/// Each certificate must be signed by the next one in the path.
pub(crate) fn check_signatures(path: &ParsedPath, errors: &mut Vec<String>) {
    let certs = path.certs();
    for (depth, (child, parent)) in certs.iter().zip(certs.iter().skip(1)).enumerate() {
        if let Err(e) = child.verify_signature(Some(parent.public_key())) {
            errors.push(format!(
                "signature verification failed ({} -> {}): {}",
                path.subject(depth),
                path.subject(depth + 1),
                e
            ));
        }
    }
}

/// Locate the store root that anchors the path.
///
/// Either the last certificate is self-signed and held by the store, or the
/// store holds a root that signed it. Returns the anchor's DER.
pub(crate) fn find_anchor(
    path: &ParsedPath,
    path_ders: &[Vec<u8>],
    roots: &TrustStore,
    errors: &mut Vec<String>,
) -> Option<Vec<u8>> {
    let (last, last_der) = path.certs().last().zip(path_ders.last())?;
    let last_depth = path.certs().len() - 1;

    if is_self_signed(last) {
        if roots.contains(last_der) {
            return Some(last_der.clone());
        }
        errors.push(format!(
            "root certificate ({}) is not in this trust store",
            path.subject(last_depth)
        ));
        return None;
    }

    let anchor = roots
        .find_by_subject_raw(last.issuer().as_raw())
        .into_iter()
        .flatten()
        .find(|root_der| {
            X509Certificate::from_der(root_der)
                .is_ok_and(|(_, root)| last.verify_signature(Some(root.public_key())).is_ok())
        });
    if anchor.is_none() {
        errors.push(format!(
            "no trusted root in this store for issuer: {}",
            dn_oneline(last.issuer())
        ));
    }
    anchor.cloned()
}

/// The anchor itself must be in date, a CA and free of unknown critical
/// extensions.
pub(crate) fn check_anchor(anchor: &X509Certificate, now_ts: i64, errors: &mut Vec<String>) {
    let subject = dn_oneline(anchor.subject());
    if let Some(problem) = validity_problem(anchor, now_ts) {
        errors.push(format!("trusted root ({}) {}", subject, problem));
    }
    if let Some(ext) = unknown_critical_extension(anchor) {
        errors.push(format!(
            "trusted root ({}) has unrecognized critical extension {}",
            subject, ext
        ));
    }
    if let Some(bc) = anchor.basic_constraints().ok().flatten() {
        if !bc.value.ca {
            errors.push(format!("trusted root ({}) is not a CA", subject));
        }
    }
    if let Ok(Some(ku)) = anchor.key_usage() {
        if !ku.value.key_cert_sign() {
            errors.push(format!(
                "trusted root ({}) Key Usage lacks keyCertSign",
                subject
            ));
        }
    }
}

/// A leaf with an EKU extension must allow TLS server authentication.
pub(crate) fn check_leaf_usage(path: &ParsedPath, errors: &mut Vec<String>) {
    let Some(leaf) = path.leaf() else { return };
    if let Ok(Some(eku)) = leaf.extended_key_usage() {
        if !(eku.value.server_auth || eku.value.any) {
            errors.push(format!(
                "leaf certificate ({}) is not valid for TLS server authentication",
                path.subject(0)
            ));
        }
    }
}

pub(crate) fn check_server_name(path: &ParsedPath, server_name: &str, errors: &mut Vec<String>) {
    let Some(leaf) = path.leaf() else { return };
    if !leaf_matches_server_name(leaf, server_name) {
        errors.push(format!(
            "hostname '{}' does not match certificate names: [{}]",
            server_name,
            san_dns_names(leaf).join(", ")
        ));
    }
}

/// True when the extension is present and marked critical.
pub(crate) fn is_critical(cert: &X509Certificate, oid: &str) -> bool {
    find_extension(cert, oid).is_some_and(|e| e.critical)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::trust::test_pki::{TestPki, EVAL_AT};

    fn run_all(pki: &TestPki, ders: &[Vec<u8>], host: &str, now: i64) -> Vec<String> {
        let path = ParsedPath::parse(ders).unwrap();
        let mut errors = Vec::new();
        check_depth(&path, 8, &mut errors);
        check_validity_period(&path, now, &mut errors);
        check_issuers(&path, &mut errors);
        check_critical_extensions(&path, &mut errors);
        check_signatures(&path, &mut errors);
        check_leaf_usage(&path, &mut errors);
        check_server_name(&path, host, &mut errors);
        if let Some(anchor_der) = find_anchor(&path, ders, &pki.roots(), &mut errors) {
            let (_, anchor) = X509Certificate::from_der(&anchor_der).unwrap();
            check_anchor(&anchor, now, &mut errors);
        }
        errors
    }

    #[test]
    fn clean_path_has_no_findings() {
        let pki = TestPki::with_intermediate("clean.test");
        let ders = vec![pki.leaf_der.clone(), pki.inter_der.clone()];
        assert_eq!(run_all(&pki, &ders, "clean.test", EVAL_AT), Vec::<String>::new());
    }

    #[test]
    fn expired_leaf_is_reported() {
        let pki = TestPki::direct("expired.test");
        let after = EVAL_AT + 365 * 86_400;
        let errors = run_all(&pki, &[pki.leaf_der.clone()], "expired.test", after);
        assert!(errors.iter().any(|e| e.contains("has expired")), "{errors:?}");
    }

    #[test]
    fn hostname_mismatch_is_reported() {
        let pki = TestPki::direct("right.test");
        let errors = run_all(&pki, &[pki.leaf_der.clone()], "wrong.test", EVAL_AT);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("wrong.test"));
    }

    #[test]
    fn leaf_without_server_auth_is_reported() {
        let pki = TestPki::build("client.test", false, |p| {
            p.extended_key_usages = vec![rcgen::ExtendedKeyUsagePurpose::ClientAuth];
        });
        let errors = run_all(&pki, &[pki.leaf_der.clone()], "client.test", EVAL_AT);
        assert!(errors.iter().any(|e| e.contains("server authentication")));
    }

    #[test]
    fn unknown_root_is_reported() {
        let pki = TestPki::direct("orphan.test");
        let other = TestPki::direct("other.test");
        let ders = vec![pki.leaf_der.clone()];
        let path = ParsedPath::parse(&ders).unwrap();
        let mut errors = Vec::new();
        assert!(find_anchor(&path, &ders, &other.roots(), &mut errors).is_none());
        assert!(errors[0].contains("no trusted root"));
    }

    #[test]
    fn leaf_used_as_issuer_is_reported() {
        let pki = TestPki::direct("notca.test");
        // Pretend the leaf issued itself onward: leaf in the issuer slot.
        let ders = vec![pki.leaf_der.clone(), pki.leaf_der.clone()];
        let path = ParsedPath::parse(&ders).unwrap();
        let mut errors = Vec::new();
        check_issuers(&path, &mut errors);
        assert!(!errors.is_empty());
    }

    #[test]
    fn chain_info_appends_anchor() {
        let pki = TestPki::with_intermediate("info.test");
        let ders = vec![pki.leaf_der.clone(), pki.inter_der.clone()];
        let path = ParsedPath::parse(&ders).unwrap();
        let (_, root) = X509Certificate::from_der(&pki.root_der).unwrap();
        let info = path.chain_info(Some(&root));
        assert_eq!(info.len(), 3);
        assert_eq!(info[0].short_name, "info.test");
        assert_eq!(info[2].short_name, "Root for info.test");
        assert_eq!(info[2].depth, 2);
    }
}
