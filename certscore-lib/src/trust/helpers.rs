//! Name extraction and extension lookup shared by the path and policy checks.

use crate::oid;
use crate::util;
use std::net::IpAddr;
use x509_parser::prelude::*;

/// Subject == issuer. Self-issued certificates do not count toward the
/// intermediate depth limit.
pub(crate) fn is_self_issued(cert: &X509Certificate) -> bool {
    cert.subject().as_raw() == cert.issuer().as_raw()
}

/// Self-issued and verifiable with its own key.
pub(crate) fn is_self_signed(cert: &X509Certificate) -> bool {
    is_self_issued(cert) && cert.verify_signature(None).is_ok()
}

/// First extension with the given dotted OID.
pub(crate) fn find_extension<'c, 'a>(
    cert: &'c X509Certificate<'a>,
    oid: &str,
) -> Option<&'c X509Extension<'a>> {
    cert.extensions()
        .iter()
        .find(|e| e.oid.to_id_string() == oid)
}

/// DNS names from the Subject Alternative Name extension.
pub(crate) fn san_dns_names(cert: &X509Certificate) -> Vec<String> {
    let mut names = Vec::new();
    if let Ok(Some(san)) = cert.subject_alternative_name() {
        for gn in &san.value.general_names {
            if let GeneralName::DNSName(name) = gn {
                names.push(name.to_string());
            }
        }
    }
    names
}

/// IP addresses from the Subject Alternative Name extension.
pub(crate) fn san_ip_addrs(cert: &X509Certificate) -> Vec<IpAddr> {
    let mut addrs = Vec::new();
    if let Ok(Some(san)) = cert.subject_alternative_name() {
        for gn in &san.value.general_names {
            if let GeneralName::IPAddress(bytes) = gn {
                match bytes.len() {
                    4 => {
                        let mut octets = [0u8; 4];
                        octets.copy_from_slice(bytes);
                        addrs.push(IpAddr::from(octets));
                    }
                    16 => {
                        let mut octets = [0u8; 16];
                        octets.copy_from_slice(bytes);
                        addrs.push(IpAddr::from(octets));
                    }
                    _ => {}
                }
            }
        }
    }
    addrs
}

/// Whether the leaf covers the name the server was reached by.
///
/// IP literals are compared against SAN IP entries only; DNS names against
/// SAN DNS entries with left-most-label wildcards. The subject CN is never
/// consulted, matching current browser behavior.
pub(crate) fn leaf_matches_server_name(leaf: &X509Certificate, server_name: &str) -> bool {
    match server_name.parse::<IpAddr>() {
        Ok(ip) => san_ip_addrs(leaf).contains(&ip),
        Err(_) => util::hostname_matches(&san_dns_names(leaf), server_name),
    }
}

fn subject_attr(cert: &X509Certificate, attr_oid: &str) -> Option<String> {
    cert.subject()
        .iter_attributes()
        .find(|attr| attr.attr_type().to_id_string() == attr_oid)
        .and_then(|attr| attr.as_str().ok())
        .map(str::to_string)
}

/// A short label for a certificate: CN, else O, else OU.
pub(crate) fn short_name(cert: &X509Certificate) -> String {
    [oid::COMMON_NAME, oid::ORGANIZATION, oid::ORGANIZATIONAL_UNIT]
        .iter()
        .find_map(|attr_oid| subject_attr(cert, attr_oid))
        .unwrap_or_else(|| "Unknown".to_string())
}

/// Extensions this evaluator understands. Any other extension marked
/// critical makes the certificate unusable (RFC 5280 §4.2).
pub(crate) fn is_known_extension(oid: &str) -> bool {
    matches!(
        oid,
        oid::EXT_SUBJECT_KEY_ID
            | oid::EXT_KEY_USAGE
            | oid::EXT_SUBJECT_ALT_NAME
            | oid::EXT_ISSUER_ALT_NAME
            | oid::EXT_BASIC_CONSTRAINTS
            | oid::EXT_NAME_CONSTRAINTS
            | oid::EXT_CRL_DISTRIBUTION_POINTS
            | oid::EXT_CERTIFICATE_POLICIES
            | oid::EXT_POLICY_MAPPINGS
            | oid::EXT_AUTHORITY_KEY_ID
            | oid::EXT_POLICY_CONSTRAINTS
            | oid::EXT_EXTENDED_KEY_USAGE
            | oid::EXT_FRESHEST_CRL
            | oid::EXT_INHIBIT_ANY_POLICY
            | oid::EXT_AUTHORITY_INFO_ACCESS
            | oid::EXT_SUBJECT_INFO_ACCESS
            | oid::EXT_TLS_FEATURE
            | oid::EXT_SCT_LIST
            | oid::EXT_CT_POISON
            | oid::EXT_NETSCAPE_CERT_TYPE
    )
}
