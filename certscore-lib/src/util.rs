//! Shared encoding utilities.

use base64::Engine;

/// Format bytes as colon-separated uppercase hex (e.g., "AB:CD:EF").
pub fn hex_colon_upper(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}

/// Encode bytes as base64 with PEM-style 64-character line wrapping.
pub fn base64_wrap(data: &[u8]) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(data);
    encoded
        .as_bytes()
        .chunks(64)
        .filter_map(|c| std::str::from_utf8(c).ok())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Wrap a DER certificate in a `CERTIFICATE` PEM envelope.
pub fn der_to_pem(der: &[u8]) -> String {
    format!(
        "-----BEGIN CERTIFICATE-----\n{}\n-----END CERTIFICATE-----\n",
        base64_wrap(der)
    )
}

/// Short attribute name for a DN attribute OID, falling back to the dotted form.
pub fn oid_short_name(oid: &str) -> String {
    match oid {
        crate::oid::COMMON_NAME => "CN".into(),
        crate::oid::COUNTRY => "C".into(),
        crate::oid::LOCALITY => "L".into(),
        crate::oid::STATE_OR_PROVINCE => "ST".into(),
        crate::oid::ORGANIZATION => "O".into(),
        crate::oid::ORGANIZATIONAL_UNIT => "OU".into(),
        crate::oid::EMAIL_ADDRESS => "emailAddress".into(),
        other => other.to_string(),
    }
}

/// Match a hostname against SAN DNS names per RFC 6125.
///
/// The subject CN is never consulted. A wildcard is accepted only as the
/// complete left-most label and never matches across dots.
pub fn hostname_matches(dns_names: &[String], hostname: &str) -> bool {
    let host = hostname.trim_end_matches('.').to_ascii_lowercase();
    dns_names.iter().any(|name| name_matches(name, &host))
}

fn name_matches(pattern: &str, host: &str) -> bool {
    let pattern = pattern.trim_end_matches('.').to_ascii_lowercase();
    if let Some(suffix) = pattern.strip_prefix("*.") {
        // "*.example.com" needs at least two labels after the wildcard
        if !suffix.contains('.') {
            return false;
        }
        return match host.split_once('.') {
            Some((label, rest)) => !label.is_empty() && rest == suffix,
            None => false,
        };
    }
    pattern == host
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_colon_formats_uppercase() {
        assert_eq!(hex_colon_upper(&[0xab, 0x01, 0xff]), "AB:01:FF");
        assert_eq!(hex_colon_upper(&[]), "");
    }

    #[test]
    fn pem_envelope_wraps_lines() {
        let pem = der_to_pem(&[0u8; 100]);
        assert!(pem.starts_with("-----BEGIN CERTIFICATE-----\n"));
        assert!(pem.ends_with("-----END CERTIFICATE-----\n"));
        assert!(pem.lines().all(|l| l.len() <= 64));
    }

    #[test]
    fn hostname_exact_and_case_insensitive() {
        let names = vec!["Example.COM".to_string()];
        assert!(hostname_matches(&names, "example.com"));
        assert!(hostname_matches(&names, "example.com."));
        assert!(!hostname_matches(&names, "www.example.com"));
    }

    #[test]
    fn hostname_wildcard_single_label() {
        let names = vec!["*.example.com".to_string()];
        assert!(hostname_matches(&names, "www.example.com"));
        assert!(!hostname_matches(&names, "example.com"));
        assert!(!hostname_matches(&names, "a.b.example.com"));
    }

    #[test]
    fn hostname_wildcard_rejects_tld() {
        let names = vec!["*.com".to_string()];
        assert!(!hostname_matches(&names, "example.com"));
    }

    #[test]
    fn no_san_never_matches() {
        assert!(!hostname_matches(&[], "example.com"));
    }
}
