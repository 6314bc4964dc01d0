//! OID string constants used by the certificate summary and the trust checks.
//!
//! Object Identifiers are referenced throughout RFC 5280 (X.509), RFC 3279
//! (algorithms), RFC 5480 (ECC), RFC 8410 (EdDSA) and RFC 6962 (CT). Keeping
//! them here avoids magic strings in the check functions.

// ── X.509 Distinguished Name attributes (RFC 4519 / X.520) ──────────────

pub const COMMON_NAME: &str = "2.5.4.3";
pub const COUNTRY: &str = "2.5.4.6";
pub const LOCALITY: &str = "2.5.4.7";
pub const STATE_OR_PROVINCE: &str = "2.5.4.8";
pub const ORGANIZATION: &str = "2.5.4.10";
pub const ORGANIZATIONAL_UNIT: &str = "2.5.4.11";
pub const EMAIL_ADDRESS: &str = "1.2.840.113549.1.9.1";

// ── Signature algorithms ─────────────────────────────────────────────────

pub const MD5_WITH_RSA: &str = "1.2.840.113549.1.1.4";
pub const SHA1_WITH_RSA: &str = "1.2.840.113549.1.1.5";
pub const SHA256_WITH_RSA: &str = "1.2.840.113549.1.1.11";
pub const SHA384_WITH_RSA: &str = "1.2.840.113549.1.1.12";
pub const SHA512_WITH_RSA: &str = "1.2.840.113549.1.1.13";
pub const RSASSA_PSS: &str = "1.2.840.113549.1.1.10";
pub const ECDSA_WITH_SHA1: &str = "1.2.840.10045.4.1";
pub const ECDSA_WITH_SHA256: &str = "1.2.840.10045.4.3.2";
pub const ECDSA_WITH_SHA384: &str = "1.2.840.10045.4.3.3";
pub const ECDSA_WITH_SHA512: &str = "1.2.840.10045.4.3.4";
pub const ED25519: &str = "1.3.101.112";
pub const ED448: &str = "1.3.101.113";

// ── Public key types ─────────────────────────────────────────────────────

pub const RSA_ENCRYPTION: &str = "1.2.840.113549.1.1.1";
pub const EC_PUBLIC_KEY: &str = "1.2.840.10045.2.1";
pub const DSA: &str = "1.2.840.10040.4.1";

// ── Named elliptic curves ────────────────────────────────────────────────

pub const CURVE_P192: &str = "1.2.840.10045.3.1.1";
pub const CURVE_P256: &str = "1.2.840.10045.3.1.7";
pub const CURVE_P384: &str = "1.3.132.0.34";
pub const CURVE_P521: &str = "1.3.132.0.35";

// ── X.509v3 extensions (RFC 5280 Section 4.2) ───────────────────────────

pub const EXT_SUBJECT_KEY_ID: &str = "2.5.29.14";
pub const EXT_KEY_USAGE: &str = "2.5.29.15";
pub const EXT_SUBJECT_ALT_NAME: &str = "2.5.29.17";
pub const EXT_ISSUER_ALT_NAME: &str = "2.5.29.18";
pub const EXT_BASIC_CONSTRAINTS: &str = "2.5.29.19";
pub const EXT_NAME_CONSTRAINTS: &str = "2.5.29.30";
pub const EXT_CRL_DISTRIBUTION_POINTS: &str = "2.5.29.31";
pub const EXT_CERTIFICATE_POLICIES: &str = "2.5.29.32";
pub const EXT_POLICY_MAPPINGS: &str = "2.5.29.33";
pub const EXT_AUTHORITY_KEY_ID: &str = "2.5.29.35";
pub const EXT_POLICY_CONSTRAINTS: &str = "2.5.29.36";
pub const EXT_EXTENDED_KEY_USAGE: &str = "2.5.29.37";
pub const EXT_FRESHEST_CRL: &str = "2.5.29.46";
pub const EXT_INHIBIT_ANY_POLICY: &str = "2.5.29.54";

pub const EXT_AUTHORITY_INFO_ACCESS: &str = "1.3.6.1.5.5.7.1.1";
pub const EXT_SUBJECT_INFO_ACCESS: &str = "1.3.6.1.5.5.7.1.11";
pub const EXT_TLS_FEATURE: &str = "1.3.6.1.5.5.7.1.12";

// ── Certificate Transparency (RFC 6962) ──────────────────────────────────

pub const EXT_SCT_LIST: &str = "1.3.6.1.4.1.11129.2.4.2";
pub const EXT_CT_POISON: &str = "1.3.6.1.4.1.11129.2.4.3";

// ── Netscape extensions (legacy) ─────────────────────────────────────────

pub const EXT_NETSCAPE_CERT_TYPE: &str = "2.16.840.1.113730.1.1";
