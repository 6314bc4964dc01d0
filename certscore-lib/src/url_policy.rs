//! Syntax and protocol policy for candidate endpoint URLs.

use crate::ValidationError;
use serde::Serialize;
use url::{Host, Url};

/// The only scheme a candidate endpoint may use.
pub const REQUIRED_SCHEME: &str = "https";

/// Port used when the URL does not name one.
pub const DEFAULT_TLS_PORT: u16 = 443;

/// A URL that passed [`validate`]: absolute, `https`, with a host.
///
/// The trimmed input is kept verbatim so callers get back exactly what they
/// submitted; the parsed form is used for host extraction and deduplication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateUrl {
    raw: String,
    parsed: Url,
}

impl CandidateUrl {
    /// The trimmed input string.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Normalized serialization, used as the dedup key.
    pub fn normalized(&self) -> &str {
        self.parsed.as_str()
    }

    /// Host to connect to and to send as SNI. IPv6 literals are returned
    /// without brackets.
    pub fn host(&self) -> String {
        match self.parsed.host() {
            Some(Host::Domain(d)) => d.to_string(),
            Some(Host::Ipv4(ip)) => ip.to_string(),
            Some(Host::Ipv6(ip)) => ip.to_string(),
            None => String::new(),
        }
    }

    /// Explicit port, or 443.
    pub fn port(&self) -> u16 {
        self.parsed.port().unwrap_or(DEFAULT_TLS_PORT)
    }

    pub fn url(&self) -> &Url {
        &self.parsed
    }
}

impl std::fmt::Display for CandidateUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Serialize for CandidateUrl {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

/// Validate a single URL string.
///
/// The input is trimmed first. Fails with [`ValidationError::MalformedUrl`]
/// when the string is not an absolute URL with a host, and with
/// [`ValidationError::InsecureScheme`] when the scheme is anything but `https`.
pub fn validate(raw: &str) -> Result<CandidateUrl, ValidationError> {
    let trimmed = raw.trim();
    let parsed = Url::parse(trimmed).map_err(|e| ValidationError::MalformedUrl {
        input: trimmed.to_string(),
        reason: e.to_string(),
    })?;

    if parsed.scheme() != REQUIRED_SCHEME {
        return Err(ValidationError::InsecureScheme {
            input: trimmed.to_string(),
            scheme: parsed.scheme().to_string(),
        });
    }

    match parsed.host() {
        Some(Host::Domain("")) | None => {
            return Err(ValidationError::MalformedUrl {
                input: trimmed.to_string(),
                reason: "missing host".into(),
            })
        }
        Some(_) => {}
    }

    Ok(CandidateUrl {
        raw: trimmed.to_string(),
        parsed,
    })
}

/// Validate an optional single-URL field.
///
/// Empty or whitespace-only input means "no URL supplied" and maps to
/// `Ok(None)` rather than an error.
pub fn validate_optional(raw: Option<&str>) -> Result<Option<CandidateUrl>, ValidationError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => validate(s).map(Some),
    }
}
