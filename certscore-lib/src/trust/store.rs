//! Root certificate sets, one per root program.
//!
//! A [`TrustStore`] indexes trusted roots by raw subject so the chain
//! builder can find issuer candidates cheaply. A [`TrustProgram`] names
//! where a program's roots come from and which [`StorePolicy`] applies.

use super::policy::StorePolicy;
use crate::CertscoreError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use x509_parser::prelude::*;

/// Well-known CA bundle file paths, in order of preference.
pub(crate) const KNOWN_CA_BUNDLE_PATHS: &[&str] = &[
    "/etc/ssl/certs/ca-certificates.crt", // Debian/Ubuntu
    "/etc/pki/tls/certs/ca-bundle.crt",   // RHEL/CentOS/Fedora
    "/etc/ssl/ca-bundle.pem",             // openSUSE
    "/etc/ssl/cert.pem",                  // macOS, Alpine
];

/// Well-known CA certificate directory paths.
pub(crate) const KNOWN_CA_DIR_PATHS: &[&str] = &["/etc/ssl/certs"];

/// Identifies one root program.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TrustStoreId {
    Microsoft,
    Chrome,
    Mozilla,
    Custom(String),
}

impl TrustStoreId {
    /// The three programs evaluated when nothing else is configured.
    pub fn defaults() -> [TrustStoreId; 3] {
        [
            TrustStoreId::Microsoft,
            TrustStoreId::Chrome,
            TrustStoreId::Mozilla,
        ]
    }

    /// Stable lowercase key used in config files and JSON.
    pub fn as_str(&self) -> &str {
        match self {
            TrustStoreId::Microsoft => "microsoft",
            TrustStoreId::Chrome => "chrome",
            TrustStoreId::Mozilla => "mozilla",
            TrustStoreId::Custom(name) => name,
        }
    }

    /// Vendor label for display.
    pub fn display_name(&self) -> &str {
        match self {
            TrustStoreId::Microsoft => "Microsoft Edge",
            TrustStoreId::Chrome => "Google Chrome",
            TrustStoreId::Mozilla => "Mozilla Firefox",
            TrustStoreId::Custom(name) => name,
        }
    }
}

impl From<String> for TrustStoreId {
    fn from(s: String) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "microsoft" => TrustStoreId::Microsoft,
            "chrome" | "google" => TrustStoreId::Chrome,
            "mozilla" => TrustStoreId::Mozilla,
            _ => TrustStoreId::Custom(s),
        }
    }
}

impl From<TrustStoreId> for String {
    fn from(id: TrustStoreId) -> Self {
        id.as_str().to_string()
    }
}

impl std::fmt::Display for TrustStoreId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a program's roots come from and the policy applied on top of them.
///
/// With neither `bundle` nor `directory` set, the system trust store is used.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TrustProgram {
    pub id: TrustStoreId,
    #[serde(default)]
    pub bundle: Option<PathBuf>,
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default)]
    pub policy: Option<StorePolicy>,
}

impl TrustProgram {
    /// A program backed by the system store with its default policy.
    pub fn system(id: TrustStoreId) -> Self {
        Self {
            id,
            bundle: None,
            directory: None,
            policy: None,
        }
    }

    pub fn with_bundle(mut self, path: impl Into<PathBuf>) -> Self {
        self.bundle = Some(path.into());
        self
    }

    pub fn with_policy(mut self, policy: StorePolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Configured policy, or the program's default.
    pub fn effective_policy(&self) -> StorePolicy {
        self.policy
            .clone()
            .unwrap_or_else(|| StorePolicy::defaults_for(&self.id))
    }

    /// Load the root set. An empty result is an error: a store with no roots
    /// cannot produce a meaningful verdict.
    pub fn load(&self) -> Result<TrustStore, CertscoreError> {
        let mut store = match &self.bundle {
            Some(path) => TrustStore::from_pem_file(path)?,
            None if self.directory.is_none() => TrustStore::system()?,
            None => TrustStore::new(),
        };
        if let Some(dir) = &self.directory {
            store.add_pem_directory(dir)?;
        }
        if store.is_empty() {
            return Err(CertscoreError::Config(format!(
                "trust store '{}' contains no root certificates",
                self.id
            )));
        }
        Ok(store)
    }
}

/// Check if a file looks like a PEM certificate file for trust store loading.
///
/// Matches `.pem`, `.crt`, `.cer` extensions and OpenSSL hash-linked files
/// (`XXXXXXXX.N` where the extension is a single digit).
fn is_pem_cert_file(path: &Path) -> bool {
    let ext = match path.extension().and_then(|e| e.to_str()) {
        Some(e) => e,
        None => return false,
    };
    matches!(ext, "pem" | "crt" | "cer")
        || (ext.len() == 1 && ext.bytes().next().is_some_and(|b| b.is_ascii_digit()))
}

/// A set of trusted root certificates.
pub struct TrustStore {
    /// Map from raw DER-encoded subject name to list of DER-encoded certificates.
    certs_by_subject: HashMap<Vec<u8>, Vec<Vec<u8>>>,
    count: usize,
}

impl std::fmt::Debug for TrustStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustStore")
            .field("count", &self.count)
            .finish()
    }
}

impl TrustStore {
    /// Create an empty trust store.
    pub fn new() -> Self {
        TrustStore {
            certs_by_subject: HashMap::new(),
            count: 0,
        }
    }

    /// Load the system trust store.
    ///
    /// Lookup order matches OpenSSL: `SSL_CERT_FILE`, the bundle found by
    /// `openssl-probe`, [`KNOWN_CA_BUNDLE_PATHS`], then `SSL_CERT_DIR`, the
    /// probed directory and [`KNOWN_CA_DIR_PATHS`].
    pub fn system() -> Result<Self, CertscoreError> {
        let mut store = TrustStore::new();

        if let Some(bundle_path) = find_system_ca_bundle() {
            if let Ok(data) = std::fs::read(&bundle_path) {
                let added = store.add_pem_bundle(&data)?;
                if added > 0 {
                    return Ok(store);
                }
            }
        }

        let probe = openssl_probe::probe();
        let dir_candidates = std::env::var("SSL_CERT_DIR")
            .ok()
            .into_iter()
            .chain(
                probe
                    .cert_dir
                    .iter()
                    .map(|p| p.to_string_lossy().into_owned()),
            )
            .chain(KNOWN_CA_DIR_PATHS.iter().map(|s| (*s).to_string()));

        for dir in dir_candidates {
            if let Ok(added) = store.add_pem_directory(Path::new(&dir)) {
                if added > 0 {
                    return Ok(store);
                }
            }
        }

        Err(CertscoreError::TrustStore(
            "no system trust store found; set SSL_CERT_FILE or configure a bundle".into(),
        ))
    }

    /// Create a trust store from a PEM bundle.
    pub fn from_pem(pem_data: &[u8]) -> Result<Self, CertscoreError> {
        let mut store = TrustStore::new();
        store.add_pem_bundle(pem_data)?;
        Ok(store)
    }

    /// Create a trust store from a PEM file path.
    pub fn from_pem_file(path: &Path) -> Result<Self, CertscoreError> {
        let data = std::fs::read(path).map_err(|e| {
            CertscoreError::Io(std::io::Error::new(
                e.kind(),
                format!("{}: {}", path.display(), e),
            ))
        })?;
        Self::from_pem(&data)
    }

    /// Add a DER-encoded certificate to the trust store.
    pub fn add_der(&mut self, der: &[u8]) -> Result<(), CertscoreError> {
        let (_, x509) = X509Certificate::from_der(der)
            .map_err(|e| CertscoreError::DerError(format!("{}", e)))?;

        let subject_raw = x509.subject().as_raw().to_vec();
        self.certs_by_subject
            .entry(subject_raw)
            .or_default()
            .push(der.to_vec());
        self.count += 1;

        Ok(())
    }

    /// Add all certificates from a PEM bundle. Returns the number actually
    /// added; entries that fail to parse are skipped.
    pub fn add_pem_bundle(&mut self, pem_data: &[u8]) -> Result<usize, CertscoreError> {
        let certs = parse_pem_chain(pem_data)?;
        let mut added = 0;
        for cert_der in certs {
            if self.add_der(&cert_der).is_ok() {
                added += 1;
            }
        }
        Ok(added)
    }

    /// Load certificates from a directory of PEM files (like OpenSSL's -CApath).
    pub fn add_pem_directory(&mut self, dir: &Path) -> Result<usize, CertscoreError> {
        let mut total = 0;
        let entries = std::fs::read_dir(dir).map_err(|e| {
            CertscoreError::Io(std::io::Error::new(
                e.kind(),
                format!("{}: {}", dir.display(), e),
            ))
        })?;
        for entry in entries {
            let path = entry?.path();
            if path.is_file() && is_pem_cert_file(&path) {
                if let Ok(data) = std::fs::read(&path) {
                    if let Ok(added) = self.add_pem_bundle(&data) {
                        total += added;
                    }
                }
            }
        }
        Ok(total)
    }

    /// Find trusted certificates whose subject matches the given issuer name.
    pub(crate) fn find_by_subject_raw(&self, subject_raw: &[u8]) -> Option<&Vec<Vec<u8>>> {
        self.certs_by_subject.get(subject_raw)
    }

    /// Number of certificates in the store.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Check if a DER-encoded certificate is in the trust store.
    pub fn contains(&self, der: &[u8]) -> bool {
        if let Ok((_, x509)) = X509Certificate::from_der(der) {
            if let Some(certs) = self.find_by_subject_raw(x509.subject().as_raw()) {
                return certs.iter().any(|c| c == der);
            }
        }
        false
    }
}

impl Default for TrustStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Split a PEM buffer into DER certificates.
///
/// Stops quietly at trailing garbage once at least one certificate was read.
pub(crate) fn parse_pem_chain(input: &[u8]) -> Result<Vec<Vec<u8>>, CertscoreError> {
    let mut certs = Vec::new();
    for pem_result in Pem::iter_from_buffer(input) {
        match pem_result {
            Ok(pem) => {
                if pem.label == "CERTIFICATE" || pem.label == "TRUSTED CERTIFICATE" {
                    certs.push(pem.contents);
                }
            }
            Err(e) => {
                if !certs.is_empty() {
                    break;
                }
                return Err(CertscoreError::PemError(format!(
                    "failed to parse PEM: {}",
                    e
                )));
            }
        }
    }
    Ok(certs)
}

/// Find the system CA bundle path (same location OpenSSL uses).
pub fn find_system_ca_bundle() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("SSL_CERT_FILE") {
        let p = PathBuf::from(&path);
        if p.exists() {
            return Some(p);
        }
    }

    let probe = openssl_probe::probe();
    if let Some(file) = probe.cert_file {
        let path = PathBuf::from(&file);
        if path.exists() {
            return Some(path);
        }
    }

    KNOWN_CA_BUNDLE_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair};

    fn root_pem(cn: &str) -> (String, Vec<u8>) {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(Vec::new()).unwrap();
        params.distinguished_name.push(DnType::CommonName, cn);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let cert = params.self_signed(&key).unwrap();
        (cert.pem(), cert.der().to_vec())
    }

    #[test]
    fn store_id_round_trips_through_strings() {
        assert_eq!(TrustStoreId::from("Chrome".to_string()), TrustStoreId::Chrome);
        assert_eq!(TrustStoreId::from("google".to_string()), TrustStoreId::Chrome);
        assert_eq!(
            TrustStoreId::from("corp".to_string()),
            TrustStoreId::Custom("corp".into())
        );
        assert_eq!(String::from(TrustStoreId::Mozilla), "mozilla");
        assert_eq!(TrustStoreId::Microsoft.display_name(), "Microsoft Edge");
    }

    #[test]
    fn pem_bundle_is_indexed_by_subject() {
        let (pem_a, der_a) = root_pem("Root A");
        let (pem_b, der_b) = root_pem("Root B");
        let store = TrustStore::from_pem(format!("{pem_a}{pem_b}").as_bytes()).unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.contains(&der_a));
        assert!(store.contains(&der_b));

        let (_, other) = root_pem("Root A");
        assert!(!store.contains(&other), "same subject, different key");
    }

    #[test]
    fn missing_bundle_fails_to_load() {
        let program = TrustProgram::system(TrustStoreId::Mozilla)
            .with_bundle("/nonexistent/certscore/roots.pem");
        assert!(program.load().is_err());
    }

    #[test]
    fn empty_bundle_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.pem");
        std::fs::write(&path, b"").unwrap();
        let program = TrustProgram::system(TrustStoreId::Chrome).with_bundle(&path);
        assert!(program.load().is_err());
    }

    #[test]
    fn directory_source_reads_cert_files_only() {
        let dir = tempfile::tempdir().unwrap();
        let (pem, der) = root_pem("Dir Root");
        std::fs::write(dir.path().join("root.pem"), &pem).unwrap();
        std::fs::write(dir.path().join("notes.txt"), &pem).unwrap();
        let program = TrustProgram {
            id: TrustStoreId::Custom("dir".into()),
            bundle: None,
            directory: Some(dir.path().to_path_buf()),
            policy: None,
        };
        let store = program.load().unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.contains(&der));
    }

    #[test]
    fn hash_linked_names_count_as_cert_files() {
        assert!(is_pem_cert_file(Path::new("a1b2c3d4.0")));
        assert!(is_pem_cert_file(Path::new("root.crt")));
        assert!(!is_pem_cert_file(Path::new("readme.md")));
        assert!(!is_pem_cert_file(Path::new("noext")));
    }
}
