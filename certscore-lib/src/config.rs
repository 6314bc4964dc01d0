//! Process configuration and the shared context built from it.
//!
//! Configuration is a TOML file; every key is optional. Durations are
//! either whole seconds or humantime strings such as `"500ms"` or `"2m"`.
//!
//! ```toml
//! max_workers = 4
//! fetch_timeout = "2500ms"
//! submission_deadline = 60
//! store_path = "links.json"
//!
//! # Optional: microsoft.pem, chrome.pem and mozilla.pem for the default programs.
//! vendor_roots_dir = "/opt/certscore/roots"
//!
//! [[trust_stores]]
//! id = "mozilla"
//! bundle = "/etc/ssl/certs/ca-certificates.crt"
//!
//! [[trust_stores]]
//! id = "internal"
//! directory = "/opt/pki/roots"
//! policy = { min_rsa_bits = 3072 }
//! ```

use crate::batch::{BatchLimits, DEFAULT_MAX_BATCH_BYTES, DEFAULT_MAX_BATCH_URLS};
use crate::fetch::{CertificateFetcher, DEFAULT_FETCH_TIMEOUT};
use crate::orchestrator::{
    OrchestratorConfig, VerificationOrchestrator, DEFAULT_MAX_WORKERS, DEFAULT_SUBMISSION_DEADLINE,
};
use crate::store::{JsonFileStore, MemoryStore, ResultStore};
use crate::trust::{TrustProgram, TrustStoreEvaluator, TrustStoreId};
use crate::CertscoreError;
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// `store_path` value that selects the in-process store.
pub const MEMORY_STORE: &str = ":memory:";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CertscoreConfig {
    pub max_workers: usize,
    #[serde(alias = "fetch_timeout_secs", deserialize_with = "duration")]
    pub fetch_timeout: Duration,
    #[serde(alias = "submission_deadline_secs", deserialize_with = "duration")]
    pub submission_deadline: Duration,
    pub max_batch_urls: usize,
    pub max_batch_bytes: usize,
    pub fail_when_all_fail: bool,
    pub store_path: PathBuf,
    /// Directory holding `<id>.pem` bundles for the default programs. Unset
    /// means all three read the system bundle.
    pub vendor_roots_dir: Option<PathBuf>,
    /// Root programs to evaluate against. Empty means the three defaults.
    pub trust_stores: Vec<TrustProgram>,
}

impl Default for CertscoreConfig {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            submission_deadline: DEFAULT_SUBMISSION_DEADLINE,
            max_batch_urls: DEFAULT_MAX_BATCH_URLS,
            max_batch_bytes: DEFAULT_MAX_BATCH_BYTES,
            fail_when_all_fail: false,
            store_path: PathBuf::from("certscore-links.json"),
            vendor_roots_dir: None,
            trust_stores: Vec::new(),
        }
    }
}

impl CertscoreConfig {
    /// Read and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self, CertscoreError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
            .map_err(|e| CertscoreError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml_str(text: &str) -> Result<Self, CertscoreError> {
        let config: Self = toml::from_str(text).map_err(|e| CertscoreError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), CertscoreError> {
        if self.max_workers == 0 {
            return Err(CertscoreError::Config("max_workers must be at least 1".into()));
        }
        if self.fetch_timeout.is_zero() || self.submission_deadline.is_zero() {
            return Err(CertscoreError::Config("timeouts must be non-zero".into()));
        }
        let mut seen = std::collections::HashSet::new();
        for program in &self.trust_stores {
            if !seen.insert(&program.id) {
                return Err(CertscoreError::Config(format!(
                    "trust store '{}' is configured more than once",
                    program.id
                )));
            }
        }
        Ok(())
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            max_workers: self.max_workers,
            fetch_timeout: self.fetch_timeout,
            deadline: self.submission_deadline,
            fail_when_all_fail: self.fail_when_all_fail,
        }
    }

    pub fn batch_limits(&self) -> BatchLimits {
        BatchLimits {
            max_bytes: self.max_batch_bytes,
            max_urls: self.max_batch_urls,
        }
    }

    /// Configured programs, or the three defaults on their vendor bundles
    /// (or the system roots when no vendor directory is set).
    pub fn programs(&self) -> Vec<TrustProgram> {
        if !self.trust_stores.is_empty() {
            return self.trust_stores.clone();
        }
        TrustStoreId::defaults()
            .into_iter()
            .map(|id| match &self.vendor_roots_dir {
                Some(dir) => {
                    let bundle = dir.join(format!("{}.pem", id.as_str()));
                    TrustProgram::system(id).with_bundle(bundle)
                }
                None => TrustProgram::system(id),
            })
            .collect()
    }
}

/// Whole seconds, or a humantime string.
fn duration<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Secs(u64),
        Text(String),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Secs(secs) => Ok(Duration::from_secs(secs)),
        Raw::Text(text) => humantime::parse_duration(&text).map_err(serde::de::Error::custom),
    }
}

/// Open the store named by `path`; [`MEMORY_STORE`] selects a process-local one.
pub fn open_store(path: &Path) -> Result<Arc<dyn ResultStore>, CertscoreError> {
    if path.as_os_str() == MEMORY_STORE {
        return Ok(Arc::new(MemoryStore::new()));
    }
    let store = JsonFileStore::open(path).map_err(|e| CertscoreError::Config(e.to_string()))?;
    Ok(Arc::new(store))
}

/// Everything a submission needs, built once at startup.
pub struct AppContext {
    pub config: CertscoreConfig,
    pub store: Arc<dyn ResultStore>,
    pub evaluator: Arc<TrustStoreEvaluator>,
    pub fetcher: Arc<CertificateFetcher>,
}

impl AppContext {
    /// Load trust stores, open the result store and build the TLS client.
    pub fn new(config: CertscoreConfig) -> Result<Self, CertscoreError> {
        let store = open_store(&config.store_path)?;
        let evaluator = TrustStoreEvaluator::new(&config.programs());
        Self::with_parts(config, store, evaluator)
    }

    /// Build around an existing store and evaluator.
    pub fn with_parts(
        config: CertscoreConfig,
        store: Arc<dyn ResultStore>,
        evaluator: TrustStoreEvaluator,
    ) -> Result<Self, CertscoreError> {
        let fetcher = CertificateFetcher::new()
            .map_err(|e| CertscoreError::Config(format!("TLS client setup failed: {}", e)))?;
        Ok(Self {
            config,
            store,
            evaluator: Arc::new(evaluator),
            fetcher: Arc::new(fetcher),
        })
    }

    pub fn orchestrator(&self) -> VerificationOrchestrator<CertificateFetcher> {
        VerificationOrchestrator::new(
            Arc::clone(&self.fetcher),
            Arc::clone(&self.evaluator),
            Arc::clone(&self.store),
            self.config.orchestrator_config(),
        )
    }
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("config", &self.config)
            .field("evaluator", &self.evaluator)
            .finish_non_exhaustive()
    }
}
