//! certscore-lib: fetch TLS certificate chains and score them against
//! several root programs.
//!
//! The pipeline validates candidate URLs (singly or from a batch file),
//! performs bounded-concurrency TLS handshakes to retrieve each server's
//! chain, evaluates the chain independently against every configured trust
//! store, and persists one [`Link`] per successfully fetched endpoint.

mod batch;
mod certificate;
pub mod config;
mod fetch;
mod oid;
mod orchestrator;
mod store;
pub mod trust;
mod url_policy;
mod util;

pub use batch::{
    BatchFile, BatchLimits, BatchUrlParser, DEFAULT_MAX_BATCH_BYTES, DEFAULT_MAX_BATCH_URLS,
};
pub use certificate::{CertSummary, PeerCertificate};
pub use config::{AppContext, CertscoreConfig};
pub use fetch::{CertificateFetcher, CertificateSource, FetchError};
pub use orchestrator::{
    FailureKind, OrchestratorConfig, OrchestratorError, SubmissionReport, Submission,
    SubmitRequest, UrlFailure, UrlOutcome, UrlState, VerificationOrchestrator,
};
pub use store::{JsonFileStore, Link, MemoryStore, ResultStore, StoreError};
pub use trust::{
    StoreEvaluation, StorePolicy, TrustProgram, TrustStore, TrustStoreEvaluator, TrustStoreId,
    TrustVerdict,
};
pub use url_policy::{validate, validate_optional, CandidateUrl};
pub use util::der_to_pem;

/// Errors from certificate and trust store handling.
#[derive(Debug, thiserror::Error)]
pub enum CertscoreError {
    #[error("Failed to parse certificate: {0}")]
    ParseError(String),

    #[error("Invalid PEM format: {0}")]
    PemError(String),

    #[error("Invalid DER format: {0}")]
    DerError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Trust store error: {0}")]
    TrustStore(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Client-input faults. Reported synchronously and never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid URL `{input}`: {reason}")]
    MalformedUrl { input: String, reason: String },

    #[error("URL doesn't implement https protocol: {input}")]
    InsecureScheme { input: String, scheme: String },

    #[error("Only .txt files are allowed: {reason}")]
    UnsupportedFileType { reason: String },

    #[error("Max size is {}KB (file is {size} bytes)", .max / 1024)]
    FileTooLarge { size: usize, max: usize },

    #[error("There are more than {max} URLs ({count} found)")]
    TooManyUrls { count: usize, max: usize },

    #[error("You have to type at least 1 url")]
    EmptySubmission,

    #[error("{}", .messages.join("; "))]
    InvalidBatch { messages: Vec<String> },
}

impl ValidationError {
    /// Summary line used when many batch lines fail the same way.
    pub(crate) fn batch_category(&self) -> &'static str {
        match self {
            ValidationError::InsecureScheme { .. } => "Some URLs don't implement https protocol",
            _ => "File contains invalid URLs",
        }
    }

    /// Individual human-readable messages, one per failure category.
    pub fn messages(&self) -> Vec<String> {
        match self {
            ValidationError::InvalidBatch { messages } => messages.clone(),
            other => vec![other.to_string()],
        }
    }
}
