//! Fan a submission out to fetch, evaluate and persist, with bounded
//! concurrency and an overall deadline.
//!
//! Each URL moves through [`UrlState`]: `Queued → Fetching → Evaluating →
//! Persisted`, or ends in `Failed`. Failures are per URL and never abort
//! siblings. Chain evaluation is CPU-bound and runs on the blocking pool,
//! raced against the deadline. When the deadline expires every unfinished
//! task is aborted and awaited before `submit` returns, and nothing is
//! persisted after it.

use crate::batch::{BatchLimits, BatchUrlParser};
use crate::certificate::{CertSummary, PeerCertificate};
use crate::fetch::{CertificateSource, FetchError, DEFAULT_FETCH_TIMEOUT};
use crate::store::{Link, ResultStore, StoreError};
use crate::trust::{StoreEvaluation, TrustStoreEvaluator, TrustStoreId};
use crate::url_policy::{validate_optional, CandidateUrl};
use crate::ValidationError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

pub const DEFAULT_MAX_WORKERS: usize = 8;
pub const DEFAULT_SUBMISSION_DEADLINE: Duration = Duration::from_secs(120);

/// The external request shape: a single URL, a list of URLs, or both.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub file_urls: Option<Vec<String>>,
}

/// Validated input to [`VerificationOrchestrator::submit`].
#[derive(Debug, Clone, Default)]
pub struct Submission {
    pub url: Option<CandidateUrl>,
    pub batch: Option<Vec<CandidateUrl>>,
}

impl Submission {
    pub fn single(url: CandidateUrl) -> Self {
        Self {
            url: Some(url),
            batch: None,
        }
    }

    pub fn batch(urls: Vec<CandidateUrl>) -> Self {
        Self {
            url: None,
            batch: Some(urls),
        }
    }

    /// Validate a raw request. An empty or blank `url` counts as absent, as
    /// does an empty `fileUrls` list.
    pub fn from_request(
        request: SubmitRequest,
        limits: &BatchLimits,
    ) -> Result<Self, ValidationError> {
        let url = validate_optional(request.url.as_deref())?;
        let batch = match request.file_urls {
            Some(lines) if !lines.is_empty() => {
                Some(BatchUrlParser::new(*limits).parse_lines(&lines)?)
            }
            _ => None,
        };
        if url.is_none() && batch.is_none() {
            return Err(ValidationError::EmptySubmission);
        }
        Ok(Self { url, batch })
    }

    /// Single URL first, then the batch, deduplicated by normalized URL with
    /// the first occurrence kept.
    fn into_unique_urls(self) -> Vec<CandidateUrl> {
        let mut seen = HashSet::new();
        self.url
            .into_iter()
            .chain(self.batch.into_iter().flatten())
            .filter(|u| seen.insert(u.normalized().to_string()))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Upper bound on concurrent fetch-and-evaluate tasks. Zero is treated as one.
    pub max_workers: usize,
    pub fetch_timeout: Duration,
    /// Bound on the whole submission, queueing included.
    pub deadline: Duration,
    /// Return [`OrchestratorError::AllFailed`] instead of a report when no
    /// URL succeeded.
    pub fail_when_all_fail: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            deadline: DEFAULT_SUBMISSION_DEADLINE,
            fail_when_all_fail: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlState {
    Queued,
    Fetching,
    Evaluating,
    Persisted,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Connection,
    Handshake,
    Timeout,
    Persistence,
    /// The task died without reporting (panic).
    Internal,
}

impl From<&FetchError> for FailureKind {
    fn from(e: &FetchError) -> Self {
        match e {
            FetchError::Connection { .. } => FailureKind::Connection,
            FetchError::Handshake { .. } | FetchError::InvalidServerName { .. } => {
                FailureKind::Handshake
            }
            FetchError::Timeout { .. } => FailureKind::Timeout,
        }
    }
}

/// Why one URL produced no link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UrlFailure {
    pub url: String,
    pub kind: FailureKind,
    /// The state the URL was in when it failed.
    pub stage: UrlState,
    pub message: String,
}

/// A URL that was fetched, scored and persisted.
#[derive(Debug, Clone, Serialize)]
pub struct UrlOutcome {
    pub url: String,
    pub link: Link,
    pub certificate: CertSummary,
    pub verdicts: BTreeMap<TrustStoreId, StoreEvaluation>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmissionReport {
    /// Number of links created.
    pub accepted: usize,
    /// Created links, in completion order.
    pub links: Vec<Link>,
    pub outcomes: Vec<UrlOutcome>,
    pub failures: Vec<UrlFailure>,
    pub elapsed_ms: u64,
}

impl SubmissionReport {
    pub fn is_complete_success(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("all {} URLs failed", .failures.len())]
    AllFailed { failures: Vec<UrlFailure> },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Shared per-submission state table, indexed by position in the URL list.
#[derive(Clone)]
struct StateTable(Arc<Mutex<Vec<UrlState>>>);

impl StateTable {
    fn new(len: usize) -> Self {
        Self(Arc::new(Mutex::new(vec![UrlState::Queued; len])))
    }

    fn set(&self, idx: usize, url: &CandidateUrl, state: UrlState) {
        if let Ok(mut states) = self.0.lock() {
            if let Some(slot) = states.get_mut(idx) {
                *slot = state;
            }
        }
        tracing::debug!(url = %url, state = ?state, "url state");
    }

    fn get(&self, idx: usize) -> UrlState {
        self.0
            .lock()
            .ok()
            .and_then(|states| states.get(idx).copied())
            .unwrap_or(UrlState::Queued)
    }
}

/// Runs submissions against a certificate source, an evaluator and a store.
pub struct VerificationOrchestrator<F: CertificateSource> {
    source: Arc<F>,
    evaluator: Arc<TrustStoreEvaluator>,
    store: Arc<dyn ResultStore>,
    config: OrchestratorConfig,
}

impl<F: CertificateSource> VerificationOrchestrator<F> {
    pub fn new(
        source: Arc<F>,
        evaluator: Arc<TrustStoreEvaluator>,
        store: Arc<dyn ResultStore>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            source,
            evaluator,
            store,
            config,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn evaluator(&self) -> &TrustStoreEvaluator {
        &self.evaluator
    }

    /// Run a submission under the configured deadline.
    pub async fn submit(
        &self,
        submission: Submission,
    ) -> Result<SubmissionReport, OrchestratorError> {
        self.submit_with_deadline(submission, self.config.deadline)
            .await
    }

    /// Run a submission under an explicit deadline.
    pub async fn submit_with_deadline(
        &self,
        submission: Submission,
        deadline: Duration,
    ) -> Result<SubmissionReport, OrchestratorError> {
        let started = Instant::now();
        let urls = submission.into_unique_urls();
        if urls.is_empty() {
            return Err(ValidationError::EmptySubmission.into());
        }
        tracing::info!(urls = urls.len(), workers = self.config.max_workers, "submission started");

        let deadline_at = tokio::time::Instant::now() + deadline;
        let states = StateTable::new(urls.len());
        let semaphore = Arc::new(Semaphore::new(self.config.max_workers.max(1)));
        let mut tasks = JoinSet::new();
        for (idx, url) in urls.iter().cloned().enumerate() {
            let job = Job {
                idx,
                url,
                source: Arc::clone(&self.source),
                evaluator: Arc::clone(&self.evaluator),
                store: Arc::clone(&self.store),
                states: states.clone(),
                fetch_timeout: self.config.fetch_timeout,
                deadline_at,
            };
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                job.run().await
            });
        }

        let mut pending: Vec<Option<CandidateUrl>> = urls.into_iter().map(Some).collect();
        let mut report = SubmissionReport {
            accepted: 0,
            links: Vec::new(),
            outcomes: Vec::new(),
            failures: Vec::new(),
            elapsed_ms: 0,
        };
        let mut record = |(idx, result): (usize, Result<UrlOutcome, UrlFailure>),
                          report: &mut SubmissionReport| {
            if let Some(slot) = pending.get_mut(idx) {
                *slot = None;
            }
            match result {
                Ok(outcome) => {
                    report.accepted += 1;
                    report.links.push(outcome.link.clone());
                    report.outcomes.push(outcome);
                }
                Err(failure) => report.failures.push(failure),
            }
        };

        let mut timed_out = false;
        loop {
            match tokio::time::timeout_at(deadline_at, tasks.join_next()).await {
                Ok(Some(Ok(done))) => record(done, &mut report),
                Ok(Some(Err(e))) => tracing::error!(error = %e, "verification task failed"),
                Ok(None) => break,
                Err(_) => {
                    timed_out = true;
                    tasks.abort_all();
                    // Tasks that finished in the meantime still count.
                    while let Some(joined) = tasks.join_next().await {
                        if let Ok(done) = joined {
                            record(done, &mut report);
                        }
                    }
                    break;
                }
            }
        }
        drop(record);

        for (idx, url) in pending.into_iter().enumerate() {
            let Some(url) = url else { continue };
            let stage = states.get(idx);
            let failure = if timed_out {
                UrlFailure {
                    url: url.as_str().to_string(),
                    kind: FailureKind::Timeout,
                    stage,
                    message: format!(
                        "submission deadline of {}ms expired while {:?}",
                        deadline.as_millis(),
                        stage
                    ),
                }
            } else {
                UrlFailure {
                    url: url.as_str().to_string(),
                    kind: FailureKind::Internal,
                    stage,
                    message: "verification task ended without a result".into(),
                }
            };
            tracing::warn!(url = %url, kind = ?failure.kind, "url not completed");
            report.failures.push(failure);
        }

        report.elapsed_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            accepted = report.accepted,
            failed = report.failures.len(),
            elapsed_ms = report.elapsed_ms,
            timed_out,
            "submission finished"
        );

        if self.config.fail_when_all_fail && report.accepted == 0 {
            return Err(OrchestratorError::AllFailed {
                failures: report.failures,
            });
        }
        Ok(report)
    }

    /// All persisted links, in storage order.
    pub fn list_all(&self) -> Result<Vec<Link>, OrchestratorError> {
        Ok(self.store.list_all()?)
    }

    /// Delete every persisted link. Safe to call on an empty store.
    pub fn clear_all(&self) -> Result<usize, OrchestratorError> {
        let deleted = self.store.delete_all()?;
        tracing::info!(deleted, "cleared links");
        Ok(deleted)
    }
}

/// Everything one task needs, moved into the spawned future.
struct Job<F: CertificateSource> {
    idx: usize,
    url: CandidateUrl,
    source: Arc<F>,
    evaluator: Arc<TrustStoreEvaluator>,
    store: Arc<dyn ResultStore>,
    states: StateTable,
    fetch_timeout: Duration,
    deadline_at: tokio::time::Instant,
}

impl<F: CertificateSource> Job<F> {
    async fn run(self) -> (usize, Result<UrlOutcome, UrlFailure>) {
        let result = self.verify().await;
        let final_state = if result.is_ok() {
            UrlState::Persisted
        } else {
            UrlState::Failed
        };
        self.states.set(self.idx, &self.url, final_state);
        (self.idx, result)
    }

    async fn verify(&self) -> Result<UrlOutcome, UrlFailure> {
        let url = &self.url;

        self.states.set(self.idx, url, UrlState::Fetching);
        let peer = self
            .source
            .fetch(url, self.fetch_timeout)
            .await
            .map_err(|e| {
                tracing::warn!(url = %url, host = %url.host(), error = %e, "fetch failed");
                UrlFailure {
                    url: url.as_str().to_string(),
                    kind: FailureKind::from(&e),
                    stage: UrlState::Fetching,
                    message: e.to_string(),
                }
            })?;

        self.states.set(self.idx, url, UrlState::Evaluating);
        let (peer, verdicts) = self.evaluate(peer).await?;
        let link = self.store.create(url.as_str()).map_err(|e| {
            tracing::error!(url = %url, error = %e, "failed to persist link");
            UrlFailure {
                url: url.as_str().to_string(),
                kind: FailureKind::Persistence,
                stage: UrlState::Evaluating,
                message: e.to_string(),
            }
        })?;

        Ok(UrlOutcome {
            url: url.as_str().to_string(),
            link,
            certificate: peer.summary().clone(),
            verdicts,
        })
    }

    async fn evaluate(
        &self,
        peer: PeerCertificate,
    ) -> Result<(PeerCertificate, BTreeMap<TrustStoreId, StoreEvaluation>), UrlFailure> {
        let evaluator = Arc::clone(&self.evaluator);
        let evaluation = tokio::task::spawn_blocking(move || {
            let verdicts = evaluator.evaluate(&peer);
            (peer, verdicts)
        });
        let failure = |kind, message: String| UrlFailure {
            url: self.url.as_str().to_string(),
            kind,
            stage: UrlState::Evaluating,
            message,
        };
        match tokio::time::timeout_at(self.deadline_at, evaluation).await {
            Ok(Ok(done)) => Ok(done),
            Ok(Err(e)) => {
                tracing::error!(url = %self.url, error = %e, "evaluation task failed");
                Err(failure(FailureKind::Internal, format!("evaluation failed: {e}")))
            }
            Err(_) => {
                tracing::warn!(url = %self.url, "deadline expired during evaluation");
                Err(failure(
                    FailureKind::Timeout,
                    "submission deadline expired during evaluation".into(),
                ))
            }
        }
    }
}
