//! Chain evaluation against several root programs.
//!
//! Every configured [`TrustProgram`] is loaded once into a [`TrustStore`]
//! and evaluated independently: a path is built from the presented chain to
//! one of that store's roots, validated, and then scored against the
//! program's [`StorePolicy`] and the strict profile.
//!
//! | score | verdict            | meaning                                      |
//! |-------|--------------------|----------------------------------------------|
//! | 0     | `Untrusted`        | no valid path to a root in this store        |
//! | 1     | `PartiallyTrusted` | valid path, but the store policy flags it    |
//! | 2     | `FullyTrusted`     | valid path, store policy satisfied           |
//! | 3     | `FullyTrusted`     | as 2, and the strict profile is clean        |
//! | none  | `Unknown`          | store unavailable or chain not evaluable     |

mod chain;
mod checks;
mod helpers;
mod policy;
mod store;
#[cfg(test)]
pub(crate) mod test_pki;

use crate::certificate::PeerCertificate;
use checks::ParsedPath;
use rayon::prelude::*;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};
use x509_parser::prelude::*;

pub use policy::StorePolicy;
pub use store::{find_system_ca_bundle, TrustProgram, TrustStore, TrustStoreId};

/// Outcome of one chain in one store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustVerdict {
    Untrusted,
    PartiallyTrusted,
    FullyTrusted,
    /// The store could not produce an answer. Not comparable with the others.
    Unknown,
}

impl TrustVerdict {
    fn rank(self) -> Option<u8> {
        match self {
            TrustVerdict::Untrusted => Some(0),
            TrustVerdict::PartiallyTrusted => Some(1),
            TrustVerdict::FullyTrusted => Some(2),
            TrustVerdict::Unknown => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TrustVerdict::Untrusted => "untrusted",
            TrustVerdict::PartiallyTrusted => "partially trusted",
            TrustVerdict::FullyTrusted => "fully trusted",
            TrustVerdict::Unknown => "unknown",
        }
    }
}

impl PartialOrd for TrustVerdict {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self == other {
            return Some(Ordering::Equal);
        }
        Some(self.rank()?.cmp(&other.rank()?))
    }
}

impl std::fmt::Display for TrustVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// One certificate on the evaluated path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainCertInfo {
    /// Position in chain (0 = leaf).
    pub depth: usize,
    pub subject: String,
    pub issuer: String,
    /// CN, O or OU, whichever is found first.
    pub short_name: String,
    pub serial: String,
}

/// Verdict, score and supporting detail for one store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreEvaluation {
    pub store: TrustStoreId,
    pub verdict: TrustVerdict,
    /// `0..=3`, or `None` exactly when the verdict is `Unknown`.
    pub score: Option<u8>,
    /// The path that was validated, leaf first, ending at the anchor if found.
    pub chain: Vec<ChainCertInfo>,
    /// Why the score is not higher.
    pub findings: Vec<String>,
}

impl StoreEvaluation {
    fn unknown(store: TrustStoreId, reason: String) -> Self {
        Self {
            store,
            verdict: TrustVerdict::Unknown,
            score: None,
            chain: Vec::new(),
            findings: vec![reason],
        }
    }
}

/// Load state of one program, as reported by `certscore stores`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreSummary {
    pub id: TrustStoreId,
    pub name: String,
    /// Root count, or `None` when the store failed to load.
    pub roots: Option<usize>,
    pub error: Option<String>,
    pub policy: StorePolicy,
}

struct LoadedProgram {
    id: TrustStoreId,
    policy: StorePolicy,
    roots: Result<TrustStore, String>,
}

/// Scores peer chains against every configured root program.
///
/// Immutable once built; share it behind an `Arc`.
pub struct TrustStoreEvaluator {
    programs: Vec<LoadedProgram>,
}

impl std::fmt::Debug for TrustStoreEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustStoreEvaluator")
            .field(
                "programs",
                &self.programs.iter().map(|p| &p.id).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl TrustStoreEvaluator {
    /// Load every program. A program that fails to load is kept and will
    /// report `Unknown` for every chain.
    pub fn new(programs: &[TrustProgram]) -> Self {
        let programs = programs
            .iter()
            .map(|program| {
                let roots = program.load().map_err(|e| e.to_string());
                match &roots {
                    Ok(store) => tracing::debug!(store = %program.id, roots = store.len(), "loaded trust store"),
                    Err(e) => tracing::warn!(store = %program.id, error = %e, "trust store unavailable"),
                }
                LoadedProgram {
                    id: program.id.clone(),
                    policy: program.effective_policy(),
                    roots,
                }
            })
            .collect();
        Self { programs }
    }

    /// Microsoft, Chrome and Mozilla, each on the system roots with its
    /// default policy.
    pub fn with_defaults() -> Self {
        let programs: Vec<TrustProgram> = TrustStoreId::defaults()
            .into_iter()
            .map(TrustProgram::system)
            .collect();
        Self::new(&programs)
    }

    /// Build from already-loaded root sets.
    pub fn from_stores(stores: Vec<(TrustStoreId, TrustStore, StorePolicy)>) -> Self {
        Self {
            programs: stores
                .into_iter()
                .map(|(id, roots, policy)| LoadedProgram {
                    id,
                    policy,
                    roots: Ok(roots),
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    pub fn store_ids(&self) -> Vec<TrustStoreId> {
        self.programs.iter().map(|p| p.id.clone()).collect()
    }

    pub fn store_summaries(&self) -> Vec<StoreSummary> {
        self.programs
            .iter()
            .map(|p| StoreSummary {
                id: p.id.clone(),
                name: p.id.display_name().to_string(),
                roots: p.roots.as_ref().ok().map(TrustStore::len),
                error: p.roots.as_ref().err().cloned(),
                policy: p.policy.clone(),
            })
            .collect()
    }

    /// Evaluate at the current time.
    pub fn evaluate(&self, peer: &PeerCertificate) -> BTreeMap<TrustStoreId, StoreEvaluation> {
        let now_ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;
        self.evaluate_at(peer, now_ts)
    }

    /// Evaluate as of `now_ts` (Unix seconds). Never fails: a store that
    /// cannot answer yields `Unknown`. Stores are evaluated in parallel.
    pub fn evaluate_at(
        &self,
        peer: &PeerCertificate,
        now_ts: i64,
    ) -> BTreeMap<TrustStoreId, StoreEvaluation> {
        self.programs
            .par_iter()
            .map(|program| {
                let evaluation = match &program.roots {
                    Ok(roots) => assess(peer, roots, &program.policy, now_ts, &program.id),
                    Err(e) => StoreEvaluation::unknown(
                        program.id.clone(),
                        format!("trust store unavailable: {}", e),
                    ),
                };
                tracing::debug!(
                    store = %program.id,
                    host = peer.server_name(),
                    score = ?evaluation.score,
                    verdict = %evaluation.verdict,
                    "evaluated chain"
                );
                (program.id.clone(), evaluation)
            })
            .collect()
    }
}

/// Score one chain in one store.
fn assess(
    peer: &PeerCertificate,
    roots: &TrustStore,
    policy: &StorePolicy,
    now_ts: i64,
    id: &TrustStoreId,
) -> StoreEvaluation {
    let (leaf_der, presented_pool) = match peer.chain().split_first() {
        Some(split) => split,
        None => return StoreEvaluation::unknown(id.clone(), "empty certificate chain".into()),
    };
    let pool: Vec<(Vec<u8>, X509Certificate)> = presented_pool
        .iter()
        .take(chain::MAX_POOL_CERTS)
        .filter_map(|der| {
            X509Certificate::from_der(der)
                .ok()
                .map(|(_, cert)| (der.clone(), cert))
        })
        .collect();

    // Without a path to this store, validate what was presented so the
    // findings describe the real chain.
    let mut errors = Vec::new();
    let path_ders = match chain::build_path(leaf_der, &pool, roots, policy.max_chain_depth) {
        Ok(Some(path)) => path,
        Ok(None) => peer.chain().to_vec(),
        Err(exhausted) => {
            tracing::warn!(store = %id, host = peer.server_name(), "{exhausted}");
            errors.push(exhausted.to_string());
            peer.chain().to_vec()
        }
    };
    let path = match ParsedPath::parse(&path_ders) {
        Ok(path) => path,
        Err(e) => return StoreEvaluation::unknown(id.clone(), e),
    };

    checks::check_depth(&path, policy.max_chain_depth, &mut errors);
    checks::check_validity_period(&path, now_ts, &mut errors);
    checks::check_issuers(&path, &mut errors);
    checks::check_critical_extensions(&path, &mut errors);
    checks::check_signatures(&path, &mut errors);
    let anchor_der = checks::find_anchor(&path, &path_ders, roots, &mut errors);
    let anchor = anchor_der
        .as_deref()
        .and_then(|der| X509Certificate::from_der(der).ok())
        .map(|(_, cert)| cert);
    if let Some(anchor) = &anchor {
        checks::check_anchor(anchor, now_ts, &mut errors);
    }
    checks::check_leaf_usage(&path, &mut errors);
    checks::check_server_name(&path, peer.server_name(), &mut errors);

    // A self-signed anchor taken from the path is already listed.
    let external_anchor = anchor
        .as_ref()
        .filter(|_| anchor_der.as_ref() != path_ders.last());
    let chain = path.chain_info(external_anchor);

    let (verdict, score, findings) = if !errors.is_empty() {
        (TrustVerdict::Untrusted, 0, errors)
    } else {
        let policy_findings = policy.check(&path, anchor.as_ref());
        if !policy_findings.is_empty() {
            (TrustVerdict::PartiallyTrusted, 1, policy_findings)
        } else {
            let strict = policy::strict_profile_findings(&path, anchor.as_ref());
            let score = if strict.is_empty() { 3 } else { 2 };
            (TrustVerdict::FullyTrusted, score, strict)
        }
    };

    StoreEvaluation {
        store: id.clone(),
        verdict,
        score: Some(score),
        chain,
        findings,
    }
}
