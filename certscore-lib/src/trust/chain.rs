//! Path building from a presented leaf to an anchor in one root set.
//!
//! Servers send intermediates in arbitrary order, sometimes with extra or
//! cross-signed certificates, and the root sets differ per program. The
//! presented chain is therefore treated as an unordered pool and searched
//! depth-first with backtracking, separately for every store.
//!
//! Backtracking over a pool of mutually cross-signed certificates grows
//! factorially, so the search is bounded by a signature-check budget and
//! callers cap the pool at [`MAX_POOL_CERTS`].

use super::TrustStore;
use x509_parser::prelude::*;

/// Presented certificates beyond this many are not considered as issuers.
pub(crate) const MAX_POOL_CERTS: usize = 16;

/// Signature verifications one search may spend before giving up.
pub(crate) const MAX_SIGNATURE_CHECKS: usize = 256;

/// The search ran out of budget before finding or ruling out a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SearchExhausted {
    pub checks: usize,
}

impl std::fmt::Display for SearchExhausted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "path search abandoned after {} signature checks",
            self.checks
        )
    }
}

/// Find a path `[leaf, intermediate...]` whose last element is either a
/// trusted self-signed certificate or was issued by a root in `roots`.
///
/// `max_intermediates` bounds the search depth. Returns `Ok(None)` when no
/// such path exists within the bound.
pub(crate) fn build_path(
    leaf_der: &[u8],
    pool: &[(Vec<u8>, X509Certificate)],
    roots: &TrustStore,
    max_intermediates: usize,
) -> Result<Option<Vec<Vec<u8>>>, SearchExhausted> {
    build_path_with_budget(leaf_der, pool, roots, max_intermediates, MAX_SIGNATURE_CHECKS)
}

fn build_path_with_budget(
    leaf_der: &[u8],
    pool: &[(Vec<u8>, X509Certificate)],
    roots: &TrustStore,
    max_intermediates: usize,
    budget: usize,
) -> Result<Option<Vec<Vec<u8>>>, SearchExhausted> {
    let Ok((_, leaf)) = X509Certificate::from_der(leaf_der) else {
        return Ok(None);
    };
    let pool = pool.get(..MAX_POOL_CERTS).unwrap_or(pool);
    let mut search = PathSearch {
        pool,
        roots,
        used: vec![false; pool.len()],
        path: vec![leaf_der.to_vec()],
        limit: max_intermediates.saturating_add(1),
        checks: 0,
        budget,
    };
    Ok(search.extend_from(&leaf)?.then_some(search.path))
}

struct PathSearch<'p, 'a> {
    pool: &'p [(Vec<u8>, X509Certificate<'a>)],
    roots: &'p TrustStore,
    used: Vec<bool>,
    path: Vec<Vec<u8>>,
    limit: usize,
    checks: usize,
    budget: usize,
}

impl PathSearch<'_, '_> {
    /// True once `path` ends at something the root set vouches for.
    #[allow(clippy::indexing_slicing)] // idx comes from enumerating pool; used has the same length
    fn extend_from(&mut self, current: &X509Certificate) -> Result<bool, SearchExhausted> {
        if self.is_anchored(current)? {
            return Ok(true);
        }
        if self.path.len() >= self.limit {
            return Ok(false);
        }

        let issuer_raw = current.issuer().as_raw();
        let pool = self.pool;
        for (idx, (der, candidate)) in pool.iter().enumerate() {
            if self.used[idx] || candidate.subject().as_raw() != issuer_raw {
                continue;
            }
            if !self.verify(current, Some(candidate.public_key()))? {
                continue;
            }

            self.used[idx] = true;
            self.path.push(der.clone());
            if self.extend_from(candidate)? {
                return Ok(true);
            }
            self.path.pop();
            self.used[idx] = false;
        }
        Ok(false)
    }

    fn is_anchored(&mut self, current: &X509Certificate) -> Result<bool, SearchExhausted> {
        let issuer_raw = current.issuer().as_raw();

        // A self-signed certificate that the store holds verbatim.
        if current.subject().as_raw() == issuer_raw
            && self.path.last().is_some_and(|der| self.roots.contains(der))
            && self.verify(current, None)?
        {
            return Ok(true);
        }

        let roots = self.roots;
        for root_der in roots.find_by_subject_raw(issuer_raw).into_iter().flatten() {
            let Ok((_, root)) = X509Certificate::from_der(root_der) else {
                continue;
            };
            if self.verify(current, Some(root.public_key()))? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// One budgeted signature check.
    fn verify(
        &mut self,
        cert: &X509Certificate,
        key: Option<&SubjectPublicKeyInfo>,
    ) -> Result<bool, SearchExhausted> {
        if self.checks >= self.budget {
            return Err(SearchExhausted {
                checks: self.checks,
            });
        }
        self.checks += 1;
        Ok(cert.verify_signature(key).is_ok())
    }
}
