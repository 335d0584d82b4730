//! Revision resolver - turns every revision specifier into a revision id.
//!
//! Distinct (branch, specifier) pairs are collected depth-first and looked
//! up on a bounded rayon pool. The first failure stops the remaining
//! lookups and fails the whole phase; no partially resolved tree is ever
//! returned.

use crate::engine::{ResolvedBranch, ResolvedChild, ResolvedRevision};
use crate::error::{BuildError, Result};
use rayon::prelude::*;
use recipe::{RecipeBranch, RevisionSpec};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use vcs::{Backend, CancelToken};

type Key = (String, RevisionSpec);

/// Revisions resolved so far in one build, keyed by (branch, specifier).
#[derive(Debug, Default)]
pub struct ResolutionCache {
    entries: HashMap<Key, Arc<ResolvedRevision>>,
}

impl ResolutionCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached revision for a pair.
    pub fn get(&self, branch: &str, spec: &RevisionSpec) -> Option<Arc<ResolvedRevision>> {
        self.entries
            .get(&(branch.to_string(), spec.clone()))
            .cloned()
    }

    fn contains(&self, key: &Key) -> bool {
        self.entries.contains_key(key)
    }

    fn insert(&mut self, key: Key, revision: ResolvedRevision) {
        self.entries.insert(key, Arc::new(revision));
    }

    /// Number of distinct pairs resolved.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been resolved yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Resolve every revision in `root` with a fresh cache.
pub fn resolve<B: Backend + ?Sized>(
    root: &RecipeBranch,
    backend: &B,
    cancel: &CancelToken,
    jobs: usize,
) -> Result<ResolvedBranch> {
    resolve_with_cache(root, backend, cancel, jobs, &mut ResolutionCache::new())
}

/// Resolve every revision in `root`, reusing and filling `cache`.
pub fn resolve_with_cache<B: Backend + ?Sized>(
    root: &RecipeBranch,
    backend: &B,
    cancel: &CancelToken,
    jobs: usize,
    cache: &mut ResolutionCache,
) -> Result<ResolvedBranch> {
    let mut pending = Vec::new();
    let mut seen = HashSet::new();
    collect_pending(root, cache, &mut seen, &mut pending);

    if !pending.is_empty() {
        log::debug!(
            "Resolving {} revision(s) with {} job(s)",
            pending.len(),
            jobs.max(1)
        );
        let revisions = lookup_all(&pending, backend, cancel, jobs)?;
        for (key, revision) in pending.into_iter().zip(revisions) {
            log::info!("{} {} -> {}", key.0, key.1, revision.id.short());
            cache.insert(key, revision);
        }
    }

    annotate(root, cache)
}

/// Depth-first, root first, each pair once.
fn collect_pending(
    branch: &RecipeBranch,
    cache: &ResolutionCache,
    seen: &mut HashSet<Key>,
    pending: &mut Vec<Key>,
) {
    let key = (branch.url.clone(), branch.revspec.clone());
    if !cache.contains(&key) && seen.insert(key.clone()) {
        pending.push(key);
    }
    for child in &branch.children {
        collect_pending(&child.branch, cache, seen, pending);
    }
}

/// Look up every pair; the result is in `pending` order.
///
/// Once a lookup fails, lookups that have not started yet are skipped and
/// the first failure in declaration order is returned.
fn lookup_all<B: Backend + ?Sized>(
    pending: &[Key],
    backend: &B,
    cancel: &CancelToken,
    jobs: usize,
) -> Result<Vec<ResolvedRevision>> {
    let abort = AtomicBool::new(false);
    let lookup = |key: &Key| -> Option<Result<ResolvedRevision>> {
        if abort.load(Ordering::SeqCst) {
            return None;
        }
        let result = lookup_one(&key.0, &key.1, backend, cancel);
        if result.is_err() {
            abort.store(true, Ordering::SeqCst);
        }
        Some(result)
    };

    let jobs = jobs.max(1);
    let outcomes: Vec<Option<Result<ResolvedRevision>>> = if jobs == 1 || pending.len() == 1 {
        pending.iter().map(lookup).collect()
    } else {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(jobs)
            .build()
            .map_err(|e| BuildError::Config(format!("failed to create thread pool: {e}")))?;
        pool.install(|| pending.par_iter().map(lookup).collect())
    };

    let mut revisions = Vec::with_capacity(outcomes.len());
    let mut skipped = false;
    for outcome in outcomes {
        match outcome {
            Some(Ok(revision)) => revisions.push(revision),
            Some(Err(e)) => return Err(e),
            None => skipped = true,
        }
    }
    // Lookups are only skipped after a failure.
    if skipped {
        return Err(BuildError::Cancelled);
    }
    Ok(revisions)
}

fn lookup_one<B: Backend + ?Sized>(
    branch: &str,
    spec: &RevisionSpec,
    backend: &B,
    cancel: &CancelToken,
) -> Result<ResolvedRevision> {
    let result = match spec {
        RevisionSpec::Tip => backend.branch_tip(branch, cancel),
        RevisionSpec::RevisionId(id) => backend.resolve_revision_id(branch, id, cancel),
        RevisionSpec::Date(when) => backend.revision_at_or_before(branch, *when, cancel),
        RevisionSpec::Tag(tag) => backend.resolve_tag(branch, tag, cancel),
    };

    match result {
        Ok(id) => Ok(ResolvedRevision {
            branch: branch.to_string(),
            id,
        }),
        Err(vcs::Error::RevisionNotFound { .. }) => Err(BuildError::RevisionNotFound {
            branch: branch.to_string(),
            spec: spec.to_string(),
        }),
        Err(vcs::Error::Cancelled) => Err(BuildError::Cancelled),
        Err(source) => Err(BuildError::Collaborator {
            branch: branch.to_string(),
            source,
        }),
    }
}

fn annotate(branch: &RecipeBranch, cache: &ResolutionCache) -> Result<ResolvedBranch> {
    let revision = cache
        .get(&branch.url, &branch.revspec)
        .ok_or_else(|| BuildError::RevisionNotFound {
            branch: branch.url.clone(),
            spec: branch.revspec.to_string(),
        })?;

    let children = branch
        .children
        .iter()
        .map(|child| {
            Ok(ResolvedChild {
                nickname: child.nickname.clone(),
                directive: child.directive.clone(),
                branch: annotate(&child.branch, cache)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(ResolvedBranch {
        url: branch.url.clone(),
        spec: branch.revspec.clone(),
        revision,
        children,
    })
}
