//! In-memory backend.
//!
//! Branches, commits and working trees live in a map behind a mutex; nothing
//! touches the filesystem. Tests build history with [`MemoryBackend::commit`]
//! and friends, then inspect the resulting trees with
//! [`MemoryBackend::tree`].
//!
//! Merges are three-way per path: a path changed on only one side takes that
//! side, a path changed identically on both sides is kept, anything else is
//! a conflict and leaves the tree untouched.

use crate::backend::Backend;
use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::types::{MergeOutcome, RevisionId};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// File contents keyed by path relative to the tree root.
pub type Files = BTreeMap<String, String>;

#[derive(Debug, Clone)]
struct Commit {
    parents: Vec<RevisionId>,
    timestamp: DateTime<Utc>,
    message: String,
    files: Files,
}

/// A checked-out working tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingTree {
    /// Branch the tree was checked out from
    pub branch: String,
    /// Last commit of the tree
    pub head: RevisionId,
    /// Current contents
    pub files: Files,
}

#[derive(Debug, Default)]
struct State {
    commits: HashMap<RevisionId, Commit>,
    /// Mainline history per branch, oldest first
    branches: HashMap<String, Vec<RevisionId>>,
    tags: HashMap<(String, String), RevisionId>,
    trees: HashMap<PathBuf, WorkingTree>,
    failures: HashMap<String, u32>,
    merges: u64,
}

impl State {
    fn history(&self, branch: &str) -> Result<&[RevisionId]> {
        self.branches
            .get(branch)
            .map(Vec::as_slice)
            .ok_or_else(|| Error::BranchNotFound {
                branch: branch.to_string(),
            })
    }

    fn simulate_failure(&mut self, branch: &str) -> Result<()> {
        if let Some(left) = self.failures.get_mut(branch)
            && *left > 0
        {
            *left -= 1;
            return Err(Error::Network {
                message: format!("simulated failure reaching {branch}"),
            });
        }
        Ok(())
    }

    fn commit(&self, id: &RevisionId) -> Result<&Commit> {
        self.commits
            .get(id)
            .ok_or_else(|| Error::Other(format!("unknown revision {id}")))
    }

    fn ancestors(&self, id: &RevisionId) -> HashSet<RevisionId> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([id.clone()]);
        while let Some(next) = queue.pop_front() {
            if !seen.insert(next.clone()) {
                continue;
            }
            if let Some(commit) = self.commits.get(&next) {
                queue.extend(commit.parents.iter().cloned());
            }
        }
        seen
    }

    /// Nearest common ancestor found walking back from `other`.
    fn merge_base(&self, ours: &RevisionId, other: &RevisionId) -> Option<RevisionId> {
        let ours = self.ancestors(ours);
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([other.clone()]);
        while let Some(next) = queue.pop_front() {
            if ours.contains(&next) {
                return Some(next);
            }
            if !seen.insert(next.clone()) {
                continue;
            }
            if let Some(commit) = self.commits.get(&next) {
                queue.extend(commit.parents.iter().cloned());
            }
        }
        None
    }
}

/// Backend keeping all history in memory.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
    lookups: AtomicUsize,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Commit to `branch`, creating it if needed.
    ///
    /// `files` are applied on top of the current tip; an empty content
    /// deletes the path.
    pub fn commit(
        &self,
        branch: &str,
        id: &str,
        timestamp: DateTime<Utc>,
        files: &[(&str, &str)],
    ) -> RevisionId {
        let id = RevisionId::new(id);
        let mut state = self.lock();

        let parent = state.branches.get(branch).and_then(|h| h.last()).cloned();
        let mut snapshot = parent
            .as_ref()
            .and_then(|p| state.commits.get(p))
            .map(|c| c.files.clone())
            .unwrap_or_default();
        for (path, content) in files {
            if content.is_empty() {
                snapshot.remove(*path);
            } else {
                snapshot.insert((*path).to_string(), (*content).to_string());
            }
        }

        state.commits.insert(
            id.clone(),
            Commit {
                parents: parent.into_iter().collect(),
                timestamp,
                message: format!("commit {id}"),
                files: snapshot,
            },
        );
        state
            .branches
            .entry(branch.to_string())
            .or_default()
            .push(id.clone());
        id
    }

    /// Create `branch` with the history of `source`.
    pub fn branch_from(&self, branch: &str, source: &str) {
        let mut state = self.lock();
        let history = state.branches.get(source).cloned().unwrap_or_default();
        state.branches.insert(branch.to_string(), history);
    }

    /// Point `tag` in `branch` at `id`.
    pub fn tag(&self, branch: &str, tag: &str, id: &str) {
        self.lock()
            .tags
            .insert((branch.to_string(), tag.to_string()), RevisionId::new(id));
    }

    /// Make the next `times` calls naming `branch` fail with a network error.
    pub fn fail_times(&self, branch: &str, times: u32) {
        self.lock().failures.insert(branch.to_string(), times);
    }

    /// The working tree checked out at `path`.
    pub fn tree(&self, path: &Path) -> Option<WorkingTree> {
        self.lock().trees.get(path).cloned()
    }

    /// Message of a commit, including merge commits made by [`Backend::merge`].
    pub fn message(&self, id: &RevisionId) -> Option<String> {
        self.lock().commits.get(id).map(|c| c.message.clone())
    }

    /// Number of revision lookups served so far.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    fn lookup<T>(
        &self,
        branch: &str,
        cancel: &CancelToken,
        find: impl FnOnce(&State, &[RevisionId]) -> Result<T>,
    ) -> Result<T> {
        cancel.check()?;
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();
        state.simulate_failure(branch)?;
        let history = state.history(branch)?;
        find(&*state, history)
    }
}

impl Backend for MemoryBackend {
    fn branch_tip(&self, branch: &str, cancel: &CancelToken) -> Result<RevisionId> {
        self.lookup(branch, cancel, |_, history| {
            history.last().cloned().ok_or_else(|| Error::RevisionNotFound {
                branch: branch.to_string(),
                spec: "tip".to_string(),
            })
        })
    }

    fn resolve_revision_id(
        &self,
        branch: &str,
        id: &str,
        cancel: &CancelToken,
    ) -> Result<RevisionId> {
        self.lookup(branch, cancel, |_, history| {
            history
                .iter()
                .find(|rev| rev.as_str() == id)
                .cloned()
                .ok_or_else(|| Error::RevisionNotFound {
                    branch: branch.to_string(),
                    spec: format!("revid:{id}"),
                })
        })
    }

    fn resolve_tag(&self, branch: &str, tag: &str, cancel: &CancelToken) -> Result<RevisionId> {
        self.lookup(branch, cancel, |state, _| {
            state
                .tags
                .get(&(branch.to_string(), tag.to_string()))
                .cloned()
                .ok_or_else(|| Error::RevisionNotFound {
                    branch: branch.to_string(),
                    spec: format!("tag:{tag}"),
                })
        })
    }

    fn revision_at_or_before(
        &self,
        branch: &str,
        when: DateTime<Utc>,
        cancel: &CancelToken,
    ) -> Result<RevisionId> {
        self.lookup(branch, cancel, |state, history| {
            let mut best: Option<(&RevisionId, DateTime<Utc>)> = None;
            for rev in history {
                let timestamp = state.commit(rev)?.timestamp;
                // Later entries win ties.
                if timestamp <= when && best.is_none_or(|(_, t)| timestamp >= t) {
                    best = Some((rev, timestamp));
                }
            }
            best.map(|(rev, _)| rev.clone())
                .ok_or_else(|| Error::RevisionNotFound {
                    branch: branch.to_string(),
                    spec: format!("date:{}", when.to_rfc3339()),
                })
        })
    }

    fn checkout(
        &self,
        branch: &str,
        revision: &RevisionId,
        target: &Path,
        cancel: &CancelToken,
    ) -> Result<()> {
        cancel.check()?;
        let mut state = self.lock();
        state.simulate_failure(branch)?;
        if state.trees.contains_key(target) {
            return Err(Error::Other(format!(
                "{} already has a working tree",
                target.display()
            )));
        }
        if !state.history(branch)?.contains(revision) {
            return Err(Error::RevisionNotFound {
                branch: branch.to_string(),
                spec: format!("revid:{revision}"),
            });
        }

        let files = state.commit(revision)?.files.clone();
        state.trees.insert(
            target.to_path_buf(),
            WorkingTree {
                branch: branch.to_string(),
                head: revision.clone(),
                files,
            },
        );
        Ok(())
    }

    fn merge(
        &self,
        tree: &Path,
        branch: &str,
        revision: &RevisionId,
        message: &str,
        cancel: &CancelToken,
    ) -> Result<MergeOutcome> {
        cancel.check()?;
        let mut state = self.lock();
        state.simulate_failure(branch)?;

        let working = state
            .trees
            .get(tree)
            .cloned()
            .ok_or_else(|| Error::NoWorkingTree(tree.to_path_buf()))?;
        let theirs = state.commit(revision)?.files.clone();

        if state.ancestors(&working.head).contains(revision) {
            return Ok(MergeOutcome::UpToDate);
        }

        let base = match state.merge_base(&working.head, revision) {
            Some(base) => state.commit(&base)?.files.clone(),
            None => Files::new(),
        };

        let paths: BTreeSet<&String> = working
            .files
            .keys()
            .chain(theirs.keys())
            .chain(base.keys())
            .collect();
        let mut merged = Files::new();
        let mut conflicts = Vec::new();
        for path in paths {
            let (b, o, t) = (base.get(path), working.files.get(path), theirs.get(path));
            let result = if o == t || b == t {
                o
            } else if b == o {
                t
            } else {
                conflicts.push(PathBuf::from(path));
                continue;
            };
            if let Some(content) = result {
                merged.insert(path.clone(), content.clone());
            }
        }

        if !conflicts.is_empty() {
            return Err(Error::Conflict {
                branch: branch.to_string(),
                paths: conflicts,
            });
        }

        state.merges += 1;
        let id = RevisionId::new(format!("merge-{}", state.merges));
        let timestamp = state
            .commit(&working.head)?
            .timestamp
            .max(state.commit(revision)?.timestamp);
        state.commits.insert(
            id.clone(),
            Commit {
                parents: vec![working.head.clone(), revision.clone()],
                timestamp,
                message: message.to_string(),
                files: merged.clone(),
            },
        );
        if let Some(entry) = state.trees.get_mut(tree) {
            entry.head = id;
            entry.files = merged;
        }
        Ok(MergeOutcome::Merged)
    }

    fn revno(
        &self,
        branch: &str,
        revision: &RevisionId,
        cancel: &CancelToken,
    ) -> Result<Option<u64>> {
        cancel.check()?;
        let state = self.lock();
        let history = state.history(branch)?;
        Ok(history
            .iter()
            .position(|rev| rev == revision)
            .and_then(|index| u64::try_from(index + 1).ok()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).unwrap().with_timezone(&Utc)
    }

    fn backend() -> MemoryBackend {
        let backend = MemoryBackend::new();
        backend.commit("base", "b1", at("2019-12-30T10:00:00Z"), &[("README", "one")]);
        backend.commit("base", "b2", at("2020-01-02T10:00:00Z"), &[("README", "two")]);
        backend.tag("base", "1.0", "b1");
        backend
    }

    #[test]
    fn test_lookups() {
        let backend = backend();
        let cancel = CancelToken::new();

        assert_eq!(backend.branch_tip("base", &cancel).unwrap().as_str(), "b2");
        assert_eq!(backend.resolve_tag("base", "1.0", &cancel).unwrap().as_str(), "b1");
        assert_eq!(
            backend.resolve_revision_id("base", "b1", &cancel).unwrap().as_str(),
            "b1"
        );
        assert_eq!(backend.lookups(), 3);

        assert!(matches!(
            backend.resolve_tag("base", "2.0", &cancel),
            Err(Error::RevisionNotFound { .. })
        ));
        assert!(matches!(
            backend.branch_tip("missing", &cancel),
            Err(Error::BranchNotFound { .. })
        ));
    }

    #[test]
    fn test_revision_at_or_before() {
        let backend = backend();
        let cancel = CancelToken::new();

        let rev = backend
            .revision_at_or_before("base", at("2020-01-01T00:00:00Z"), &cancel)
            .unwrap();
        assert_eq!(rev.as_str(), "b1");

        assert!(
            backend
                .revision_at_or_before("base", at("2019-01-01T00:00:00Z"), &cancel)
                .is_err()
        );
    }

    #[test]
    fn test_revision_at_or_before_tie_prefers_later_entry() {
        let backend = MemoryBackend::new();
        let when = at("2020-01-01T00:00:00Z");
        backend.commit("b", "first", when, &[]);
        backend.commit("b", "second", when, &[]);

        let rev = backend
            .revision_at_or_before("b", when, &CancelToken::new())
            .unwrap();
        assert_eq!(rev.as_str(), "second");
    }

    #[test]
    fn test_disjoint_merge() {
        let backend = backend();
        backend.branch_from("feature", "base");
        backend.commit("feature", "f1", at("2020-01-03T00:00:00Z"), &[("src/lib.rs", "fn x() {}")]);
        let cancel = CancelToken::new();
        let tree = Path::new("/build");

        backend
            .checkout("base", &RevisionId::new("b2"), tree, &cancel)
            .unwrap();
        let outcome = backend
            .merge(tree, "feature", &RevisionId::new("f1"), "Merge feature", &cancel)
            .unwrap();
        assert_eq!(outcome, MergeOutcome::Merged);

        let working = backend.tree(tree).unwrap();
        assert_eq!(working.files["README"], "two");
        assert_eq!(working.files["src/lib.rs"], "fn x() {}");
        assert_eq!(backend.message(&working.head).unwrap(), "Merge feature");

        let again = backend
            .merge(tree, "feature", &RevisionId::new("f1"), "Merge feature", &cancel)
            .unwrap();
        assert_eq!(again, MergeOutcome::UpToDate);
    }

    #[test]
    fn test_conflicting_merge_leaves_tree() {
        let backend = MemoryBackend::new();
        backend.commit("base", "b1", at("2020-01-01T00:00:00Z"), &[("README", "one")]);
        backend.branch_from("other", "base");
        backend.commit("base", "b2", at("2020-01-02T00:00:00Z"), &[("README", "two")]);
        backend.commit(
            "other",
            "o1",
            at("2020-01-03T00:00:00Z"),
            &[("README", "three"), ("NEWS", "news")],
        );
        let cancel = CancelToken::new();
        let tree = Path::new("/build");

        backend
            .checkout("base", &RevisionId::new("b2"), tree, &cancel)
            .unwrap();
        let before = backend.tree(tree).unwrap();

        let err = backend
            .merge(tree, "other", &RevisionId::new("o1"), "Merge other", &cancel)
            .unwrap_err();
        match err {
            Error::Conflict { branch, paths } => {
                assert_eq!(branch, "other");
                assert_eq!(paths, vec![PathBuf::from("README")]);
            }
            other => panic!("unexpected: {other}"),
        }
        assert_eq!(backend.tree(tree).unwrap(), before);
    }

    #[test]
    fn test_revno() {
        let backend = backend();
        let cancel = CancelToken::new();
        assert_eq!(
            backend.revno("base", &RevisionId::new("b2"), &cancel).unwrap(),
            Some(2)
        );
        assert_eq!(
            backend.revno("base", &RevisionId::new("zz"), &cancel).unwrap(),
            None
        );
    }

    #[test]
    fn test_cancelled() {
        let backend = backend();
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(matches!(
            backend.branch_tip("base", &cancel),
            Err(Error::Cancelled)
        ));
        assert_eq!(backend.lookups(), 0);
    }
}
