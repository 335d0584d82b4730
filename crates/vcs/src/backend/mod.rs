//! Backend abstraction for version control operations.
//!
//! The [`Backend`] trait is everything the recipe builder needs from a
//! version control system, allowing for different implementations:
//! - [`git::GitBackend`] shells out to the `git` command
//! - [`memory::MemoryBackend`] keeps commits in memory for tests and dry runs
//! - [`crate::retry::Retrying`] wraps either one with retry on network errors

pub mod git;
pub mod memory;

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::types::{MergeOutcome, RevisionId};
use chrono::{DateTime, Utc};
use std::path::Path;

/// Backend trait for version control operations.
///
/// Every call receives the build's [`CancelToken`] and should return
/// [`crate::Error::Cancelled`] promptly once it fires.
pub trait Backend: Send + Sync {
    /// Current tip of a branch.
    fn branch_tip(&self, branch: &str, cancel: &CancelToken) -> Result<RevisionId>;

    /// Check that `id` is in the history of `branch` and return it in
    /// canonical form.
    fn resolve_revision_id(
        &self,
        branch: &str,
        id: &str,
        cancel: &CancelToken,
    ) -> Result<RevisionId>;

    /// Revision a tag points at.
    fn resolve_tag(&self, branch: &str, tag: &str, cancel: &CancelToken) -> Result<RevisionId>;

    /// Latest revision in the history of `branch` committed at or before
    /// `when`.
    fn revision_at_or_before(
        &self,
        branch: &str,
        when: DateTime<Utc>,
        cancel: &CancelToken,
    ) -> Result<RevisionId>;

    /// Create a working tree of `branch` at `revision` in `target`.
    ///
    /// `target` must not exist or be an empty directory.
    fn checkout(
        &self,
        branch: &str,
        revision: &RevisionId,
        target: &Path,
        cancel: &CancelToken,
    ) -> Result<()>;

    /// Merge `revision` of `branch` into the working tree at `tree` and
    /// commit the result with `message`.
    ///
    /// On conflict the tree is left as it was before the call and
    /// [`crate::Error::Conflict`] names the conflicting paths.
    fn merge(
        &self,
        tree: &Path,
        branch: &str,
        revision: &RevisionId,
        message: &str,
        cancel: &CancelToken,
    ) -> Result<MergeOutcome>;

    /// Sequential revision number of `revision` in `branch`, when the
    /// backend has such a notion.
    fn revno(
        &self,
        _branch: &str,
        _revision: &RevisionId,
        _cancel: &CancelToken,
    ) -> Result<Option<u64>> {
        Ok(None)
    }
}
