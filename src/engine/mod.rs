//! Build engine - resolve revisions, plan operations, execute them.
//!
//! Data flows strictly forward:
//! `Recipe` -> [`resolver`] -> [`ResolvedBranch`] -> [`planner`] ->
//! [`BuildPlan`] -> [`executor`] -> [`BuildManifest`].

pub mod executor;
pub mod manifest;
pub mod planner;
pub mod resolver;

pub use executor::execute;
pub use manifest::{BuildManifest, ManifestEntry, OperationKind};
pub use planner::{BuildPlan, Operation, plan};
pub use resolver::{ResolutionCache, resolve, resolve_with_cache};

use recipe::{Directive, RecipeBranch, RevisionSpec};
use std::sync::Arc;
use vcs::RevisionId;

/// A concrete revision for one (branch, specifier) pair.
///
/// Looked up once per build and shared by every node naming the pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolvedRevision {
    /// Branch the revision was resolved in
    pub branch: String,
    /// Immutable revision id
    pub id: RevisionId,
}

/// A recipe branch with its revision resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBranch {
    /// Branch location
    pub url: String,
    /// Specifier as written in the recipe
    pub spec: RevisionSpec,
    /// What the specifier resolved to
    pub revision: Arc<ResolvedRevision>,
    /// Resolved instructions, in declaration order
    pub children: Vec<ResolvedChild>,
}

/// A resolved merge or nest instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedChild {
    /// Instruction nickname
    pub nickname: String,
    /// Merge or nest
    pub directive: Directive,
    /// The resolved branch
    pub branch: ResolvedBranch,
}

impl ResolvedBranch {
    /// The resolved revision id
    pub fn id(&self) -> &RevisionId {
        &self.revision.id
    }

    /// The same tree with every specifier pinned to its resolved id.
    pub fn pinned(&self) -> RecipeBranch {
        let mut branch = RecipeBranch::new(self.url.clone())
            .with_revspec(RevisionSpec::RevisionId(self.id().to_string()));
        for child in &self.children {
            let pinned = child.branch.pinned();
            match &child.directive {
                Directive::Merge => branch.merge(child.nickname.clone(), pinned),
                Directive::Nest { location } => {
                    branch.nest(child.nickname.clone(), location.clone(), pinned);
                }
            }
        }
        branch
    }

    /// Find a resolved instruction by nickname (depth-first, declaration order)
    pub fn find(&self, nickname: &str) -> Option<&ResolvedChild> {
        self.children.iter().find_map(|child| {
            if child.nickname == nickname {
                Some(child)
            } else {
                child.branch.find(nickname)
            }
        })
    }
}
