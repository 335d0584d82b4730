//! Merge planner - linearizes a resolved tree into operations.
//!
//! The root is checked out first. Children follow in declaration order: a
//! merge lands in its parent's tree and its own children apply after it; a
//! nest is checked out below its parent's tree and its children apply to
//! the nested tree.

use crate::engine::ResolvedBranch;
use crate::error::PlanError;
use recipe::Directive;
use std::collections::HashMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use vcs::RevisionId;

/// One step of a build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Create the root working tree
    Checkout {
        /// Branch location
        branch: String,
        /// Resolved revision
        revision: RevisionId,
        /// Tree path relative to the build root (empty for the root)
        target: PathBuf,
        /// Recipe indent level
        depth: usize,
    },
    /// Merge a branch into an existing tree
    Merge {
        /// Instruction nickname
        nickname: String,
        /// Branch location
        branch: String,
        /// Resolved revision
        revision: RevisionId,
        /// Tree merged into, relative to the build root
        target: PathBuf,
        /// Recipe indent level
        depth: usize,
        /// The branch and revision are already in this tree's ancestry
        noop: bool,
    },
    /// Check a branch out below an existing tree
    Nest {
        /// Instruction nickname
        nickname: String,
        /// Branch location
        branch: String,
        /// Resolved revision
        revision: RevisionId,
        /// New tree, relative to the build root
        target: PathBuf,
        /// Location relative to the parent tree, as written
        subpath: String,
        /// Recipe indent level
        depth: usize,
    },
}

impl Operation {
    /// Branch location
    pub fn branch(&self) -> &str {
        match self {
            Self::Checkout { branch, .. }
            | Self::Merge { branch, .. }
            | Self::Nest { branch, .. } => branch,
        }
    }

    /// Resolved revision
    pub fn revision(&self) -> &RevisionId {
        match self {
            Self::Checkout { revision, .. }
            | Self::Merge { revision, .. }
            | Self::Nest { revision, .. } => revision,
        }
    }

    /// Tree path relative to the build root
    pub fn target(&self) -> &Path {
        match self {
            Self::Checkout { target, .. }
            | Self::Merge { target, .. }
            | Self::Nest { target, .. } => target,
        }
    }

    /// Recipe indent level
    pub fn depth(&self) -> usize {
        match self {
            Self::Checkout { depth, .. }
            | Self::Merge { depth, .. }
            | Self::Nest { depth, .. } => *depth,
        }
    }

    /// Instruction nickname, `None` for the root checkout
    pub fn nickname(&self) -> Option<&str> {
        match self {
            Self::Checkout { .. } => None,
            Self::Merge { nickname, .. } | Self::Nest { nickname, .. } => Some(nickname),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Checkout {
                branch, revision, ..
            } => write!(f, "checkout {branch} at {}", revision.short()),
            Self::Merge {
                nickname,
                branch,
                revision,
                noop,
                ..
            } => {
                write!(f, "merge {nickname} ({branch} at {})", revision.short())?;
                if *noop {
                    write!(f, " [no-op]")?;
                }
                Ok(())
            }
            Self::Nest {
                nickname,
                branch,
                revision,
                target,
                ..
            } => write!(
                f,
                "nest {nickname} ({branch} at {}) in {}",
                revision.short(),
                target.display()
            ),
        }
    }
}

/// An ordered list of operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildPlan {
    /// Operations in execution order
    pub operations: Vec<Operation>,
}

impl BuildPlan {
    /// Number of operations
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Check if the plan is empty
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Iterate over operations in execution order
    pub fn iter(&self) -> std::slice::Iter<'_, Operation> {
        self.operations.iter()
    }
}

impl<'a> IntoIterator for &'a BuildPlan {
    type Item = &'a Operation;
    type IntoIter = std::slice::Iter<'a, Operation>;

    fn into_iter(self) -> Self::IntoIter {
        self.operations.iter()
    }
}

/// Build the plan for a resolved tree.
pub fn plan(root: &ResolvedBranch) -> Result<BuildPlan, PlanError> {
    let mut operations = vec![Operation::Checkout {
        branch: root.url.clone(),
        revision: root.id().clone(),
        target: PathBuf::new(),
        depth: 0,
    }];

    let mut walk = Walk {
        ancestors: vec![(root.url.as_str(), root.id())],
        nests: HashMap::new(),
        operations: &mut operations,
    };
    walk.children(root, Path::new(""), 0)?;

    log::debug!("Planned {} operation(s)", operations.len());
    Ok(BuildPlan { operations })
}

/// State shared across the whole tree walk.
struct Walk<'a, 'o> {
    /// Branches on the path from the root
    ancestors: Vec<(&'a str, &'a RevisionId)>,
    /// Every nested tree in the plan, by path below the build root
    nests: HashMap<PathBuf, &'a str>,
    operations: &'o mut Vec<Operation>,
}

impl<'a> Walk<'a, '_> {
    fn children(
        &mut self,
        parent: &'a ResolvedBranch,
        target: &Path,
        depth: usize,
    ) -> Result<(), PlanError> {
        for child in &parent.children {
            let branch = &child.branch;
            let child_target = match &child.directive {
                Directive::Merge => {
                    let noop = self
                        .ancestors
                        .iter()
                        .any(|(url, id)| *url == branch.url && *id == branch.id());
                    if noop {
                        log::debug!("Merge of {} repeats an ancestor", child.nickname);
                    }
                    self.operations.push(Operation::Merge {
                        nickname: child.nickname.clone(),
                        branch: branch.url.clone(),
                        revision: branch.id().clone(),
                        target: target.to_path_buf(),
                        depth,
                        noop,
                    });
                    target.to_path_buf()
                }
                Directive::Nest { location } => {
                    let nested = target.join(normalize_location(&child.nickname, location)?);
                    if let Some(first) = self.nests.insert(nested.clone(), &child.nickname) {
                        return Err(PlanError::DuplicateNestLocation {
                            location: nested.display().to_string(),
                            first: first.to_string(),
                            second: child.nickname.clone(),
                        });
                    }
                    self.operations.push(Operation::Nest {
                        nickname: child.nickname.clone(),
                        branch: branch.url.clone(),
                        revision: branch.id().clone(),
                        target: nested.clone(),
                        subpath: location.clone(),
                        depth,
                    });
                    nested
                }
            };

            self.ancestors.push((branch.url.as_str(), branch.id()));
            self.children(branch, &child_target, depth + 1)?;
            self.ancestors.pop();
        }

        Ok(())
    }
}

/// Normalize a nest location to a relative path below the parent tree.
fn normalize_location(nickname: &str, location: &str) -> Result<PathBuf, PlanError> {
    let malformed = |reason| PlanError::MalformedNesting {
        nickname: nickname.to_string(),
        location: location.to_string(),
        reason,
    };

    let mut normalized = PathBuf::new();
    for component in Path::new(location).components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir => return Err(malformed("location leaves the parent tree")),
            Component::RootDir | Component::Prefix(_) => {
                return Err(malformed("location must be relative"));
            }
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err(malformed("location is the parent tree itself"));
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ResolvedChild, ResolvedRevision};
    use recipe::RevisionSpec;
    use std::sync::Arc;

    fn node(url: &str, id: &str) -> ResolvedBranch {
        ResolvedBranch {
            url: url.to_string(),
            spec: RevisionSpec::Tip,
            revision: Arc::new(ResolvedRevision {
                branch: url.to_string(),
                id: RevisionId::new(id),
            }),
            children: Vec::new(),
        }
    }

    fn merge(parent: &mut ResolvedBranch, nickname: &str, branch: ResolvedBranch) {
        parent.children.push(ResolvedChild {
            nickname: nickname.to_string(),
            directive: Directive::Merge,
            branch,
        });
    }

    fn nest(parent: &mut ResolvedBranch, nickname: &str, location: &str, branch: ResolvedBranch) {
        parent.children.push(ResolvedChild {
            nickname: nickname.to_string(),
            directive: Directive::Nest {
                location: location.to_string(),
            },
            branch,
        });
    }

    #[test]
    fn test_nest_scenario() {
        let mut root = node("A", "a-tip");
        nest(&mut root, "b", "vendor/B", node("B", "r123"));

        let plan = plan(&root).unwrap();
        assert_eq!(
            plan.operations,
            vec![
                Operation::Checkout {
                    branch: "A".to_string(),
                    revision: RevisionId::new("a-tip"),
                    target: PathBuf::new(),
                    depth: 0,
                },
                Operation::Nest {
                    nickname: "b".to_string(),
                    branch: "B".to_string(),
                    revision: RevisionId::new("r123"),
                    target: PathBuf::from("vendor/B"),
                    subpath: "vendor/B".to_string(),
                    depth: 0,
                },
            ]
        );
    }

    /// Every ordering of `items`.
    fn permutations(items: &[&'static str]) -> Vec<Vec<&'static str>> {
        if items.len() <= 1 {
            return vec![items.to_vec()];
        }
        let mut all = Vec::new();
        for (i, first) in items.iter().enumerate() {
            let mut rest = items.to_vec();
            rest.remove(i);
            for mut tail in permutations(&rest) {
                tail.insert(0, *first);
                all.push(tail);
            }
        }
        all
    }

    #[test]
    fn test_sibling_merges_keep_declaration_order() {
        let names = ["alpha", "beta", "gamma", "delta"];
        for n in 2..=names.len() {
            let orders = permutations(&names[..n]);
            assert_eq!(orders.len(), (1..=n).product::<usize>());

            for order in orders {
                let mut root = node("base", "b1");
                for name in &order {
                    merge(&mut root, name, node(name, &format!("{name}-1")));
                }

                let plan = plan(&root).unwrap();
                let planned: Vec<&str> = plan.iter().filter_map(Operation::nickname).collect();
                assert_eq!(planned, order);
            }
        }
    }

    #[test]
    fn test_children_follow_their_parent() {
        let mut images = node("images", "i1");
        merge(&mut images, "fixes", node("fixes", "f1"));
        let mut packaging = node("packaging", "p1");
        merge(&mut packaging, "patches", node("patches", "q1"));

        let mut root = node("base", "b1");
        merge(&mut root, "packaging", packaging);
        nest(&mut root, "artwork", "./images/", images);
        merge(&mut root, "last", node("last", "l1"));

        let plan = plan(&root).unwrap();
        let steps: Vec<(Option<&str>, &Path, usize)> = plan
            .iter()
            .map(|op| (op.nickname(), op.target(), op.depth()))
            .collect();
        assert_eq!(
            steps,
            vec![
                (None, Path::new(""), 0),
                (Some("packaging"), Path::new(""), 0),
                (Some("patches"), Path::new(""), 1),
                (Some("artwork"), Path::new("images"), 0),
                (Some("fixes"), Path::new("images"), 1),
                (Some("last"), Path::new(""), 0),
            ]
        );
    }

    #[test]
    fn test_merge_of_ancestor_is_noop() {
        let mut child = node("lib", "l1");
        merge(&mut child, "again", node("base", "b1"));
        let mut root = node("base", "b1");
        merge(&mut root, "lib", child);
        merge(&mut root, "other", node("base", "b0"));

        let plan = plan(&root).unwrap();
        let noops: Vec<bool> = plan
            .iter()
            .filter_map(|op| match op {
                Operation::Merge { noop, .. } => Some(*noop),
                _ => None,
            })
            .collect();
        assert_eq!(noops, vec![false, true, false]);
    }

    #[test]
    fn test_duplicate_nest_location() {
        let mut root = node("base", "b1");
        nest(&mut root, "one", "vendor/x", node("x", "x1"));
        nest(&mut root, "two", "./vendor/x/", node("y", "y1"));

        assert_eq!(
            plan(&root),
            Err(PlanError::DuplicateNestLocation {
                location: "vendor/x".to_string(),
                first: "one".to_string(),
                second: "two".to_string(),
            })
        );
    }

    #[test]
    fn test_nests_from_a_merged_branch_share_the_parent_tree() {
        let mut merged = node("m", "m1");
        nest(&mut merged, "inner", "vendor", node("x", "x1"));
        let mut root = node("base", "b1");
        merge(&mut root, "m", merged);
        nest(&mut root, "outer", "vendor/", node("y", "y1"));

        assert_eq!(
            plan(&root),
            Err(PlanError::DuplicateNestLocation {
                location: "vendor".to_string(),
                first: "inner".to_string(),
                second: "outer".to_string(),
            })
        );
    }

    #[test]
    fn test_same_location_under_different_parents_is_fine() {
        let mut first = node("x", "x1");
        nest(&mut first, "inner", "doc", node("d", "d1"));
        let mut root = node("base", "b1");
        nest(&mut root, "first", "x", first);
        nest(&mut root, "doc", "doc", node("d", "d1"));

        assert!(plan(&root).is_ok());
    }

    #[test]
    fn test_malformed_nest_locations() {
        for location in ["../escape", "/abs", ".", "a/../../b"] {
            let mut root = node("base", "b1");
            nest(&mut root, "bad", location, node("x", "x1"));
            assert!(
                matches!(plan(&root), Err(PlanError::MalformedNesting { .. })),
                "{location} should be rejected"
            );
        }
    }
}
