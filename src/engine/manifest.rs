//! Build manifest - what was built, with every revision pinned.
//!
//! A manifest renders as recipe text that pins each branch to the revision
//! actually used, so feeding it back as a recipe rebuilds the same tree.
//! It also serializes to JSON.

use crate::engine::Operation;
use recipe::{ChildBranch, Directive, Header, Recipe, RecipeBranch, RevisionSpec};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use vcs::RevisionId;

/// Kind of an executed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Root checkout
    Checkout,
    /// Merge into an existing tree
    Merge,
    /// Independent checkout below an existing tree
    Nest,
}

/// One executed operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// What was done
    pub kind: OperationKind,
    /// Branch location
    pub branch: String,
    /// Instruction nickname, absent for the root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    /// Revision actually used
    pub revision: RevisionId,
    /// Tree the operation applied to, relative to the build root
    pub target: PathBuf,
    /// Nest location relative to the parent tree
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Recipe indent level
    pub depth: usize,
    /// The tree was already up to date, nothing changed
    #[serde(default)]
    pub unchanged: bool,
}

impl ManifestEntry {
    /// Entry for an operation that completed.
    pub fn from_operation(operation: &Operation, unchanged: bool) -> Self {
        let (kind, location) = match operation {
            Operation::Checkout { .. } => (OperationKind::Checkout, None),
            Operation::Merge { .. } => (OperationKind::Merge, None),
            Operation::Nest { subpath, .. } => (OperationKind::Nest, Some(subpath.clone())),
        };
        Self {
            kind,
            branch: operation.branch().to_string(),
            nickname: operation.nickname().map(str::to_string),
            revision: operation.revision().clone(),
            target: operation.target().to_path_buf(),
            location,
            depth: operation.depth(),
            unchanged,
        }
    }

    fn pinned_branch(&self) -> RecipeBranch {
        RecipeBranch::new(self.branch.clone())
            .with_revspec(RevisionSpec::RevisionId(self.revision.to_string()))
    }
}

/// Everything a build did, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildManifest {
    /// Expanded version string, when the recipe had a template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Executed operations
    pub entries: Vec<ManifestEntry>,
}

impl BuildManifest {
    /// Create an empty manifest.
    pub fn new(version: Option<String>) -> Self {
        Self {
            version,
            entries: Vec::new(),
        }
    }

    /// The pinned recipe this manifest describes.
    ///
    /// Returns `None` when the manifest does not start with a checkout.
    pub fn to_recipe(&self) -> Option<Recipe> {
        let (first, rest) = self.entries.split_first()?;
        if first.kind != OperationKind::Checkout {
            return None;
        }

        let mut base = first.pinned_branch();
        base.attach_instructions(rest.iter().map(|entry| {
            let directive = match entry.kind {
                OperationKind::Nest => Directive::Nest {
                    location: entry
                        .location
                        .clone()
                        .unwrap_or_else(|| entry.target.display().to_string()),
                },
                _ => Directive::Merge,
            };
            let child = ChildBranch {
                nickname: entry.nickname.clone().unwrap_or_default(),
                directive,
                branch: entry.pinned_branch(),
            };
            (entry.depth, child)
        }));

        let header = Header {
            version_template: self.version.clone(),
            ..Header::default()
        };
        Some(Recipe { header, base })
    }

    /// Render as pinned recipe text.
    pub fn to_recipe_text(&self) -> Option<String> {
        self.to_recipe().map(|recipe| recipe::write_string(&recipe))
    }

    /// Write pinned recipe text to `path`, creating parent directories.
    pub fn write_recipe(&self, path: &Path) -> std::io::Result<()> {
        let recipe = self.to_recipe().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "manifest does not start with a checkout",
            )
        })?;
        recipe::write_file(&recipe, path)
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}
