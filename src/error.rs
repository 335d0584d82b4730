//! Error types for a build.
//!
//! Parse and plan errors are pure: nothing has been touched when they are
//! returned. Resolution and execution errors may leave a partially built
//! tree behind; it is left in place for the caller to inspect.

use std::path::PathBuf;
use thiserror::Error;

/// The recipe tree violates a structural rule.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    /// Two sibling nest instructions target the same location
    #[error("nest location '{location}' is used by both '{first}' and '{second}'")]
    DuplicateNestLocation {
        /// Normalized location
        location: String,
        /// Nickname of the first instruction using it
        first: String,
        /// Nickname of the second instruction using it
        second: String,
    },

    /// A nest location does not name a directory inside its parent tree
    #[error("malformed nesting of '{nickname}' at '{location}': {reason}")]
    MalformedNesting {
        /// Nickname of the nest instruction
        nickname: String,
        /// Location as written
        location: String,
        /// What is wrong with it
        reason: &'static str,
    },
}

/// Errors that can occur while building a recipe.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The recipe could not be read or parsed
    #[error(transparent)]
    Recipe(#[from] recipe::Error),

    /// A revision specifier did not resolve
    #[error("revision {spec} not found in {branch}")]
    RevisionNotFound {
        /// Branch location
        branch: String,
        /// The specifier as written in the recipe
        spec: String,
    },

    /// The recipe tree cannot be turned into a plan
    #[error("invalid recipe structure: {0}")]
    Plan(#[from] PlanError),

    /// A merge left conflicts
    #[error("operation {index}: merging {branch} conflicted in {}", join_paths(.paths))]
    Conflict {
        /// Index of the failing operation in the plan
        index: usize,
        /// Branch being merged
        branch: String,
        /// Conflicting paths, relative to the merged tree
        paths: Vec<PathBuf>,
    },

    /// An operation failed in the version control backend
    #[error("operation {index} on {branch} failed: {source}")]
    Operation {
        /// Index of the failing operation in the plan
        index: usize,
        /// Branch of the failing operation
        branch: String,
        /// Backend error
        source: vcs::Error,
    },

    /// A lookup failed in the version control backend
    #[error("looking up {branch} failed: {source}")]
    Collaborator {
        /// Branch being looked up
        branch: String,
        /// Backend error
        source: vcs::Error,
    },

    /// The build was cancelled between or during operations
    #[error("build cancelled {}", describe_progress(.last_completed))]
    PartialBuild {
        /// Index of the last operation that completed, if any did
        last_completed: Option<usize>,
    },

    /// The build was cancelled before any operation ran
    #[error("build cancelled while resolving revisions")]
    Cancelled,

    /// The version template could not be expanded
    #[error("cannot expand version: {0}")]
    Version(String),

    /// Filesystem error outside the backend
    #[error("{}: {source}", .path.display())]
    Io {
        /// Path being accessed
        path: PathBuf,
        /// Underlying IO error
        source: std::io::Error,
    },

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn describe_progress(last_completed: &Option<usize>) -> String {
    match last_completed {
        Some(index) => format!("after operation {index}"),
        None => "before the first operation".to_string(),
    }
}

/// Result type for builds.
pub type Result<T> = std::result::Result<T, BuildError>;
