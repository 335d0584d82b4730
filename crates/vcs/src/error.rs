//! Error types for version control operations.
//!
//! Errors are categorized so that a retry policy can tell transient
//! failures (network) from permanent ones. The recipe builder itself
//! never retries; only [`crate::retry`] looks at categories.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Categories of VCS errors for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Network-related errors (transient, retryable)
    Network,
    /// Branch or revision does not exist
    NotFound,
    /// Merge produced conflicts
    Conflict,
    /// Permission denied
    Permission,
    /// The caller cancelled the operation or its deadline passed
    Cancelled,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Whether this error category is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network)
    }

    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Network => "Network connectivity issue",
            Self::NotFound => "Branch or revision not found",
            Self::Conflict => "Merge conflict",
            Self::Permission => "Permission denied",
            Self::Cancelled => "Cancelled",
            Self::Other => "Unexpected error",
        }
    }
}

/// Errors that can occur during VCS operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Network-related error (connection, timeout, DNS, etc.)
    #[error("network error: {message}")]
    Network {
        /// Detailed error message from the failed network operation
        message: String,
    },

    /// The branch does not exist or cannot be opened
    #[error("branch not found: {branch}")]
    BranchNotFound {
        /// Branch location
        branch: String,
    },

    /// A revision specifier did not resolve in the branch
    #[error("revision {spec} not found in {branch}")]
    RevisionNotFound {
        /// Branch location
        branch: String,
        /// The specifier that failed, as written in a recipe
        spec: String,
    },

    /// A merge left unresolved conflicts
    #[error("merging {branch} conflicted in {}", join_paths(.paths))]
    Conflict {
        /// Branch being merged
        branch: String,
        /// Conflicting paths, relative to the working tree
        paths: Vec<PathBuf>,
    },

    /// Permission denied
    #[error("permission denied: {message}")]
    Permission {
        /// Details about what permission was denied
        message: String,
    },

    /// The operation was cancelled before or while running
    #[error("operation cancelled")]
    Cancelled,

    /// No working tree has been checked out at the path
    #[error("no working tree at {}", .0.display())]
    NoWorkingTree(PathBuf),

    /// Command execution failed
    #[error("command failed: {message}")]
    CommandFailed {
        /// Description of what command failed
        message: String,
        /// Standard error output from the failed command
        stderr: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl Error {
    /// Get the error category for retry logic.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Network { .. } => ErrorCategory::Network,
            Error::BranchNotFound { .. } | Error::RevisionNotFound { .. } => {
                ErrorCategory::NotFound
            }
            Error::Conflict { .. } => ErrorCategory::Conflict,
            Error::Permission { .. } => ErrorCategory::Permission,
            Error::Cancelled => ErrorCategory::Cancelled,
            _ => ErrorCategory::Other,
        }
    }

    /// Whether this error is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Create an error from git's stderr.
    ///
    /// Analyzes stderr to categorize the error appropriately.
    pub fn from_git_output(stderr: &str, branch: &str, cwd: Option<&Path>) -> Self {
        let stderr_lower = stderr.to_lowercase();

        if stderr_lower.contains("could not resolve host")
            || stderr_lower.contains("connection refused")
            || stderr_lower.contains("connection reset")
            || stderr_lower.contains("timed out")
            || stderr_lower.contains("unable to access")
            || stderr_lower.contains("early eof")
            || stderr_lower.contains("the remote end hung up")
        {
            return Error::Network {
                message: stderr.trim().to_string(),
            };
        }

        if stderr_lower.contains("permission denied") {
            return Error::Permission {
                message: stderr.trim().to_string(),
            };
        }

        if stderr_lower.contains("repository not found")
            || stderr_lower.contains("does not appear to be a git repository")
            || stderr_lower.contains("does not exist")
        {
            return Error::BranchNotFound {
                branch: branch.to_string(),
            };
        }

        Error::CommandFailed {
            message: match cwd {
                Some(dir) => format!("git failed for {branch} in {}", dir.display()),
                None => format!("git failed for {branch}"),
            },
            stderr: stderr.trim().to_string(),
        }
    }
}

/// Result type for VCS operations.
pub type Result<T> = std::result::Result<T, Error>;
