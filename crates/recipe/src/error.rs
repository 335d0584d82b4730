//! Error types for recipe parsing.
//!
//! Parse failures carry the file name and a 1-indexed line and column
//! pointing at the token that could not be accepted, so a user can fix
//! the recipe text without guessing.

use std::path::PathBuf;
use thiserror::Error;

/// A recipe could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("error parsing {filename}:{line}:{column}: {problem}")]
pub struct ParseError {
    /// Name of the recipe being parsed (`recipe` when unknown)
    pub filename: String,
    /// Line of the offending token (1-indexed)
    pub line: usize,
    /// Column of the offending token (1-indexed)
    pub column: usize,
    /// Description of what was wrong
    pub problem: String,
}

/// Errors that can occur while loading a recipe.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid recipe syntax
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// The recipe file could not be read
    #[error("could not read recipe {}: {source}", .path.display())]
    Read {
        /// Path that was being read
        path: PathBuf,
        /// Underlying IO error
        source: std::io::Error,
    },
}

/// Result type for recipe operations.
pub type Result<T> = std::result::Result<T, Error>;
