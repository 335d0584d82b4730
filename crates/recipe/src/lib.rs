//! # recipe
//!
//! Parsing and writing of build recipes.
//!
//! A recipe names a base branch and a list of branches to combine with
//! it, each either *merged* into the tree or *nested* (checked out
//! independently) at a path inside it, optionally at a chosen revision.
//!
//! ## Example
//!
//! ```
//! use recipe::{parse_string, write_string, Directive};
//!
//! let text = "\
//! ## git-build-recipe format 0.4 deb-version 1.0+{revno}
//! https://example.com/base.git
//! merge packaging https://example.com/packaging.git tag:1.0
//! nest docs https://example.com/docs.git doc
//! ";
//!
//! let recipe = parse_string(text).unwrap();
//! assert_eq!(recipe.base.children.len(), 2);
//! assert_eq!(recipe.base.children[1].directive, Directive::Nest { location: "doc".into() });
//!
//! assert_eq!(write_string(&recipe), text);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod parser;
pub mod types;
pub mod version;
pub mod writer;

pub use error::{Error, ParseError, Result};
pub use parser::{parse_file, parse_named, parse_string};
pub use types::{
    CURRENT_FORMAT, ChildBranch, Directive, Header, Recipe, RecipeBranch, RevisionSpec,
};
pub use writer::{write_file, write_string};
