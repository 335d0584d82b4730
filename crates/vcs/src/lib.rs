//! # vcs
//!
//! Version control capability used by the recipe builder.
//!
//! The [`Backend`] trait covers the handful of operations a build needs:
//! resolving tips, tags, revision ids and dates to immutable
//! [`RevisionId`]s, checking a branch out into a working tree, and merging
//! another branch into it.
//!
//! ## Example
//!
//! ```
//! use chrono::Utc;
//! use std::path::Path;
//! use vcs::{Backend, CancelToken, MemoryBackend};
//!
//! let backend = MemoryBackend::new();
//! backend.commit("lp:base", "r1", Utc::now(), &[("README", "hello")]);
//!
//! let cancel = CancelToken::new();
//! let tip = backend.branch_tip("lp:base", &cancel).unwrap();
//! backend.checkout("lp:base", &tip, Path::new("/build"), &cancel).unwrap();
//! assert_eq!(backend.tree(Path::new("/build")).unwrap().files["README"], "hello");
//! ```
//!
//! ## Retry Logic
//!
//! Network errors can be retried with exponential backoff by wrapping a
//! backend in [`Retrying`]. Nothing else retries.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod cancel;
pub mod error;
pub mod retry;
pub mod types;

pub use backend::Backend;
pub use backend::git::{GitBackend, GitOptions};
pub use backend::memory::MemoryBackend;
pub use cancel::CancelToken;
pub use error::{Error, ErrorCategory, Result};
pub use retry::{LogCallback, NoCallback, RetryCallback, Retrying, with_retry};
pub use types::{MergeOutcome, RetryConfig, RevisionId};
