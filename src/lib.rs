//! # recipebuild
//!
//! Builds a source tree from a recipe: a base branch plus branches merged
//! into it or nested inside it, each at a chosen revision.
//!
//! A build resolves every revision first, plans the operations, runs them
//! in order against a [`vcs::Backend`] and writes a manifest: the same
//! recipe with every revision pinned.
//!
//! ## Example
//!
//! ```
//! use recipebuild::{BuildConfig, BuildOptions, BuildOutcome, Builder};
//! use chrono::Utc;
//! use vcs::MemoryBackend;
//!
//! let backend = MemoryBackend::new();
//! backend.commit("https://example.com/app.git", "a1", Utc::now(), &[("main.c", "int main;")]);
//! backend.commit(
//!     "https://example.com/packaging.git",
//!     "p1",
//!     Utc::now(),
//!     &[("debian/control", "Source: app")],
//! );
//!
//! let recipe = recipe::parse_string("\
//! ## git-build-recipe format 0.4 deb-version 1.0+{revno}
//! https://example.com/app.git
//! merge packaging https://example.com/packaging.git
//! ").unwrap();
//!
//! let dir = tempfile::tempdir().unwrap();
//! let builder = Builder::new(backend, BuildConfig::default());
//! let outcome = builder
//!     .build(&recipe, &dir.path().join("app"), &BuildOptions::default())
//!     .unwrap();
//!
//! let BuildOutcome::Built { manifest, .. } = outcome else { panic!() };
//! assert_eq!(manifest.version.as_deref(), Some("1.0+1"));
//! assert_eq!(manifest.entries.len(), 2);
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod paths;
pub mod progress;
pub mod session;

pub use config::BuildConfig;
pub use engine::{BuildManifest, BuildPlan, ManifestEntry, Operation, OperationKind};
pub use error::{BuildError, PlanError, Result};
pub use progress::{LogProgress, NoProgress, ProgressCallback, StepOutcome};
pub use session::{BuildOptions, BuildOutcome, Builder};
