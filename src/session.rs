//! Build session - one recipe, one target directory.
//!
//! [`Builder`] ties the engine stages together: expand `{time}`, resolve,
//! short-circuit when nothing changed since a previous manifest, expand
//! revnos, plan, execute and write the manifest.

use crate::config::BuildConfig;
use crate::engine::{self, BuildManifest, ResolvedBranch};
use crate::error::{BuildError, Result};
use crate::progress::{LogProgress, ProgressCallback};
use chrono::{DateTime, Utc};
use recipe::version;
use recipe::{Recipe, RecipeBranch};
use std::path::{Path, PathBuf};
use vcs::{Backend, CancelToken, GitBackend, Retrying};

/// Per-build options.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Manifest of a previous build; skip the build if nothing changed
    pub if_changed_from: Option<PathBuf>,
    /// Where to write the manifest instead of `<target>/<manifest_name>`
    pub manifest_path: Option<PathBuf>,
    /// Cancel token; defaults to one honoring the configured timeout
    pub cancel: Option<CancelToken>,
    /// Build start time for `{time}`; defaults to now
    pub now: Option<DateTime<Utc>>,
}

/// Result of a build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    /// The tree was built
    Built {
        /// What was done
        manifest: BuildManifest,
        /// Where the manifest was written
        manifest_path: PathBuf,
    },
    /// Every revision matches the previous manifest; nothing was touched
    Unchanged,
}

/// Builds recipes with one backend and configuration.
pub struct Builder<B> {
    backend: B,
    config: BuildConfig,
}

impl Builder<Retrying<GitBackend>> {
    /// A git builder with retry, configured from `config`.
    pub fn git(config: BuildConfig) -> Result<Self> {
        let options = config
            .git
            .to_options()
            .map_err(|e| BuildError::Config(format!("{e:#}")))?;
        let backend = Retrying::new(GitBackend::new(options), config.retry.to_retry_config());
        Ok(Self::new(backend, config))
    }
}

impl<B: Backend> Builder<B> {
    /// Create a builder.
    pub fn new(backend: B, config: BuildConfig) -> Self {
        Self { backend, config }
    }

    /// The backend
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The configuration
    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Parse the recipe at `path` and build it into `target`.
    pub fn build_file(
        &self,
        path: &Path,
        target: &Path,
        options: &BuildOptions,
    ) -> Result<BuildOutcome> {
        let recipe = recipe::parse_file(path)?;
        self.build(&recipe, target, options)
    }

    /// Build `recipe` into `target`, logging progress.
    pub fn build(
        &self,
        recipe: &Recipe,
        target: &Path,
        options: &BuildOptions,
    ) -> Result<BuildOutcome> {
        self.build_with_progress(recipe, target, options, &mut LogProgress::default())
    }

    /// Build `recipe` into `target`, reporting to `progress`.
    pub fn build_with_progress<P: ProgressCallback>(
        &self,
        recipe: &Recipe,
        target: &Path,
        options: &BuildOptions,
        progress: &mut P,
    ) -> Result<BuildOutcome> {
        self.config.validate()?;
        let cancel = options
            .cancel
            .clone()
            .unwrap_or_else(|| self.config.cancel_token());
        let now = options.now.unwrap_or_else(Utc::now);

        let template = recipe
            .header
            .version_template
            .as_deref()
            .map(|t| version::substitute_time(t, &now));

        let resolved = engine::resolve(&recipe.base, &self.backend, &cancel, self.config.jobs)?;

        if let Some(previous) = &options.if_changed_from
            && unchanged_since(previous, &resolved)?
        {
            log::info!("Every branch matches {}, not building", previous.display());
            return Ok(BuildOutcome::Unchanged);
        }

        let version = template
            .map(|t| self.expand_revnos(&t, &resolved, &cancel))
            .transpose()?;
        if let Some(version) = &version {
            log::info!("Version {version}");
        }

        let plan = engine::plan(&resolved)?;
        let manifest = engine::execute(&plan, target, &self.backend, &cancel, version, progress)?;

        let manifest_path = options
            .manifest_path
            .clone()
            .unwrap_or_else(|| target.join(&self.config.manifest_name));
        manifest
            .write_recipe(&manifest_path)
            .map_err(|source| BuildError::Io {
                path: manifest_path.clone(),
                source,
            })?;
        log::debug!("Wrote manifest to {}", manifest_path.display());

        Ok(BuildOutcome::Built {
            manifest,
            manifest_path,
        })
    }

    fn expand_revnos(
        &self,
        template: &str,
        resolved: &ResolvedBranch,
        cancel: &CancelToken,
    ) -> Result<String> {
        let mut expanded = template.to_string();
        if version::needs_revno(&expanded, None) {
            let revno = self.revno_of(resolved, cancel)?;
            expanded = version::substitute_revno(&expanded, None, revno);
        }

        while let Some(placeholder) = version::unexpanded(&expanded) {
            let nickname = placeholder
                .strip_prefix("{revno:")
                .and_then(|rest| rest.strip_suffix('}'))
                .map(str::to_string)
                .ok_or_else(|| {
                    BuildError::Version(format!(
                        "unknown placeholder {placeholder} in '{template}'"
                    ))
                })?;
            let child = resolved.find(&nickname).ok_or_else(|| {
                BuildError::Version(format!(
                    "no branch named '{nickname}' in the recipe for '{template}'"
                ))
            })?;
            let revno = self.revno_of(&child.branch, cancel)?;
            expanded = version::substitute_revno(&expanded, Some(&nickname), revno);
        }
        Ok(expanded)
    }

    fn revno_of(&self, branch: &ResolvedBranch, cancel: &CancelToken) -> Result<u64> {
        match self.backend.revno(&branch.url, branch.id(), cancel) {
            Ok(Some(revno)) => Ok(revno),
            Ok(None) => Err(BuildError::Version(format!(
                "no revision number for {} in {}",
                branch.id().short(),
                branch.url
            ))),
            Err(vcs::Error::Cancelled) => Err(BuildError::Cancelled),
            Err(source) => Err(BuildError::Collaborator {
                branch: branch.url.clone(),
                source,
            }),
        }
    }
}

/// Whether the manifest at `previous` pins exactly the revisions in `resolved`.
///
/// A missing manifest counts as changed.
fn unchanged_since(previous: &Path, resolved: &ResolvedBranch) -> Result<bool> {
    if !previous.exists() {
        log::debug!("No previous manifest at {}", previous.display());
        return Ok(false);
    }
    let old = recipe::parse_file(previous)?;
    let current = resolved.pinned();
    Ok(!old.base.different_shape_to(&current) && same_revisions(&old.base, &current))
}

fn same_revisions(a: &RecipeBranch, b: &RecipeBranch) -> bool {
    let pinned = |branch: &RecipeBranch| branch.revspec.revision_id().map(str::to_string);
    pinned(a).is_some()
        && pinned(a) == pinned(b)
        && a.children
            .iter()
            .zip(&b.children)
            .all(|(x, y)| same_revisions(&x.branch, &y.branch))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use chrono::TimeZone;
    use recipe::RevisionSpec;
    use vcs::MemoryBackend;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, day, 12, 0, 0).unwrap()
    }

    fn backend() -> MemoryBackend {
        let backend = MemoryBackend::new();
        backend.commit("base", "b1", at(1), &[("README", "base")]);
        backend.commit("base", "b2", at(2), &[("main.c", "int main;")]);
        backend.commit("packaging", "p1", at(1), &[("debian/control", "Source: x")]);
        backend.commit("docs", "d1", at(1), &[("index.md", "docs")]);
        backend
    }

    fn sample_recipe(template: &str) -> Recipe {
        let mut base = RecipeBranch::new("base");
        base.merge("packaging", RecipeBranch::new("packaging"));
        base.nest("docs", "doc", RecipeBranch::new("docs"));
        Recipe::new(base).with_version_template(template)
    }

    fn options() -> BuildOptions {
        BuildOptions {
            now: Some(Utc.with_ymd_and_hms(2020, 1, 5, 15, 30, 0).unwrap()),
            ..BuildOptions::default()
        }
    }

    fn builder() -> Builder<MemoryBackend> {
        Builder::new(backend(), BuildConfig::default())
    }

    fn built(outcome: BuildOutcome) -> (BuildManifest, PathBuf) {
        match outcome {
            BuildOutcome::Built {
                manifest,
                manifest_path,
            } => (manifest, manifest_path),
            BuildOutcome::Unchanged => panic!("expected a build"),
        }
    }

    #[test]
    fn test_build_writes_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("tree");
        let recipe = sample_recipe("1.0+{revno}-{revno:packaging}~{time}");

        let outcome = builder()
            .build_with_progress(&recipe, &target, &options(), &mut NoProgress)
            .unwrap();
        let (manifest, path) = built(outcome);
        assert_eq!(path, target.join("recipe.manifest"));
        assert_eq!(manifest.version.as_deref(), Some("1.0+2-1~202001051530"));
        assert_eq!(manifest.entries.len(), 3);

        let written = recipe::parse_file(&path).unwrap();
        assert!(!written.different_shape_to(&recipe));
        assert_eq!(written.base.revspec, RevisionSpec::RevisionId("b2".into()));
        assert_eq!(
            written.header.version_template.as_deref(),
            Some("1.0+2-1~202001051530")
        );
    }

    #[test]
    fn test_manifest_path_override() {
        let dir = tempfile::tempdir().unwrap();
        let manifest_path = dir.path().join("out").join("pinned.recipe");
        let options = BuildOptions {
            manifest_path: Some(manifest_path.clone()),
            ..options()
        };

        let outcome = builder()
            .build(&sample_recipe("1.0"), &dir.path().join("tree"), &options)
            .unwrap();
        let (_, path) = built(outcome);
        assert_eq!(path, manifest_path);
        assert!(manifest_path.exists());
    }

    #[test]
    fn test_if_changed_from() {
        let dir = tempfile::tempdir().unwrap();
        let builder = builder();
        let recipe = sample_recipe("1.0+{revno}");

        let first = builder
            .build(&recipe, &dir.path().join("first"), &options())
            .unwrap();
        let (_, previous) = built(first);

        let again = BuildOptions {
            if_changed_from: Some(previous.clone()),
            ..options()
        };
        let second = dir.path().join("second");
        let outcome = builder.build(&recipe, &second, &again).unwrap();
        assert_eq!(outcome, BuildOutcome::Unchanged);
        assert!(builder.backend().tree(&second).is_none());

        builder
            .backend()
            .commit("packaging", "p2", at(3), &[("debian/rules", "#!/usr/bin/make -f")]);
        let (manifest, _) = built(builder.build(&recipe, &second, &again).unwrap());
        assert_eq!(manifest.entries[1].revision.as_str(), "p2");
    }

    #[test]
    fn test_if_changed_from_missing_manifest_builds() {
        let dir = tempfile::tempdir().unwrap();
        let options = BuildOptions {
            if_changed_from: Some(dir.path().join("absent.manifest")),
            ..options()
        };
        let outcome = builder()
            .build(&sample_recipe("1.0"), &dir.path().join("tree"), &options)
            .unwrap();
        assert!(matches!(outcome, BuildOutcome::Built { .. }));
    }

    #[test]
    fn test_changed_shape_builds() {
        let dir = tempfile::tempdir().unwrap();
        let builder = builder();
        let first = builder
            .build(&sample_recipe("1.0"), &dir.path().join("first"), &options())
            .unwrap();
        let (_, previous) = built(first);

        let mut base = RecipeBranch::new("base");
        base.merge("packaging", RecipeBranch::new("packaging"));
        let options = BuildOptions {
            if_changed_from: Some(previous),
            ..options()
        };
        let outcome = builder
            .build(&Recipe::new(base), &dir.path().join("second"), &options)
            .unwrap();
        assert!(matches!(outcome, BuildOutcome::Built { .. }));
    }

    #[test]
    fn test_unknown_revno_nickname() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("tree");
        let builder = builder();
        let err = builder
            .build(&sample_recipe("1.0+{revno:artwork}"), &target, &options())
            .unwrap_err();
        assert!(matches!(err, BuildError::Version(ref msg) if msg.contains("artwork")));
        assert!(builder.backend().tree(&target).is_none());
    }

    #[test]
    fn test_unknown_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let err = builder()
            .build(&sample_recipe("1.0+{debupstream}"), &dir.path().join("tree"), &options())
            .unwrap_err();
        assert!(matches!(err, BuildError::Version(ref msg) if msg.contains("{debupstream}")));
    }

    #[test]
    fn test_build_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.recipe");
        std::fs::write(
            &path,
            "# git-build-recipe format 0.4 deb-version {revno}\n\
             base revid:b1\n\
             merge packaging packaging\n",
        )
        .unwrap();

        let outcome = builder()
            .build_file(&path, &dir.path().join("tree"), &options())
            .unwrap();
        let (manifest, _) = built(outcome);
        assert_eq!(manifest.version.as_deref(), Some("1"));
        assert_eq!(manifest.entries[0].revision.as_str(), "b1");
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = BuildConfig {
            jobs: 0,
            ..BuildConfig::default()
        };
        let builder = Builder::new(backend(), config);
        let dir = tempfile::tempdir().unwrap();
        let err = builder.build(&sample_recipe("1.0"), dir.path(), &options()).unwrap_err();
        assert!(matches!(err, BuildError::Config(_)));
    }

    #[test]
    fn test_cancelled_before_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let options = BuildOptions {
            cancel: Some(cancel),
            ..options()
        };
        let err = builder().build(&sample_recipe("1.0"), dir.path(), &options).unwrap_err();
        assert!(matches!(err, BuildError::Cancelled));
    }
}
