//! Build configuration.
//!
//! Loaded from `config.toml` in the config directory (see [`crate::paths`])
//! or from any TOML or JSON file given explicitly. Every field has a
//! default, so a missing file or a partial one is fine.
//!
//! ```toml
//! jobs = 8
//! timeout_secs = 1800
//! manifest_name = "debian/recipe.manifest"
//!
//! [retry]
//! max_attempts = 5
//! initial_delay_ms = 1000
//! backoff_multiplier = 2.0
//!
//! [git]
//! cache_dir = "~/.cache/recipebuild"
//! committer_name = "Recipe Builder"
//! committer_email = "builder@example.com"
//! ```

use crate::error::{BuildError, Result as BuildResult};
use crate::paths;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use vcs::{CancelToken, GitOptions, RetryConfig};

/// Name of the config file inside the config directory
pub const CONFIG_FILE: &str = "config.toml";

/// Default name of the manifest written into the build root
pub const DEFAULT_MANIFEST_NAME: &str = "recipe.manifest";

/// Settings for a build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Parallel revision lookups
    pub jobs: usize,
    /// Give up on the whole build after this many seconds
    pub timeout_secs: Option<u64>,
    /// Manifest path relative to the build root
    pub manifest_name: String,
    /// Retry of network failures
    pub retry: RetrySettings,
    /// Git backend settings
    pub git: GitSettings,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            jobs: 4,
            timeout_secs: None,
            manifest_name: DEFAULT_MANIFEST_NAME.to_string(),
            retry: RetrySettings::default(),
            git: GitSettings::default(),
        }
    }
}

/// Retry settings for network failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Attempts per backend call, including the first (1 disables retry)
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay_ms: u64,
    /// Multiplier applied to the delay after each retry
    pub backoff_multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 2000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetrySettings {
    /// Convert to the backend retry configuration.
    pub fn to_retry_config(&self) -> RetryConfig {
        RetryConfig::new(
            self.max_attempts,
            Duration::from_millis(self.initial_delay_ms),
            self.backoff_multiplier,
        )
    }
}

/// Settings for the git backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitSettings {
    /// The `git` executable
    pub binary: String,
    /// Mirror directory; defaults to the recipebuild cache directory
    pub cache_dir: Option<String>,
    /// Committer name for merge commits
    pub committer_name: String,
    /// Committer email for merge commits
    pub committer_email: String,
}

impl Default for GitSettings {
    fn default() -> Self {
        let defaults = GitOptions::default();
        Self {
            binary: "git".to_string(),
            cache_dir: None,
            committer_name: defaults.committer_name,
            committer_email: defaults.committer_email,
        }
    }
}

impl GitSettings {
    /// Convert to backend options, expanding `~` and environment variables.
    pub fn to_options(&self) -> Result<GitOptions> {
        let cache_dir = match &self.cache_dir {
            Some(dir) => paths::expand(dir),
            None => paths::cache_dir()?,
        };
        Ok(GitOptions {
            binary: paths::expand(&self.binary),
            cache_dir,
            committer_name: self.committer_name.clone(),
            committer_email: self.committer_email.clone(),
        })
    }
}

impl BuildConfig {
    /// Path of the default config file
    pub fn default_path() -> Result<PathBuf> {
        Ok(paths::config_dir()?.join(CONFIG_FILE))
    }

    /// Load the default config file, or defaults if it does not exist
    pub fn load() -> Result<Self> {
        let path = Self::default_path()?;
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load a TOML or JSON config file (by extension)
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;

        let config: Self = if is_json(path) {
            serde_json::from_str(&content)
                .with_context(|| format!("Invalid JSON in {}", path.display()))?
        } else {
            toml::from_str(&content)
                .with_context(|| format!("Invalid TOML in {}", path.display()))?
        };

        config
            .validate()
            .with_context(|| format!("Invalid config in {}", path.display()))?;
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Save as TOML or JSON (by extension), creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = if is_json(path) {
            serde_json::to_string_pretty(self)?
        } else {
            toml::to_string_pretty(self)?
        };
        fs::write(path, content).with_context(|| format!("Could not write {}", path.display()))
    }

    /// Check values that deserialize fine but cannot work
    pub fn validate(&self) -> BuildResult<()> {
        if self.jobs == 0 {
            return Err(BuildError::Config("jobs must be at least 1".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(BuildError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(BuildError::Config(
                "retry.backoff_multiplier must be at least 1.0".to_string(),
            ));
        }
        let manifest = Path::new(&self.manifest_name);
        if self.manifest_name.is_empty()
            || !manifest
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(BuildError::Config(format!(
                "manifest_name '{}' must be a relative path inside the build root",
                self.manifest_name
            )));
        }
        Ok(())
    }

    /// A cancel token honoring `timeout_secs`
    pub fn cancel_token(&self) -> CancelToken {
        match self.timeout_secs {
            Some(secs) => CancelToken::with_timeout(Duration::from_secs(secs)),
            None => CancelToken::new(),
        }
    }
}

fn is_json(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "json")
}
