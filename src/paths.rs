//! Path resolution for recipebuild
//!
//! # Environment Variables
//!
//! - `RECIPEBUILD_CONFIG_DIR` - Override config directory
//! - `RECIPEBUILD_CACHE_DIR` - Override the directory holding branch mirrors
//!
//! # Path Resolution Priority
//!
//! For config_dir():
//! 1. `RECIPEBUILD_CONFIG_DIR` environment variable
//! 2. `XDG_CONFIG_HOME/recipebuild` (if set)
//! 3. Platform config directory + `recipebuild`
//!
//! For cache_dir():
//! 1. `RECIPEBUILD_CACHE_DIR` environment variable
//! 2. `XDG_CACHE_HOME/recipebuild` (if set)
//! 3. Platform cache directory + `recipebuild`

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Environment variable for config directory override
pub const ENV_CONFIG_DIR: &str = "RECIPEBUILD_CONFIG_DIR";

/// Environment variable for cache directory override
pub const ENV_CACHE_DIR: &str = "RECIPEBUILD_CACHE_DIR";

const APP_DIR: &str = "recipebuild";

/// Get the recipebuild config directory path
pub fn config_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_CONFIG_DIR) {
        let path = expand(&dir);
        log::debug!("Using config dir from {}: {}", ENV_CONFIG_DIR, path.display());
        return Ok(path);
    }

    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        let path = PathBuf::from(xdg_config).join(APP_DIR);
        log::debug!("Using XDG_CONFIG_HOME: {}", path.display());
        return Ok(path);
    }

    let base = dirs::config_dir().context("Could not determine config directory")?;
    let path = base.join(APP_DIR);
    log::debug!("Using default config dir: {}", path.display());
    Ok(path)
}

/// Get the directory holding branch mirrors
pub fn cache_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_CACHE_DIR) {
        let path = expand(&dir);
        log::debug!("Using cache dir from {}: {}", ENV_CACHE_DIR, path.display());
        return Ok(path);
    }

    if let Ok(xdg_cache) = std::env::var("XDG_CACHE_HOME") {
        return Ok(PathBuf::from(xdg_cache).join(APP_DIR));
    }

    let base = dirs::cache_dir().context("Could not determine cache directory")?;
    Ok(base.join(APP_DIR))
}

/// Expand ~ and environment variables in a path string.
///
/// # Examples
///
/// ```
/// use recipebuild::paths;
///
/// let home_path = paths::expand("~/recipes");
/// assert!(!home_path.starts_with("~"));
/// ```
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    /// Helper to run a test with temporary env var
    ///
    /// # Safety
    /// This function uses unsafe env::set_var/remove_var which can cause issues
    /// if other threads read environment variables concurrently.
    /// Only use in single-threaded test contexts.
    fn with_env_var<F, R>(key: &str, value: &str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let original = env::var(key).ok();
        // SAFETY: each test uses its own variable
        unsafe { env::set_var(key, value) };
        let result = f();
        match original {
            // SAFETY: as above
            Some(v) => unsafe { env::set_var(key, v) },
            None => unsafe { env::remove_var(key) },
        }
        result
    }

    #[test]
    fn test_config_dir_env_override() {
        with_env_var(ENV_CONFIG_DIR, "/custom/recipebuild", || {
            assert_eq!(config_dir().unwrap(), PathBuf::from("/custom/recipebuild"));
        });
    }

    #[test]
    fn test_cache_dir_env_override_expands_tilde() {
        let home = dirs::home_dir().unwrap();
        with_env_var(ENV_CACHE_DIR, "~/mirrors-test", || {
            assert_eq!(cache_dir().unwrap(), home.join("mirrors-test"));
        });
    }

    #[test]
    fn test_expand_plain_path() {
        assert_eq!(expand("/srv/recipes"), PathBuf::from("/srv/recipes"));
    }
}
