//! Configuration loading for camel-store applications
//!
//! Provides utilities for loading configuration files from the shared
//! camel-store config directory (~/.config/camel-store/), plus the handful
//! of environment variables that tune the embedded database connection and
//! debug logging.
//!
//! Call [`init`] at application startup to bootstrap the config directory.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

/// Initialize the camel-store config directory.
///
/// Creates ~/.config/camel-store/ if it doesn't exist.
/// Call this once at application startup.
pub fn init() -> Result<PathBuf> {
    ensure_config_dir()
}

/// Get the camel-store config directory (~/.config/camel-store/)
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("camel-store"))
}

/// Get the path to a config file within the camel-store config directory
pub fn config_path(filename: &str) -> Option<PathBuf> {
    config_dir().map(|p| p.join(filename))
}

/// Load and parse a JSON config file from the camel-store config directory
pub fn load_json<T: DeserializeOwned>(filename: &str) -> Result<T> {
    let path = config_path(filename).context("Could not determine config directory")?;
    load_json_file(&path)
}

/// Load and parse a JSON file from an arbitrary path
pub fn load_json_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Check if a config file exists in the camel-store config directory
pub fn config_exists(filename: &str) -> bool {
    config_path(filename).is_some_and(|p| p.exists())
}

/// Ensure the camel-store config directory exists
pub fn ensure_config_dir() -> Result<PathBuf> {
    let dir = config_dir().context("Could not determine config directory")?;
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
    Ok(dir)
}

/// Save a value as JSON to a config file in the camel-store config directory
pub fn save_json<T: serde::Serialize>(filename: &str, value: &T) -> Result<()> {
    let dir = ensure_config_dir()?;
    let path = dir.join(filename);
    let content = serde_json::to_string_pretty(value)?;
    std::fs::write(&path, content)
        .with_context(|| format!("Failed to write config file: {}", path.display()))?;
    Ok(())
}

/// Debug tags recognized by `CAMEL_DEBUG` (comma-separated in the environment).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DebugTag {
    Sqlite,
    DbTime,
    DbTimeTs,
    Exception,
    Folder,
}

impl DebugTag {
    fn as_str(self) -> &'static str {
        match self {
            DebugTag::Sqlite => "sqlite",
            DebugTag::DbTime => "dbtime",
            DebugTag::DbTimeTs => "dbtimets",
            DebugTag::Exception => "exception",
            DebugTag::Folder => "folder",
        }
    }
}

/// Runtime tuning knobs read once from the environment.
///
/// Mirrors the handful of `CAMEL_SQLITE_*` / `CAMEL_DEBUG` variables that
/// influence the embedded database connection. None of these affect on-disk
/// format; they only tune caching, journaling, and diagnostic verbosity.
#[derive(Debug, Clone)]
pub struct EngineEnv {
    /// `CAMEL_SQLITE_DEFAULT_CACHE_SIZE` — cache pages for the DB connection.
    pub default_cache_size: Option<i64>,
    /// `CAMEL_SQLITE_IN_MEMORY` — disable journaling, use a memory temp store.
    pub in_memory_temp_store: bool,
    /// `CAMEL_SQLITE_FREE_CACHE` — if set, periodic cache release is disabled.
    pub free_cache_disabled: bool,
    /// `CAMEL_SQLITE_SHARED_CACHE` — enable sqlite's shared cache mode.
    pub shared_cache: bool,
    /// Raw `CAMEL_DEBUG` tags, lowercased.
    debug_tags: Vec<String>,
}

impl EngineEnv {
    /// Read the current process environment. Cheap; call it once and hold onto it.
    pub fn from_env() -> Self {
        let default_cache_size = std::env::var("CAMEL_SQLITE_DEFAULT_CACHE_SIZE")
            .ok()
            .and_then(|v| v.parse().ok());
        let in_memory_temp_store = env_flag("CAMEL_SQLITE_IN_MEMORY");
        let free_cache_disabled = env_flag("CAMEL_SQLITE_FREE_CACHE");
        let shared_cache = env_flag("CAMEL_SQLITE_SHARED_CACHE");
        let debug_tags = std::env::var("CAMEL_DEBUG")
            .unwrap_or_default()
            .split(':')
            .flat_map(|s| s.split(','))
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();

        Self {
            default_cache_size,
            in_memory_temp_store,
            free_cache_disabled,
            shared_cache,
            debug_tags,
        }
    }

    /// Whether a given debug tag was requested via `CAMEL_DEBUG`.
    pub fn debug(&self, tag: DebugTag) -> bool {
        self.debug_tags.iter().any(|t| t == tag.as_str())
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var_os(name).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_dir() {
        let dir = config_dir();
        assert!(dir.is_some());
        assert!(dir.unwrap().ends_with("camel-store"));
    }

    #[test]
    fn test_config_path() {
        let path = config_path("test.json");
        assert!(path.is_some());
        let path = path.unwrap();
        assert!(path.ends_with("camel-store/test.json"));
    }

    #[test]
    fn test_engine_env_defaults_are_off() {
        // SAFETY: test-only process-wide env mutation, no concurrent access in this test.
        unsafe {
            std::env::remove_var("CAMEL_SQLITE_DEFAULT_CACHE_SIZE");
            std::env::remove_var("CAMEL_SQLITE_IN_MEMORY");
            std::env::remove_var("CAMEL_DEBUG");
        }
        let env = EngineEnv::from_env();
        assert!(env.default_cache_size.is_none());
        assert!(!env.in_memory_temp_store);
        assert!(!env.debug(DebugTag::Sqlite));
    }

    #[test]
    fn test_debug_tags_parsed() {
        // SAFETY: test-only process-wide env mutation, no concurrent access in this test.
        unsafe {
            std::env::set_var("CAMEL_DEBUG", "sqlite:dbtime");
        }
        let env = EngineEnv::from_env();
        assert!(env.debug(DebugTag::Sqlite));
        assert!(env.debug(DebugTag::DbTime));
        assert!(!env.debug(DebugTag::Folder));
        // SAFETY: test-only process-wide env mutation, no concurrent access in this test.
        unsafe {
            std::env::remove_var("CAMEL_DEBUG");
        }
    }
}
