//! Configuration management for ttlens.
//!
//! Configuration is loaded from multiple sources in priority order:
//! 1. Environment variables (TTLENS_REMOTE, etc.)
//! 2. Project-local config file (`./ttlens.toml`)
//! 3. User config file (`~/.config/ttlens/config.toml`)
//! 4. Built-in defaults
//!
//! # Config File Format
//!
//! ```toml
//! # ttlens.toml
//!
//! # Debug server to connect to instead of local hardware
//! remote = "localhost:5555"
//!
//! # Record every read into this file, or replay it without a device
//! cache_path = "session.json"
//! cache_mode = "record"
//!
//! [debug]
//! poll_timeout_ms = 1000
//! verify_continue = true
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use crate::comm::CacheMode;
use crate::debug::DebugConfig;

/// Global cached configuration.
static CONFIG: OnceLock<Config> = OnceLock::new();

/// Debug engine tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DebugSection {
    /// Upper bound on every halt and read-valid wait.
    pub poll_timeout_ms: Option<u64>,

    /// Whether `continue` checks that the core actually left the halted state.
    pub verify_continue: Option<bool>,
}

/// ttlens configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// `host:port` of a debug server. Unset means local hardware.
    pub remote: Option<String>,

    /// Cache file used for recording or replay.
    pub cache_path: Option<String>,

    /// What to do with `cache_path`. Defaults to replay when only a path is given.
    pub cache_mode: Option<CacheMode>,

    pub debug: DebugSection,
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. Project-local `ttlens.toml`
    /// 3. User config `~/.config/ttlens/config.toml`
    /// 4. Defaults
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(user_config) = Self::load_user_config() {
            config.merge(user_config);
        }

        if let Some(local_config) = Self::load_local_config() {
            config.merge(local_config);
        }

        config.apply_env_overrides();

        config
    }

    /// Get the cached global configuration.
    ///
    /// Loads configuration on first call and caches it.
    pub fn get() -> &'static Config {
        CONFIG.get_or_init(|| {
            let config = Self::load();
            log::debug!("Loaded configuration: {:?}", config);
            config
        })
    }

    /// Effective cache mode: explicit mode, else replay when a path is set.
    pub fn cache_mode(&self) -> Option<CacheMode> {
        match (&self.cache_path, self.cache_mode) {
            (None, _) => None,
            (Some(_), Some(mode)) => Some(mode),
            (Some(_), None) => Some(CacheMode::Replay),
        }
    }

    /// Debug engine settings, with defaults for anything unset.
    pub fn debug_config(&self) -> DebugConfig {
        let defaults = DebugConfig::default();
        DebugConfig {
            poll_timeout: self
                .debug
                .poll_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_timeout),
            verify_continue: self.debug.verify_continue.unwrap_or(defaults.verify_continue),
        }
    }

    /// Load user configuration from ~/.config/ttlens/config.toml
    fn load_user_config() -> Option<Self> {
        let config_path = Self::user_config_path()?;
        Self::load_from_file(&config_path)
    }

    /// Load project-local configuration from ./ttlens.toml
    fn load_local_config() -> Option<Self> {
        Self::load_from_file(Path::new("ttlens.toml"))
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    log::info!("Loaded config from {}", path.display());
                    Some(config)
                }
                Err(e) => {
                    log::warn!("Failed to parse {}: {}", path.display(), e);
                    None
                }
            },
            Err(e) => {
                log::warn!("Failed to read {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Merge another config into this one.
    /// Only overrides fields that are Some in the other config.
    fn merge(&mut self, other: Self) {
        if other.remote.is_some() {
            self.remote = other.remote;
        }
        if other.cache_path.is_some() {
            self.cache_path = other.cache_path;
        }
        if other.cache_mode.is_some() {
            self.cache_mode = other.cache_mode;
        }
        if other.debug.poll_timeout_ms.is_some() {
            self.debug.poll_timeout_ms = other.debug.poll_timeout_ms;
        }
        if other.debug.verify_continue.is_some() {
            self.debug.verify_continue = other.debug.verify_continue;
        }
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(remote) = std::env::var("TTLENS_REMOTE") {
            log::info!("Using TTLENS_REMOTE from environment: {}", remote);
            self.remote = Some(remote);
        }
        if let Ok(path) = std::env::var("TTLENS_CACHE") {
            log::info!("Using TTLENS_CACHE from environment: {}", path);
            self.cache_path = Some(path);
        }
        if let Ok(mode) = std::env::var("TTLENS_CACHE_MODE") {
            match mode.parse::<CacheMode>() {
                Ok(mode) => self.cache_mode = Some(mode),
                Err(e) => log::warn!("Ignoring TTLENS_CACHE_MODE: {}", e),
            }
        }
        if let Ok(ms) = std::env::var("TTLENS_POLL_TIMEOUT_MS") {
            match ms.parse::<u64>() {
                Ok(ms) => self.debug.poll_timeout_ms = Some(ms),
                Err(e) => log::warn!("Ignoring TTLENS_POLL_TIMEOUT_MS={}: {}", ms, e),
            }
        }
    }

    /// Get the path to the user config file (for display/creation).
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("ttlens").join("config.toml"))
    }

    /// Generate a sample config file content.
    pub fn sample_config() -> String {
        r#"# ttlens configuration
# Place this file at ~/.config/ttlens/config.toml or ./ttlens.toml

# Debug server to connect to (default: local hardware)
# remote = "localhost:5555"

# Cache file; "record" saves every read, "replay" runs without a device
# cache_path = "session.json"
# cache_mode = "record"

[debug]
# Upper bound on halt and debug-port waits
poll_timeout_ms = 1000

# Check that continue actually resumed the core
verify_continue = true
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_debug_config() {
        let config = Config::default();
        assert_eq!(config.debug_config(), DebugConfig::default());
        assert_eq!(config.cache_mode(), None);
    }

    #[test]
    fn test_config_merge() {
        let mut base = Config {
            remote: Some("base:5555".to_string()),
            cache_path: None,
            cache_mode: Some(CacheMode::Record),
            debug: DebugSection { poll_timeout_ms: Some(500), verify_continue: None },
        };

        let overlay = Config {
            remote: None,
            cache_path: Some("overlay.json".to_string()),
            cache_mode: None,
            debug: DebugSection { poll_timeout_ms: Some(50), verify_continue: Some(false) },
        };

        base.merge(overlay);

        // remote unchanged (overlay was None)
        assert_eq!(base.remote, Some("base:5555".to_string()));
        assert_eq!(base.cache_path, Some("overlay.json".to_string()));
        assert_eq!(base.cache_mode, Some(CacheMode::Record));
        assert_eq!(base.debug.poll_timeout_ms, Some(50));
        assert_eq!(base.debug.verify_continue, Some(false));
    }

    #[test]
    fn test_cache_mode_defaults_to_replay() {
        let config = Config { cache_path: Some("s.json".into()), ..Config::default() };
        assert_eq!(config.cache_mode(), Some(CacheMode::Replay));
    }

    #[test]
    fn test_sample_config_parses() {
        let sample = Config::sample_config();
        let config: Config = toml::from_str(&sample).expect("Sample config should parse");
        assert_eq!(config.debug_config().poll_timeout, Duration::from_millis(1000));
        assert!(config.debug_config().verify_continue);
    }

    #[test]
    fn test_parse_full_file() {
        let config: Config = toml::from_str(
            r#"
remote = "dbg-host:6000"
cache_path = "run.json"
cache_mode = "record"
[debug]
poll_timeout_ms = 20
"#,
        )
        .unwrap();
        assert_eq!(config.remote.as_deref(), Some("dbg-host:6000"));
        assert_eq!(config.cache_mode(), Some(CacheMode::Record));
        assert_eq!(config.debug_config().poll_timeout, Duration::from_millis(20));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ttlens.toml");
        std::fs::write(&path, "remote = \"h:1\"\n").unwrap();
        assert_eq!(Config::load_from_file(&path).unwrap().remote.as_deref(), Some("h:1"));

        std::fs::write(&path, "remote = [").unwrap();
        assert!(Config::load_from_file(&path).is_none());
        assert!(Config::load_from_file(&dir.path().join("missing.toml")).is_none());
    }
}
