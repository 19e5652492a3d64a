//! Configuration management.

use crate::error::{KilnError, Result};
use crate::paths;
use crate::types::build_config::BuildConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Persistent configuration for kiln.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Cache import specs, e.g. `type=registry,ref=user/app:cache`
    pub cache_from: Vec<String>,
    /// Cache export specs, e.g. `type=registry,ref=user/app:cache,mode=max`
    pub cache_to: Vec<String>,
    /// Architectures used when a template names none.
    pub default_architectures: Vec<String>,
    /// Default log level (`error`, `warn`, `info`, `debug`, `trace`).
    pub log_level: String,
    pub ami: AmiConfig,
}

/// Defaults for AMI component generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AmiConfig {
    /// PowerShell execution policy applied when a provisioner sets none.
    pub execution_policy: String,
    /// Prefix prepended to component names.
    pub component_prefix: String,
}

impl Default for AmiConfig {
    fn default() -> Self {
        Self { execution_policy: "Bypass".to_string(), component_prefix: String::new() }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_from: Vec::new(),
            cache_to: Vec::new(),
            default_architectures: vec!["amd64".to_string()],
            log_level: "info".to_string(),
            ami: AmiConfig::default(),
        }
    }
}

impl Config {
    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        paths::config_dir().join("config.json")
    }

    /// Load configuration from the default location.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, falling back to defaults when it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| KilnError::InvalidConfig {
            reason: format!("Failed to read config: {}", e),
        })?;
        serde_json::from_str(&content).map_err(|e| KilnError::InvalidConfig {
            reason: format!("Failed to parse config: {}", e),
        })
    }

    /// Configured log level, `info` when unset or unrecognized.
    pub fn tracing_level(&self) -> tracing::Level {
        self.log_level.parse().unwrap_or(tracing::Level::INFO)
    }

    /// Fill template fields the template leaves empty from these settings.
    pub fn apply_defaults(&self, template: &mut BuildConfig) {
        if template.architectures.is_empty() && !self.default_architectures.is_empty() {
            debug!(architectures = ?self.default_architectures, "Using default architectures");
            template.architectures = self.default_architectures.clone();
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| KilnError::IoError { path: parent.to_path_buf(), source: e })?;
        }
        let content = serde_json::to_string_pretty(self).map_err(|e| KilnError::InvalidConfig {
            reason: format!("Failed to serialize config: {}", e),
        })?;
        std::fs::write(path, content)
            .map_err(|e| KilnError::IoError { path: path.to_path_buf(), source: e })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("config.json")).unwrap();
        assert_eq!(config.ami.execution_policy, "Bypass");
        assert!(config.cache_from.is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = Config::default();
        config.cache_from = vec!["type=registry,ref=user/app:cache".to_string()];
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.cache_from, config.cache_from);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"cache_to": ["type=registry,ref=user/app:cache"]}"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.cache_to, vec!["type=registry,ref=user/app:cache"]);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.default_architectures, vec!["amd64"]);
    }

    #[test]
    fn test_tracing_level() {
        let mut config = Config::default();
        assert_eq!(config.tracing_level(), tracing::Level::INFO);

        config.log_level = "debug".to_string();
        assert_eq!(config.tracing_level(), tracing::Level::DEBUG);

        config.log_level = "chatty".to_string();
        assert_eq!(config.tracing_level(), tracing::Level::INFO);
    }

    #[test]
    fn test_apply_defaults_only_fills_empty_architectures() {
        let config = Config {
            default_architectures: vec!["amd64".to_string(), "arm64".to_string()],
            ..Default::default()
        };

        let mut template = BuildConfig::from_yaml_str("name: web\nversion: 1.0.0\n").unwrap();
        config.apply_defaults(&mut template);
        assert_eq!(template.architectures, vec!["amd64", "arm64"]);

        let mut template =
            BuildConfig::from_yaml_str("name: web\nversion: 1.0.0\narchitectures: [arm64]\n")
                .unwrap();
        config.apply_defaults(&mut template);
        assert_eq!(template.architectures, vec!["arm64"]);
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(matches!(err, KilnError::InvalidConfig { .. }));
    }
}
