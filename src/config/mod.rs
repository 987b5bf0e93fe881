//! Configuration module
//!
//! Run settings loaded from a config file and overridden by the environment.

mod env;
mod file;

pub use env::EnvConfig;
pub use file::{expand_path, CONFIG_LOCATIONS};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::executor::DEFAULT_MAX_CONCURRENT;
use crate::output::OutputFormat;
use crate::utils::LogLevel;

/// Application configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Upper bound on simultaneously running units
    pub max_concurrent: usize,

    /// Patterns matched against context and vow names
    pub exclude: Vec<String>,

    /// Patterns matched against dotted ids
    pub include: Vec<String>,

    /// Collect stdout/stderr per context instead of printing
    pub capture_output: bool,

    pub log_level: LogLevel,

    pub format: OutputFormat,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            exclude: Vec::new(),
            include: Vec::new(),
            capture_output: true,
            log_level: LogLevel::default(),
            format: OutputFormat::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = if file::is_yaml_file(path) {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?
        };

        config.validate()?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load the first config file found in the standard locations, else defaults
    pub fn load_default() -> Result<Self> {
        match Self::find() {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn find() -> Option<PathBuf> {
        file::find_config()
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = if file::is_yaml_file(path) {
            serde_yaml::to_string(self).context("Failed to serialize config")?
        } else {
            serde_json::to_string_pretty(self).context("Failed to serialize config")?
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent == 0 {
            anyhow::bail!("max_concurrent must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.max_concurrent, 1000);
        assert!(config.capture_output);
        assert!(config.exclude.is_empty());
        assert_eq!(config.format, OutputFormat::Summary);
    }

    #[test]
    fn test_save_load_yaml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vowrun.yaml");

        let config = AppConfig {
            max_concurrent: 16,
            exclude: vec!["slow".to_string()],
            format: OutputFormat::Json,
            ..Default::default()
        };
        config.save(&path).unwrap();

        assert_eq!(AppConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vowrun.json");
        std::fs::write(&path, r#"{"include": ["Suite\\.Fast"], "log_level": "debug"}"#).unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.include, vec![r"Suite\.Fast".to_string()]);
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.max_concurrent, 1000);
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vowrun.yaml");
        std::fs::write(&path, "max_concurrent: 0\n").unwrap();

        assert!(AppConfig::load(&path).is_err());
    }

    #[test]
    fn test_missing_file() {
        assert!(AppConfig::load("/nonexistent/vowrun.yaml").is_err());
    }
}
