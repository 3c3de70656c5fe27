//! Configuration Management
//!
//! Handles persistent user configuration for azfacts. The file is optional
//! and never written by the modules themselves.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// User configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    /// Credentials file profile used when the module doesn't name one
    #[serde(default)]
    pub profile: Option<String>,
    /// Cloud used when neither arguments nor environment name one
    #[serde(default)]
    pub cloud_environment: Option<String>,
    /// Log level used when `--log-level` is left at its default
    #[serde(default)]
    pub log_level: Option<String>,
    /// Log file path
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Config {
    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("azfacts").join("config.json"))
    }

    /// Load configuration from disk
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load configuration from a file, defaults when missing or malformed
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
            Err(_) => Self::default(),
        }
    }

    /// Get effective profile (AZURE_PROFILE > config)
    pub fn effective_profile(&self) -> Option<String> {
        std::env::var("AZURE_PROFILE")
            .ok()
            .filter(|p| !p.is_empty())
            .or_else(|| self.profile.clone())
    }

    /// Get effective log file (config > default location)
    pub fn effective_log_file(&self) -> PathBuf {
        if let Some(path) = &self.log_file {
            return path.clone();
        }
        if let Some(config_dir) = dirs::config_dir() {
            return config_dir.join("azfacts").join("azfacts.log");
        }
        if let Some(home) = dirs::home_dir() {
            return home.join(".azfacts").join("azfacts.log");
        }
        PathBuf::from("azfacts.log")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_default() {
        let config = Config::load_from(Path::new("/nonexistent/azfacts/config.json"));
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir()
            .join(format!("azfacts-config-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(
            &path,
            r#"{"profile": "work", "cloud_environment": "AzureChinaCloud", "log_level": "debug"}"#,
        )
        .unwrap();

        let config = Config::load_from(&path);
        let _ = std::fs::remove_file(&path);

        assert_eq!(config.profile.as_deref(), Some("work"));
        assert_eq!(config.cloud_environment.as_deref(), Some("AzureChinaCloud"));
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.log_file, None);
    }

    #[test]
    fn test_malformed_file_is_default() {
        let path = std::env::temp_dir()
            .join(format!("azfacts-config-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, "{not json").unwrap();
        let config = Config::load_from(&path);
        let _ = std::fs::remove_file(&path);
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_explicit_log_file() {
        let config = Config {
            log_file: Some(PathBuf::from("/tmp/x.log")),
            ..Default::default()
        };
        assert_eq!(config.effective_log_file(), PathBuf::from("/tmp/x.log"));
    }
}
