//! CLI configuration management

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Get the configuration directory path
pub fn config_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ucanscope")
    }

    #[cfg(not(target_os = "windows"))]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".ucanscope")
    }
}

/// Get the config file path
pub fn config_file() -> PathBuf {
    config_dir().join("config.yml")
}

/// Default location of persisted inspector state
pub fn default_storage_dir() -> PathBuf {
    config_dir().join("storage")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Preferred inspector port (default: 4455)
    #[serde(default = "default_inspector_port")]
    pub inspector_port: u16,

    /// Directory for grouping, filter and persistence settings
    #[serde(default)]
    pub storage_dir: Option<PathBuf>,

    /// Directory exported CAR files are written to
    #[serde(default)]
    pub export_dir: Option<PathBuf>,
}

fn default_inspector_port() -> u16 {
    4455
}

impl Default for Config {
    fn default() -> Self {
        Self {
            inspector_port: default_inspector_port(),
            storage_dir: None,
            export_dir: None,
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load() -> Result<Self> {
        let path = config_file();

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        Self::parse(&content)
    }

    fn parse(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).context("Failed to parse config file")
    }

    pub fn storage_dir(&self) -> PathBuf {
        self.storage_dir.clone().unwrap_or_else(default_storage_dir)
    }

    pub fn export_dir(&self) -> PathBuf {
        self.export_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_defaults() {
        assert_eq!(Config::parse("").unwrap(), Config::default());
        assert_eq!(Config::parse("{}").unwrap().inspector_port, 4455);
    }

    #[test]
    fn test_parse_overrides() {
        let config = Config::parse("inspector_port: 5000\nstorage_dir: /tmp/ucan\n").unwrap();
        assert_eq!(config.inspector_port, 5000);
        assert_eq!(config.storage_dir(), PathBuf::from("/tmp/ucan"));
        assert_eq!(config.export_dir(), PathBuf::from("."));
    }

    #[test]
    fn test_parse_rejects_bad_port() {
        assert!(Config::parse("inspector_port: huge").is_err());
    }
}
