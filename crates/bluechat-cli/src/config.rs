//! BlueChat CLI Configuration Management
//!
//! Configuration is layered with figment, lowest priority first:
//! - Built-in defaults
//! - `bluechat.toml` in the working directory
//! - `~/.bluechat/config.toml`
//! - Environment variables (`BLUECHAT_*`, nested keys separated by `__`)
//! - Command line arguments

use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use bluechat_ble::BleTransportConfig;
use bluechat_core::BluechatConfig;

// ----------------------------------------------------------------------------
// CLI Application Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for the BlueChat CLI application
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliAppConfig {
    /// Session, discovery and presence tunables
    pub core: BluechatConfig,

    /// Bluetooth adapter settings
    pub ble: BleTransportConfig,

    /// Terminal behavior
    pub cli: CliConfig,

    /// Where identity and chat history live
    pub storage: StorageConfig,
}

/// CLI-specific configuration options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Enable verbose logging output
    pub verbose: bool,

    /// Prompt shown in chat mode
    pub prompt: String,

    /// Most recent messages shown by `history`
    pub history_limit: usize,

    /// Only list peers whose advertised name starts with this prefix
    pub name_filter: Option<String>,
}

/// Persistent state locations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Data directory; defaults to the platform data directory
    pub data_dir: Option<PathBuf>,

    /// Identity file name inside the data directory
    pub identity_file: String,

    /// Chat history file name inside the data directory
    pub history_file: String,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            prompt: "bluechat> ".to_string(),
            history_limit: 50,
            name_filter: None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            identity_file: "identity.toml".to_string(),
            history_file: "history.json".to_string(),
        }
    }
}

/// Values given on the command line, applied over every other layer
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_file: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub verbose: Option<bool>,
    pub adapter_index: Option<usize>,
}

// ----------------------------------------------------------------------------
// Configuration Loading Logic
// ----------------------------------------------------------------------------

impl CliAppConfig {
    /// Load configuration with the standard priority order
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_overrides(&CliOverrides::default())
    }

    /// Load configuration from a specific file path on top of the defaults
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()));

        let config: CliAppConfig = figment.extract().map_err(|e| {
            ConfigError::Loading(format!("Failed to load from {}: {}", path.as_ref().display(), e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load every layer, then apply command line overrides
    pub fn load_with_overrides(overrides: &CliOverrides) -> Result<Self, ConfigError> {
        let mut figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file("bluechat.toml"));
        if let Some(path) = Self::default_config_path() {
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed("BLUECHAT_").split("__"));

        if let Some(path) = &overrides.config_file {
            figment = figment.merge(Toml::file(path));
        }
        if let Some(dir) = &overrides.data_dir {
            figment = figment.merge(("storage.data_dir", dir));
        }
        if let Some(verbose) = overrides.verbose {
            figment = figment.merge(("cli.verbose", verbose));
        }
        if let Some(index) = overrides.adapter_index {
            figment = figment.merge(("ble.adapter_index", index));
        }

        let config: CliAppConfig = figment
            .extract()
            .map_err(|e| ConfigError::Loading(format!("Failed to load configuration: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// `~/.bluechat/config.toml`, when a home directory exists
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".bluechat").join("config.toml"))
    }

    /// The data directory: configured, else the platform data directory
    pub fn data_dir(&self) -> Result<PathBuf, ConfigError> {
        if let Some(dir) = &self.storage.data_dir {
            return Ok(dir.clone());
        }
        dirs::data_dir()
            .map(|dir| dir.join("bluechat"))
            .or_else(|| dirs::home_dir().map(|home| home.join(".bluechat")))
            .ok_or_else(|| ConfigError::Environment("No data or home directory".to_string()))
    }

    pub fn identity_path(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.data_dir()?.join(&self.storage.identity_file))
    }

    pub fn history_path(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.data_dir()?.join(&self.storage.history_file))
    }

    /// Save configuration to a specific file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ConfigError::FileSystem(format!("Failed to create config directory: {}", e))
            })?;
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::Serialization(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path.as_ref(), toml_string)
            .map_err(|e| ConfigError::FileSystem(format!("Failed to write config file: {}", e)))
    }

    /// Validate the configuration for consistency and correctness
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.core.validate().map_err(ConfigError::Validation)?;
        self.ble.validate().map_err(ConfigError::Validation)?;

        if self.cli.prompt.is_empty() {
            return Err(ConfigError::Validation("Prompt must not be empty".to_string()));
        }
        if self.cli.history_limit == 0 {
            return Err(ConfigError::Validation(
                "History limit must be greater than 0".to_string(),
            ));
        }
        if self.storage.identity_file.is_empty() || self.storage.history_file.is_empty() {
            return Err(ConfigError::Validation(
                "Storage file names must not be empty".to_string(),
            ));
        }
        if self.storage.identity_file == self.storage.history_file {
            return Err(ConfigError::Validation(
                "Identity and history must use different files".to_string(),
            ));
        }

        Ok(())
    }

    /// Create example configuration file content
    pub fn example_config() -> String {
        let example_config = CliAppConfig {
            cli: CliConfig {
                name_filter: Some("BlueChat-".to_string()),
                ..Default::default()
            },
            storage: StorageConfig {
                data_dir: Some(PathBuf::from("/var/lib/bluechat")),
                ..Default::default()
            },
            ..Default::default()
        };

        toml::to_string_pretty(&example_config)
            .unwrap_or_else(|_| "# Failed to generate example config".to_string())
    }
}

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Configuration-related errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration loading error: {0}")]
    Loading(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment error: {0}")]
    Environment(String),

    #[error("File system error: {0}")]
    FileSystem(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_default_config_creation() {
        let config = CliAppConfig::default();
        assert!(!config.cli.verbose);
        assert_eq!(config.cli.prompt, "bluechat> ");
        assert_eq!(config.ble.local_name_prefix, "BlueChat-");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let config = CliAppConfig::default();

        let mut invalid = config.clone();
        invalid.cli.history_limit = 0;
        assert!(invalid.validate().is_err());

        let mut invalid = config.clone();
        invalid.core.connect_timeout = Duration::ZERO;
        assert!(invalid.validate().is_err());

        let mut invalid = config.clone();
        invalid.ble.request_timeout = Duration::ZERO;
        assert!(invalid.validate().is_err());

        let mut invalid = config;
        invalid.storage.history_file = invalid.storage.identity_file.clone();
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn test_paths_follow_data_dir() {
        let mut config = CliAppConfig::default();
        config.storage.data_dir = Some(PathBuf::from("/tmp/bc"));
        assert_eq!(
            config.identity_path().unwrap(),
            PathBuf::from("/tmp/bc/identity.toml")
        );
        assert_eq!(
            config.history_path().unwrap(),
            PathBuf::from("/tmp/bc/history.json")
        );
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = CliAppConfig::default();
        config.cli.prompt = "> ".to_string();
        config.ble.adapter_index = 2;
        config.save_to_file(&path).unwrap();

        let loaded = CliAppConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[cli]\nhistory_limit = 5\n").unwrap();

        let loaded = CliAppConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.cli.history_limit, 5);
        assert_eq!(loaded.cli.prompt, "bluechat> ");
        assert_eq!(loaded.core, BluechatConfig::default());
    }

    #[test]
    fn test_overrides_win() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[ble]\nadapter_index = 1\n").unwrap();

        let overrides = CliOverrides {
            config_file: Some(path),
            data_dir: Some(dir.path().to_path_buf()),
            verbose: Some(true),
            adapter_index: Some(3),
        };
        let config = CliAppConfig::load_with_overrides(&overrides).unwrap();
        assert!(config.cli.verbose);
        assert_eq!(config.ble.adapter_index, 3);
        assert_eq!(config.storage.data_dir.as_deref(), Some(dir.path()));
    }

    #[test]
    fn test_example_config_generation() {
        let example = CliAppConfig::example_config();
        assert!(example.contains("[cli]"));
        assert!(example.contains("[ble]"));
        assert!(example.contains("[storage]"));
        assert!(example.contains("name_filter"));
    }
}
