//! Configuration loading traits and types.
//!
//! This module provides a standardized way to load TOML configuration files
//! across all cardlink applications.
//!
//! # Usage
//!
//! ```rust,no_run
//! use cardlink_common::config::{CardlinkConfig, ConfigError, ConfigLoader};
//! use std::path::Path;
//!
//! fn main() -> Result<(), ConfigError> {
//!     let config = CardlinkConfig::load(Path::new("cardlink.toml"))?;
//!     config.validate()?;
//!     println!("Plugin folders: {:?}", config.plugins.folders);
//!     Ok(())
//! }
//! ```

use crate::reader::config::ReaderUnitConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error type for configuration loading operations.
///
/// This enum represents all possible errors that can occur when loading
/// configuration files or restoring persisted objects.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// TOML parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Log level for application logging.
///
/// Represents the verbosity level of logging output.
/// Uses lowercase serde values for TOML compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Most verbose, includes every byte exchanged with readers.
    Trace,
    /// Debug information such as plugin scanning.
    Debug,
    /// General information about application operation.
    #[default]
    Info,
    /// Warning messages for potentially problematic situations.
    Warn,
    /// Error messages for serious problems.
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

/// Common configuration fields shared across all cardlink applications.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// log_level = "debug"
/// service_name = "badge-station-01"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    /// Logging verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Application instance identifier.
    pub service_name: String,
}

impl SharedConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if:
    /// - `service_name` is empty
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Plugin search settings.
///
/// The ordered folder list is scanned front to back. This is the explicit
/// context handed to the plugin registry at construction time.
///
/// ```toml
/// [plugins]
/// folders = ["/usr/lib/cardlink/plugins", "./plugins"]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginSettings {
    /// Folders searched for plugin modules, in scan order.
    #[serde(default)]
    pub folders: Vec<PathBuf>,
}

impl PluginSettings {
    /// Create settings with the given folders.
    pub fn new<I, P>(folders: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            folders: folders.into_iter().map(Into::into).collect(),
        }
    }
}

/// Top-level cardlink configuration file.
///
/// ```toml
/// [shared]
/// service_name = "gate-a"
///
/// [plugins]
/// folders = ["/usr/lib/cardlink/plugins"]
///
/// [[readers]]
/// name = "entrance"
/// provider = "Remote"
///
/// [readers.transport]
/// type = "tcp"
/// ip_address = "10.0.0.5"
/// port = 7000
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardlinkConfig {
    /// Shared application settings.
    pub shared: SharedConfig,

    /// Plugin search settings.
    #[serde(default)]
    pub plugins: PluginSettings,

    /// Reader units to instantiate.
    #[serde(default)]
    pub readers: Vec<ReaderUnitConfig>,
}

impl CardlinkConfig {
    /// Validate the whole configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if the shared section or any
    /// reader section is invalid, or if two reader units share a name.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;

        let mut names = HashSet::new();
        for reader in &self.readers {
            reader.validate()?;
            if !names.insert(reader.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate reader unit name: {}",
                    reader.name
                )));
            }
        }
        Ok(())
    }
}

/// Trait for loading configuration from TOML files.
///
/// This trait provides a default implementation that works with any type
/// implementing `serde::de::DeserializeOwned`.
///
/// # Contract
///
/// - Returns `ConfigError::FileNotFound` if the file does not exist
/// - Returns `ConfigError::ParseError` if TOML syntax is invalid
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the TOML configuration file
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

// Blanket implementation for all types that implement DeserializeOwned.
impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_log_level_default() {
        assert_eq!(LogLevel::default(), LogLevel::Info);
    }

    #[test]
    fn test_log_level_deserialization() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct TestWrapper {
            level: LogLevel,
        }

        for (text, level) in [
            ("trace", LogLevel::Trace),
            ("debug", LogLevel::Debug),
            ("info", LogLevel::Info),
            ("warn", LogLevel::Warn),
            ("error", LogLevel::Error),
        ] {
            let parsed: TestWrapper =
                toml::from_str(&format!("level = \"{text}\"")).expect("parse level");
            assert_eq!(parsed.level, level);
        }
    }

    #[test]
    fn test_log_level_to_tracing() {
        assert_eq!(tracing::Level::from(LogLevel::Debug), tracing::Level::DEBUG);
        assert_eq!(tracing::Level::from(LogLevel::Error), tracing::Level::ERROR);
    }

    #[test]
    fn test_shared_config_validation_empty_service_name() {
        let config = SharedConfig {
            log_level: LogLevel::Info,
            service_name: "".to_string(),
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_config_loader_file_not_found() {
        let result = CardlinkConfig::load(Path::new("/nonexistent/path/cardlink.toml"));
        assert!(matches!(result, Err(ConfigError::FileNotFound)));
    }

    #[test]
    fn test_config_loader_parse_error() {
        let mut file = NamedTempFile::new().expect("temp file");
        writeln!(file, "invalid toml {{{{").expect("write");

        let result = CardlinkConfig::load(file.path());
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_cardlink_config_load() {
        let mut file = NamedTempFile::new().expect("temp file");
        write!(
            file,
            r#"
[shared]
log_level = "debug"
service_name = "gate-a"

[plugins]
folders = ["/usr/lib/cardlink/plugins", "./plugins"]

[[readers]]
name = "entrance"
provider = "Remote"

[readers.transport]
type = "tcp"
ip_address = "10.0.0.5"
port = 7000
"#
        )
        .expect("write");
        file.flush().expect("flush");

        let config = CardlinkConfig::load(file.path()).expect("load");
        config.validate().expect("valid");
        assert_eq!(config.shared.log_level, LogLevel::Debug);
        assert_eq!(config.plugins.folders.len(), 2);
        assert_eq!(config.plugins.folders[1], PathBuf::from("./plugins"));
        assert_eq!(config.readers.len(), 1);
        assert_eq!(config.readers[0].provider, "Remote");
    }

    #[test]
    fn test_cardlink_config_duplicate_reader_names() {
        let config: CardlinkConfig = toml::from_str(
            r#"
[shared]
service_name = "gate-a"

[[readers]]
name = "door"

[[readers]]
name = "door"
"#,
        )
        .expect("parse");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(msg)) if msg.contains("door")
        ));
    }

    #[test]
    fn test_plugin_settings_default_is_empty() {
        let config: CardlinkConfig =
            toml::from_str("[shared]\nservice_name = \"x\"\n").expect("parse");
        assert!(config.plugins.folders.is_empty());
        assert!(config.readers.is_empty());
    }
}
