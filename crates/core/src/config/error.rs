//! Error types for configuration loading.
//!
//! This module defines all errors that can occur while reading and
//! validating the `.pipeline-bridge/` directory.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// `.pipeline-bridge/config.toml` does not exist under the given root.
    #[error("No bridge configuration found at {0}. Run `pipeline-bridge init` first.")]
    NotInitialized(PathBuf),

    /// Failed to read a configuration file from disk.
    #[error("Failed to read config file at {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to parse TOML configuration.
    #[error("Failed to parse TOML file at {path}: {source}")]
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("Failed to parse YAML file at {path}: {source}")]
    YamlParse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    /// A URL or origin in the configuration could not be parsed.
    #[error("Invalid URL {value:?} in {path}: {source}")]
    InvalidUrl {
        path: PathBuf,
        value: String,
        source: url::ParseError,
    },

    /// Invalid configuration structure or values.
    #[error("Invalid configuration in {path}: {reason}")]
    InvalidConfig { path: PathBuf, reason: String },
}

/// Type alias for Result with ConfigError.
pub type ConfigResult<T> = Result<T, ConfigError>;
