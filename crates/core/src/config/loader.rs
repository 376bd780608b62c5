//! Configuration loader for the `.pipeline-bridge/` directory.
//!
//! This module reads and validates:
//! - `config.toml`: bridge settings (required)
//! - `stages.yaml`: pipeline stage vocabulary (optional)

use crate::config::error::ConfigError;
use crate::config::error::ConfigResult;
use crate::config::models::{origin_of, BridgeConfig, BridgeSettings};
use pb_protocol::deal_models::{default_stages, PipelineStage};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Name of the project-local configuration directory.
pub const CONFIG_DIR: &str = ".pipeline-bridge";

/// Loads and validates the bridge configuration under `root`.
///
/// # Arguments
///
/// * `root` - Directory containing the `.pipeline-bridge/` folder
///
/// # Errors
///
/// Returns `ConfigError` if:
/// - `config.toml` is missing (`NotInitialized`)
/// - A file exists but cannot be read or parsed
/// - `remote_url` or an allowed origin is not a valid URL
/// - An allowed origin is not a bare origin (has a path, query or trailing slash)
/// - `max_attempts` is zero or stage ids repeat
///
/// # Example
///
/// ```rust,no_run
/// use pb_core::config::loader::load_config;
/// use std::path::Path;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = load_config(Path::new(".")).await?;
/// println!("Posting to {}", config.remote_origin);
/// # Ok(())
/// # }
/// ```
pub async fn load_config(root: &Path) -> ConfigResult<BridgeConfig> {
    let pb_dir = root.join(CONFIG_DIR);
    let config_path = pb_dir.join("config.toml");

    if !config_path.exists() {
        return Err(ConfigError::NotInitialized(pb_dir));
    }

    let settings = load_settings(&config_path)?;
    let stages = load_stages(&pb_dir)?;

    validate(settings, stages, &config_path)
}

/// Reads `config.toml`.
fn load_settings(config_path: &Path) -> ConfigResult<BridgeSettings> {
    let content =
        std::fs::read_to_string(config_path).map_err(|source| ConfigError::FileRead {
            path: config_path.to_path_buf(),
            source,
        })?;

    toml::from_str(&content).map_err(|source| ConfigError::TomlParse {
        path: config_path.to_path_buf(),
        source,
    })
}

/// Reads `stages.yaml`, falling back to the default vocabulary.
fn load_stages(pb_dir: &Path) -> ConfigResult<Vec<PipelineStage>> {
    let stages_path = pb_dir.join("stages.yaml");

    if !stages_path.exists() {
        return Ok(default_stages());
    }

    let content =
        std::fs::read_to_string(&stages_path).map_err(|source| ConfigError::FileRead {
            path: stages_path.clone(),
            source,
        })?;

    let mut stages: Vec<PipelineStage> =
        serde_yaml::from_str(&content).map_err(|source| ConfigError::YamlParse {
            path: stages_path.clone(),
            source,
        })?;

    let mut seen = HashSet::new();
    for stage in &stages {
        if !seen.insert(stage.id.as_str()) {
            return Err(ConfigError::InvalidConfig {
                path: stages_path,
                reason: format!("duplicate stage id '{}'", stage.id),
            });
        }
    }

    stages.sort_by_key(|stage| stage.order);
    Ok(stages)
}

fn validate(
    settings: BridgeSettings,
    stages: Vec<PipelineStage>,
    path: &Path,
) -> ConfigResult<BridgeConfig> {
    let remote_url = Url::parse(&settings.remote_url).map_err(|source| ConfigError::InvalidUrl {
        path: path.to_path_buf(),
        value: settings.remote_url.clone(),
        source,
    })?;
    let remote_origin = origin_of(&remote_url);
    if remote_origin == "null" {
        return Err(ConfigError::InvalidConfig {
            path: path.to_path_buf(),
            reason: format!("remote_url {} has an opaque origin", settings.remote_url),
        });
    }

    if settings.max_attempts == 0 {
        return Err(ConfigError::InvalidConfig {
            path: path.to_path_buf(),
            reason: "max_attempts must be at least 1".to_string(),
        });
    }

    let host_origin = canonical_origin(&settings.host_origin, path)?;

    let allowed_origins = if settings.allowed_origins.is_empty() {
        vec![remote_origin.clone()]
    } else {
        settings
            .allowed_origins
            .iter()
            .map(|origin| canonical_origin(origin, path))
            .collect::<ConfigResult<Vec<_>>>()?
    };

    Ok(BridgeConfig {
        remote_url,
        remote_origin,
        host_origin,
        allowed_origins,
        max_attempts: settings.max_attempts,
        settle_delay: Duration::from_millis(settings.settle_delay_ms),
        ready_timeout: Duration::from_millis(settings.ready_timeout_ms),
        handshake_timeout: Duration::from_millis(settings.handshake_timeout_ms),
        auto_initialize: settings.auto_initialize,
        log_level: settings.log_level,
        crm: settings.crm,
        stages,
    })
}

/// Accepts `value` only if it is already a serialized origin.
///
/// Browsers compare `event.origin` byte for byte, so an allow-list entry
/// such as `https://app.example.com/` would never match anything.
fn canonical_origin(value: &str, path: &Path) -> ConfigResult<String> {
    let url = Url::parse(value).map_err(|source| ConfigError::InvalidUrl {
        path: path.to_path_buf(),
        value: value.to_string(),
        source,
    })?;
    let origin = origin_of(&url);
    if origin != value {
        return Err(ConfigError::InvalidConfig {
            path: path.to_path_buf(),
            reason: format!("{value:?} is not a bare origin (expected {origin:?})"),
        });
    }
    Ok(origin)
}
