//! Configuration loading and management.
//!
//! This module loads the `.pipeline-bridge/` directory and turns it into a
//! validated [`models::BridgeConfig`].

pub mod error;
pub mod loader;
pub mod models;

pub use error::{ConfigError, ConfigResult};
pub use loader::{load_config, CONFIG_DIR};
pub use models::{origin_of, BridgeConfig, BridgeSettings};
