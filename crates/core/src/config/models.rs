//! Configuration models for the bridge.
//!
//! [`BridgeSettings`] mirrors `config.toml` field for field.
//! [`BridgeConfig`] is the validated form the controller is built from:
//! URLs parsed, origins canonicalized, delays converted to `Duration`s and
//! the stage vocabulary attached.

use pb_protocol::deal_models::{default_stages, PipelineStage};
use pb_protocol::messages::CrmInfo;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Raw settings from `.pipeline-bridge/config.toml`.
///
/// # Example
///
/// ```toml
/// remote_url = "https://pipeline.example.com/board"
/// allowed_origins = ["https://pipeline.example.com"]
/// host_origin = "https://crm.example.com"
/// max_attempts = 3
///
/// [crm]
/// name = "Acme CRM"
/// version = "1.0"
/// ```
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BridgeSettings {
    /// Address the iframe loads. Its origin is the target of every
    /// outbound post.
    pub remote_url: String,

    /// Origins whose messages are accepted. Empty means "the remote URL's
    /// origin only".
    #[serde(default)]
    pub allowed_origins: Vec<String>,

    /// Origin of the host page itself, announced to the remote side.
    #[serde(default = "default_host_origin")]
    pub host_origin: String,

    /// Connection attempts before retry is refused.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Pause between runtime install and `CRM_INIT`.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// How long to wait for `REMOTE_READY` after binding a frame.
    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,

    /// How long to wait for `CRM_INIT_COMPLETE` after sending `CRM_INIT`.
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    /// Start the handshake as soon as the remote announces readiness.
    #[serde(default = "default_auto_initialize")]
    pub auto_initialize: bool,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub crm: CrmInfo,
}

fn default_host_origin() -> String {
    "http://localhost:3000".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_settle_delay_ms() -> u64 {
    500
}

fn default_ready_timeout_ms() -> u64 {
    15_000
}

fn default_handshake_timeout_ms() -> u64 {
    10_000
}

fn default_auto_initialize() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Validated bridge configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub remote_url: Url,

    /// Serialized origin of `remote_url`; the only post target.
    pub remote_origin: String,

    pub host_origin: String,

    /// Exact-match allow-list for inbound messages.
    pub allowed_origins: Vec<String>,

    pub max_attempts: u32,
    pub settle_delay: Duration,
    pub ready_timeout: Duration,
    pub handshake_timeout: Duration,
    pub auto_initialize: bool,
    pub log_level: String,
    pub crm: CrmInfo,

    /// Stage vocabulary, sorted by `order`.
    pub stages: Vec<PipelineStage>,
}

impl BridgeConfig {
    /// Configuration with defaults for everything but the remote URL.
    ///
    /// The allow-list contains only the remote URL's origin.
    pub fn new(remote_url: &str) -> Result<Self, url::ParseError> {
        let remote_url = Url::parse(remote_url)?;
        let remote_origin = origin_of(&remote_url);
        Ok(Self {
            remote_url,
            allowed_origins: vec![remote_origin.clone()],
            remote_origin,
            host_origin: default_host_origin(),
            max_attempts: default_max_attempts(),
            settle_delay: Duration::from_millis(default_settle_delay_ms()),
            ready_timeout: Duration::from_millis(default_ready_timeout_ms()),
            handshake_timeout: Duration::from_millis(default_handshake_timeout_ms()),
            auto_initialize: default_auto_initialize(),
            log_level: default_log_level(),
            crm: CrmInfo::default(),
            stages: default_stages(),
        })
    }

    pub fn with_host_origin(mut self, origin: impl Into<String>) -> Self {
        self.host_origin = origin.into();
        self
    }

    pub fn with_allowed_origins(mut self, origins: Vec<String>) -> Self {
        self.allowed_origins = origins;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn with_timeouts(mut self, ready: Duration, handshake: Duration) -> Self {
        self.ready_timeout = ready;
        self.handshake_timeout = handshake;
        self
    }

    pub fn with_stages(mut self, mut stages: Vec<PipelineStage>) -> Self {
        stages.sort_by_key(|stage| stage.order);
        self.stages = stages;
        self
    }

    pub fn with_auto_initialize(mut self, enabled: bool) -> Self {
        self.auto_initialize = enabled;
        self
    }
}

/// ASCII serialization of a URL's origin, e.g. `https://app.example.com`.
///
/// Opaque origins (`data:`, `file:` and friends) serialize as `"null"`.
pub fn origin_of(url: &Url) -> String {
    url.origin().ascii_serialization()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_derives_remote_origin() {
        let config = BridgeConfig::new("https://pipeline.example.com:8443/board?x=1").unwrap();
        assert_eq!(config.remote_origin, "https://pipeline.example.com:8443");
        assert_eq!(config.allowed_origins, vec![config.remote_origin.clone()]);
        assert_eq!(config.max_attempts, 3);
    }

    #[test]
    fn test_default_port_is_dropped_from_origin() {
        let url = Url::parse("https://pipeline.example.com:443/").unwrap();
        assert_eq!(origin_of(&url), "https://pipeline.example.com");
    }

    #[test]
    fn test_opaque_origin() {
        let url = Url::parse("data:text/html,hello").unwrap();
        assert_eq!(origin_of(&url), "null");
    }

    #[test]
    fn test_with_stages_sorts_by_order() {
        let config = BridgeConfig::new("https://p.example.com")
            .unwrap()
            .with_stages(vec![
                PipelineStage::new("won", "Won", 2),
                PipelineStage::new("lead", "Lead", 0),
            ]);
        assert_eq!(config.stages[0].id, "lead");
    }
}
