//! Test fixtures for configurations, deals and inbound events.

use pb_core::config::BridgeConfig;
use pb_core::store::Deal;
use pb_core::window::MessageEvent;
use pb_protocol::deal_models::PipelineStage;
use pb_protocol::envelope::Source;
use pb_protocol::messages::Message;
use std::time::Duration;

pub const HOST_ORIGIN: &str = "https://crm.example.com";
pub const REMOTE_ORIGIN: &str = "https://pipeline.example.com";
pub const REMOTE_URL: &str = "https://pipeline.example.com/board?embed=1";
pub const EVIL_ORIGIN: &str = "https://evil.example";

pub const SETTLE: Duration = Duration::from_millis(500);
pub const READY_TIMEOUT: Duration = Duration::from_secs(15);
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Cross-origin configuration with two stages and explicit timings.
#[allow(dead_code)]
pub fn test_config() -> BridgeConfig {
    BridgeConfig::new(REMOTE_URL)
        .expect("fixture URL parses")
        .with_host_origin(HOST_ORIGIN)
        .with_settle_delay(SETTLE)
        .with_timeouts(READY_TIMEOUT, HANDSHAKE_TIMEOUT)
        .with_stages(two_stages())
}

/// Configuration where host and remote share an origin.
#[allow(dead_code)]
pub fn same_origin_config() -> BridgeConfig {
    BridgeConfig::new("https://crm.example.com/pipeline")
        .expect("fixture URL parses")
        .with_host_origin(HOST_ORIGIN)
        .with_settle_delay(SETTLE)
        .with_timeouts(READY_TIMEOUT, HANDSHAKE_TIMEOUT)
}

#[allow(dead_code)]
pub fn two_stages() -> Vec<PipelineStage> {
    vec![
        PipelineStage::new("won", "Won", 1),
        PipelineStage::new("lead", "Lead", 0),
    ]
}

/// Three deals: d1, d2, d3, all in `lead`.
#[allow(dead_code)]
pub fn three_deals() -> Vec<Deal> {
    vec![
        Deal::new("d1", "Renewal", 12_000.0, "lead").with_contact("c1"),
        Deal::new("d2", "Expansion", 4_500.0, "lead"),
        Deal::new("d3", "Pilot", 900.0, "lead"),
    ]
}

/// A `message` event carrying `message` as sent by the remote side.
#[allow(dead_code)]
pub fn remote_event(origin: &str, message: Message, timestamp: i64) -> MessageEvent {
    let envelope = message
        .into_envelope_at(Source::Remote, timestamp)
        .expect("fixture message encodes");
    MessageEvent::new(
        origin,
        envelope.to_value().expect("fixture envelope encodes"),
    )
}
