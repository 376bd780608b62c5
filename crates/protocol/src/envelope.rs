//! The envelope every cross-document message travels in.
//!
//! An envelope is the only unit exchanged between the host page and the
//! embedded pipeline application:
//!
//! ```json
//! {
//!   "type": "DEAL_STAGE_CHANGED",
//!   "data": { "dealId": "d1", "newStage": "won" },
//!   "source": "REMOTE",
//!   "timestamp": 1700000000000
//! }
//! ```
//!
//! `data` is kept as raw JSON at this layer; [`crate::messages::Message`]
//! gives the typed view once the envelope has passed the origin guard.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;
use ts_rs::TS;

/// Which side of the channel produced an envelope.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, TS)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Source {
    /// The CRM page that owns the iframe.
    Host,
    /// The pipeline application running inside the iframe.
    Remote,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Host => f.write_str("HOST"),
            Source::Remote => f.write_str("REMOTE"),
        }
    }
}

/// The fixed message vocabulary.
///
/// Unknown strings fail deserialization, so an envelope with a type outside
/// this list never reaches a dispatcher.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, TS)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    /// Remote document finished loading.
    RemoteReady,
    /// Remote bridge runtime constructed (or re-announced).
    BridgeReady,
    /// Host asks the remote document to activate its bridge runtime.
    InstallBridge,
    /// Full snapshot handshake.
    CrmInit,
    /// Handshake acknowledgement.
    CrmInitComplete,
    /// Incremental re-sync of the deal list.
    SyncDeals,
    DealCreated,
    DealUpdated,
    DealDeleted,
    DealStageChanged,
    /// Remote asks the host for a fresh snapshot.
    RequestPipelineData,
    /// Explicit failure signal.
    ConnectionError,
    /// Remote asks the host to navigate.
    Navigate,
}

impl MessageType {
    /// Every message type, in declaration order.
    pub const ALL: [MessageType; 13] = [
        MessageType::RemoteReady,
        MessageType::BridgeReady,
        MessageType::InstallBridge,
        MessageType::CrmInit,
        MessageType::CrmInitComplete,
        MessageType::SyncDeals,
        MessageType::DealCreated,
        MessageType::DealUpdated,
        MessageType::DealDeleted,
        MessageType::DealStageChanged,
        MessageType::RequestPipelineData,
        MessageType::ConnectionError,
        MessageType::Navigate,
    ];

    /// Wire spelling of the type.
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::RemoteReady => "REMOTE_READY",
            MessageType::BridgeReady => "BRIDGE_READY",
            MessageType::InstallBridge => "INSTALL_BRIDGE",
            MessageType::CrmInit => "CRM_INIT",
            MessageType::CrmInitComplete => "CRM_INIT_COMPLETE",
            MessageType::SyncDeals => "SYNC_DEALS",
            MessageType::DealCreated => "DEAL_CREATED",
            MessageType::DealUpdated => "DEAL_UPDATED",
            MessageType::DealDeleted => "DEAL_DELETED",
            MessageType::DealStageChanged => "DEAL_STAGE_CHANGED",
            MessageType::RequestPipelineData => "REQUEST_PIPELINE_DATA",
            MessageType::ConnectionError => "CONNECTION_ERROR",
            MessageType::Navigate => "NAVIGATE",
        }
    }

    /// Whether `source` is allowed to send this type.
    pub fn allowed_from(self, source: Source) -> bool {
        match self {
            MessageType::RemoteReady
            | MessageType::BridgeReady
            | MessageType::CrmInitComplete
            | MessageType::RequestPipelineData
            | MessageType::Navigate => source == Source::Remote,
            MessageType::InstallBridge | MessageType::CrmInit | MessageType::SyncDeals => {
                source == Source::Host
            }
            MessageType::DealCreated
            | MessageType::DealUpdated
            | MessageType::DealDeleted
            | MessageType::DealStageChanged
            | MessageType::ConnectionError => true,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed, sourced, timestamped message unit.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, TS)]
pub struct Envelope {
    /// Message type from the fixed vocabulary.
    #[serde(rename = "type")]
    pub kind: MessageType,

    /// Type-specific payload. Absent payloads decode as `null`.
    #[serde(default)]
    #[ts(type = "unknown")]
    pub data: Value,

    /// Side that produced the envelope.
    pub source: Source,

    /// Milliseconds since the Unix epoch at send time.
    #[ts(type = "number")]
    pub timestamp: i64,
}

impl Envelope {
    /// Build an envelope stamped with the current time.
    pub fn new(kind: MessageType, data: Value, source: Source) -> Self {
        Self::at(kind, data, source, Utc::now().timestamp_millis())
    }

    /// Build an envelope with an explicit timestamp.
    pub fn at(kind: MessageType, data: Value, source: Source, timestamp: i64) -> Self {
        Self {
            kind,
            data,
            source,
            timestamp,
        }
    }

    /// Parse a raw `message` event payload.
    ///
    /// Fails when `type`, `source` or `timestamp` is missing or when `type`
    /// is not part of the vocabulary.
    pub fn from_value(value: Value) -> Result<Self, EnvelopeError> {
        if !value.is_object() {
            return Err(EnvelopeError::NotAnObject);
        }
        serde_json::from_value(value).map_err(EnvelopeError::Malformed)
    }

    /// Serialize into the JSON value handed to `postMessage`.
    pub fn to_value(&self) -> Result<Value, EnvelopeError> {
        serde_json::to_value(self).map_err(EnvelopeError::Encode)
    }
}

/// Errors produced while reading or writing envelopes.
#[derive(Error, Debug)]
pub enum EnvelopeError {
    /// The event payload was not a JSON object at all.
    #[error("message payload is not an object")]
    NotAnObject,

    /// The object is missing required envelope fields or has unknown values.
    #[error("malformed envelope: {0}")]
    Malformed(#[source] serde_json::Error),

    /// The envelope was well formed but `data` did not match its type.
    #[error("invalid {kind} payload: {source}")]
    Payload {
        kind: MessageType,
        #[source]
        source: serde_json::Error,
    },

    /// Serialization failed.
    #[error("failed to encode envelope: {0}")]
    Encode(#[source] serde_json::Error),
}
