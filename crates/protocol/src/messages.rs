//! Typed payloads for each message type.
//!
//! [`Message`] is the decoded view of an [`Envelope`]. Decoding happens after
//! the origin and source checks so that untrusted payloads are never parsed
//! beyond the envelope header.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

use crate::deal_models::{DealChanges, PipelineDeal, PipelineStage};
use crate::envelope::{Envelope, EnvelopeError, MessageType, Source};

/// Protocol revision carried by `INSTALL_BRIDGE`.
///
/// The remote side accepts any revision with the same major number.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Identification of the host CRM, sent with the handshake.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, TS)]
pub struct CrmInfo {
    pub name: String,
    pub version: String,
}

impl Default for CrmInfo {
    fn default() -> Self {
        Self {
            name: "CRM".to_string(),
            version: PROTOCOL_VERSION.to_string(),
        }
    }
}

/// The full board: every deal and the stage vocabulary.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, TS)]
pub struct PipelineData {
    pub deals: Vec<PipelineDeal>,
    pub stages: Vec<PipelineStage>,
}

/// `INSTALL_BRIDGE` payload.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, TS)]
#[serde(rename_all = "camelCase")]
pub struct InstallBridge {
    pub protocol_version: String,
    pub host_origin: String,
}

/// `CRM_INIT` payload.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
pub struct CrmInit {
    pub crm_info: CrmInfo,
    pub pipeline_data: PipelineData,
}

/// `CRM_INIT_COMPLETE` payload.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, TS)]
#[serde(rename_all = "camelCase")]
pub struct InitAck {
    pub deals_received: usize,
    pub stages_received: usize,
}

/// `SYNC_DEALS` payload.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, TS)]
pub struct SyncDeals {
    pub deals: Vec<PipelineDeal>,
}

/// `DEAL_UPDATED` payload.
///
/// A full deal object is also accepted, since its `id` aliases `dealId`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
pub struct DealUpdate {
    #[serde(alias = "id")]
    pub deal_id: String,

    #[serde(flatten)]
    pub changes: DealChanges,
}

/// `DEAL_DELETED` payload.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, TS)]
#[serde(rename_all = "camelCase")]
pub struct DealRef {
    #[serde(alias = "id")]
    pub deal_id: String,
}

/// `DEAL_STAGE_CHANGED` payload.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, TS)]
#[serde(rename_all = "camelCase")]
pub struct StageChange {
    #[serde(alias = "id")]
    pub deal_id: String,
    pub new_stage: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub old_stage: Option<String>,
}

/// `CONNECTION_ERROR` payload.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, TS)]
pub struct ConnectionFailure {
    pub error: String,
}

/// `NAVIGATE` payload.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, TS)]
pub struct NavigateRequest {
    pub route: String,
}

/// Decoded envelope payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    RemoteReady,
    BridgeReady,
    InstallBridge(InstallBridge),
    CrmInit(CrmInit),
    CrmInitComplete(InitAck),
    SyncDeals(SyncDeals),
    DealCreated(PipelineDeal),
    DealUpdated(DealUpdate),
    DealDeleted(DealRef),
    DealStageChanged(StageChange),
    RequestPipelineData,
    ConnectionError(ConnectionFailure),
    Navigate(NavigateRequest),
}

impl Message {
    /// The wire type of this message.
    pub fn kind(&self) -> MessageType {
        match self {
            Message::RemoteReady => MessageType::RemoteReady,
            Message::BridgeReady => MessageType::BridgeReady,
            Message::InstallBridge(_) => MessageType::InstallBridge,
            Message::CrmInit(_) => MessageType::CrmInit,
            Message::CrmInitComplete(_) => MessageType::CrmInitComplete,
            Message::SyncDeals(_) => MessageType::SyncDeals,
            Message::DealCreated(_) => MessageType::DealCreated,
            Message::DealUpdated(_) => MessageType::DealUpdated,
            Message::DealDeleted(_) => MessageType::DealDeleted,
            Message::DealStageChanged(_) => MessageType::DealStageChanged,
            Message::RequestPipelineData => MessageType::RequestPipelineData,
            Message::ConnectionError(_) => MessageType::ConnectionError,
            Message::Navigate(_) => MessageType::Navigate,
        }
    }

    /// Id of the deal a mutation message refers to.
    pub fn deal_id(&self) -> Option<&str> {
        match self {
            Message::DealCreated(deal) => Some(&deal.id),
            Message::DealUpdated(update) => Some(&update.deal_id),
            Message::DealDeleted(deal) => Some(&deal.deal_id),
            Message::DealStageChanged(change) => Some(&change.deal_id),
            _ => None,
        }
    }

    /// Decode the payload of `envelope` according to its type.
    pub fn decode(envelope: &Envelope) -> Result<Self, EnvelopeError> {
        let kind = envelope.kind;
        let data = &envelope.data;
        let message = match kind {
            MessageType::RemoteReady => Message::RemoteReady,
            MessageType::BridgeReady => Message::BridgeReady,
            MessageType::RequestPipelineData => Message::RequestPipelineData,
            MessageType::InstallBridge => Message::InstallBridge(payload(kind, data)?),
            MessageType::CrmInit => Message::CrmInit(payload(kind, data)?),
            MessageType::CrmInitComplete => Message::CrmInitComplete(payload(kind, data)?),
            MessageType::SyncDeals => Message::SyncDeals(payload(kind, data)?),
            MessageType::DealCreated => Message::DealCreated(payload(kind, data)?),
            MessageType::DealUpdated => Message::DealUpdated(payload(kind, data)?),
            MessageType::DealDeleted => Message::DealDeleted(payload(kind, data)?),
            MessageType::DealStageChanged => Message::DealStageChanged(payload(kind, data)?),
            MessageType::ConnectionError => Message::ConnectionError(payload(kind, data)?),
            MessageType::Navigate => Message::Navigate(payload(kind, data)?),
        };
        Ok(message)
    }

    /// Encode the payload as the `data` field of an envelope.
    pub fn to_data(&self) -> Result<Value, EnvelopeError> {
        let encoded = match self {
            Message::RemoteReady | Message::BridgeReady | Message::RequestPipelineData => {
                Ok(Value::Null)
            }
            Message::InstallBridge(inner) => serde_json::to_value(inner),
            Message::CrmInit(inner) => serde_json::to_value(inner),
            Message::CrmInitComplete(inner) => serde_json::to_value(inner),
            Message::SyncDeals(inner) => serde_json::to_value(inner),
            Message::DealCreated(inner) => serde_json::to_value(inner),
            Message::DealUpdated(inner) => serde_json::to_value(inner),
            Message::DealDeleted(inner) => serde_json::to_value(inner),
            Message::DealStageChanged(inner) => serde_json::to_value(inner),
            Message::ConnectionError(inner) => serde_json::to_value(inner),
            Message::Navigate(inner) => serde_json::to_value(inner),
        };
        encoded.map_err(EnvelopeError::Encode)
    }

    /// Wrap this message in an envelope stamped with the current time.
    pub fn into_envelope(self, source: Source) -> Result<Envelope, EnvelopeError> {
        Ok(Envelope::new(self.kind(), self.to_data()?, source))
    }

    /// Wrap this message in an envelope with an explicit timestamp.
    pub fn into_envelope_at(self, source: Source, timestamp: i64) -> Result<Envelope, EnvelopeError> {
        Ok(Envelope::at(self.kind(), self.to_data()?, source, timestamp))
    }
}

fn payload<T: DeserializeOwned>(kind: MessageType, data: &Value) -> Result<T, EnvelopeError> {
    T::deserialize(data).map_err(|source| EnvelopeError::Payload { kind, source })
}
