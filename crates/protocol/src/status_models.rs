//! Connection status reported by the host-side controller.
//!
//! The controller pushes a fresh [`ConnectionStatus`] to its status callback
//! on every change; the UI layer renders it (banner, retry button, deal
//! count) without ever holding a reference into the controller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

/// Lifecycle of a bridge connection.
///
/// Normal progression:
/// Disconnected -> Connecting -> AwaitingBridge -> Connected
///
/// `Error` is entered from any state and left only through an explicit
/// retry or a frame rebind, both limited by the attempt budget.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, TS)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    /// No frame bound, or the controller was torn down.
    Disconnected,

    /// Frame bound, waiting for the remote document to announce itself.
    Connecting,

    /// Remote announced readiness; runtime install and handshake in flight.
    AwaitingBridge,

    /// Handshake acknowledged; incremental sync is live.
    Connected,

    /// Transport or protocol failure.
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::AwaitingBridge => "awaiting-bridge",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Snapshot of the bridge connection.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub is_connected: bool,
    pub last_sync: Option<DateTime<Utc>>,
    pub deal_count: usize,
    pub connection_attempts: u32,
    pub error_message: Option<String>,

    /// In `Error` with the attempt budget spent: retrying and rebinding the
    /// frame are both refused.
    pub retries_exhausted: bool,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            is_connected: false,
            last_sync: None,
            deal_count: 0,
            connection_attempts: 0,
            error_message: None,
            retries_exhausted: false,
        }
    }
}
