//! Host-side bridge controller.
//!
//! The controller owns the connection status, the listener on the host
//! window and the handshake timers. Everything the remote side sends goes
//! through [`crate::guard::OriginGuard`] first, then either drives the state
//! machine or is handed to the reconciler and the registered handlers.

pub mod controller;
mod handlers;

pub use controller::{BridgeController, StatusCallback};
pub use handlers::{HandlerId, MessageFilter, MessageHandler};

use crate::reconcile::ReconcileError;
use crate::state::TransitionError;
use crate::store::StoreError;
use crate::transport::TransportError;
use pb_protocol::envelope::EnvelopeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("bridge controller must be created inside a tokio runtime")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),

    #[error("bridge controller has been destroyed")]
    Destroyed,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Encode(#[from] EnvelopeError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// Type alias for Result with BridgeError.
pub type BridgeResult<T> = Result<T, BridgeError>;
