//! Remote-side half of the bridge.
//!
//! [`RemoteDocument`] models the pipeline application's document inside the
//! frame: it announces itself with `REMOTE_READY`, guards inbound messages
//! against the host origin and hosts at most one [`BridgeRuntime`]. The
//! runtime keeps the remote copy of the board and turns local edits into
//! outbound envelopes.

pub mod document;
pub mod runtime;

pub use document::RemoteDocument;
pub use runtime::{BridgeRuntime, RuntimeEvent};

use crate::transport::{MessageTarget, TransportError};
use pb_protocol::envelope::{Envelope, EnvelopeError, Source};
use pb_protocol::messages::{Message, PROTOCOL_VERSION};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("bridge runtime is not installed")]
    NotInstalled,

    #[error("deal {0} is not on the board")]
    UnknownDeal(String),

    #[error("stage {0} is not part of the pipeline")]
    UnknownStage(String),

    #[error("protocol version {offered} is not compatible with {supported}")]
    IncompatibleVersion { offered: String, supported: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Encode(#[from] EnvelopeError),
}

/// Type alias for Result with RuntimeError.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Post `message` to the parent window, targeted at `host_origin`.
fn send_to_host(
    parent: &dyn MessageTarget,
    host_origin: &str,
    message: Message,
) -> RuntimeResult<()> {
    post_to_host(parent, host_origin, &message.into_envelope(Source::Remote)?)
}

fn post_to_host(
    parent: &dyn MessageTarget,
    host_origin: &str,
    envelope: &Envelope,
) -> RuntimeResult<()> {
    parent.post_message(envelope, host_origin)?;
    Ok(())
}

/// Whether a host speaking `offered` can talk to this runtime.
///
/// Revisions are compatible when their major numbers match.
pub fn is_compatible(offered: &str) -> bool {
    fn major(version: &str) -> &str {
        version.split('.').next().unwrap_or(version).trim()
    }
    !offered.trim().is_empty() && major(offered) == major(PROTOCOL_VERSION)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_compatibility() {
        assert!(is_compatible("1.0"));
        assert!(is_compatible("1.7"));
        assert!(is_compatible("1"));
        assert!(!is_compatible("2.0"));
        assert!(!is_compatible("0.9"));
        assert!(!is_compatible(""));
    }
}
