//! Transport seams between the two documents.
//!
//! [`MessageTarget`] is anything that can receive a targeted `postMessage`
//! (the iframe's content window from the host, `window.parent` from the
//! remote). [`RemoteFrame`] adds the two frame-level operations the host
//! controller needs: reloading the iframe and installing the bridge runtime
//! directly into it.

use pb_protocol::envelope::Envelope;
use thiserror::Error;

/// Errors raised by a transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The target window is gone (frame unmounted, channel closed).
    #[error("target window is detached")]
    Detached,

    /// The browser refused a direct cross-origin operation.
    #[error("cross-origin access to {0} was blocked")]
    CrossOriginBlocked(String),

    /// The target origin does not match the receiving document.
    #[error("target origin {expected:?} does not match document origin {actual:?}")]
    OriginMismatch { expected: String, actual: String },

    #[error("transport failure: {0}")]
    Failed(String),
}

/// Type alias for Result with TransportError.
pub type TransportResult<T> = Result<T, TransportError>;

/// A window that accepts targeted posts.
pub trait MessageTarget: Send + Sync {
    /// Post `envelope` to the window, to be delivered only if the window's
    /// document has origin `target_origin`.
    fn post_message(&self, envelope: &Envelope, target_origin: &str) -> TransportResult<()>;
}

/// The iframe hosting the remote pipeline application.
pub trait RemoteFrame: MessageTarget {
    /// Reload the frame's document from its source URL.
    fn reload(&self) -> TransportResult<()>;

    /// Install the bridge runtime directly into the frame's document.
    ///
    /// Cross-origin frames refuse this with
    /// [`TransportError::CrossOriginBlocked`]; the controller then falls
    /// back to the `INSTALL_BRIDGE` message.
    fn install_runtime(&self) -> TransportResult<()>;
}
