//! Origin guard: the first and only gate for inbound messages.
//!
//! An event is accepted only if its origin is in the allow-list (exact
//! string equality), its payload is a well-formed [`Envelope`], the envelope
//! carries the expected `source` tag and its type may legally be sent by
//! that source. Every failure is a [`Rejection`]; callers stop processing on
//! any `Err`.

use crate::window::MessageEvent;
use pb_protocol::envelope::{Envelope, EnvelopeError, MessageType, Source};
use std::collections::BTreeSet;
use thiserror::Error;

/// Why an inbound event was dropped.
#[derive(Error, Debug)]
pub enum Rejection {
    #[error("origin {0:?} is not allowed")]
    UntrustedOrigin(String),

    #[error(transparent)]
    Malformed(#[from] EnvelopeError),

    #[error("expected source {expected}, got {found}")]
    WrongSource { expected: Source, found: Source },

    #[error("{kind} may not be sent by {sender}")]
    WrongDirection { kind: MessageType, sender: Source },
}

/// Exact-match origin allow-list.
#[derive(Debug, Clone, Default)]
pub struct OriginGuard {
    allowed: BTreeSet<String>,
}

impl OriginGuard {
    pub fn new<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: origins.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether `origin` is allowed. No prefix, suffix or substring matching.
    pub fn allows(&self, origin: &str) -> bool {
        self.allowed.contains(origin)
    }

    pub fn origins(&self) -> impl Iterator<Item = &str> {
        self.allowed.iter().map(String::as_str)
    }

    /// Validate `event` and return its envelope.
    ///
    /// `expected` is the source tag the receiving side expects, i.e. the
    /// peer's tag.
    pub fn accept(&self, event: &MessageEvent, expected: Source) -> Result<Envelope, Rejection> {
        if !self.allows(&event.origin) {
            return Err(Rejection::UntrustedOrigin(event.origin.clone()));
        }

        let envelope = Envelope::from_value(event.data.clone())?;

        if envelope.source != expected {
            return Err(Rejection::WrongSource {
                expected,
                found: envelope.source,
            });
        }

        if !envelope.kind.allowed_from(envelope.source) {
            return Err(Rejection::WrongDirection {
                kind: envelope.kind,
                sender: envelope.source,
            });
        }

        Ok(envelope)
    }
}
