//! # pb-protocol
//!
//! Wire protocol for the remote pipeline bridge.
//!
//! The host CRM page and the pipeline application embedded in its iframe
//! exchange nothing but [`Envelope`]s. This crate defines those envelopes,
//! their typed payloads and the status shape the host reports to its UI.
//!
//! ## Modules
//!
//! - [`envelope`]: Envelope, message vocabulary and source tags
//! - [`messages`]: Typed payloads and the decoded [`Message`] view
//! - [`deal_models`]: Wire projections of deals and stages
//! - [`status_models`]: Connection state and status snapshot
//!
//! ## Design Principles
//!
//! - Minimal dependencies: serde, chrono, thiserror and ts-rs
//! - TypeScript generation: every wire type derives `TS`, so the remote
//!   application imports a versioned protocol module instead of receiving
//!   injected script
//! - Independent compilation: no dependencies on other pipeline-bridge crates

pub mod deal_models;
pub mod envelope;
pub mod messages;
pub mod status_models;

// Re-export all public types for convenience
pub use deal_models::*;
pub use envelope::*;
pub use messages::*;
pub use status_models::*;
