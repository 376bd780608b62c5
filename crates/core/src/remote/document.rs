//! The remote application's document.

use super::runtime::{BridgeRuntime, RuntimeEvent};
use super::{is_compatible, send_to_host, RuntimeError, RuntimeResult};
use crate::guard::OriginGuard;
use crate::transport::MessageTarget;
use crate::window::MessageEvent;
use pb_protocol::envelope::Source;
use pb_protocol::messages::{ConnectionFailure, InstallBridge, Message, PROTOCOL_VERSION};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// A loaded pipeline document inside the host's frame.
///
/// Holds at most one [`BridgeRuntime`]. Installing twice re-announces the
/// existing runtime instead of replacing it, so deals received earlier
/// survive.
pub struct RemoteDocument {
    origin: String,
    host_origin: String,
    parent: Arc<dyn MessageTarget>,
    guard: OriginGuard,
    runtime: Option<BridgeRuntime>,
    events: mpsc::UnboundedSender<RuntimeEvent>,
}

impl RemoteDocument {
    /// # Arguments
    ///
    /// * `origin` - This document's own origin
    /// * `host_origin` - The only origin accepted as sender and used as target
    /// * `parent` - The embedding window
    /// * `events` - Sink for runtime events
    pub fn new(
        origin: impl Into<String>,
        host_origin: impl Into<String>,
        parent: Arc<dyn MessageTarget>,
        events: mpsc::UnboundedSender<RuntimeEvent>,
    ) -> Self {
        let host_origin = host_origin.into();
        Self {
            origin: origin.into(),
            guard: OriginGuard::new([host_origin.clone()]),
            host_origin,
            parent,
            runtime: None,
            events,
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Announce that the document finished loading.
    pub fn loaded(&self) -> RuntimeResult<()> {
        debug!(origin = %self.origin, "document loaded");
        send_to_host(self.parent.as_ref(), &self.host_origin, Message::RemoteReady)
    }

    /// Construct the runtime, or re-announce it when already present.
    pub fn install_bridge(&mut self) -> RuntimeResult<()> {
        match &self.runtime {
            Some(runtime) => {
                debug!("bridge runtime already installed, re-announcing");
                runtime.announce()
            }
            None => {
                let runtime = BridgeRuntime::new(
                    Arc::clone(&self.parent),
                    self.host_origin.clone(),
                    self.events.clone(),
                );
                runtime.announce()?;
                info!(origin = %self.origin, "bridge runtime installed");
                self.runtime = Some(runtime);
                Ok(())
            }
        }
    }

    pub fn runtime(&self) -> Option<&BridgeRuntime> {
        self.runtime.as_ref()
    }

    pub fn runtime_mut(&mut self) -> RuntimeResult<&mut BridgeRuntime> {
        self.runtime.as_mut().ok_or(RuntimeError::NotInstalled)
    }

    /// Entry point for `message` events delivered to this document.
    pub fn receive(&mut self, event: &MessageEvent) {
        let envelope = match self.guard.accept(event, Source::Host) {
            Ok(envelope) => envelope,
            Err(rejection) => {
                debug!(origin = %event.origin, %rejection, "document dropping message");
                return;
            }
        };
        let message = match Message::decode(&envelope) {
            Ok(message) => message,
            Err(err) => {
                debug!(error = %err, "document dropping undecodable message");
                return;
            }
        };

        let result = match message {
            Message::InstallBridge(request) => self.install_requested(&request),
            message => match self.runtime.as_mut() {
                Some(runtime) => runtime.handle(&envelope, message),
                None => {
                    debug!(kind = %envelope.kind, "no runtime installed, message dropped");
                    Ok(())
                }
            },
        };

        if let Err(err) = result {
            warn!(kind = %envelope.kind, error = %err, "document failed to handle message");
        }
    }

    fn install_requested(&mut self, request: &InstallBridge) -> RuntimeResult<()> {
        if request.host_origin != self.host_origin {
            debug!(
                requested = %request.host_origin,
                expected = %self.host_origin,
                "INSTALL_BRIDGE names a different host origin"
            );
            return Ok(());
        }

        if !is_compatible(&request.protocol_version) {
            let err = RuntimeError::IncompatibleVersion {
                offered: request.protocol_version.clone(),
                supported: PROTOCOL_VERSION.to_string(),
            };
            warn!(error = %err, "refusing bridge install");
            send_to_host(
                self.parent.as_ref(),
                &self.host_origin,
                Message::ConnectionError(ConnectionFailure {
                    error: err.to_string(),
                }),
            )?;
            return Err(err);
        }

        self.install_bridge()
    }
}
