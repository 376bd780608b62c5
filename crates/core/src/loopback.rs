//! In-process transport between a host window and a remote document.
//!
//! [`spawn_loopback`] starts a task that owns a [`RemoteDocument`] and
//! returns the host-side [`LoopbackFrame`] plus a [`RemoteHandle`] for
//! driving the remote side (loading the document, performing board edits,
//! reading runtime events). Both directions go through unbounded channels,
//! so every post is delivered asynchronously and in order, like
//! `postMessage`.

use crate::remote::{RemoteDocument, RuntimeError, RuntimeEvent, RuntimeResult};
use crate::transport::{MessageTarget, RemoteFrame, TransportError, TransportResult};
use crate::window::{HostWindow, MessageEvent};
use pb_protocol::deal_models::{DealChanges, PipelineDeal};
use pb_protocol::envelope::Envelope;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Board edits a user could make inside the remote application.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteAction {
    CreateDeal {
        title: String,
        value: f64,
        stage: String,
    },
    UpdateDeal {
        deal_id: String,
        changes: DealChanges,
    },
    MoveDeal {
        deal_id: String,
        stage: String,
    },
    DeleteDeal {
        deal_id: String,
    },
    RequestPipelineData,
    Navigate {
        route: String,
    },
    ReportError {
        error: String,
    },
}

enum Command {
    Deliver(MessageEvent),
    Load,
    Reload,
    Install,
    Perform(RemoteAction, oneshot::Sender<RuntimeResult<()>>),
    Deals(oneshot::Sender<Vec<PipelineDeal>>),
}

fn origin_check(expected: &str, actual: &str) -> TransportResult<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(TransportError::OriginMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        })
    }
}

/// The host's view of the loopback frame.
pub struct LoopbackFrame {
    commands: mpsc::UnboundedSender<Command>,
    host_origin: String,
    remote_origin: String,
}

impl LoopbackFrame {
    fn command(&self, command: Command) -> TransportResult<()> {
        self.commands
            .send(command)
            .map_err(|_| TransportError::Detached)
    }

    pub fn is_cross_origin(&self) -> bool {
        self.host_origin != self.remote_origin
    }
}

impl MessageTarget for LoopbackFrame {
    fn post_message(&self, envelope: &Envelope, target_origin: &str) -> TransportResult<()> {
        origin_check(target_origin, &self.remote_origin)?;
        let data = envelope
            .to_value()
            .map_err(|err| TransportError::Failed(err.to_string()))?;
        self.command(Command::Deliver(MessageEvent::new(
            self.host_origin.clone(),
            data,
        )))
    }
}

impl RemoteFrame for LoopbackFrame {
    fn reload(&self) -> TransportResult<()> {
        self.command(Command::Reload)
    }

    fn install_runtime(&self) -> TransportResult<()> {
        if self.is_cross_origin() {
            return Err(TransportError::CrossOriginBlocked(self.remote_origin.clone()));
        }
        self.command(Command::Install)
    }
}

/// The remote document's `window.parent`.
struct ParentPort {
    outbound: mpsc::UnboundedSender<MessageEvent>,
    host_origin: String,
    remote_origin: String,
}

impl MessageTarget for ParentPort {
    fn post_message(&self, envelope: &Envelope, target_origin: &str) -> TransportResult<()> {
        origin_check(target_origin, &self.host_origin)?;
        let data = envelope
            .to_value()
            .map_err(|err| TransportError::Failed(err.to_string()))?;
        self.outbound
            .send(MessageEvent::new(self.remote_origin.clone(), data))
            .map_err(|_| TransportError::Detached)
    }
}

/// Driver for the remote side of a loopback.
pub struct RemoteHandle {
    commands: mpsc::UnboundedSender<Command>,
    events: mpsc::UnboundedReceiver<RuntimeEvent>,
    /// Feeds host-originated events in directly, bypassing the frame.
    window: HostWindow,
    remote_origin: String,
}

impl RemoteHandle {
    fn command(&self, command: Command) -> RuntimeResult<()> {
        self.commands
            .send(command)
            .map_err(|_| RuntimeError::Transport(TransportError::Detached))
    }

    /// Fire the frame's load event: the document announces `REMOTE_READY`.
    pub fn load(&self) -> RuntimeResult<()> {
        self.command(Command::Load)
    }

    /// Perform a board edit and wait for the runtime's verdict.
    pub async fn perform(&self, action: RemoteAction) -> RuntimeResult<()> {
        let (reply, verdict) = oneshot::channel();
        self.command(Command::Perform(action, reply))?;
        verdict
            .await
            .unwrap_or(Err(RuntimeError::Transport(TransportError::Detached)))
    }

    /// The remote board's current deals.
    pub async fn deals(&self) -> Vec<PipelineDeal> {
        let (reply, deals) = oneshot::channel();
        if self.command(Command::Deals(reply)).is_err() {
            return Vec::new();
        }
        deals.await.unwrap_or_default()
    }

    /// Next runtime event, or `None` once the remote task is gone.
    pub async fn next_event(&mut self) -> Option<RuntimeEvent> {
        self.events.recv().await
    }

    /// Runtime event already queued, if any.
    pub fn try_next_event(&mut self) -> Option<RuntimeEvent> {
        self.events.try_recv().ok()
    }

    /// Deliver a raw event to the host window as if sent from `origin`.
    ///
    /// Lets tests and the simulator play a hostile or confused sender.
    pub fn inject_into_host(&self, origin: impl Into<String>, data: serde_json::Value) {
        self.window.dispatch_message(&MessageEvent::new(origin, data));
    }

    pub fn remote_origin(&self) -> &str {
        &self.remote_origin
    }
}

fn perform(document: &mut RemoteDocument, action: RemoteAction) -> RuntimeResult<()> {
    let runtime = document.runtime_mut()?;
    match action {
        RemoteAction::CreateDeal {
            title,
            value,
            stage,
        } => runtime.create_deal(title, value, stage).map(|_| ()),
        RemoteAction::UpdateDeal { deal_id, changes } => runtime.update_deal(&deal_id, changes),
        RemoteAction::MoveDeal { deal_id, stage } => runtime.move_deal(&deal_id, &stage),
        RemoteAction::DeleteDeal { deal_id } => runtime.delete_deal(&deal_id),
        RemoteAction::RequestPipelineData => runtime.request_pipeline_data(),
        RemoteAction::Navigate { route } => runtime.navigate(route),
        RemoteAction::ReportError { error } => runtime.report_error(error),
    }
}

/// Wire a remote document to `window` and return both ends.
///
/// Must be called from within a tokio runtime. The document is not loaded
/// until [`RemoteHandle::load`] is called.
pub fn spawn_loopback(
    window: HostWindow,
    host_origin: &str,
    remote_origin: &str,
) -> (Arc<LoopbackFrame>, RemoteHandle) {
    let (commands_tx, mut commands_rx) = mpsc::unbounded_channel::<Command>();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<MessageEvent>();
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let parent: Arc<dyn MessageTarget> = Arc::new(ParentPort {
        outbound: outbound_tx,
        host_origin: host_origin.to_string(),
        remote_origin: remote_origin.to_string(),
    });

    // Remote -> host delivery.
    let delivery_window = window.clone();
    tokio::spawn(async move {
        while let Some(event) = outbound_rx.recv().await {
            delivery_window.dispatch_message(&event);
        }
    });

    // The remote document's event loop.
    let (doc_origin, doc_host) = (remote_origin.to_string(), host_origin.to_string());
    tokio::spawn(async move {
        let fresh = || {
            RemoteDocument::new(
                doc_origin.clone(),
                doc_host.clone(),
                Arc::clone(&parent),
                events_tx.clone(),
            )
        };
        let mut document = fresh();

        while let Some(command) = commands_rx.recv().await {
            match command {
                Command::Deliver(event) => document.receive(&event),
                Command::Load => {
                    if let Err(err) = document.loaded() {
                        warn!(error = %err, "document could not announce itself");
                    }
                }
                Command::Reload => {
                    debug!(origin = %doc_origin, "reloading document");
                    document = fresh();
                    if let Err(err) = document.loaded() {
                        warn!(error = %err, "document could not announce itself");
                    }
                }
                Command::Install => {
                    if let Err(err) = document.install_bridge() {
                        warn!(error = %err, "direct runtime install failed");
                    }
                }
                Command::Perform(action, reply) => {
                    // The caller may have stopped waiting.
                    let _ = reply.send(perform(&mut document, action));
                }
                Command::Deals(reply) => {
                    let deals = document
                        .runtime()
                        .map(|runtime| runtime.deals().to_vec())
                        .unwrap_or_default();
                    let _ = reply.send(deals);
                }
            }
        }
        debug!(origin = %doc_origin, "remote document task finished");
    });

    let frame = Arc::new(LoopbackFrame {
        commands: commands_tx.clone(),
        host_origin: host_origin.to_string(),
        remote_origin: remote_origin.to_string(),
    });
    let handle = RemoteHandle {
        commands: commands_tx,
        events: events_rx,
        window,
        remote_origin: remote_origin.to_string(),
    };
    (frame, handle)
}
