//! The host-side bridge controller.
//!
//! A [`BridgeController`] is created once per embedded pipeline frame. It
//! registers a single `message` listener on the [`HostWindow`], binds to a
//! [`RemoteFrame`] through [`BridgeController::set_iframe`] and runs the
//! handshake:
//!
//! 1. wait for `REMOTE_READY` (bounded by the ready timeout)
//! 2. install the runtime directly, or send `INSTALL_BRIDGE` when the frame
//!    refuses direct access
//! 3. after the settle delay, send `CRM_INIT` with the full snapshot
//! 4. wait for `CRM_INIT_COMPLETE` (bounded by the handshake timeout)
//!
//! Timers are tokio tasks holding a weak reference and the epoch they were
//! armed in; rebinding, failure and teardown bump the epoch so stale timers
//! fall through.

use super::handlers::{HandlerId, HandlerRegistry, MessageFilter};
use super::{BridgeError, BridgeResult};
use crate::config::BridgeConfig;
use crate::guard::OriginGuard;
use crate::reconcile::mapping::to_wire;
use crate::reconcile::{ChangeKind, Outcome, Reconciler};
use crate::state::{ConnectionMachine, Transition, TransitionError};
use crate::store::{ContactLookup, Deal, DealStore};
use crate::transport::{RemoteFrame, TransportError};
use crate::window::{HostWindow, ListenerId, MessageEvent};
use chrono::Utc;
use pb_protocol::deal_models::PipelineDeal;
use pb_protocol::envelope::{Envelope, MessageType, Source};
use pb_protocol::messages::{
    CrmInit, InitAck, InstallBridge, Message, PipelineData, SyncDeals, PROTOCOL_VERSION,
};
use pb_protocol::status_models::{ConnectionState, ConnectionStatus};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

/// Receives a fresh status snapshot after every change.
pub type StatusCallback = Arc<dyn Fn(&ConnectionStatus) + Send + Sync>;

/// Progress of the handshake within the current epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Handshake {
    Idle,
    /// Waiting for `BRIDGE_READY` after `INSTALL_BRIDGE`.
    Installing,
    /// Settle timer armed; `CRM_INIT` not sent yet.
    Settling,
    /// `CRM_INIT` sent; waiting for the acknowledgement.
    AwaitingAck,
}

struct Inner {
    machine: ConnectionMachine,
    status: ConnectionStatus,
    frame: Option<Arc<dyn RemoteFrame>>,
    epoch: u64,
    handshake: Handshake,
    /// `initialize_pipeline` was called before the remote was ready.
    init_requested: bool,
    handlers: HandlerRegistry,
    listener: Option<ListenerId>,
    destroyed: bool,
}

impl Inner {
    /// Copy the machine's view into the status and return a snapshot.
    fn sync_status(&mut self) -> ConnectionStatus {
        let state = self.machine.state();
        self.status.state = state;
        self.status.is_connected = state == ConnectionState::Connected;
        self.status.connection_attempts = self.machine.attempts();
        self.status.retries_exhausted =
            state == ConnectionState::Error && self.machine.is_exhausted();
        self.status.clone()
    }
}

struct Shared {
    config: BridgeConfig,
    guard: OriginGuard,
    window: HostWindow,
    store: Arc<dyn DealStore>,
    contacts: Option<Arc<dyn ContactLookup>>,
    on_status: StatusCallback,
    runtime: Handle,
    inner: Mutex<Inner>,
    reconciler: Mutex<Reconciler>,
}

enum ReadyFollowUp {
    Initialize,
    Settle(u64),
    Nothing,
}

enum InitPlan {
    Resync,
    Install(Arc<dyn RemoteFrame>, u64),
}

impl Shared {
    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reconciler(&self) -> MutexGuard<'_, Reconciler> {
        self.reconciler.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, status: ConnectionStatus) {
        (self.on_status)(&status);
    }

    fn contacts(&self) -> Option<&dyn ContactLookup> {
        self.contacts.as_deref()
    }

    fn wire_deals(&self, deals: &[Deal]) -> Vec<PipelineDeal> {
        deals.iter().map(|deal| to_wire(deal, self.contacts())).collect()
    }

    fn snapshot(&self) -> BridgeResult<PipelineData> {
        let deals = self.store.fetch_deals()?;
        Ok(PipelineData {
            deals: self.wire_deals(&deals),
            stages: self.config.stages.clone(),
        })
    }

    fn post_envelope(&self, frame: &dyn RemoteFrame, envelope: &Envelope) -> BridgeResult<()> {
        frame.post_message(envelope, &self.config.remote_origin)?;
        debug!(kind = %envelope.kind, target = %self.config.remote_origin, "posted message");
        Ok(())
    }

    /// Post to the bound frame. `Ok(false)` when no frame is bound.
    fn post(&self, message: Message) -> BridgeResult<bool> {
        let frame = {
            let inner = self.inner();
            if inner.destroyed {
                return Err(BridgeError::Destroyed);
            }
            inner.frame.clone()
        };
        let Some(frame) = frame else {
            warn!(kind = %message.kind(), "no frame bound, message not sent");
            return Ok(false);
        };
        let envelope = message.into_envelope(Source::Host)?;
        self.post_envelope(frame.as_ref(), &envelope)?;
        Ok(true)
    }

    fn receive(self: &Arc<Self>, event: &MessageEvent) {
        if self.inner().destroyed {
            return;
        }

        let envelope = match self.guard.accept(event, Source::Remote) {
            Ok(envelope) => envelope,
            Err(rejection) => {
                debug!(origin = %event.origin, %rejection, "dropping inbound message");
                return;
            }
        };
        let message = match Message::decode(&envelope) {
            Ok(message) => message,
            Err(err) => {
                debug!(origin = %event.origin, error = %err, "dropping undecodable message");
                return;
            }
        };
        debug!(kind = %envelope.kind, timestamp = envelope.timestamp, "accepted inbound message");

        match &message {
            Message::RemoteReady | Message::BridgeReady => self.on_ready(envelope.kind),
            Message::CrmInitComplete(ack) => self.on_init_ack(*ack),
            Message::DealCreated(_)
            | Message::DealUpdated(_)
            | Message::DealDeleted(_)
            | Message::DealStageChanged(_) => {
                if self.reconcile(&envelope, &message) {
                    self.dispatch(&envelope, &message);
                }
            }
            Message::RequestPipelineData => {
                if let Err(err) = self.resync_from_store() {
                    warn!(error = %err, "could not answer pipeline data request");
                }
            }
            Message::ConnectionError(failure) => {
                self.fail(format!("remote reported an error: {}", failure.error));
            }
            Message::Navigate(_) => self.dispatch(&envelope, &message),
            Message::InstallBridge(_) | Message::CrmInit(_) | Message::SyncDeals(_) => {
                debug!(kind = %envelope.kind, "ignoring host-only message");
            }
        }
    }

    fn on_ready(self: &Arc<Self>, kind: MessageType) {
        let (status, follow_up) = {
            let mut inner = self.inner();
            let from = inner.machine.state();
            if let Err(err) = inner.machine.apply(Transition::Ready) {
                debug!(%kind, error = %err, "ignoring ready signal");
                return;
            }

            let follow_up = match inner.handshake {
                Handshake::Idle if self.config.auto_initialize || inner.init_requested => {
                    ReadyFollowUp::Initialize
                }
                Handshake::Installing if kind == MessageType::BridgeReady => {
                    inner.handshake = Handshake::Settling;
                    ReadyFollowUp::Settle(inner.epoch)
                }
                _ => ReadyFollowUp::Nothing,
            };

            let status = if from == inner.machine.state() {
                None
            } else {
                info!(%kind, attempts = inner.machine.attempts(), "remote is ready");
                Some(inner.sync_status())
            };
            (status, follow_up)
        };

        if let Some(status) = status {
            self.notify(status);
        }
        match follow_up {
            ReadyFollowUp::Initialize => {
                if let Err(err) = self.initialize() {
                    warn!(error = %err, "automatic initialization failed");
                }
            }
            ReadyFollowUp::Settle(epoch) => self.arm_settle(epoch),
            ReadyFollowUp::Nothing => {}
        }
    }

    fn initialize(self: &Arc<Self>) -> BridgeResult<()> {
        let plan = {
            let mut inner = self.inner();
            if inner.destroyed {
                return Err(BridgeError::Destroyed);
            }
            let Some(frame) = inner.frame.clone() else {
                warn!("initialize_pipeline called with no frame bound");
                return Ok(());
            };

            match (inner.machine.state(), inner.handshake) {
                (ConnectionState::Connected, _) => InitPlan::Resync,
                (_, Handshake::Installing | Handshake::Settling | Handshake::AwaitingAck) => {
                    debug!("handshake already in flight");
                    return Ok(());
                }
                (ConnectionState::AwaitingBridge, Handshake::Idle) => {
                    inner.handshake = Handshake::Installing;
                    InitPlan::Install(frame, inner.epoch)
                }
                (ConnectionState::Connecting, _) => {
                    inner.init_requested = true;
                    debug!("remote not ready yet, initialization deferred");
                    return Ok(());
                }
                (state, _) => {
                    debug!(%state, "nothing to initialize");
                    return Ok(());
                }
            }
        };

        match plan {
            InitPlan::Resync => self.resync_from_store(),
            InitPlan::Install(frame, epoch) => self.install(frame.as_ref(), epoch),
        }
    }

    fn install(self: &Arc<Self>, frame: &dyn RemoteFrame, epoch: u64) -> BridgeResult<()> {
        match frame.install_runtime() {
            Ok(()) => {
                info!("bridge runtime installed directly");
                if self.advance_handshake(epoch, Handshake::Installing, Handshake::Settling) {
                    self.arm_settle(epoch);
                }
                Ok(())
            }
            Err(TransportError::CrossOriginBlocked(origin)) => {
                info!(%origin, "direct install refused, sending INSTALL_BRIDGE");
                let envelope = Message::InstallBridge(InstallBridge {
                    protocol_version: PROTOCOL_VERSION.to_string(),
                    host_origin: self.config.host_origin.clone(),
                })
                .into_envelope(Source::Host)?;
                if let Err(err) = self.post_envelope(frame, &envelope) {
                    self.fail(format!("could not send INSTALL_BRIDGE: {err}"));
                    return Err(err);
                }
                self.arm_handshake_timeout(epoch);
                Ok(())
            }
            Err(err) => {
                self.fail(format!("runtime install failed: {err}"));
                Err(err.into())
            }
        }
    }

    fn advance_handshake(&self, epoch: u64, from: Handshake, to: Handshake) -> bool {
        let mut inner = self.inner();
        if inner.destroyed || inner.epoch != epoch || inner.handshake != from {
            return false;
        }
        inner.handshake = to;
        true
    }

    fn send_crm_init(self: &Arc<Self>, epoch: u64) {
        if !self.advance_handshake(epoch, Handshake::Settling, Handshake::AwaitingAck) {
            return;
        }
        let Some(frame) = self.inner().frame.clone() else {
            return;
        };

        let sent = self.snapshot().and_then(|pipeline_data| {
            let deals = pipeline_data.deals.len();
            let stages = pipeline_data.stages.len();
            let envelope = Message::CrmInit(CrmInit {
                crm_info: self.config.crm.clone(),
                pipeline_data,
            })
            .into_envelope(Source::Host)?;
            self.post_envelope(frame.as_ref(), &envelope)?;
            info!(deals, stages, "sent CRM_INIT");
            Ok(())
        });

        match sent {
            Ok(()) => self.arm_handshake_timeout(epoch),
            Err(err) => self.fail(format!("could not send CRM_INIT: {err}")),
        }
    }

    fn on_init_ack(&self, ack: InitAck) {
        let status = {
            let mut inner = self.inner();
            if let Err(err) = inner.machine.apply(Transition::InitAcknowledged) {
                debug!(error = %err, "ignoring CRM_INIT_COMPLETE");
                return;
            }
            inner.handshake = Handshake::Idle;
            inner.init_requested = false;
            inner.status.last_sync = Some(Utc::now());
            inner.status.deal_count = ack.deals_received;
            inner.status.error_message = None;
            info!(
                deals = ack.deals_received,
                stages = ack.stages_received,
                "pipeline handshake complete"
            );
            inner.sync_status()
        };
        self.notify(status);
    }

    fn resync_from_store(&self) -> BridgeResult<()> {
        let deals = self.store.fetch_deals()?;
        self.sync(&deals)
    }

    fn sync(&self, deals: &[Deal]) -> BridgeResult<()> {
        let message = Message::SyncDeals(SyncDeals {
            deals: self.wire_deals(deals),
        });
        if !self.post(message)? {
            return Ok(());
        }

        let status = {
            let mut inner = self.inner();
            inner.status.last_sync = Some(Utc::now());
            inner.status.deal_count = deals.len();
            inner.sync_status()
        };
        debug!(deals = deals.len(), "sent SYNC_DEALS");
        self.notify(status);
        Ok(())
    }

    /// Hand a mutation to the reconciler. Returns whether the store changed.
    fn reconcile(&self, envelope: &Envelope, message: &Message) -> bool {
        let result = self
            .reconciler()
            .apply(envelope, message, self.store.as_ref());

        match result {
            Ok(Outcome::Discarded { deal_id }) => {
                debug!(%deal_id, kind = %envelope.kind, "discarded stale mutation");
                false
            }
            Ok(outcome) => {
                debug!(?outcome, "applied remote mutation");
                true
            }
            Err(err) => {
                warn!(kind = %envelope.kind, error = %err, "dropping remote mutation");
                false
            }
        }
    }

    fn dispatch(&self, envelope: &Envelope, message: &Message) {
        let handlers = self.inner().handlers.matching(envelope.kind);
        for handler in handlers {
            handler(envelope, message);
        }
    }

    fn fail(&self, reason: String) {
        self.fail_if(reason, |_| true);
    }

    /// Move to `Error` if the controller is live and `relevant` still holds.
    fn fail_if(&self, reason: String, relevant: impl FnOnce(&Inner) -> bool) {
        let status = {
            let mut inner = self.inner();
            if inner.destroyed || !relevant(&inner) {
                return;
            }
            let from = inner.machine.state();
            if let Err(err) = inner.machine.apply(Transition::Fail) {
                debug!(error = %err, "failure not recorded");
                return;
            }
            inner.epoch += 1;
            inner.handshake = Handshake::Idle;
            inner.init_requested = false;
            warn!(%from, %reason, "bridge connection failed");
            inner.status.error_message = Some(reason);
            inner.sync_status()
        };
        self.notify(status);
    }

    fn arm_ready_timeout(self: &Arc<Self>, epoch: u64) {
        let weak = Arc::downgrade(self);
        let timeout = self.config.ready_timeout;
        self.runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(shared) = weak.upgrade() {
                shared.fail_if(
                    format!("remote did not announce readiness within {} ms", timeout.as_millis()),
                    |inner| {
                        inner.epoch == epoch && inner.machine.state() == ConnectionState::Connecting
                    },
                );
            }
        });
    }

    fn arm_settle(self: &Arc<Self>, epoch: u64) {
        let weak = Arc::downgrade(self);
        let delay = self.config.settle_delay;
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(shared) = weak.upgrade() {
                shared.send_crm_init(epoch);
            }
        });
    }

    fn arm_handshake_timeout(self: &Arc<Self>, epoch: u64) {
        let weak = Arc::downgrade(self);
        let timeout = self.config.handshake_timeout;
        self.runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(shared) = weak.upgrade() {
                shared.fail_if(
                    format!("handshake not acknowledged within {} ms", timeout.as_millis()),
                    |inner| {
                        inner.epoch == epoch
                            && matches!(
                                inner.handshake,
                                Handshake::Installing | Handshake::AwaitingAck
                            )
                    },
                );
            }
        });
    }

    fn teardown(&self, explicit: bool) {
        let (status, listener) = {
            let mut inner = self.inner();
            if inner.destroyed {
                if explicit {
                    warn!("destroy called on an already destroyed bridge controller");
                }
                return;
            }
            inner.destroyed = true;
            inner.epoch += 1;
            inner.frame = None;
            inner.handshake = Handshake::Idle;
            inner.init_requested = false;
            inner.handlers.clear();
            if let Err(err) = inner.machine.apply(Transition::Detach) {
                debug!(error = %err, "detach not recorded");
            }
            (inner.sync_status(), inner.listener.take())
        };

        if let Some(id) = listener {
            self.window.remove_message_listener(id);
        }
        info!("bridge controller destroyed");
        self.notify(status);
    }
}

/// Host-side endpoint of the pipeline bridge.
///
/// Dropping the controller without calling [`BridgeController::destroy`]
/// performs the same teardown.
pub struct BridgeController {
    shared: Arc<Shared>,
}

impl BridgeController {
    /// Create a controller and register its listener on `window`.
    ///
    /// # Arguments
    ///
    /// * `config` - Validated bridge configuration
    /// * `window` - The host window to listen on
    /// * `store` - The host's deal store; only the reconciler mutates it
    /// * `contacts` - Optional lookup used to decorate outbound deals
    /// * `on_status` - Receives a fresh status after every change
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::NoRuntime`] when called outside a tokio
    /// runtime; the handshake timers need one.
    pub fn new(
        config: BridgeConfig,
        window: HostWindow,
        store: Arc<dyn DealStore>,
        contacts: Option<Arc<dyn ContactLookup>>,
        on_status: StatusCallback,
    ) -> BridgeResult<Self> {
        let runtime = Handle::try_current()?;
        let guard = OriginGuard::new(config.allowed_origins.iter().cloned());
        let machine = ConnectionMachine::new(config.max_attempts);

        let shared = Arc::new(Shared {
            config,
            guard,
            window,
            store,
            contacts,
            on_status,
            runtime,
            inner: Mutex::new(Inner {
                machine,
                status: ConnectionStatus::default(),
                frame: None,
                epoch: 0,
                handshake: Handshake::Idle,
                init_requested: false,
                handlers: HandlerRegistry::default(),
                listener: None,
                destroyed: false,
            }),
            reconciler: Mutex::new(Reconciler::new()),
        });

        let weak: Weak<Shared> = Arc::downgrade(&shared);
        let listener = shared
            .window
            .add_message_listener(Arc::new(move |event: &MessageEvent| {
                if let Some(shared) = weak.upgrade() {
                    shared.receive(event);
                }
            }));
        shared.inner().listener = Some(listener);

        info!(
            remote = %shared.config.remote_url,
            origins = ?shared.guard.origins().collect::<Vec<_>>(),
            "bridge controller created"
        );
        Ok(Self { shared })
    }

    /// Bind or rebind the frame hosting the remote application.
    ///
    /// Moves to `Connecting` and arms the ready timeout. Any handshake in
    /// flight for the previous frame is abandoned. Rebinding out of `Error`
    /// spends an attempt like [`retry`](Self::retry) does and is refused
    /// with [`BridgeError::Transition`] once the budget is gone.
    pub fn set_iframe(&self, frame: Arc<dyn RemoteFrame>) -> BridgeResult<()> {
        let shared = &self.shared;
        let (status, epoch) = {
            let mut inner = shared.inner();
            if inner.destroyed {
                return Err(BridgeError::Destroyed);
            }
            if let Err(err) = inner.machine.apply(Transition::Attach) {
                warn!(error = %err, "frame not attached");
                return Err(err.into());
            }
            inner.frame = Some(frame);
            inner.epoch += 1;
            inner.handshake = Handshake::Idle;
            inner.status.error_message = None;
            (inner.sync_status(), inner.epoch)
        };

        info!(epoch, "frame attached");
        shared.notify(status);
        shared.arm_ready_timeout(epoch);
        Ok(())
    }

    /// Run the handshake, or re-sync when already connected.
    ///
    /// Idempotent: while a handshake is in flight this does nothing, and
    /// before the remote is ready it only records the request.
    pub fn initialize_pipeline(&self) -> BridgeResult<()> {
        self.shared.initialize()
    }

    /// Send `SYNC_DEALS` with `deals` without touching the connection state.
    pub fn sync_deals(&self, deals: &[Deal]) -> BridgeResult<()> {
        self.shared.sync(deals)
    }

    /// Reload the frame after a failure.
    ///
    /// Returns `false` without reloading when not in `Error`, when no frame
    /// is bound, or once the attempt budget is spent.
    pub fn retry(&self) -> bool {
        let shared = &self.shared;
        let (status, frame, epoch) = {
            let mut inner = shared.inner();
            if inner.destroyed {
                warn!("retry called after destroy");
                return false;
            }
            let Some(frame) = inner.frame.clone() else {
                warn!("retry called with no frame bound");
                return false;
            };

            match inner.machine.apply(Transition::Retry) {
                Ok(_) => {}
                Err(err @ TransitionError::AttemptsExhausted { .. }) => {
                    warn!(error = %err, "not retrying");
                    let status = inner.sync_status();
                    drop(inner);
                    shared.notify(status);
                    return false;
                }
                Err(err) => {
                    debug!(error = %err, "retry ignored");
                    return false;
                }
            }

            inner.epoch += 1;
            inner.handshake = Handshake::Idle;
            inner.init_requested = false;
            inner.status.error_message = None;
            (inner.sync_status(), frame, inner.epoch)
        };

        info!(attempts = status.connection_attempts, "retrying connection");
        shared.notify(status);

        if let Err(err) = frame.reload() {
            shared.fail(format!("frame reload failed: {err}"));
            return true;
        }
        shared.arm_ready_timeout(epoch);
        true
    }

    /// Register a handler for accepted deal mutations and `NAVIGATE`.
    ///
    /// Every matching handler is invoked, in registration order.
    pub fn on_message<F>(&self, filter: impl Into<MessageFilter>, handler: F) -> HandlerId
    where
        F: Fn(&Envelope, &Message) + Send + Sync + 'static,
    {
        self.shared
            .inner()
            .handlers
            .register(filter.into(), Arc::new(handler))
    }

    /// Remove a handler. Returns `false` if it was not registered.
    pub fn off_message(&self, id: HandlerId) -> bool {
        self.shared.inner().handlers.remove(id)
    }

    /// Announce a local change to the remote side.
    ///
    /// The change is recorded with the reconciler either way; it is only
    /// posted while connected, since the next handshake snapshot carries it
    /// otherwise.
    pub fn publish_deal(&self, deal: &Deal, change: ChangeKind) -> BridgeResult<()> {
        let shared = &self.shared;
        let (frame, connected) = {
            let inner = shared.inner();
            if inner.destroyed {
                return Err(BridgeError::Destroyed);
            }
            (
                inner.frame.clone(),
                inner.machine.state() == ConnectionState::Connected,
            )
        };

        let envelope = shared.reconciler().publish(deal, change, shared.contacts())?;
        match frame {
            Some(frame) if connected => shared.post_envelope(frame.as_ref(), &envelope),
            _ => {
                debug!(deal_id = %deal.id, kind = %envelope.kind, "not connected, change deferred to next snapshot");
                Ok(())
            }
        }
    }

    /// Report that the frame failed to load.
    pub fn frame_load_failed(&self, reason: impl Into<String>) {
        self.shared.fail(reason.into());
    }

    /// Detach from the window and drop all handlers.
    ///
    /// A second call only logs a warning.
    pub fn destroy(&self) {
        self.shared.teardown(true);
    }

    /// Current status snapshot.
    pub fn status(&self) -> ConnectionStatus {
        self.shared.inner().status.clone()
    }

    /// The configuration the controller was built with.
    pub fn config(&self) -> &BridgeConfig {
        &self.shared.config
    }

    /// Whether [`destroy`](Self::destroy) has run. A destroyed controller
    /// refuses every further operation.
    pub fn is_destroyed(&self) -> bool {
        self.shared.inner().destroyed
    }
}

impl Drop for BridgeController {
    fn drop(&mut self) {
        self.shared.teardown(false);
    }
}
