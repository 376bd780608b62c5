//! Handshake, timeout and retry behavior of the bridge controller.

mod common;

use common::*;
use pb_core::bridge::{BridgeController, BridgeError};
use pb_core::state::TransitionError;
use pb_core::config::BridgeConfig;
use pb_core::window::HostWindow;
use pb_protocol::envelope::MessageType;
use pb_protocol::messages::{ConnectionFailure, InitAck, Message, PROTOCOL_VERSION};
use pb_protocol::status_models::ConnectionState;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

struct Harness {
    window: HostWindow,
    frame: Arc<RecordingFrame>,
    store: Arc<RecordingStore>,
    status: StatusLog,
    bridge: BridgeController,
}

impl Harness {
    fn new(config: BridgeConfig, install: InstallBehavior) -> Self {
        let window = HostWindow::new();
        let store = RecordingStore::new(three_deals());
        let status = StatusLog::default();
        let bridge = BridgeController::new(
            config,
            window.clone(),
            store.clone(),
            None,
            status.callback(),
        )
        .unwrap();
        Self {
            window,
            frame: RecordingFrame::new(install),
            store,
            status,
            bridge,
        }
    }

    fn cross_origin() -> Self {
        Self::new(test_config(), InstallBehavior::CrossOrigin)
    }

    fn direct() -> Self {
        Self::new(test_config(), InstallBehavior::Accept)
    }

    fn attach(&self) {
        self.bridge.set_iframe(self.frame.clone()).unwrap();
    }

    fn send(&self, message: Message, timestamp: i64) {
        self.window
            .dispatch_message(&remote_event(REMOTE_ORIGIN, message, timestamp));
    }

    fn ack(&self, deals: usize, stages: usize) {
        self.send(
            Message::CrmInitComplete(InitAck {
                deals_received: deals,
                stages_received: stages,
            }),
            3,
        );
    }

    /// Attach, announce readiness, let the settle delay pass and acknowledge.
    async fn connect(&self) {
        self.attach();
        self.send(Message::RemoteReady, 1);
        sleep(SETTLE + Duration::from_millis(10)).await;
        self.ack(3, 2);
    }
}

#[tokio::test(start_paused = true)]
async fn test_attach_and_ready_moves_to_awaiting_bridge() {
    let h = Harness::direct();

    h.attach();
    assert_state(&h.bridge.status(), ConnectionState::Connecting);

    h.send(Message::RemoteReady, 1);

    let status = h.bridge.status();
    assert_state(&status, ConnectionState::AwaitingBridge);
    assert_eq!(status.connection_attempts, 1);
    assert_eq!(h.frame.installs(), 1);
    assert!(h.store.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_handshake_reports_acknowledged_counts() {
    let h = Harness::direct();
    h.attach();
    h.send(Message::RemoteReady, 1);

    // Nothing is sent before the settle delay elapses.
    sleep(SETTLE - Duration::from_millis(50)).await;
    assert!(h.frame.posted(MessageType::CrmInit).is_empty());

    sleep(Duration::from_millis(60)).await;
    let init = h.frame.posted(MessageType::CrmInit);
    assert_eq!(init.len(), 1);
    let data = &init[0].data;
    assert_eq!(data["pipelineData"]["deals"].as_array().unwrap().len(), 3);
    assert_eq!(data["pipelineData"]["stages"][0]["id"], "lead");
    assert_eq!(data["crmInfo"]["version"], PROTOCOL_VERSION);

    h.ack(3, 2);

    let status = h.bridge.status();
    assert_state(&status, ConnectionState::Connected);
    assert_eq!(status.deal_count, 3);
    assert!(status.last_sync.is_some());
    assert!(status.error_message.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_every_post_targets_the_remote_origin() {
    let h = Harness::direct();
    h.connect().await;
    h.bridge.initialize_pipeline().unwrap();

    let posts = h.frame.posts();
    assert!(!posts.is_empty());
    for (envelope, target) in posts {
        assert_eq!(target, REMOTE_ORIGIN, "{} posted to {target}", envelope.kind);
    }
}

#[tokio::test(start_paused = true)]
async fn test_status_callback_sees_every_transition() {
    let h = Harness::direct();
    h.connect().await;

    let states: Vec<_> = h.status.all().into_iter().map(|s| s.state).collect();
    assert_eq!(
        states,
        vec![
            ConnectionState::Connecting,
            ConnectionState::AwaitingBridge,
            ConnectionState::Connected,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_cross_origin_falls_back_to_install_message() {
    let h = Harness::cross_origin();
    h.attach();
    h.send(Message::RemoteReady, 1);

    let install = h.frame.posted(MessageType::InstallBridge);
    assert_eq!(install.len(), 1);
    assert_eq!(install[0].data["protocolVersion"], PROTOCOL_VERSION);
    assert_eq!(install[0].data["hostOrigin"], HOST_ORIGIN);

    // The handshake waits for the runtime to announce itself.
    sleep(SETTLE * 2).await;
    assert!(h.frame.posted(MessageType::CrmInit).is_empty());

    h.send(Message::BridgeReady, 2);
    sleep(SETTLE + Duration::from_millis(10)).await;
    assert_eq!(h.frame.posted(MessageType::CrmInit).len(), 1);

    h.ack(3, 2);
    assert_state(&h.bridge.status(), ConnectionState::Connected);
    assert_eq!(h.bridge.status().connection_attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn test_initialize_is_idempotent() {
    let h = Harness::direct();
    h.attach();
    h.send(Message::RemoteReady, 1);

    // Handshake in flight: no second install.
    h.bridge.initialize_pipeline().unwrap();
    h.bridge.initialize_pipeline().unwrap();
    assert_eq!(h.frame.installs(), 1);

    sleep(SETTLE + Duration::from_millis(10)).await;
    h.ack(3, 2);

    // Connected: a re-sync, never a second handshake.
    h.bridge.initialize_pipeline().unwrap();
    assert_eq!(h.frame.posted(MessageType::CrmInit).len(), 1);
    assert_eq!(h.frame.posted(MessageType::SyncDeals).len(), 1);
    assert_state(&h.bridge.status(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_initialize_before_ready_is_deferred() {
    let config = test_config().with_auto_initialize(false);
    let h = Harness::new(config, InstallBehavior::Accept);
    h.attach();

    h.bridge.initialize_pipeline().unwrap();
    assert_eq!(h.frame.installs(), 0);

    h.send(Message::RemoteReady, 1);
    assert_eq!(h.frame.installs(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_manual_initialize_without_auto() {
    let config = test_config().with_auto_initialize(false);
    let h = Harness::new(config, InstallBehavior::Accept);
    h.attach();
    h.send(Message::RemoteReady, 1);
    assert_eq!(h.frame.installs(), 0);

    h.bridge.initialize_pipeline().unwrap();
    sleep(SETTLE + Duration::from_millis(10)).await;
    assert_eq!(h.frame.posted(MessageType::CrmInit).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_ready_while_connected_is_rejected() {
    let h = Harness::direct();
    h.connect().await;
    let notifications = h.status.len();

    h.send(Message::RemoteReady, 9);

    assert_state(&h.bridge.status(), ConnectionState::Connected);
    assert_eq!(h.bridge.status().connection_attempts, 1);
    assert_eq!(h.status.len(), notifications);
}

#[tokio::test(start_paused = true)]
async fn test_ready_timeout_enters_error() {
    let h = Harness::direct();
    h.attach();

    sleep(READY_TIMEOUT + Duration::from_millis(10)).await;

    let status = h.bridge.status();
    assert_state(&status, ConnectionState::Error);
    assert!(status
        .error_message
        .as_deref()
        .unwrap()
        .contains("readiness"));
}

#[tokio::test(start_paused = true)]
async fn test_handshake_timeout_enters_error() {
    let h = Harness::direct();
    h.attach();
    h.send(Message::RemoteReady, 1);
    sleep(SETTLE + Duration::from_millis(10)).await;
    assert_eq!(h.frame.posted(MessageType::CrmInit).len(), 1);

    sleep(HANDSHAKE_TIMEOUT + Duration::from_millis(10)).await;

    let status = h.bridge.status();
    assert_state(&status, ConnectionState::Error);
    assert!(status.error_message.unwrap().contains("handshake"));
}

#[tokio::test(start_paused = true)]
async fn test_acknowledged_handshake_does_not_time_out() {
    let h = Harness::direct();
    h.connect().await;

    sleep(READY_TIMEOUT + HANDSHAKE_TIMEOUT).await;

    assert_state(&h.bridge.status(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_rebinding_cancels_pending_handshake() {
    let h = Harness::direct();
    h.attach();
    h.send(Message::RemoteReady, 1);

    let replacement = RecordingFrame::new(InstallBehavior::Accept);
    h.bridge.set_iframe(replacement.clone()).unwrap();
    sleep(SETTLE * 2).await;

    assert!(h.frame.posted(MessageType::CrmInit).is_empty());
    assert!(replacement.posted(MessageType::CrmInit).is_empty());
    assert_state(&h.bridge.status(), ConnectionState::Connecting);
}

#[tokio::test(start_paused = true)]
async fn test_remote_connection_error_then_retry() {
    let h = Harness::direct();
    h.attach();
    h.send(Message::RemoteReady, 1);
    h.send(
        Message::ConnectionError(ConnectionFailure {
            error: "board crashed".to_string(),
        }),
        2,
    );

    let status = h.bridge.status();
    assert_state(&status, ConnectionState::Error);
    assert!(status.error_message.unwrap().contains("board crashed"));

    // The pending settle timer belongs to the failed attempt.
    sleep(SETTLE * 2).await;
    assert!(h.frame.posted(MessageType::CrmInit).is_empty());

    assert!(h.bridge.retry());
    assert_eq!(h.frame.reloads(), 1);
    let status = h.bridge.status();
    assert_state(&status, ConnectionState::Connecting);
    assert!(status.error_message.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_retry_is_capped() {
    let h = Harness::direct();
    h.attach();

    // The remote never answers; each attempt ends in a ready timeout.
    for expected_reloads in 1..=2 {
        sleep(READY_TIMEOUT + Duration::from_millis(10)).await;
        assert_state(&h.bridge.status(), ConnectionState::Error);
        assert!(h.bridge.retry());
        assert_eq!(h.frame.reloads(), expected_reloads);
    }

    sleep(READY_TIMEOUT + Duration::from_millis(10)).await;
    assert!(!h.bridge.retry());
    assert!(!h.bridge.retry());

    let status = h.bridge.status();
    assert_eq!(h.frame.reloads(), 2);
    assert_eq!(status.connection_attempts, 3);
    assert_state(&status, ConnectionState::Error);
    assert!(status.error_message.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_rebind_after_spent_budget_is_refused() {
    let h = Harness::direct();
    h.attach();
    for _ in 1..=2 {
        sleep(READY_TIMEOUT + Duration::from_millis(10)).await;
        assert!(h.bridge.retry());
    }
    sleep(READY_TIMEOUT + Duration::from_millis(10)).await;
    assert!(h.bridge.status().retries_exhausted);
    assert!(!h.bridge.retry());

    let replacement = RecordingFrame::new(InstallBehavior::Accept);
    let err = h.bridge.set_iframe(replacement.clone()).unwrap_err();
    assert!(matches!(
        err,
        BridgeError::Transition(TransitionError::AttemptsExhausted {
            attempts: 3,
            max_attempts: 3
        })
    ));

    h.send(Message::RemoteReady, 50);
    sleep(SETTLE * 2).await;

    let status = h.bridge.status();
    assert_state(&status, ConnectionState::Error);
    assert_eq!(status.connection_attempts, 3);
    assert!(status.retries_exhausted);
    assert_eq!(replacement.installs(), 0);
    assert!(replacement.posts().is_empty());
    assert!(h.frame.posted(MessageType::CrmInit).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_rebind_from_error_spends_an_attempt() {
    let h = Harness::direct();
    h.attach();
    sleep(READY_TIMEOUT + Duration::from_millis(10)).await;
    let failed = h.bridge.status();
    assert_state(&failed, ConnectionState::Error);
    assert!(!failed.retries_exhausted);

    let replacement = RecordingFrame::new(InstallBehavior::Accept);
    h.bridge.set_iframe(replacement.clone()).unwrap();
    let rebound = h.bridge.status();
    assert_state(&rebound, ConnectionState::Connecting);
    assert_eq!(rebound.connection_attempts, 1);
    assert!(rebound.error_message.is_none());

    h.send(Message::RemoteReady, 50);
    let ready = h.bridge.status();
    assert_state(&ready, ConnectionState::AwaitingBridge);
    assert_eq!(ready.connection_attempts, 2);
}

#[tokio::test(start_paused = true)]
async fn test_retry_outside_error_is_refused() {
    let h = Harness::direct();
    h.connect().await;

    assert!(!h.bridge.retry());
    assert_eq!(h.frame.reloads(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_frame_load_failure() {
    let h = Harness::direct();
    h.attach();

    h.bridge.frame_load_failed("net::ERR_BLOCKED_BY_RESPONSE");

    let status = h.bridge.status();
    assert_state(&status, ConnectionState::Error);
    assert_eq!(
        status.error_message.as_deref(),
        Some("net::ERR_BLOCKED_BY_RESPONSE")
    );
}

#[tokio::test(start_paused = true)]
async fn test_destroy_stops_everything() {
    let h = Harness::direct();
    h.attach();
    h.send(Message::RemoteReady, 1);

    h.bridge.destroy();
    assert_eq!(h.window.listener_count(), 0);
    let after_destroy = h.status.len();

    h.send(Message::BridgeReady, 2);
    h.ack(3, 2);
    sleep(READY_TIMEOUT + HANDSHAKE_TIMEOUT).await;

    assert_state(&h.bridge.status(), ConnectionState::Disconnected);
    assert!(h.frame.posted(MessageType::CrmInit).is_empty());
    assert_eq!(h.status.len(), after_destroy);

    h.bridge.destroy();
    assert_eq!(h.status.len(), after_destroy);
}
