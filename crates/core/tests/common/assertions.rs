//! Custom assertion helpers for the integration tests.

use pb_protocol::status_models::{ConnectionState, ConnectionStatus};
use std::future::Future;
use std::time::Duration;

/// Assert the state and the derived `is_connected` flag together.
#[allow(dead_code)]
pub fn assert_state(status: &ConnectionStatus, expected: ConnectionState) {
    assert_eq!(status.state, expected, "unexpected state in {status:?}");
    assert_eq!(
        status.is_connected,
        expected == ConnectionState::Connected,
        "is_connected out of sync in {status:?}"
    );
}

/// Poll `condition` every 10 ms until it holds, panicking after `limit`.
#[allow(dead_code)]
pub async fn wait_until<F, Fut>(limit: Duration, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let step = Duration::from_millis(10);
    let mut waited = Duration::ZERO;
    while !condition().await {
        assert!(waited < limit, "condition not met within {limit:?}");
        tokio::time::sleep(step).await;
        waited += step;
    }
}
