// Graceful shutdown orchestration. Runs as the future passed to
// `axum::serve(...).with_graceful_shutdown(...)`: by the time it resolves,
// every connected client has been notified and every session has had its
// chance to drain inside the soft deadline, mirroring the reference
// server's own `shutdown_signal` -> `axum::serve` wiring but with a core of
// actual work to do before the process is allowed to exit.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};
use wire_protocol::{error_codes, now_rfc3339, Event, MessageType};

use crate::hub::Hub;
use crate::poller::PollerGroup;

/// Cancels pollers, notifies clients, then waits for sessions to drain.
/// Stopping the Hub loop itself happens in `main.rs` after `axum::serve`
/// has returned, once every other clone of the `Hub` handle has dropped.
pub async fn orchestrate(hub: &Hub, poller: PollerGroup, shutdown_tx: watch::Sender<bool>, deadline: Duration) {
    info!("graceful shutdown starting");

    // 1. Cancel the poller task group; wait (bounded) for them to exit.
    poller.shutdown(deadline).await;

    // 2. Notify every connected client before closing anything.
    hub.broadcast_all(server_shutdown_event()).await;

    // 3/4. Tell every session's reader to stop. Each session's own task
    // (src/ws.rs) reacts by unregistering, which closes its outbound queue
    // and lets its writer drain and close the socket.
    let _ = shutdown_tx.send(true);

    if tokio::time::timeout(deadline, wait_for_quiescence(hub)).await.is_err() {
        warn!("sessions did not drain within the shutdown deadline; leaving the rest to process exit");
    }

    info!("graceful shutdown drain complete");
}

fn server_shutdown_event() -> Event {
    Event::new(
        MessageType::ConnectionError,
        now_rfc3339(),
        Some(serde_json::json!({
            "code": error_codes::SERVER_SHUTDOWN,
            "severity": "critical",
            "message": "Server is shutting down, please reconnect after restart",
        })),
    )
}

async fn wait_for_quiescence(hub: &Hub) {
    while hub.client_count().await > 0 {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_shutdown_event_carries_the_documented_code_and_severity() {
        let event = server_shutdown_event();
        assert_eq!(event.kind, MessageType::ConnectionError);
        let data = event.data.expect("shutdown event must carry data");
        assert_eq!(data["code"], error_codes::SERVER_SHUTDOWN);
        assert_eq!(data["severity"], "critical");
    }
}
