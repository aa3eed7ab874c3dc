// One task per poll stream plus one heartbeat task, all cancellable together
// through a single `watch` signal.

pub mod streams;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;
use wire_protocol::{now_rfc3339, BackendClient, Event, MessageType};

use crate::breaker::{BreakerState, CircuitBreaker};
use crate::config::HubConfig;
use crate::hub::Hub;

/// Owns every poll/heartbeat task and the signal used to cancel them as a group.
pub struct PollerGroup {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

/// Read-only view onto the breaker each poll stream keeps, for the HTTP
/// layer's metrics endpoint. Cloning is cheap: every entry is an `Arc`.
#[derive(Clone)]
pub struct PollerMetricsHandle {
    breakers: Vec<(&'static str, Arc<CircuitBreaker>)>,
}

impl PollerMetricsHandle {
    pub async fn snapshot(&self) -> Vec<(&'static str, BreakerState)> {
        let mut out = Vec::with_capacity(self.breakers.len());
        for (stream, breaker) in &self.breakers {
            out.push((*stream, breaker.state().await));
        }
        out
    }
}

impl PollerGroup {
    pub fn spawn(config: &HubConfig, backend: Arc<dyn BackendClient>, hub: Hub) -> (Self, PollerMetricsHandle) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let system_breaker = Arc::new(CircuitBreaker::new(config.breaker_failure_threshold, config.breaker_reset_timeout));
        let compression_breaker = Arc::new(CircuitBreaker::new(config.breaker_failure_threshold, config.breaker_reset_timeout));
        let agent_breaker = Arc::new(CircuitBreaker::new(config.breaker_failure_threshold, config.breaker_reset_timeout));

        let handles = vec![
            tokio::spawn(streams::run_poll_loop(
                streams::SystemStatusTarget,
                backend.clone(),
                hub.clone(),
                config.clone(),
                system_breaker.clone(),
                shutdown_rx.clone(),
            )),
            tokio::spawn(streams::run_poll_loop(
                streams::CompressionJobsTarget,
                backend.clone(),
                hub.clone(),
                config.clone(),
                compression_breaker.clone(),
                shutdown_rx.clone(),
            )),
            tokio::spawn(streams::run_poll_loop(
                streams::AgentStatusTarget,
                backend,
                hub.clone(),
                config.clone(),
                agent_breaker.clone(),
                shutdown_rx.clone(),
            )),
            tokio::spawn(run_heartbeat_loop(hub, config.heartbeat_interval, shutdown_rx)),
        ];

        let metrics = PollerMetricsHandle {
            breakers: vec![
                (MessageType::SystemStatus.as_str(), system_breaker),
                (MessageType::CompressionUpdate.as_str(), compression_breaker),
                (MessageType::AgentStatus.as_str(), agent_breaker),
            ],
        };

        (Self { shutdown_tx, handles }, metrics)
    }

    /// Signals every task to stop and waits up to `deadline` for them to
    /// exit. Tasks still running past the deadline are left for the process
    /// to reap on exit.
    pub async fn shutdown(self, deadline: Duration) {
        let _ = self.shutdown_tx.send(true);
        if tokio::time::timeout(deadline, futures_util::future::join_all(self.handles))
            .await
            .is_err()
        {
            warn!("poller group did not stop within the shutdown deadline");
        }
    }
}

async fn run_heartbeat_loop(hub: Hub, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let clients_connected = hub.client_count().await;
                let data = serde_json::json!({"clients_connected": clients_connected});
                hub.broadcast_if_subscribed(Event::new(MessageType::Heartbeat, now_rfc3339(), Some(data)))
                    .await;
            }
        }
    }
}
