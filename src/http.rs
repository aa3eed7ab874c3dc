// HTTP surface alongside the WebSocket endpoint: liveness/readiness probes
// and a JSON metrics snapshot. Grounded in the reference server's
// `build_router`, which assembles the WS route next to a couple of plain
// `axum::routing::get` handlers the same way.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::hub::HubMetrics;
use crate::ws::ws_handler;
use crate::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Serialize)]
struct ReadyBody {
    clients_connected: usize,
}

/// Ready as soon as the Hub loop is accepting registrations; the pollers
/// serve stale/cached data from their first cycle regardless, so there's no
/// separate warm-up phase to wait out.
async fn readyz(State(state): State<AppState>) -> Json<ReadyBody> {
    Json(ReadyBody {
        clients_connected: state.hub.client_count().await,
    })
}

#[derive(Serialize)]
struct BreakerStatus {
    stream: &'static str,
    state: &'static str,
}

#[derive(Serialize)]
struct MetricsBody {
    clients_connected: usize,
    slow_client_drops: u64,
    breakers: Vec<BreakerStatus>,
}

impl MetricsBody {
    fn new(hub: HubMetrics, breakers: Vec<(&'static str, crate::breaker::BreakerState)>) -> Self {
        Self {
            clients_connected: hub.clients_connected,
            slow_client_drops: hub.slow_client_drops,
            breakers: breakers
                .into_iter()
                .map(|(stream, state)| BreakerStatus { stream, state: state.as_str() })
                .collect(),
        }
    }
}

async fn metrics(State(state): State<AppState>) -> Json<MetricsBody> {
    let hub = state.hub.metrics().snapshot().await;
    let breakers = state.poller_metrics.snapshot().await;
    Json(MetricsBody::new(hub, breakers))
}
