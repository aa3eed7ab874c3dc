// Real-time WebSocket event fan-out core for the NAS management API.
// Multiplexes polled backend state -- system metrics, compression job
// progress, agent status -- to many browser/desktop clients over a single
// `/ws` endpoint, degrading gracefully when the backend is unavailable and
// shedding slow clients under backpressure.
//
// Module layout mirrors the dependency order leaves-first: `breaker` and
// `backend` have no internal dependents, `hub` depends on nothing but
// `wire-protocol`, `poller` depends on both `hub` and `breaker`, and `ws`/
// `http`/`shutdown` are the glue that wires a running `Hub` and `PollerGroup`
// to an axum server and its lifecycle.

pub mod backend;
pub mod breaker;
pub mod config;
pub mod hub;
pub mod http;
pub mod poller;
pub mod shutdown;
pub mod ws;

use std::sync::Arc;

use tokio::sync::watch;
use wire_protocol::BackendClient;

pub use config::HubConfig;
pub use hub::Hub;
pub use poller::{PollerGroup, PollerMetricsHandle};

/// Shared state handed to every axum handler. Cheap to clone: `Hub` is
/// itself a handle around a handful of `mpsc::Sender`s, `shutdown` is a
/// `watch::Receiver`, and `poller_metrics` is a handle of `Arc`s.
#[derive(Clone)]
pub struct AppState {
    pub hub: Hub,
    pub config: HubConfig,
    pub shutdown: watch::Receiver<bool>,
    pub poller_metrics: PollerMetricsHandle,
}

/// Spawns the Hub and the poller task group and returns everything
/// `main.rs` needs to build the router and drive graceful shutdown.
pub struct Runtime {
    pub state: AppState,
    pub hub_join: tokio::task::JoinHandle<()>,
    pub poller: PollerGroup,
    pub shutdown_tx: watch::Sender<bool>,
}

pub fn start(config: HubConfig, backend: Arc<dyn BackendClient>) -> Runtime {
    let (hub, hub_join) = Hub::spawn();
    let (poller, poller_metrics) = PollerGroup::spawn(&config, backend, hub.clone());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    Runtime {
        state: AppState {
            hub,
            config,
            shutdown: shutdown_rx,
            poller_metrics,
        },
        hub_join,
        poller,
        shutdown_tx,
    }
}
