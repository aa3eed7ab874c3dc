// Binary entrypoint: turns the process environment into a `HubConfig`,
// constructs a `BackendClient`, starts the Hub/poller runtime, and serves
// the axum router with graceful shutdown.

use std::env;
use std::sync::Arc;

use nas_event_hub::{http, shutdown, HubConfig};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use wire_protocol::{
    AgentStatus, BackendClient, BackendError, CompressionJob, ListCompressionJobsRequest,
    ListCompressionJobsResponse, SystemStatus,
};

/// Stand-in `BackendClient` for running the hub standalone. Wiring an
/// actual compression engine / agent runtime / system probe implementation
/// in here is the one piece of assembly left to the service that embeds
/// this crate.
struct UnimplementedBackend;

#[async_trait::async_trait]
impl BackendClient for UnimplementedBackend {
    async fn get_system_status(&self) -> Result<SystemStatus, BackendError> {
        Err(BackendError::MethodNotFound("get_system_status".to_owned()))
    }

    async fn list_compression_jobs(
        &self,
        _request: ListCompressionJobsRequest,
    ) -> Result<ListCompressionJobsResponse, BackendError> {
        Err(BackendError::MethodNotFound("list_compression_jobs".to_owned()))
    }

    async fn get_compression_job(&self, _id: &str) -> Result<CompressionJob, BackendError> {
        Err(BackendError::MethodNotFound("get_compression_job".to_owned()))
    }

    async fn get_agent_status(&self) -> Result<AgentStatus, BackendError> {
        Err(BackendError::MethodNotFound("get_agent_status".to_owned()))
    }
}

fn config_from_env() -> HubConfig {
    let mut config = HubConfig::default();
    if let Ok(addr) = env::var("BIND_ADDR") {
        config.bind_addr = addr;
    }
    config
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_env("LOG_LEVEL").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = config_from_env();
    let backend: Arc<dyn BackendClient> = Arc::new(UnimplementedBackend);

    let nas_event_hub::Runtime { state, hub_join, poller, shutdown_tx } =
        nas_event_hub::start(config.clone(), backend);
    let bind_addr = config.bind_addr.clone();
    let shutdown_deadline = config.shutdown_deadline;

    let hub_for_shutdown = state.hub.clone();
    let router = http::build_router(state);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .unwrap_or_else(|err| panic!("failed to bind {bind_addr}: {err}"));
    info!(addr = %bind_addr, "nas-event-hub listening");

    let shutdown_future = async move {
        wait_for_terminate_signal().await;
        shutdown::orchestrate(&hub_for_shutdown, poller, shutdown_tx, shutdown_deadline).await;
    };

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_future)
        .await
        .expect("server error");

    // The router (and with it its `Hub` clone) has just been dropped by
    // `axum::serve` returning. Once every other clone drops too, the Hub
    // loop stops on its own.
    if tokio::time::timeout(shutdown_deadline, hub_join).await.is_err() {
        warn!("hub loop did not stop within the shutdown deadline");
    }
    info!("nas-event-hub stopped");
}

async fn wait_for_terminate_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}
