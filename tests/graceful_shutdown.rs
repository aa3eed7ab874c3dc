//! Every connected client receives a `connection_error` with
//! `SERVER_SHUTDOWN` before its socket closes.

use std::sync::Arc;
use std::time::Duration;

use nas_event_hub::{http, shutdown, HubConfig};
use test_support::{MockBackendClient, MockWsClient, Outcome};
use wire_protocol::{
    error_codes, AgentStatus, BackendClient, ListCompressionJobsResponse, MessageType, SystemStatus,
};

/// `tokio::time::interval`'s first tick fires immediately regardless of the
/// configured interval, so every stream polls once at t=0; seed one
/// repeating `Ok` per stream so that never hits an empty scripted queue.
fn quiet_poller_backend() -> Arc<dyn BackendClient> {
    let backend = MockBackendClient::new();
    backend.push_system(Outcome::Ok(SystemStatus {
        hostname: "nas-1".to_owned(),
        uptime_seconds: 1,
        cpu_percent: 1.0,
        mem_used_bytes: 1,
        mem_total_bytes: 2,
        mem_used_percent: 50.0,
        load_averages: [0.0, 0.0, 0.0],
    }));
    backend.push_compression(Outcome::Ok(ListCompressionJobsResponse {
        jobs: Vec::new(),
        total: 0,
    }));
    backend.push_agents(Outcome::Ok(AgentStatus {
        total: 0,
        active: 0,
        idle: 0,
        busy: 0,
        initialized: 0,
    }));
    Arc::new(backend)
}

async fn spawn_app(config: HubConfig, backend: Arc<dyn BackendClient>) -> (String, nas_event_hub::Runtime) {
    let runtime = nas_event_hub::start(config, backend);
    let router = http::build_router(runtime.state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (format!("ws://{addr}/ws"), runtime)
}

#[tokio::test]
async fn every_client_gets_server_shutdown_before_disconnect() {
    let backend = quiet_poller_backend();
    let mut config = HubConfig::default();
    // Quiet pollers: this scenario is about the shutdown broadcast, not
    // poll-driven traffic racing with it.
    config.poll_interval = Duration::from_secs(3600);
    config.heartbeat_interval = Duration::from_secs(3600);
    config.shutdown_deadline = Duration::from_secs(2);

    let (url, runtime) = spawn_app(config, backend).await;
    let nas_event_hub::Runtime {
        state,
        poller,
        shutdown_tx,
        ..
    } = runtime;

    const CLIENT_COUNT: usize = 10;
    let mut clients = Vec::with_capacity(CLIENT_COUNT);
    for _ in 0..CLIENT_COUNT {
        let mut client = MockWsClient::connect(&url).await.expect("connect");
        client.recv_event().await.expect("welcome");
        clients.push(client);
    }

    // Give the Hub loop a moment to finish registering everyone.
    for _ in 0..100 {
        if state.hub.client_count().await == CLIENT_COUNT {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(state.hub.client_count().await, CLIENT_COUNT);

    let hub = state.hub.clone();
    tokio::spawn(async move {
        shutdown::orchestrate(&hub, poller, shutdown_tx, Duration::from_secs(2)).await;
    });

    for mut client in clients {
        let mut saw_shutdown_notice = false;
        loop {
            match client.recv_event_timeout(Duration::from_secs(2)).await {
                Ok(event) => {
                    if event.kind == MessageType::ConnectionError {
                        let code = event
                            .data
                            .as_ref()
                            .and_then(|d| d.get("code"))
                            .and_then(|v| v.as_str());
                        if code == Some(error_codes::SERVER_SHUTDOWN) {
                            saw_shutdown_notice = true;
                        }
                    }
                }
                Err(_) => break, // socket closed (or timed out) -- end of this client's stream
            }
        }
        assert!(saw_shutdown_notice, "every client must see SERVER_SHUTDOWN before disconnect");
    }

    for _ in 0..100 {
        if state.hub.client_count().await == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(state.hub.client_count().await, 0, "all sessions must drain by the shutdown deadline");
}
