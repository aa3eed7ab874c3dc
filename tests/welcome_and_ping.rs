//! End-to-end coverage for the handshake: the welcome `notification` must
//! be the first frame a client observes, and a `ping` envelope is answered
//! by exactly one `pong`.

use std::sync::Arc;
use std::time::Duration;

use nas_event_hub::{http, HubConfig};
use test_support::{MockBackendClient, MockWsClient, Outcome};
use wire_protocol::{
    now_rfc3339, AgentStatus, BackendClient, Event, ListCompressionJobsResponse, MessageType,
    SystemStatus,
};

async fn spawn_app(config: HubConfig, backend: Arc<dyn BackendClient>) -> String {
    let nas_event_hub::Runtime { state, .. } = nas_event_hub::start(config, backend);
    let router = http::build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("ws://{addr}/ws")
}

/// `tokio::time::interval`'s first tick fires immediately, so every stream
/// polls once at t=0 regardless of how long the interval is. Seed one
/// repeating `Ok` per stream so that immediate poll (and any further ones
/// during the test) never hits an empty scripted queue.
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

fn quiet_poller_config() -> HubConfig {
    let mut config = HubConfig::default();
    config.poll_interval = Duration::from_secs(3600);
    config.heartbeat_interval = Duration::from_secs(3600);
    config
}

#[tokio::test]
async fn welcome_notification_is_the_first_frame() {
    let url = spawn_app(quiet_poller_config(), quiet_poller_backend()).await;

    let mut client = MockWsClient::connect(&url).await.expect("connect");
    let first = client.recv_event().await.expect("first frame");

    assert_eq!(first.kind, MessageType::Notification);
    let data = first.data.expect("welcome carries data");
    assert!(data.get("client_id").is_some());
    assert!(data.get("default_subscriptions").is_some());
}

#[tokio::test]
async fn ping_is_answered_by_exactly_one_pong() {
    let url = spawn_app(quiet_poller_config(), quiet_poller_backend()).await;

    let mut client = MockWsClient::connect(&url).await.expect("connect");
    client.recv_event().await.expect("welcome"); // drain welcome

    // Unsubscribe from everything broadcast-driven first, so a poll/heartbeat
    // tick landing mid-test can't be mistaken for a second reply -- `pong` is
    // delivered by unicast and bypasses subscription filtering regardless.
    let unsubscribe_all = MessageType::DEFAULT_SUBSCRIPTIONS
        .iter()
        .map(|t| t.as_str())
        .collect::<Vec<_>>();
    client
        .send_event(&Event::new(
            MessageType::Unsubscribe,
            now_rfc3339(),
            Some(serde_json::json!({"types": unsubscribe_all})),
        ))
        .await
        .expect("send unsubscribe");
    tokio::time::sleep(Duration::from_millis(20)).await;

    client
        .send_event(&Event::new(MessageType::Ping, now_rfc3339(), None))
        .await
        .expect("send ping");

    let reply = client.recv_event().await.expect("pong");
    assert_eq!(reply.kind, MessageType::Pong);

    // No second pong shows up for a single ping.
    let second = client.recv_event_timeout(Duration::from_millis(150)).await;
    assert!(second.is_err(), "exactly one pong must be sent per ping");
}
