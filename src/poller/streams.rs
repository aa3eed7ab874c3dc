// The three backend-driven poll streams and the shared per-cycle contract
// that drives each of them: call the backend through a circuit breaker,
// cache the last good payload, and fall back to a stale copy on failure.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use wire_protocol::{
    error_codes, now_rfc3339, AgentStatus, BackendClient, BackendError, CompressionJobStatus,
    Event, ListCompressionJobsRequest, ListCompressionJobsResponse, MessageType, SystemStatus,
};

use crate::backend::call_with_timeout;
use crate::breaker::{CircuitBreaker, FailureOutcome};
use crate::config::HubConfig;
use crate::hub::Hub;

/// One poll stream's contribution to the wire contract: how to call the
/// backend, what `MessageType` it emits, and how its payload becomes the
/// `data` object of an `Event`.
#[async_trait::async_trait]
pub trait PollTarget: Send + Sync + 'static {
    type Payload: Clone + Send + Sync + 'static;

    fn message_type(&self) -> MessageType;

    /// Stream-specific failure code carried alongside the envelope-level
    /// `code` for diagnostic context.
    fn failed_code(&self) -> &'static str;

    async fn fetch(
        &self,
        backend: &dyn BackendClient,
        timeout: Duration,
    ) -> Result<Self::Payload, BackendError>;

    fn to_json(&self, payload: &Self::Payload) -> serde_json::Value;
}

pub struct SystemStatusTarget;

#[async_trait::async_trait]
impl PollTarget for SystemStatusTarget {
    type Payload = SystemStatus;

    fn message_type(&self) -> MessageType {
        MessageType::SystemStatus
    }

    fn failed_code(&self) -> &'static str {
        error_codes::SYSTEM_STATUS_FAILED
    }

    async fn fetch(
        &self,
        backend: &dyn BackendClient,
        timeout: Duration,
    ) -> Result<SystemStatus, BackendError> {
        call_with_timeout(timeout, backend.get_system_status()).await
    }

    fn to_json(&self, payload: &SystemStatus) -> serde_json::Value {
        serde_json::json!({
            "hostname": payload.hostname,
            "uptime_seconds": payload.uptime_seconds,
            "cpu_percent": payload.cpu_percent,
            "mem_used_bytes": payload.mem_used_bytes,
            "mem_total_bytes": payload.mem_total_bytes,
            "mem_used_percent": payload.mem_used_percent,
            "load_averages": payload.load_averages,
        })
    }
}

pub struct CompressionJobsTarget;

#[async_trait::async_trait]
impl PollTarget for CompressionJobsTarget {
    type Payload = ListCompressionJobsResponse;

    fn message_type(&self) -> MessageType {
        MessageType::CompressionUpdate
    }

    fn failed_code(&self) -> &'static str {
        error_codes::COMPRESSION_JOBS_FAILED
    }

    async fn fetch(
        &self,
        backend: &dyn BackendClient,
        timeout: Duration,
    ) -> Result<ListCompressionJobsResponse, BackendError> {
        call_with_timeout(
            timeout,
            backend.list_compression_jobs(ListCompressionJobsRequest {
                status: None,
                limit: None,
            }),
        )
        .await
    }

    fn to_json(&self, payload: &ListCompressionJobsResponse) -> serde_json::Value {
        let running = payload
            .jobs
            .iter()
            .filter(|job| job.status == CompressionJobStatus::Running)
            .count();
        serde_json::json!({
            "jobs": payload.jobs,
            "total": payload.total,
            "running": running,
        })
    }
}

pub struct AgentStatusTarget;

#[async_trait::async_trait]
impl PollTarget for AgentStatusTarget {
    type Payload = AgentStatus;

    fn message_type(&self) -> MessageType {
        MessageType::AgentStatus
    }

    fn failed_code(&self) -> &'static str {
        error_codes::AGENT_STATUS_FAILED
    }

    async fn fetch(
        &self,
        backend: &dyn BackendClient,
        timeout: Duration,
    ) -> Result<AgentStatus, BackendError> {
        call_with_timeout(timeout, backend.get_agent_status()).await
    }

    fn to_json(&self, payload: &AgentStatus) -> serde_json::Value {
        serde_json::json!({
            "total": payload.total,
            "active": payload.active,
            "idle": payload.idle,
            "busy": payload.busy,
            "initialized": payload.initialized,
        })
    }
}

struct CacheEntry<T> {
    payload: T,
    timestamp: String,
}

/// Runs one poll stream's fixed-interval loop for the lifetime of the
/// process, or until `shutdown` fires. `breaker` is shared with the caller
/// so its state can be read from outside the loop (the `/metrics` endpoint).
pub async fn run_poll_loop<P: PollTarget>(
    target: P,
    backend: Arc<dyn BackendClient>,
    hub: Hub,
    config: HubConfig,
    breaker: Arc<CircuitBreaker>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let cache: Mutex<Option<CacheEntry<P::Payload>>> = Mutex::new(None);
    let mut ticker = tokio::time::interval(config.poll_interval);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                run_cycle(&target, backend.as_ref(), &breaker, &cache, config.backend_call_timeout, &hub).await;
            }
        }
    }
}

/// The per-cycle contract shared by every poll stream.
async fn run_cycle<P: PollTarget>(
    target: &P,
    backend: &dyn BackendClient,
    breaker: &CircuitBreaker,
    cache: &Mutex<Option<CacheEntry<P::Payload>>>,
    call_timeout: Duration,
    hub: &Hub,
) {
    let decision = breaker.should_call().await;
    if !decision.should_call {
        emit_stale(target, cache, hub, error_codes::RPC_UNAVAILABLE).await;
        return;
    }

    match target.fetch(backend, call_timeout).await {
        Ok(payload) => {
            let just_recovered = breaker.record_success().await;
            {
                let mut guard = cache.lock().await;
                *guard = Some(CacheEntry {
                    payload: payload.clone(),
                    timestamp: now_rfc3339(),
                });
            }
            if just_recovered {
                emit_rpc_error(target, hub, error_codes::RPC_RECOVERED).await;
            }

            let mut data = target.to_json(&payload);
            if let Some(obj) = data.as_object_mut() {
                obj.insert("stale".to_owned(), serde_json::json!(false));
            }
            hub.broadcast_if_subscribed(Event::new(target.message_type(), now_rfc3339(), Some(data)))
                .await;
        }
        Err(_err) => match breaker.record_failure().await {
            FailureOutcome::JustOpened => {
                emit_rpc_error(target, hub, error_codes::CIRCUIT_OPEN).await;
                emit_stale(target, cache, hub, error_codes::RPC_UNAVAILABLE).await;
            }
            FailureOutcome::StillClosed => {
                emit_stale(target, cache, hub, error_codes::RPC_FAILURE).await;
            }
            FailureOutcome::StillOpenSilent => {
                emit_stale(target, cache, hub, error_codes::RPC_UNAVAILABLE).await;
            }
        },
    }
}

/// Emits the cached payload with `stale:true` and the given error code.
/// Suppressed entirely if no successful poll has ever populated the cache.
async fn emit_stale<P: PollTarget>(
    target: &P,
    cache: &Mutex<Option<CacheEntry<P::Payload>>>,
    hub: &Hub,
    error_code: &'static str,
) {
    let guard = cache.lock().await;
    let Some(entry) = guard.as_ref() else {
        return;
    };
    let mut data = target.to_json(&entry.payload);
    if let Some(obj) = data.as_object_mut() {
        obj.insert("stale".to_owned(), serde_json::json!(true));
        obj.insert("error_code".to_owned(), serde_json::json!(error_code));
        obj.insert("last_update".to_owned(), serde_json::json!(entry.timestamp));
    }
    hub.broadcast_if_subscribed(Event::new(target.message_type(), now_rfc3339(), Some(data)))
        .await;
}

async fn emit_rpc_error<P: PollTarget>(target: &P, hub: &Hub, code: &'static str) {
    let data = serde_json::json!({
        "code": code,
        "stream_code": target.failed_code(),
        "stream": target.message_type().as_str(),
    });
    hub.broadcast_if_subscribed(Event::new(MessageType::RpcError, now_rfc3339(), Some(data)))
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_support::{MockBackendClient, Outcome};
    use tokio::sync::watch;

    fn sample_system() -> SystemStatus {
        SystemStatus {
            hostname: "nas-1".to_owned(),
            uptime_seconds: 10,
            cpu_percent: 5.0,
            mem_used_bytes: 1,
            mem_total_bytes: 2,
            mem_used_percent: 50.0,
            load_averages: [0.1, 0.2, 0.3],
        }
    }

    fn test_config() -> HubConfig {
        let mut config = HubConfig::default();
        config.poll_interval = Duration::from_millis(10);
        config.backend_call_timeout = Duration::from_millis(50);
        config.breaker_failure_threshold = 3;
        config.breaker_reset_timeout = Duration::from_secs(300);
        config
    }

    #[tokio::test]
    async fn successful_cycle_emits_fresh_event_with_stale_false() {
        let backend = MockBackendClient::new();
        backend.push_system(Outcome::Ok(sample_system()));
        let breaker = CircuitBreaker::new(3, Duration::from_secs(300));
        let cache: Mutex<Option<CacheEntry<SystemStatus>>> = Mutex::new(None);
        let (hub, _join) = crate::hub::Hub::spawn();

        run_cycle(&SystemStatusTarget, &backend, &breaker, &cache, Duration::from_millis(50), &hub).await;

        assert_eq!(breaker.state().await, crate::breaker::BreakerState::Closed);
        assert!(cache.lock().await.is_some());
    }

    #[tokio::test]
    async fn repeated_failures_open_breaker_and_suppress_further_rpc_errors() {
        let backend = MockBackendClient::new();
        for _ in 0..5 {
            backend.push_system(Outcome::Err(BackendError::Transport("down".to_owned())));
        }
        let breaker = CircuitBreaker::new(3, Duration::from_secs(300));
        let cache: Mutex<Option<CacheEntry<SystemStatus>>> = Mutex::new(None);
        let (hub, _join) = crate::hub::Hub::spawn();

        for _ in 0..3 {
            run_cycle(&SystemStatusTarget, &backend, &breaker, &cache, Duration::from_millis(50), &hub).await;
        }
        assert_eq!(breaker.state().await, crate::breaker::BreakerState::Open);

        // Cache stays empty throughout; this just checks run_cycle doesn't panic.
        run_cycle(&SystemStatusTarget, &backend, &breaker, &cache, Duration::from_millis(50), &hub).await;
        assert_eq!(breaker.state().await, crate::breaker::BreakerState::Open);
    }

    #[tokio::test]
    async fn poll_loop_stops_promptly_on_shutdown_signal() {
        let mock = MockBackendClient::new();
        mock.push_system(Outcome::Ok(sample_system()));
        let backend: Arc<dyn BackendClient> = Arc::new(mock);
        let (hub, _join) = crate::hub::Hub::spawn();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let breaker = Arc::new(CircuitBreaker::new(3, Duration::from_secs(300)));
        let handle = tokio::spawn(run_poll_loop(SystemStatusTarget, backend, hub, test_config(), breaker, shutdown_rx));
        tokio::time::sleep(Duration::from_millis(5)).await;
        let _ = shutdown_tx.send(true);

        let result = tokio::time::timeout(Duration::from_millis(200), handle).await;
        assert!(result.is_ok(), "poll loop should stop once shutdown fires");
    }
}
