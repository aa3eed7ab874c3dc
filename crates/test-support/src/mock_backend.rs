// A scriptable BackendClient for exercising the Poller's circuit-breaker
// and stale-cache behaviour without a real backend, the same role the
// reference repo's MockWsServer plays for forwarder/receiver sessions.

use std::sync::Mutex;
use tokio::time::{sleep, Duration};
use wire_protocol::{
    AgentStatus, BackendClient, BackendError, CompressionJob, ListCompressionJobsRequest,
    ListCompressionJobsResponse, SystemStatus,
};

/// One scripted outcome for a single backend call.
#[derive(Clone)]
pub enum Outcome<T> {
    Ok(T),
    Err(BackendError),
    /// Sleep past any caller-enforced timeout before returning `Ok`.
    Delay(Duration, Box<Outcome<T>>),
}

/// A `BackendClient` whose responses are a pre-scripted queue, consumed one
/// call at a time. Once the queue for a stream is exhausted, the last entry
/// repeats -- mirrors "the backend recovered and now returns this forever"
/// test scenarios without needing to keep re-queueing identical outcomes.
pub struct MockBackendClient {
    system: Mutex<Vec<Outcome<SystemStatus>>>,
    compression: Mutex<Vec<Outcome<ListCompressionJobsResponse>>>,
    agents: Mutex<Vec<Outcome<AgentStatus>>>,
}

impl Default for MockBackendClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackendClient {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(Vec::new()),
            compression: Mutex::new(Vec::new()),
            agents: Mutex::new(Vec::new()),
        }
    }

    pub fn push_system(&self, outcome: Outcome<SystemStatus>) {
        self.system.lock().expect("lock poisoned").push(outcome);
    }

    pub fn push_compression(&self, outcome: Outcome<ListCompressionJobsResponse>) {
        self.compression
            .lock()
            .expect("lock poisoned")
            .push(outcome);
    }

    pub fn push_agents(&self, outcome: Outcome<AgentStatus>) {
        self.agents.lock().expect("lock poisoned").push(outcome);
    }

    fn take<T: Clone>(queue: &Mutex<Vec<Outcome<T>>>) -> Outcome<T> {
        let mut queue = queue.lock().expect("lock poisoned");
        match queue.len() {
            0 => panic!("MockBackendClient: no scripted outcome queued"),
            1 => queue[0].clone(),
            _ => queue.remove(0),
        }
    }

    async fn resolve<T: Clone>(outcome: Outcome<T>) -> Result<T, BackendError> {
        match outcome {
            Outcome::Ok(value) => Ok(value),
            Outcome::Err(err) => Err(err),
            Outcome::Delay(duration, inner) => {
                sleep(duration).await;
                Box::pin(Self::resolve(*inner)).await
            }
        }
    }
}

#[async_trait::async_trait]
impl BackendClient for MockBackendClient {
    async fn get_system_status(&self) -> Result<SystemStatus, BackendError> {
        Self::resolve(Self::take(&self.system)).await
    }

    async fn list_compression_jobs(
        &self,
        _request: ListCompressionJobsRequest,
    ) -> Result<ListCompressionJobsResponse, BackendError> {
        Self::resolve(Self::take(&self.compression)).await
    }

    async fn get_compression_job(&self, id: &str) -> Result<CompressionJob, BackendError> {
        let response = self.list_compression_jobs(ListCompressionJobsRequest::default()).await?;
        response
            .jobs
            .into_iter()
            .find(|job| job.id == id)
            .ok_or(BackendError::NotFound)
    }

    async fn get_agent_status(&self) -> Result<AgentStatus, BackendError> {
        Self::resolve(Self::take(&self.agents)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_system() -> SystemStatus {
        SystemStatus {
            hostname: "nas-1".to_owned(),
            uptime_seconds: 100,
            cpu_percent: 1.0,
            mem_used_bytes: 1,
            mem_total_bytes: 2,
            mem_used_percent: 50.0,
            load_averages: [0.1, 0.2, 0.3],
        }
    }

    #[tokio::test]
    async fn repeats_last_queued_outcome_once_exhausted() {
        let backend = MockBackendClient::new();
        backend.push_system(Outcome::Ok(sample_system()));
        let first = backend.get_system_status().await.unwrap();
        let second = backend.get_system_status().await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn scripted_errors_surface_unchanged() {
        let backend = MockBackendClient::new();
        backend.push_system(Outcome::Err(BackendError::Transport("boom".to_owned())));
        let err = backend.get_system_status().await.unwrap_err();
        assert!(matches!(err, BackendError::Transport(_)));
    }
}
