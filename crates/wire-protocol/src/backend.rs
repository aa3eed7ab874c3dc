use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStatus {
    pub hostname: String,
    pub uptime_seconds: u64,
    pub cpu_percent: f64,
    pub mem_used_bytes: u64,
    pub mem_total_bytes: u64,
    pub mem_used_percent: f64,
    pub load_averages: [f64; 3],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionJobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionJob {
    pub id: String,
    pub status: CompressionJobStatus,
    pub input_size_bytes: u64,
    pub output_size_bytes: Option<u64>,
    pub ratio: Option<f64>,
    pub elapsed_seconds: f64,
    pub method: String,
    pub data_type: String,
    pub created_at: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListCompressionJobsRequest {
    pub status: Option<CompressionJobStatus>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListCompressionJobsResponse {
    pub jobs: Vec<CompressionJob>,
    pub total: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentStatus {
    pub total: u32,
    pub active: u32,
    pub idle: u32,
    pub busy: u32,
    pub initialized: u32,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    #[error("not found")]
    NotFound,
    #[error("call timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("method not found: {0}")]
    MethodNotFound(String),
}

impl BackendError {
    /// `NotFound` doesn't count against the circuit breaker; everything else does.
    pub fn counts_against_breaker(&self) -> bool {
        !matches!(self, BackendError::NotFound)
    }
}

/// Implementations are expected to honour `timeout` themselves and return
/// `BackendError::Timeout` rather than hang past it; callers wrap every call
/// in their own timeout regardless.
#[async_trait::async_trait]
pub trait BackendClient: Send + Sync + 'static {
    async fn get_system_status(&self) -> Result<SystemStatus, BackendError>;

    async fn list_compression_jobs(
        &self,
        request: ListCompressionJobsRequest,
    ) -> Result<ListCompressionJobsResponse, BackendError>;

    async fn get_compression_job(&self, id: &str) -> Result<CompressionJob, BackendError>;

    async fn get_agent_status(&self) -> Result<AgentStatus, BackendError>;
}
