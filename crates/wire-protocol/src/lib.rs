pub mod backend;
pub mod envelope;

pub use backend::{
    AgentStatus, BackendClient, BackendError, CompressionJob, CompressionJobStatus,
    ListCompressionJobsRequest, ListCompressionJobsResponse, SystemStatus,
};
pub use envelope::{error_codes, now_rfc3339, Event, MessageType};
