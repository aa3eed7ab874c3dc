// Construction-time configuration for the hub.
//
// The core reads no environment variables directly; the binary entrypoint
// (main.rs) is responsible for turning the process environment into this
// struct, the way the reference server's `main.rs` turns `LOG_LEVEL` /
// `BIND_ADDR` into plain arguments before constructing `AppState`.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Address the WebSocket/HTTP listener binds to.
    pub bind_addr: String,
    /// Per-client outbound queue capacity.
    pub client_queue_capacity: usize,
    /// Consecutive failures before a breaker opens.
    pub breaker_failure_threshold: u32,
    /// How long a breaker stays Open before permitting a HalfOpen trial.
    pub breaker_reset_timeout: Duration,
    /// Interval between poll cycles for each poll stream.
    pub poll_interval: Duration,
    /// Per-call backend RPC timeout.
    pub backend_call_timeout: Duration,
    /// Interval between synthesised heartbeat events.
    pub heartbeat_interval: Duration,
    /// Interval between WebSocket control pings sent by the writer task.
    pub ping_interval: Duration,
    /// Per-frame deadline for an outbound message write. A write that
    /// doesn't complete within this counts as a write error.
    pub write_deadline: Duration,
    /// Deadline for a keep-alive control ping. A ping that doesn't complete
    /// within this terminates the writer immediately, the same as a ping
    /// send error.
    pub ping_deadline: Duration,
    /// Soft deadline for graceful shutdown to complete before force-closing.
    pub shutdown_deadline: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_owned(),
            client_queue_capacity: 256,
            breaker_failure_threshold: 5,
            breaker_reset_timeout: Duration::from_secs(5 * 60),
            poll_interval: Duration::from_secs(5),
            backend_call_timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(10),
            ping_interval: Duration::from_secs(30),
            write_deadline: Duration::from_secs(10),
            ping_deadline: Duration::from_secs(30),
            shutdown_deadline: Duration::from_secs(2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_constants() {
        let config = HubConfig::default();
        assert_eq!(config.client_queue_capacity, 256);
        assert_eq!(config.breaker_failure_threshold, 5);
        assert_eq!(config.breaker_reset_timeout, Duration::from_secs(300));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(10));
        assert_eq!(config.ping_interval, Duration::from_secs(30));
        assert_eq!(config.write_deadline, Duration::from_secs(10));
        assert_eq!(config.ping_deadline, Duration::from_secs(30));
    }
}
