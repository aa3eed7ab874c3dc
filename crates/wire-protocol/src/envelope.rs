use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

/// RFC3339 UTC -- the wire timestamp format. No Unix-epoch numeric form.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

/// Closed set of recognised `Event::type` tags. Serializes to exactly the
/// dotted wire strings, not a `snake_case`-derived form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::EnumString)]
pub enum MessageType {
    #[serde(rename = "system.status")]
    #[strum(serialize = "system.status")]
    SystemStatus,
    #[serde(rename = "storage.update")]
    #[strum(serialize = "storage.update")]
    StorageUpdate,
    #[serde(rename = "agent.status")]
    #[strum(serialize = "agent.status")]
    AgentStatus,
    #[serde(rename = "compression.update")]
    #[strum(serialize = "compression.update")]
    CompressionUpdate,
    #[serde(rename = "notification")]
    #[strum(serialize = "notification")]
    Notification,
    #[serde(rename = "error")]
    #[strum(serialize = "error")]
    Error,
    #[serde(rename = "rpc_error")]
    #[strum(serialize = "rpc_error")]
    RpcError,
    #[serde(rename = "connection_error")]
    #[strum(serialize = "connection_error")]
    ConnectionError,
    #[serde(rename = "heartbeat")]
    #[strum(serialize = "heartbeat")]
    Heartbeat,
    #[serde(rename = "ping")]
    #[strum(serialize = "ping")]
    Ping,
    #[serde(rename = "pong")]
    #[strum(serialize = "pong")]
    Pong,
    #[serde(rename = "subscribe")]
    #[strum(serialize = "subscribe")]
    Subscribe,
    #[serde(rename = "unsubscribe")]
    #[strum(serialize = "unsubscribe")]
    Unsubscribe,
}

impl MessageType {
    /// Seeded on every new session to avoid losing events sent before a
    /// client's own `subscribe` message arrives.
    pub const DEFAULT_SUBSCRIPTIONS: &'static [MessageType] = &[
        MessageType::SystemStatus,
        MessageType::StorageUpdate,
        MessageType::AgentStatus,
        MessageType::CompressionUpdate,
        MessageType::Notification,
        MessageType::Error,
        MessageType::RpcError,
        MessageType::ConnectionError,
        MessageType::Heartbeat,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::SystemStatus => "system.status",
            MessageType::StorageUpdate => "storage.update",
            MessageType::AgentStatus => "agent.status",
            MessageType::CompressionUpdate => "compression.update",
            MessageType::Notification => "notification",
            MessageType::Error => "error",
            MessageType::RpcError => "rpc_error",
            MessageType::ConnectionError => "connection_error",
            MessageType::Heartbeat => "heartbeat",
            MessageType::Ping => "ping",
            MessageType::Pong => "pong",
            MessageType::Subscribe => "subscribe",
            MessageType::Unsubscribe => "unsubscribe",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The wire envelope carried in both directions on every socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Event {
    pub fn new(kind: MessageType, timestamp: impl Into<String>, data: Option<serde_json::Value>) -> Self {
        Self {
            kind,
            timestamp: timestamp.into(),
            data,
        }
    }
}

/// Frozen error-code strings carried in `error`/`rpc_error`/`connection_error`
/// payloads.
pub mod error_codes {
    pub const RPC_FAILURE: &str = "RPC_FAILURE";
    pub const RPC_UNAVAILABLE: &str = "RPC_UNAVAILABLE";
    pub const RPC_RECOVERED: &str = "RPC_RECOVERED";
    pub const CIRCUIT_OPEN: &str = "CIRCUIT_OPEN";
    pub const SYSTEM_STATUS_FAILED: &str = "SYSTEM_STATUS_FAILED";
    pub const COMPRESSION_JOBS_FAILED: &str = "COMPRESSION_JOBS_FAILED";
    pub const AGENT_STATUS_FAILED: &str = "AGENT_STATUS_FAILED";
    pub const SLOW_CLIENT: &str = "SLOW_CLIENT";
    pub const CLIENT_DISCONNECTED: &str = "CLIENT_DISCONNECTED";
    pub const JSON_MARSHAL_ERROR: &str = "JSON_MARSHAL_ERROR";
    pub const SERVER_SHUTDOWN: &str = "SERVER_SHUTDOWN";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_round_trips_through_wire_strings() {
        let pairs = [
            (MessageType::SystemStatus, "\"system.status\""),
            (MessageType::StorageUpdate, "\"storage.update\""),
            (MessageType::AgentStatus, "\"agent.status\""),
            (MessageType::CompressionUpdate, "\"compression.update\""),
            (MessageType::Notification, "\"notification\""),
            (MessageType::Error, "\"error\""),
            (MessageType::RpcError, "\"rpc_error\""),
            (MessageType::ConnectionError, "\"connection_error\""),
            (MessageType::Heartbeat, "\"heartbeat\""),
            (MessageType::Ping, "\"ping\""),
            (MessageType::Pong, "\"pong\""),
            (MessageType::Subscribe, "\"subscribe\""),
            (MessageType::Unsubscribe, "\"unsubscribe\""),
        ];
        for (kind, wire) in pairs {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, wire);
            let back: MessageType = serde_json::from_str(wire).unwrap();
            assert_eq!(back, kind);
        }
    }

    #[test]
    fn unknown_message_type_is_rejected_on_ingress() {
        let err = serde_json::from_str::<MessageType>("\"totally.unknown\"");
        assert!(err.is_err());
    }

    #[test]
    fn event_omits_null_data_field_when_absent() {
        let event = Event::new(MessageType::Heartbeat, "2026-07-26T00:00:00Z", None);
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("\"data\""));
    }

    #[test]
    fn event_envelope_round_trips() {
        let event = Event::new(
            MessageType::SystemStatus,
            "2026-07-26T00:00:01Z",
            Some(serde_json::json!({"cpu": 12.5})),
        );
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind, MessageType::SystemStatus);
        assert_eq!(back.timestamp, "2026-07-26T00:00:01Z");
        assert_eq!(back.data, Some(serde_json::json!({"cpu": 12.5})));
    }

    #[test]
    fn default_subscriptions_cover_every_poll_driven_and_control_type_but_not_handshake_types() {
        let set = MessageType::DEFAULT_SUBSCRIPTIONS;
        assert!(set.contains(&MessageType::SystemStatus));
        assert!(set.contains(&MessageType::Heartbeat));
        assert!(!set.contains(&MessageType::Subscribe));
        assert!(!set.contains(&MessageType::Ping));
    }
}
