// One connected client: its identity, subscription set, and the reader and
// writer tasks that own its socket. Grounded in the reference receiver's
// `run_session_loop` (tokio::select! biased over a watch-based shutdown
// signal, a thiserror SessionError), generalised from one
// reader/writer-in-one-loop pattern to two independent tasks -- a single
// alternating loop blocks outbound traffic while a read is in flight.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use wire_protocol::{now_rfc3339, Event, MessageType};

use crate::hub::Hub;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("websocket error: {0}")]
    Ws(#[from] axum::Error),
}

/// The Hub's registration-time view of a client: everything it needs before
/// the socket's two tasks are even spawned. `id` and `subscriptions` are
/// shared with the reader (which mutates subscriptions) and the Hub's
/// fan-out loop (which reads them); `queue_capacity` sizes the per-client
/// outbound channel the Hub creates on `register`.
pub struct ClientSession {
    pub id: Uuid,
    pub subscriptions: Arc<RwLock<HashSet<MessageType>>>,
    pub queue_capacity: usize,
}

impl ClientSession {
    pub fn new(queue_capacity: usize, default_subscriptions: HashSet<MessageType>) -> Self {
        Self {
            id: Uuid::new_v4(),
            subscriptions: Arc::new(RwLock::new(default_subscriptions)),
            queue_capacity,
        }
    }
}

/// Reads frames until the socket closes, the peer sends a close frame, or
/// the shutdown signal fires. Returns once it is safe for the caller to
/// unregister the client.
pub async fn run_reader(
    mut stream: SplitStream<WebSocket>,
    client_id: Uuid,
    hub: Hub,
    subscriptions: Arc<RwLock<HashSet<MessageType>>>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), SessionError> {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            frame = stream.next() => {
                match frame {
                    None => {
                        info!(client_id = %client_id, "client closed connection");
                        break;
                    }
                    Some(Err(err)) => {
                        error!(client_id = %client_id, error = %err, "unexpected read error");
                        return Err(SessionError::Ws(err));
                    }
                    Some(Ok(WsMessage::Close(_))) => {
                        info!(client_id = %client_id, "client sent close frame");
                        break;
                    }
                    Some(Ok(WsMessage::Text(text))) => {
                        handle_text_frame(&text, client_id, &hub, &subscriptions).await;
                    }
                    Some(Ok(WsMessage::Binary(_))) => {
                        debug!(client_id = %client_id, "rejecting binary frame");
                    }
                    Some(Ok(_)) => {
                        // Ping/Pong control frames are handled by axum itself.
                    }
                }
            }
        }
    }
    debug!(client_id = %client_id, "reader done");
    Ok(())
}

async fn handle_text_frame(
    text: &str,
    client_id: Uuid,
    hub: &Hub,
    subscriptions: &Arc<RwLock<HashSet<MessageType>>>,
) {
    let event: Event = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(err) => {
            debug!(client_id = %client_id, error = %err, "malformed frame, ignoring");
            return;
        }
    };

    match event.kind {
        MessageType::Ping => {
            let pong = Event::new(MessageType::Pong, now_rfc3339(), None);
            hub.send_to(client_id, pong).await;
        }
        MessageType::Subscribe => {
            let mut set = subscriptions.write().await;
            for kind in requested_types(&event) {
                set.insert(kind);
            }
        }
        MessageType::Unsubscribe => {
            let mut set = subscriptions.write().await;
            for kind in requested_types(&event) {
                set.remove(&kind);
            }
        }
        other => {
            debug!(client_id = %client_id, kind = %other, "ignoring inbound frame type");
        }
    }
}

fn requested_types(event: &Event) -> Vec<MessageType> {
    use std::str::FromStr;
    let Some(data) = &event.data else {
        return Vec::new();
    };
    let Some(types) = data.get("types").and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    types
        .iter()
        .filter_map(|v| v.as_str())
        .filter_map(|s| MessageType::from_str(s).ok())
        .collect()
}

/// Sends one frame, bounding the send by `deadline`. A send that errors out
/// or simply never completes -- a peer whose TCP receive window is full but
/// that never resets the connection -- are treated identically: both are a
/// failed send to the caller, since neither lets the socket make progress.
async fn send_with_deadline(
    sender: &mut SplitSink<WebSocket, WsMessage>,
    message: WsMessage,
    deadline: Duration,
) -> bool {
    matches!(tokio::time::timeout(deadline, sender.send(message)).await, Ok(Ok(())))
}

/// Serialises outbound events to the socket and maintains the keep-alive
/// ping. There is exactly one writer per session, so exclusive access to
/// the socket is structural here rather than an explicit mutex: nothing
/// else ever touches this `sender` half.
pub async fn run_writer(
    mut sender: SplitSink<WebSocket, WsMessage>,
    mut outbound_rx: mpsc::Receiver<Event>,
    client_id: Uuid,
    ping_interval: Duration,
    write_deadline: Duration,
    ping_deadline: Duration,
) {
    let mut ticker = tokio::time::interval(ping_interval);
    ticker.tick().await; // first tick fires immediately; consume it

    let mut consecutive_write_errors = 0u32;
    loop {
        tokio::select! {
            event = outbound_rx.recv() => {
                let Some(event) = event else {
                    debug!(client_id = %client_id, "outbound queue closed");
                    break;
                };
                match serde_json::to_string(&event) {
                    Ok(json) => {
                        if send_with_deadline(&mut sender, WsMessage::Text(json.into()), write_deadline).await {
                            consecutive_write_errors = 0;
                        } else {
                            consecutive_write_errors += 1;
                            if consecutive_write_errors >= 3 {
                                warn!(client_id = %client_id, "too many consecutive write errors");
                                break;
                            }
                        }
                    }
                    Err(err) => warn!(client_id = %client_id, error = %err, "failed to encode event"),
                }
            }
            _ = ticker.tick() => {
                if !send_with_deadline(&mut sender, WsMessage::Ping(Vec::new().into()), ping_deadline).await {
                    warn!(client_id = %client_id, "keep-alive ping failed or timed out");
                    break;
                }
            }
        }
    }
    let _ = sender.close().await;
    debug!(client_id = %client_id, "writer done");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requested_types_parses_recognised_strings_and_ignores_unknown() {
        let event = Event::new(
            MessageType::Subscribe,
            now_rfc3339(),
            Some(serde_json::json!({"types": ["agent.status", "not.a.type", "heartbeat"]})),
        );
        let types = requested_types(&event);
        assert_eq!(types, vec![MessageType::AgentStatus, MessageType::Heartbeat]);
    }

    #[test]
    fn requested_types_handles_missing_data() {
        let event = Event::new(MessageType::Subscribe, now_rfc3339(), None);
        assert!(requested_types(&event).is_empty());
    }
}
