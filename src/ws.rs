// The single WebSocket endpoint. Wires an upgraded socket to a
// freshly-registered `ClientSession`, spawns its reader and writer, and
// unregisters the client once the reader finishes -- two independent tasks
// joined by the reader's completion, not a single alternating loop.

use std::collections::HashSet;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Extension, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures_util::StreamExt;
use tracing::info;
use wire_protocol::MessageType;

use crate::hub::session::{run_reader, run_writer, ClientSession};
use crate::AppState;

/// Set by auth middleware ahead of this handler in the router stack. Its
/// absence (no `Extension` layered in) is treated as authenticated, since
/// this core doesn't own the auth layer itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthDecision {
    Authenticated,
    Unauthenticated,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    auth: Option<Extension<AuthDecision>>,
    State(state): State<AppState>,
) -> Response {
    if let Some(Extension(AuthDecision::Unauthenticated)) = auth {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state)).into_response()
}

async fn handle_socket(socket: axum::extract::ws::WebSocket, state: AppState) {
    let (sender, receiver) = socket.split();

    let default_subscriptions: HashSet<MessageType> =
        MessageType::DEFAULT_SUBSCRIPTIONS.iter().copied().collect();
    let session = ClientSession::new(state.config.client_queue_capacity, default_subscriptions);
    let client_id = session.id;
    let subscriptions = session.subscriptions.clone();

    let outbound_rx = state.hub.register(session).await;
    info!(client_id = %client_id, "websocket connected");

    let writer_handle = tokio::spawn(run_writer(
        sender,
        outbound_rx,
        client_id,
        state.config.ping_interval,
        state.config.write_deadline,
        state.config.ping_deadline,
    ));

    let reader_result = run_reader(
        receiver,
        client_id,
        state.hub.clone(),
        subscriptions,
        state.shutdown.clone(),
    )
    .await;

    if let Err(err) = reader_result {
        tracing::warn!(client_id = %client_id, error = %err, "reader exited with error");
    }

    // Reader finished; unregistering drops the Hub's sender half of the
    // outbound queue, which closes the writer's receiver and lets it exit.
    state.hub.unregister(client_id).await;
    let _ = writer_handle.await;
    info!(client_id = %client_id, "websocket session ended");
}
