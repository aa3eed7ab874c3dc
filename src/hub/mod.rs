// The central client registry and fan-out point. The only component
// permitted to mutate the client set; it does not poll and does not own
// sockets. Mirrors the reference server's `AppState` broadcast registry,
// generalised from one `broadcast::Sender` per stream to a per-client
// bounded queue with subscription filtering and eviction.

pub mod session;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;
use wire_protocol::{error_codes, now_rfc3339, Event, MessageType};

pub use session::{run_reader, run_writer, ClientSession, SessionError};

/// What the Hub holds for one registered client. Cloning the sender is how
/// the Hub appends to the outbound queue -- the session itself only ever
/// holds the receiving half.
struct ClientHandle {
    outbound_tx: mpsc::Sender<Event>,
    subscriptions: Arc<RwLock<std::collections::HashSet<MessageType>>>,
}

type ClientMap = Arc<RwLock<HashMap<Uuid, ClientHandle>>>;

/// A point-in-time snapshot of Hub health, exposed to the HTTP layer.
#[derive(Debug, Clone, Copy)]
pub struct HubMetrics {
    pub clients_connected: usize,
    pub slow_client_drops: u64,
}

/// Cloneable handle to the Hub. Every method is a channel send (or a direct
/// read-locked lookup for `client_count`); none of them block on I/O.
#[derive(Clone)]
pub struct Hub {
    clients: ClientMap,
    register_tx: mpsc::Sender<(ClientSession, mpsc::Sender<Event>)>,
    unregister_tx: mpsc::Sender<Uuid>,
    broadcast_all_tx: mpsc::Sender<Event>,
    broadcast_if_subscribed_tx: mpsc::Sender<Event>,
    unicast_tx: mpsc::Sender<(Uuid, Event)>,
    slow_client_drops: Arc<AtomicU64>,
}

impl Hub {
    /// Spawns the Hub's serialising loop and returns a handle plus the
    /// loop's join handle, so the caller can await it stopping during
    /// graceful shutdown. The loop has no shutdown signal of its own: it
    /// keeps processing registrations/broadcasts for as long as any `Hub`
    /// clone is alive, and stops only once the last clone (held by
    /// `main.rs`'s `AppState`) is dropped.
    pub fn spawn() -> (Self, tokio::task::JoinHandle<()>) {
        let clients: ClientMap = Arc::new(RwLock::new(HashMap::new()));
        let (register_tx, register_rx) = mpsc::channel(256);
        let (unregister_tx, unregister_rx) = mpsc::channel(256);
        let (broadcast_all_tx, broadcast_all_rx) = mpsc::channel(1024);
        let (broadcast_if_subscribed_tx, broadcast_if_subscribed_rx) = mpsc::channel(1024);
        let (unicast_tx, unicast_rx) = mpsc::channel(256);
        let slow_client_drops = Arc::new(AtomicU64::new(0));

        let join_handle = tokio::spawn(run_loop(
            clients.clone(),
            register_rx,
            unregister_rx,
            broadcast_all_rx,
            broadcast_if_subscribed_rx,
            unicast_rx,
            slow_client_drops.clone(),
        ));

        let hub = Self {
            clients,
            register_tx,
            unregister_tx,
            broadcast_all_tx,
            broadcast_if_subscribed_tx,
            unicast_tx,
            slow_client_drops,
        };
        (hub, join_handle)
    }

    /// Registers a new session and returns the `mpsc::Receiver<Event>` its
    /// writer task consumes from. The Hub enqueues the welcome notification
    /// before any other event can reach it, because this call and the Hub's
    /// own insertion happen in the same loop iteration.
    pub async fn register(&self, session: ClientSession) -> mpsc::Receiver<Event> {
        let (outbound_tx, outbound_rx) = mpsc::channel(session.queue_capacity);
        // Registration cannot fail: the loop task only exits once every
        // sender (including this one, held by `self`) has been dropped.
        let _ = self.register_tx.send((session, outbound_tx)).await;
        outbound_rx
    }

    /// Idempotent: unregistering a client that is already gone is a no-op.
    pub async fn unregister(&self, client_id: Uuid) {
        let _ = self.unregister_tx.send(client_id).await;
    }

    pub async fn broadcast_all(&self, event: Event) {
        let _ = self.broadcast_all_tx.send(event).await;
    }

    pub async fn broadcast_if_subscribed(&self, event: Event) {
        let _ = self.broadcast_if_subscribed_tx.send(event).await;
    }

    /// Deliver to exactly one client regardless of its subscription set --
    /// used for direct replies such as a `pong` answering a client's `ping`,
    /// which is not subject to subscription filtering.
    pub async fn send_to(&self, client_id: Uuid, event: Event) {
        let _ = self.unicast_tx.send((client_id, event)).await;
    }

    /// Direct read under the read lock; does not go through the serialising
    /// loop.
    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    pub fn metrics(&self) -> HubMetricsHandle {
        HubMetricsHandle {
            clients: self.clients.clone(),
            slow_client_drops: self.slow_client_drops.clone(),
        }
    }
}

/// Split out from `Hub` so `metrics()` can be called without holding a full
/// `Hub` clone in the HTTP layer's state -- same data, narrower surface.
#[derive(Clone)]
pub struct HubMetricsHandle {
    clients: ClientMap,
    slow_client_drops: Arc<AtomicU64>,
}

impl HubMetricsHandle {
    pub async fn snapshot(&self) -> HubMetrics {
        HubMetrics {
            clients_connected: self.clients.read().await.len(),
            slow_client_drops: self.slow_client_drops.load(Ordering::Relaxed),
        }
    }
}

async fn run_loop(
    clients: ClientMap,
    mut register_rx: mpsc::Receiver<(ClientSession, mpsc::Sender<Event>)>,
    mut unregister_rx: mpsc::Receiver<Uuid>,
    mut broadcast_all_rx: mpsc::Receiver<Event>,
    mut broadcast_if_subscribed_rx: mpsc::Receiver<Event>,
    mut unicast_rx: mpsc::Receiver<(Uuid, Event)>,
    slow_client_drops: Arc<AtomicU64>,
) {
    loop {
        tokio::select! {
            biased;
            Some((session, outbound_tx)) = register_rx.recv() => {
                handle_register(&clients, session, outbound_tx).await;
            }
            Some(client_id) = unregister_rx.recv() => {
                if clients.write().await.remove(&client_id).is_some() {
                    debug!(client_id = %client_id, "client unregistered");
                }
            }
            Some((client_id, event)) = unicast_rx.recv() => {
                if let Some(client) = clients.read().await.get(&client_id) {
                    let _ = client.outbound_tx.try_send(event);
                }
            }
            Some(event) = broadcast_all_rx.recv() => {
                fan_out(&clients, &event, &slow_client_drops, Filter::All).await;
            }
            Some(event) = broadcast_if_subscribed_rx.recv() => {
                fan_out(&clients, &event, &slow_client_drops, Filter::Subscribed).await;
            }
            else => break,
        }
    }
    info!("hub loop stopped");
}

async fn handle_register(
    clients: &ClientMap,
    session: ClientSession,
    outbound_tx: mpsc::Sender<Event>,
) {
    let client_id = session.id;
    let subscriptions = session.subscriptions.clone();

    let welcome_data = serde_json::json!({
        "client_id": client_id.to_string(),
        "default_subscriptions": MessageType::DEFAULT_SUBSCRIPTIONS
            .iter()
            .map(|t| t.as_str())
            .collect::<Vec<_>>(),
    });
    let welcome = Event::new(MessageType::Notification, now_rfc3339(), Some(welcome_data));
    // Best-effort: the queue was just created with spare capacity, so this
    // should never fail, but a failure here must not prevent registration.
    let _ = outbound_tx.try_send(welcome);

    clients.write().await.insert(
        client_id,
        ClientHandle {
            outbound_tx,
            subscriptions,
        },
    );
    info!(client_id = %client_id, "client registered");
}

enum Filter {
    All,
    Subscribed,
}

async fn fan_out(clients: &ClientMap, event: &Event, slow_client_drops: &AtomicU64, filter: Filter) {
    let mut evicted = Vec::new();
    {
        let guard = clients.read().await;
        for (client_id, client) in guard.iter() {
            let targeted = match filter {
                Filter::All => true,
                Filter::Subscribed => client.subscriptions.read().await.contains(&event.kind),
            };
            if !targeted {
                continue;
            }
            if let Err(TrySendError::Full(_)) = client.outbound_tx.try_send(event.clone()) {
                evicted.push(*client_id);
            }
        }
    }
    if !evicted.is_empty() {
        evict_slow_clients(clients, evicted, slow_client_drops).await;
    }
}

/// The only path in which the Hub closes a session without an explicit
/// `Unregister`.
async fn evict_slow_clients(clients: &ClientMap, ids: Vec<Uuid>, slow_client_drops: &AtomicU64) {
    let mut guard = clients.write().await;
    for client_id in ids {
        if let Some(client) = guard.remove(&client_id) {
            let notice = Event::new(
                MessageType::ConnectionError,
                now_rfc3339(),
                Some(serde_json::json!({"code": error_codes::SLOW_CLIENT})),
            );
            // The queue is full, so this is genuinely best-effort.
            let _ = client.outbound_tx.try_send(notice);
            slow_client_drops.fetch_add(1, Ordering::Relaxed);
            warn!(client_id = %client_id, "evicted slow client");
            // `client` drops here, closing the outbound channel and
            // signalling the writer task to terminate.
        }
    }
}
