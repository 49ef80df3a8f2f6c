//! Stand-in event source for demos and fault-injection tests.
//!
//! Every accepted WebSocket connection gets its own emitter that sends a
//! random `new-message` event for a known conversation every 1-3 seconds,
//! until the connection closes.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Result, ensure};
use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use rand::seq::IndexedRandom;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use courier_types::events::MessageEnvelope;
use courier_types::models::ConversationId;

const SENDERS: &[&str] = &[
    "Alice Johnson",
    "Bob Smith",
    "Charlie Davis",
    "Diana Miller",
    "Eve Wilson",
    "Frank Brown",
    "Grace Lee",
    "Henry Taylor",
];

const BODIES: &[&str] = &[
    "Hey, how are you?",
    "Did you see the latest update?",
    "Let's schedule a meeting",
    "Thanks for the information!",
    "I'll get back to you soon",
    "That sounds great!",
    "Can you send me the details?",
    "Perfect, let's do it",
    "I agree with your suggestion",
    "Looking forward to it",
];

/// Pause between two emissions on one connection, drawn uniformly.
#[derive(Debug, Clone, Copy)]
pub struct EmitSchedule {
    pub min_interval: Duration,
    pub max_interval: Duration,
}

impl Default for EmitSchedule {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(3),
        }
    }
}

/// A running simulator. Cloning shares the same server.
#[derive(Clone)]
pub struct PeerSimulator {
    inner: Arc<SimulatorInner>,
}

struct SimulatorInner {
    conversation_ids: Vec<ConversationId>,
    schedule: EmitSchedule,
    local_addr: SocketAddr,
    /// Fired to force every live connection closed.
    drops: broadcast::Sender<()>,
    shutdown: CancellationToken,
    live: AtomicUsize,
    server: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl PeerSimulator {
    /// Bind and start serving WebSocket clients on `/`.
    pub async fn bind(
        addr: SocketAddr,
        conversation_ids: Vec<ConversationId>,
        schedule: EmitSchedule,
    ) -> Result<Self> {
        ensure!(
            schedule.min_interval <= schedule.max_interval,
            "emit interval min {:?} exceeds max {:?}",
            schedule.min_interval,
            schedule.max_interval
        );
        if conversation_ids.is_empty() {
            warn!("Simulator has no conversations; it will accept clients but stay silent");
        }

        let listener = tokio::net::TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (drops, _) = broadcast::channel(16);

        let inner = Arc::new(SimulatorInner {
            conversation_ids,
            schedule,
            local_addr,
            drops,
            shutdown: CancellationToken::new(),
            live: AtomicUsize::new(0),
            server: std::sync::Mutex::new(None),
        });

        let app = Router::new().route("/", get(ws_upgrade)).with_state(inner.clone());
        let stop = inner.shutdown.clone();
        let server = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { stop.cancelled().await })
                .await;
            if let Err(e) = result {
                warn!("Simulator server error: {}", e);
            }
        });
        *inner.server.lock().expect("server lock poisoned") = Some(server);

        info!(
            "Simulator started on ws://{} with {} conversations",
            local_addr,
            inner.conversation_ids.len()
        );
        Ok(Self { inner })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    /// Client URL for this simulator.
    pub fn url(&self) -> String {
        format!("ws://{}/", self.inner.local_addr)
    }

    pub fn live_connections(&self) -> usize {
        self.inner.live.load(Ordering::SeqCst)
    }

    /// Close every live connection. Returns how many were signalled.
    pub fn simulate_disconnect(&self) -> usize {
        info!("Simulating disconnect");
        self.inner.drops.send(()).unwrap_or(0)
    }

    /// Stop accepting clients and close all live connections.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let server = self.inner.server.lock().expect("server lock poisoned").take();
        if let Some(server) = server {
            let _ = server.await;
        }
        info!("Simulator closed");
    }
}

impl SimulatorInner {
    fn next_delay(&self) -> Duration {
        rand::rng().random_range(self.schedule.min_interval..=self.schedule.max_interval)
    }

    /// A random envelope for a known conversation, or `None` when there are
    /// no conversations to talk about.
    fn next_frame(&self) -> Option<String> {
        let mut rng = rand::rng();
        let conversation_id = *self.conversation_ids.choose(&mut rng)?;
        let envelope = MessageEnvelope {
            conversation_id,
            timestamp: Utc::now(),
            sender: SENDERS.choose(&mut rng)?.to_string(),
            body: BODIES.choose(&mut rng)?.to_string(),
        };
        Some(envelope.to_frame())
    }
}

async fn ws_upgrade(State(sim): State<Arc<SimulatorInner>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_client(socket, sim))
}

async fn handle_client(socket: WebSocket, sim: Arc<SimulatorInner>) {
    let conn_id = Uuid::new_v4();
    let (mut sender, mut receiver) = socket.split();
    let mut drops = sim.drops.subscribe();

    sim.live.fetch_add(1, Ordering::SeqCst);
    info!(%conn_id, "Client connected to simulator");

    let next_emit = tokio::time::sleep(sim.next_delay());
    tokio::pin!(next_emit);

    loop {
        tokio::select! {
            _ = sim.shutdown.cancelled() => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
            _ = drops.recv() => {
                info!(%conn_id, "Forcing client disconnect");
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
            _ = &mut next_emit => {
                if let Some(frame) = sim.next_frame() {
                    if sender.send(Message::Text(frame.into())).await.is_err() {
                        break;
                    }
                }
                next_emit.as_mut().reset(tokio::time::Instant::now() + sim.next_delay());
            }
            msg = receiver.next() => match msg {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                // Pings are answered by the socket itself.
                Some(Ok(_)) => debug!(%conn_id, "Ignoring client frame"),
            },
        }
    }

    sim.live.fetch_sub(1, Ordering::SeqCst);
    info!(%conn_id, "Client disconnected from simulator");
}
