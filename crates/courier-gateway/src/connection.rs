use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use courier_types::models::ConnectionState;
use courier_types::redact::{Redacted, frame_summary};

use crate::codec;
use crate::dispatcher::{Dispatcher, Event};
use crate::transport::{Connector, Frame, Transport, TransportError};

/// Liveness probe interval: a Ping is sent every 10 seconds while connected.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// How long a graceful close may take before the transport is just dropped.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Exponential reconnect delay: `min(base * 2^retries, cap)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub cap: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the retry that follows `retries` earlier retries.
    pub fn delay(&self, retries: u32) -> Duration {
        2u32.checked_pow(retries)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.cap, |delay| delay.min(self.cap))
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub heartbeat_interval: Duration,
    /// Consecutive unanswered probes tolerated before the session is dropped.
    pub max_missed_pongs: u32,
    pub reconnect: ReconnectPolicy,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: HEARTBEAT_INTERVAL,
            max_missed_pongs: 2,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("connection was shut down and cannot be restarted")]
    Closed,
}

/// One logical connection to one event source, reconnecting until told to
/// stop.
///
/// State changes and validated messages are published on the [`Dispatcher`]
/// handed in at construction. All publishing happens on a single driver task,
/// so handlers never run concurrently for the same connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    connector: Arc<dyn Connector>,
    config: ConnectionConfig,
    dispatcher: Dispatcher,
    state: watch::Sender<ConnectionState>,
    shutdown: CancellationToken,
    driver: Mutex<Driver>,
}

enum Driver {
    Idle,
    Running(JoinHandle<()>),
    Stopped,
}

enum SessionEnd {
    Shutdown,
    Lost(TransportError),
}

impl Connection {
    pub fn new(connector: Arc<dyn Connector>, dispatcher: Dispatcher, config: ConnectionConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Offline);
        Self {
            inner: Arc::new(ConnectionInner {
                connector,
                config,
                dispatcher,
                state,
                shutdown: CancellationToken::new(),
                driver: Mutex::new(Driver::Idle),
            }),
        }
    }

    /// Start connecting. Moves to `Reconnecting` before returning and spawns
    /// the driver task, so this must be called inside a tokio runtime.
    /// Calling it again while running is a no-op.
    pub fn connect(&self) -> Result<(), ConnectionError> {
        let mut driver = self.inner.driver.lock().expect("driver lock poisoned");
        match *driver {
            Driver::Running(_) => Ok(()),
            Driver::Stopped => Err(ConnectionError::Closed),
            Driver::Idle => {
                info!("Connecting to {}", self.inner.connector.endpoint());
                self.inner.transition(ConnectionState::Reconnecting);
                let inner = self.inner.clone();
                *driver = Driver::Running(tokio::spawn(inner.drive()));
                Ok(())
            }
        }
    }

    /// Current state. Never blocks on the driver.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Watch channel mirroring [`Connection::state`]. Intermediate states may
    /// be coalesced; subscribe on the dispatcher to see every transition.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Stop for good: cancels the heartbeat and any pending retry, closes the
    /// transport, and waits for the driver to exit. Publishes a final
    /// `Offline` if needed; nothing is published after this returns.
    pub async fn disconnect(&self) {
        let previous = {
            let mut driver = self.inner.driver.lock().expect("driver lock poisoned");
            std::mem::replace(&mut *driver, Driver::Stopped)
        };
        if matches!(previous, Driver::Stopped) {
            return;
        }

        self.inner.shutdown.cancel();
        if let Driver::Running(handle) = previous {
            if let Err(e) = handle.await {
                error!("Connection driver ended abnormally: {}", e);
            }
        }

        self.inner.transition(ConnectionState::Offline);
        info!("Disconnected from {}", self.inner.connector.endpoint());
    }
}

impl ConnectionInner {
    fn transition(&self, next: ConnectionState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });

        if changed {
            debug!("Connection state -> {}", next);
            self.dispatcher.publish(&Event::StateChange(next));
        }
    }

    /// Connect / serve / back off, forever or until shutdown.
    async fn drive(self: Arc<Self>) {
        let mut retries: u32 = 0;

        loop {
            self.transition(ConnectionState::Reconnecting);

            let attempt = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return,
                result = self.connector.connect() => result,
            };

            match attempt {
                Ok(transport) => {
                    retries = 0;
                    self.transition(ConnectionState::Connected);
                    info!("Connected to {}", self.connector.endpoint());

                    match self.serve(transport).await {
                        SessionEnd::Shutdown => return,
                        SessionEnd::Lost(e) => warn!("Connection lost: {}", e),
                    }
                }
                Err(e) => warn!("Connect to {} failed: {}", self.connector.endpoint(), e),
            }

            self.transition(ConnectionState::Offline);
            let delay = self.config.reconnect.delay(retries);
            self.transition(ConnectionState::Reconnecting);
            info!("Reconnecting in {:?} (retry #{})", delay, retries + 1);

            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            retries = retries.saturating_add(1);
        }
    }

    /// Read loop plus heartbeat for one open session.
    async fn serve(&self, transport: Transport) -> SessionEnd {
        let Transport { mut sink, mut stream } = transport;

        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat.tick().await;

        // Any inbound frame since the last probe counts as a sign of life.
        let mut alive = true;
        let mut missed: u32 = 0;

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => {
                    let _ = tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await;
                    return SessionEnd::Shutdown;
                }

                next = stream.next() => {
                    let frame = match next {
                        Some(Ok(frame)) => frame,
                        Some(Err(e)) => return SessionEnd::Lost(e),
                        None => return SessionEnd::Lost(TransportError::Closed),
                    };
                    alive = true;

                    match frame {
                        Frame::Text(text) => self.handle_text(&text),
                        Frame::Binary(data) => {
                            warn!("Dropping binary frame ({} bytes)", data.len());
                        }
                        Frame::Close => return SessionEnd::Lost(TransportError::Closed),
                        Frame::Ping | Frame::Pong => trace!("Control frame received"),
                    }
                }

                _ = heartbeat.tick() => {
                    if alive {
                        missed = 0;
                    } else {
                        missed += 1;
                        if missed >= self.config.max_missed_pongs {
                            return SessionEnd::Lost(TransportError::HeartbeatTimeout(missed));
                        }
                    }
                    alive = false;

                    if let Err(e) = sink.send(Frame::Ping).await {
                        return SessionEnd::Lost(e);
                    }
                }
            }
        }
    }

    fn handle_text(&self, text: &str) {
        match codec::decode(text) {
            Ok(envelope) => {
                trace!(
                    conversation_id = envelope.conversation_id,
                    body = %Redacted(&envelope.body),
                    "Message received"
                );
                self.dispatcher.publish(&Event::MessageReceived(envelope));
            }
            Err(e) if !e.is_malformed() => debug!("Ignoring event: {}", e),
            Err(e) => warn!("Dropping malformed envelope {}: {}", frame_summary(text), e),
        }
    }
}
