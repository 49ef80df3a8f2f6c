//! Transport seam between the connection state machine and the network.
//!
//! A [`Connector`] opens one session at a time and hands back a split
//! [`Transport`]. Production uses [`WsConnector`] (tokio-tungstenite); tests
//! drive the state machine through `memory::MemoryConnector`.

use std::pin::Pin;
use std::time::Duration;

use futures_util::future::{self, BoxFuture};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use thiserror::Error;
use tokio_tungstenite::tungstenite::{self, Message};

/// Transport-level frames, independent of the socket library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Ping,
    Pong,
    Close,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("connection refused: {0}")]
    Refused(String),

    #[error("peer closed the connection")]
    Closed,

    #[error("handshake did not finish within {0:?}")]
    ConnectTimeout(Duration),

    #[error("no pong for {0} consecutive probes")]
    HeartbeatTimeout(u32),
}

pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = TransportError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, TransportError>> + Send>>;

/// One open session, split into its write and read halves.
pub struct Transport {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

/// Opens sessions to a single event-source endpoint.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self) -> BoxFuture<'_, Result<Transport, TransportError>>;

    /// Endpoint description for logs.
    fn endpoint(&self) -> &str;
}

/// Longest a TCP connect plus WebSocket handshake may take.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// WebSocket client connector.
pub struct WsConnector {
    url: String,
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl Connector for WsConnector {
    fn connect(&self) -> BoxFuture<'_, Result<Transport, TransportError>> {
        Box::pin(async move {
            let handshake = tokio_tungstenite::connect_async(self.url.as_str());
            let (ws_stream, _response) = tokio::time::timeout(self.connect_timeout, handshake)
                .await
                .map_err(|_| TransportError::ConnectTimeout(self.connect_timeout))??;
            let (sink, stream) = ws_stream.split();

            let sink = sink
                .sink_map_err(TransportError::from)
                .with(|frame: Frame| future::ready(Ok::<_, TransportError>(frame.into_message())));
            let stream = stream.filter_map(|item| {
                future::ready(match item {
                    Ok(msg) => Frame::from_message(msg).map(Ok),
                    Err(e) => Some(Err(TransportError::from(e))),
                })
            });

            Ok(Transport {
                sink: Box::pin(sink),
                stream: Box::pin(stream),
            })
        })
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}

impl Frame {
    fn from_message(msg: Message) -> Option<Self> {
        match msg {
            Message::Text(text) => Some(Self::Text(text.as_str().to_owned())),
            Message::Binary(data) => Some(Self::Binary(data.to_vec())),
            Message::Ping(_) => Some(Self::Ping),
            Message::Pong(_) => Some(Self::Pong),
            Message::Close(_) => Some(Self::Close),
            Message::Frame(_) => None,
        }
    }

    fn into_message(self) -> Message {
        match self {
            Self::Text(text) => Message::text(text),
            Self::Binary(data) => Message::binary(data),
            Self::Ping => Message::Ping(bytes::Bytes::new()),
            Self::Pong => Message::Pong(bytes::Bytes::new()),
            Self::Close => Message::Close(None),
        }
    }
}

/// In-process transport for exercising the state machine without sockets.
#[cfg(any(test, feature = "memory"))]
pub mod memory {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use futures_util::future::BoxFuture;
    use futures_util::{sink, stream};
    use tokio::sync::{Mutex, mpsc};

    use super::{Connector, Frame, Transport, TransportError};

    /// Hands each accepted session to the test as a [`MemoryPeer`].
    pub struct MemoryConnector {
        refusals: AtomicU32,
        attempts: AtomicU32,
        answer_pings: bool,
        peers: mpsc::UnboundedSender<MemoryPeer>,
    }

    /// The far end of one in-memory session.
    pub struct MemoryPeer {
        to_client: mpsc::UnboundedSender<Frame>,
        from_client: Mutex<mpsc::UnboundedReceiver<Frame>>,
    }

    impl MemoryConnector {
        /// Connector that answers pings automatically.
        pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MemoryPeer>) {
            Self::build(true)
        }

        /// Connector whose sessions never answer pings.
        pub fn silent() -> (Arc<Self>, mpsc::UnboundedReceiver<MemoryPeer>) {
            Self::build(false)
        }

        fn build(answer_pings: bool) -> (Arc<Self>, mpsc::UnboundedReceiver<MemoryPeer>) {
            let (peers, rx) = mpsc::unbounded_channel();
            let connector = Self {
                refusals: AtomicU32::new(0),
                attempts: AtomicU32::new(0),
                answer_pings,
                peers,
            };
            (Arc::new(connector), rx)
        }

        /// Refuse the next `n` connection attempts.
        pub fn refuse_next(&self, n: u32) {
            self.refusals.store(n, Ordering::SeqCst);
        }

        /// Total connection attempts so far, refused ones included.
        pub fn attempts(&self) -> u32 {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    impl Connector for MemoryConnector {
        fn connect(&self) -> BoxFuture<'_, Result<Transport, TransportError>> {
            Box::pin(async move {
                self.attempts.fetch_add(1, Ordering::SeqCst);
                let refused = self
                    .refusals
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
                if refused {
                    return Err(TransportError::Refused("memory peer refused".into()));
                }

                let (to_client, client_rx) = mpsc::unbounded_channel::<Frame>();
                let (client_tx, from_client) = mpsc::unbounded_channel::<Frame>();
                let loopback = self.answer_pings.then(|| to_client.downgrade());

                let sink = sink::unfold((client_tx, loopback), |(tx, loopback), frame: Frame| async move {
                    if frame == Frame::Ping {
                        if let Some(pong) = loopback.as_ref().and_then(|weak| weak.upgrade()) {
                            let _ = pong.send(Frame::Pong);
                        }
                    }
                    tx.send(frame).map_err(|_| TransportError::Closed)?;
                    Ok::<_, TransportError>((tx, loopback))
                });
                let stream = stream::unfold(client_rx, |mut rx| async move {
                    rx.recv().await.map(|frame| (Ok(frame), rx))
                });

                let _ = self.peers.send(MemoryPeer {
                    to_client,
                    from_client: Mutex::new(from_client),
                });

                Ok(Transport {
                    sink: Box::pin(sink),
                    stream: Box::pin(stream),
                })
            })
        }

        fn endpoint(&self) -> &str {
            "memory://peer"
        }
    }

    impl MemoryPeer {
        /// Push a frame to the client. Returns false once the session is gone.
        pub fn send(&self, frame: Frame) -> bool {
            self.to_client.send(frame).is_ok()
        }

        pub fn send_text(&self, text: impl Into<String>) -> bool {
            self.send(Frame::Text(text.into()))
        }

        /// Next frame written by the client; `None` once the client hung up.
        pub async fn recv(&self) -> Option<Frame> {
            self.from_client.lock().await.recv().await
        }

        /// Drop the session from the peer side.
        pub fn close(self) {
            let _ = self.to_client.send(Frame::Close);
        }
    }
}
