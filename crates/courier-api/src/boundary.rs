use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

use courier_db::Database;
use courier_gateway::{Connection, Dispatcher};
use courier_sink::DeliveryNotifier;
use courier_types::events::BoundaryEvent;
use courier_types::models::{ConnectionState, ConversationId, StoredMessage};

/// Buffered notifications per subscriber before it starts lagging.
const EVENT_BUFFER: usize = 256;

/// Fault injection against the event source.
pub trait PeerControl: Send + Sync {
    /// Force the source to close every connection it holds. Returns how many
    /// were closed.
    fn drop_connections(&self) -> usize;
}

/// What the consuming application sees of the delivery pipeline: connection
/// status, the focused conversation, and a feed of [`BoundaryEvent`]s.
#[derive(Clone)]
pub struct Boundary {
    inner: Arc<BoundaryInner>,
}

struct BoundaryInner {
    connection: Connection,
    db: Arc<Database>,
    peer: Option<Arc<dyn PeerControl>>,
    events: broadcast::Sender<BoundaryEvent>,
    focus: watch::Sender<Option<ConversationId>>,
}

impl Boundary {
    /// Wrap `connection` and forward every state change published on
    /// `dispatcher` to subscribers.
    pub fn new(
        connection: Connection,
        dispatcher: &Dispatcher,
        db: Arc<Database>,
        peer: Option<Arc<dyn PeerControl>>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let (focus, _) = watch::channel(None);

        let tx = events.clone();
        dispatcher.on_state_change(move |state| {
            // No subscribers is fine.
            let _ = tx.send(BoundaryEvent::StateChanged { state });
            Ok(())
        });

        Self {
            inner: Arc::new(BoundaryInner {
                connection,
                db,
                peer,
                events,
                focus,
            }),
        }
    }

    pub fn status(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    /// Returns false when no peer control is wired in.
    pub fn simulate_drop(&self) -> bool {
        match &self.inner.peer {
            Some(peer) => {
                let dropped = peer.drop_connections();
                info!("Simulated drop closed {} peer connection(s)", dropped);
                true
            }
            None => false,
        }
    }

    pub fn set_focus(&self, conversation_id: Option<ConversationId>) {
        debug!(?conversation_id, "Focus changed");
        self.inner.focus.send_replace(conversation_id);
    }

    pub fn focused(&self) -> Option<ConversationId> {
        *self.inner.focus.borrow()
    }

    /// Focus feed for the delivery worker.
    pub fn watch_focus(&self) -> watch::Receiver<Option<ConversationId>> {
        self.inner.focus.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BoundaryEvent> {
        self.inner.events.subscribe()
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.inner.db
    }
}

impl DeliveryNotifier for Boundary {
    fn message_stored(&self, message: &StoredMessage) {
        let _ = self.inner.events.send(BoundaryEvent::MessageReceived {
            conversation_id: message.conversation_id,
            message: message.clone(),
        });
    }
}
