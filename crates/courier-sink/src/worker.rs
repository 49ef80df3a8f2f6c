use anyhow::anyhow;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use courier_gateway::Dispatcher;
use courier_types::events::MessageEnvelope;
use courier_types::models::ConversationId;

use crate::sink::DeliverySink;

/// Outcome counters for a worker's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    pub delivered: u64,
    pub failed: u64,
}

/// Moves store writes off the connection's read loop.
///
/// Envelopes are queued without blocking and delivered one at a time, in
/// arrival order, by a dedicated task. The focused conversation is sampled
/// from `focus` when each envelope is delivered.
pub struct DeliveryWorker {
    queue: mpsc::UnboundedSender<MessageEnvelope>,
    stop: CancellationToken,
    handle: JoinHandle<DeliveryStats>,
}

impl DeliveryWorker {
    pub fn spawn(sink: DeliverySink, focus: watch::Receiver<Option<ConversationId>>) -> Self {
        let (queue, rx) = mpsc::unbounded_channel();
        let stop = CancellationToken::new();
        let handle = tokio::spawn(run(sink, focus, rx, stop.clone()));
        Self { queue, stop, handle }
    }

    /// Queue an envelope. Returns false once the worker has stopped.
    pub fn enqueue(&self, envelope: MessageEnvelope) -> bool {
        self.queue.send(envelope).is_ok()
    }

    /// Route every message published on `dispatcher` into this worker.
    pub fn attach(&self, dispatcher: &Dispatcher) {
        let queue = self.queue.clone();
        dispatcher.on_message(move |envelope| {
            queue
                .send(envelope.clone())
                .map_err(|_| anyhow!("delivery worker has stopped"))
        });
    }

    /// Deliver whatever is already queued, then stop.
    pub async fn shutdown(self) -> DeliveryStats {
        self.stop.cancel();
        match self.handle.await {
            Ok(stats) => stats,
            Err(e) => {
                warn!("Delivery worker ended abnormally: {}", e);
                DeliveryStats::default()
            }
        }
    }
}

async fn run(
    sink: DeliverySink,
    focus: watch::Receiver<Option<ConversationId>>,
    mut rx: mpsc::UnboundedReceiver<MessageEnvelope>,
    stop: CancellationToken,
) -> DeliveryStats {
    let mut stats = DeliveryStats::default();

    loop {
        // Queued work wins over the stop signal so shutdown drains.
        let envelope = tokio::select! {
            biased;
            Some(envelope) = rx.recv() => envelope,
            _ = stop.cancelled() => break,
        };

        let focused = *focus.borrow();
        match sink.deliver(envelope, focused).await {
            Ok(_) => stats.delivered += 1,
            // Already logged by the sink, redacted.
            Err(_) => stats.failed += 1,
        }
    }

    info!(
        delivered = stats.delivered,
        failed = stats.failed,
        "Delivery worker stopped"
    );
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use chrono::{TimeZone, Utc};

    use courier_db::Database;
    use courier_types::models::StoredMessage;

    use crate::sink::DeliveryNotifier;

    struct Forward(mpsc::UnboundedSender<StoredMessage>);

    impl DeliveryNotifier for Forward {
        fn message_stored(&self, message: &StoredMessage) {
            let _ = self.0.send(message.clone());
        }
    }

    fn envelope(conversation_id: ConversationId, body: &str) -> MessageEnvelope {
        MessageEnvelope {
            conversation_id,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap(),
            sender: "Bob".into(),
            body: body.into(),
        }
    }

    fn setup() -> (Arc<Database>, DeliverySink, mpsc::UnboundedReceiver<StoredMessage>) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        for title in ["one", "two"] {
            db.create_conversation(title, &Utc::now()).unwrap();
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = DeliverySink::new(db.clone(), Arc::new(Forward(tx)));
        (db, sink, rx)
    }

    #[tokio::test]
    async fn delivers_in_order_and_survives_failures() {
        let (db, sink, mut stored) = setup();
        let (_focus_tx, focus) = watch::channel(None);
        let worker = DeliveryWorker::spawn(sink, focus);

        assert!(worker.enqueue(envelope(1, "first")));
        assert!(worker.enqueue(envelope(99, "nowhere")));
        assert!(worker.enqueue(envelope(1, "second")));

        let stats = worker.shutdown().await;
        assert_eq!(stats, DeliveryStats { delivered: 2, failed: 1 });

        let bodies: Vec<String> = std::iter::from_fn(|| stored.try_recv().ok()).map(|m| m.body).collect();
        assert_eq!(bodies, vec!["first", "second"]);
        assert_eq!(db.get_conversation(1).unwrap().unwrap().unread_count, 2);
    }

    #[tokio::test]
    async fn focus_is_read_at_delivery_time() {
        let (db, sink, mut stored) = setup();
        let (focus_tx, focus) = watch::channel(None);
        let worker = DeliveryWorker::spawn(sink, focus);

        worker.enqueue(envelope(2, "while away"));
        stored.recv().await.unwrap();

        focus_tx.send_replace(Some(2));
        worker.enqueue(envelope(2, "while looking"));
        stored.recv().await.unwrap();

        worker.shutdown().await;
        assert_eq!(db.get_conversation(2).unwrap().unwrap().unread_count, 1);
    }

    #[tokio::test]
    async fn attached_worker_receives_dispatched_messages() {
        let (_db, sink, mut stored) = setup();
        let (_focus_tx, focus) = watch::channel(None);
        let worker = DeliveryWorker::spawn(sink, focus);

        let dispatcher = Dispatcher::new();
        worker.attach(&dispatcher);
        let seen = Arc::new(Mutex::new(0));
        let counter = seen.clone();
        dispatcher.on_message(move |_| {
            *counter.lock().unwrap() += 1;
            Ok(())
        });

        let published = dispatcher.publish(&courier_gateway::Event::MessageReceived(envelope(1, "via dispatcher")));
        assert_eq!(published, 2);

        let message = stored.recv().await.unwrap();
        assert_eq!(message.body, "via dispatcher");
        assert_eq!(*seen.lock().unwrap(), 1);
        worker.shutdown().await;
    }
}
