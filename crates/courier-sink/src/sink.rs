use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error};

use courier_db::Database;
use courier_types::events::MessageEnvelope;
use courier_types::models::{ConversationId, StoredMessage};
use courier_types::redact::Redacted;

#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Nothing was committed for this event.
    #[error("persistence failure: {0:#}")]
    Persistence(anyhow::Error),

    #[error("delivery task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Told about every message once it is safely committed.
pub trait DeliveryNotifier: Send + Sync {
    fn message_stored(&self, message: &StoredMessage);
}

/// Applies validated message events to the store.
#[derive(Clone)]
pub struct DeliverySink {
    db: Arc<Database>,
    notifier: Arc<dyn DeliveryNotifier>,
}

impl DeliverySink {
    pub fn new(db: Arc<Database>, notifier: Arc<dyn DeliveryNotifier>) -> Self {
        Self { db, notifier }
    }

    /// Store the message and update its conversation summary in one
    /// transaction, then notify. The unread counter is left alone when the
    /// message lands in the focused conversation.
    ///
    /// On failure nothing is committed, nobody is notified, and the event is
    /// not retried.
    pub async fn deliver(
        &self,
        envelope: MessageEnvelope,
        focused: Option<ConversationId>,
    ) -> Result<StoredMessage, DeliveryError> {
        let sink = self.clone();
        tokio::task::spawn_blocking(move || sink.deliver_blocking(&envelope, focused)).await?
    }

    /// Synchronous form of [`DeliverySink::deliver`]; blocks on the store.
    pub fn deliver_blocking(
        &self,
        envelope: &MessageEnvelope,
        focused: Option<ConversationId>,
    ) -> Result<StoredMessage, DeliveryError> {
        let increment_unread = focused != Some(envelope.conversation_id);

        match self.db.record_delivery(envelope, increment_unread) {
            Ok(message) => {
                debug!(
                    conversation_id = message.conversation_id,
                    message_id = message.id,
                    "Message delivered"
                );
                self.notifier.message_stored(&message);
                Ok(message)
            }
            Err(e) => {
                error!(
                    conversation_id = envelope.conversation_id,
                    sender = %Redacted(&envelope.sender),
                    body = %Redacted(&envelope.body),
                    "Delivery failed: {:#}",
                    e
                );
                Err(DeliveryError::Persistence(e))
            }
        }
    }
}
