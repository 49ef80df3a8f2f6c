use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, RwLock};

use tracing::{error, warn};

use courier_types::events::MessageEnvelope;
use courier_types::models::ConnectionState;

/// Kinds of events a handler can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    StateChange,
    MessageReceived,
}

/// Events published by a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The connection moved to a new state
    StateChange(ConnectionState),

    /// A frame passed validation
    MessageReceived(MessageEnvelope),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::StateChange(_) => EventKind::StateChange,
            Self::MessageReceived(_) => EventKind::MessageReceived,
        }
    }
}

type Handler = Arc<dyn Fn(&Event) -> anyhow::Result<()> + Send + Sync>;

/// Fans events out to registered handlers, in registration order.
///
/// Handlers run inline on the publisher's task, so they must not block. A
/// handler that fails (or panics) is logged and skipped; the rest still run
/// and the publisher never sees the failure.
#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

#[derive(Default)]
struct DispatcherInner {
    handlers: RwLock<HashMap<EventKind, Vec<Handler>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one event kind.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner
            .handlers
            .write()
            .expect("dispatcher lock poisoned")
            .entry(kind)
            .or_default()
            .push(Arc::new(handler));
    }

    /// Typed shorthand for state-change subscriptions.
    pub fn on_state_change<F>(&self, handler: F)
    where
        F: Fn(ConnectionState) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe(EventKind::StateChange, move |event| match event {
            Event::StateChange(state) => handler(*state),
            _ => Ok(()),
        });
    }

    /// Typed shorthand for message subscriptions.
    pub fn on_message<F>(&self, handler: F)
    where
        F: Fn(&MessageEnvelope) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe(EventKind::MessageReceived, move |event| match event {
            Event::MessageReceived(envelope) => handler(envelope),
            _ => Ok(()),
        });
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.inner
            .handlers
            .read()
            .expect("dispatcher lock poisoned")
            .get(&kind)
            .map_or(0, Vec::len)
    }

    /// Invoke every handler registered for the event's kind. Returns how many
    /// handlers completed successfully.
    pub fn publish(&self, event: &Event) -> usize {
        // Snapshot so handlers may subscribe without deadlocking.
        let handlers: Vec<Handler> = self
            .inner
            .handlers
            .read()
            .expect("dispatcher lock poisoned")
            .get(&event.kind())
            .cloned()
            .unwrap_or_default();

        let mut succeeded = 0;
        for (index, handler) in handlers.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => succeeded += 1,
                Ok(Err(e)) => {
                    warn!(kind = ?event.kind(), handler = index, "Event handler failed: {:#}", e);
                }
                Err(_) => {
                    error!(kind = ?event.kind(), handler = index, "Event handler panicked");
                }
            }
        }
        succeeded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use chrono::Utc;

    fn message() -> Event {
        Event::MessageReceived(MessageEnvelope {
            conversation_id: 1,
            timestamp: Utc::now(),
            sender: "Alice".into(),
            body: "hi".into(),
        })
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let dispatcher = Dispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let seen = seen.clone();
            dispatcher.subscribe(EventKind::StateChange, move |_| {
                seen.lock().unwrap().push(i);
                Ok(())
            });
        }

        assert_eq!(dispatcher.publish(&Event::StateChange(ConnectionState::Connected)), 3);
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn only_matching_kind_is_invoked() {
        let dispatcher = Dispatcher::new();
        let states = Arc::new(Mutex::new(Vec::new()));
        let messages = Arc::new(Mutex::new(0));

        let s = states.clone();
        dispatcher.on_state_change(move |state| {
            s.lock().unwrap().push(state);
            Ok(())
        });
        let m = messages.clone();
        dispatcher.on_message(move |_| {
            *m.lock().unwrap() += 1;
            Ok(())
        });

        dispatcher.publish(&Event::StateChange(ConnectionState::Offline));
        dispatcher.publish(&message());

        assert_eq!(*states.lock().unwrap(), vec![ConnectionState::Offline]);
        assert_eq!(*messages.lock().unwrap(), 1);
    }

    #[test]
    fn failing_handlers_do_not_stop_others() {
        let dispatcher = Dispatcher::new();
        let reached = Arc::new(Mutex::new(false));

        dispatcher.on_message(|_| anyhow::bail!("store unavailable"));
        dispatcher.on_message(|_| panic!("handler bug"));
        let r = reached.clone();
        dispatcher.on_message(move |_| {
            *r.lock().unwrap() = true;
            Ok(())
        });

        assert_eq!(dispatcher.publish(&message()), 1);
        assert!(*reached.lock().unwrap());
    }

    #[test]
    fn publish_without_handlers_is_a_no_op() {
        let dispatcher = Dispatcher::new();
        assert_eq!(dispatcher.handler_count(EventKind::MessageReceived), 0);
        assert_eq!(dispatcher.publish(&message()), 0);
    }
}
