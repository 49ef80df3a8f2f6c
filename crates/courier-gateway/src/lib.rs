//! Client side of the event-source link: frame validation, the reconnecting
//! connection state machine, and the dispatcher that fans its events out.

pub mod codec;
pub mod connection;
pub mod dispatcher;
pub mod transport;

pub use connection::{Connection, ConnectionConfig, ReconnectPolicy};
pub use dispatcher::{Dispatcher, Event, EventKind};
