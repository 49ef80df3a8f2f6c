//! The only writer of chat data driven by inbound events.

pub mod sink;
pub mod worker;

pub use sink::{DeliveryError, DeliveryNotifier, DeliverySink};
pub use worker::{DeliveryStats, DeliveryWorker};
