//! Types shared by every courier crate: the persisted chat records, the wire
//! events exchanged with the event source, the notifications pushed to the
//! consuming application, and log redaction helpers.

pub mod api;
pub mod events;
pub mod models;
pub mod redact;
