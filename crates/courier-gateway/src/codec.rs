//! Gatekeeper between untrusted wire text and [`MessageEnvelope`].

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

use courier_types::events::{MessageEnvelope, NEW_MESSAGE};

/// Upper bound on message bodies, in UTF-16 code units. A character outside
/// the Basic Multilingual Plane (most emoji) counts as two.
pub const MAX_BODY_CHARS: usize = 10_000;

#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// The frame carries an event kind this consumer does not handle.
    #[error("unsupported event kind {0:?}")]
    UnsupportedKind(String),

    #[error("frame is not a JSON event: {0}")]
    NotAnEvent(#[source] serde_json::Error),

    #[error("event has no data object")]
    MissingData,

    #[error("event data has wrong shape: {0}")]
    InvalidData(#[source] serde_json::Error),

    #[error("conversationId must be a positive integer")]
    InvalidConversationId,

    #[error("timestamp is missing or unparseable")]
    InvalidTimestamp,

    #[error("sender is empty")]
    EmptySender,

    #[error("body is empty")]
    EmptyBody,

    #[error("body is {0} UTF-16 units, limit is {MAX_BODY_CHARS}")]
    BodyTooLong(usize),
}

impl EnvelopeError {
    /// True for the `MalformedEnvelope` class; false for kinds that are
    /// merely reserved for future use.
    pub fn is_malformed(&self) -> bool {
        !matches!(self, Self::UnsupportedKind(_))
    }
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMessage {
    #[serde(default, alias = "chatId")]
    conversation_id: Option<serde_json::Value>,
    #[serde(default, alias = "timestamp")]
    ts: Option<String>,
    #[serde(default)]
    sender: Option<String>,
    #[serde(default)]
    body: Option<String>,
}

/// Decode and validate one text frame.
pub fn decode(text: &str) -> Result<MessageEnvelope, EnvelopeError> {
    let frame: RawFrame = serde_json::from_str(text).map_err(EnvelopeError::NotAnEvent)?;
    if frame.kind != NEW_MESSAGE {
        return Err(EnvelopeError::UnsupportedKind(frame.kind));
    }

    let data = match frame.data {
        Some(data @ serde_json::Value::Object(_)) => data,
        _ => return Err(EnvelopeError::MissingData),
    };
    let raw: RawMessage = serde_json::from_value(data).map_err(EnvelopeError::InvalidData)?;

    let conversation_id = raw
        .conversation_id
        .as_ref()
        .and_then(serde_json::Value::as_i64)
        .filter(|id| *id > 0)
        .ok_or(EnvelopeError::InvalidConversationId)?;

    let timestamp = raw
        .ts
        .as_deref()
        .and_then(parse_timestamp)
        .ok_or(EnvelopeError::InvalidTimestamp)?;

    let sender = raw.sender.unwrap_or_default();
    if sender.trim().is_empty() {
        return Err(EnvelopeError::EmptySender);
    }

    let body = raw.body.unwrap_or_default();
    if body.trim().is_empty() {
        return Err(EnvelopeError::EmptyBody);
    }
    let units = body.encode_utf16().count();
    if units > MAX_BODY_CHARS {
        return Err(EnvelopeError::BodyTooLong(units));
    }

    Ok(MessageEnvelope {
        conversation_id,
        timestamp,
        sender,
        body,
    })
}

/// RFC 3339, a naive date-time (taken as UTC), or a bare date.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
