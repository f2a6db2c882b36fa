//! Envelope encoding and decoding.
//!
//! Every frame is a JSON object `{type, id, timestamp, sessionId, payload}`.
//! `debateId` is accepted for `sessionId` and `data` for `payload`. Decoding
//! is two-staged: the envelope is read loosely, then the `type` tag selects a
//! body through [`WireEvent::from_payload`]. Unknown tags are reported as
//! [`Decoded::Unknown`] so callers can log and move on.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::DecodeError;
use crate::events::WireEvent;
use crate::ids::{EventId, SessionId};

/// A decoded or to-be-encoded frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope<T> {
    /// Unique envelope id.
    pub id: EventId,
    /// Send time.
    pub timestamp: DateTime<Utc>,
    /// Session the frame belongs to, when stated.
    pub session_id: Option<SessionId>,
    /// Event body.
    pub event: T,
}

impl<T: WireEvent> Envelope<T> {
    /// Wrap `event` with a fresh id and the current time.
    pub fn new(session_id: Option<SessionId>, event: T) -> Self {
        Self {
            id: EventId::new(),
            timestamp: Utc::now(),
            session_id,
            event,
        }
    }

    /// Shorthand for [`encode`].
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        encode(self)
    }
}

/// Outcome of decoding one frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Decoded<T> {
    /// A recognised event.
    Event(Envelope<T>),
    /// Well-formed JSON with a `type` this side does not handle.
    Unknown {
        /// The unrecognised tag.
        kind: String,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireOut<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    id: &'a str,
    timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<&'a str>,
    payload: Value,
}

#[derive(Deserialize)]
struct WireIn {
    #[serde(rename = "type")]
    kind: Option<String>,
    id: Option<Value>,
    timestamp: Option<String>,
    #[serde(rename = "sessionId", alias = "debateId")]
    session_id: Option<String>,
    #[serde(alias = "data", default)]
    payload: Value,
}

/// Serialize an envelope to wire text.
pub fn encode<T: WireEvent>(envelope: &Envelope<T>) -> Result<String, serde_json::Error> {
    let out = WireOut {
        kind: envelope.event.kind(),
        id: envelope.id.as_str(),
        timestamp: envelope.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        session_id: envelope.session_id.as_ref().map(SessionId::as_str),
        payload: envelope.event.to_payload()?,
    };
    serde_json::to_string(&out)
}

/// Parse wire text into an envelope.
pub fn decode<T: WireEvent>(text: &str) -> Result<Decoded<T>, DecodeError> {
    let raw: WireIn = serde_json::from_str(text)?;
    let kind = raw.kind.ok_or(DecodeError::MissingField("type"))?;

    let id = match raw.id {
        Some(Value::String(s)) if !s.is_empty() => EventId::from_string(s),
        Some(Value::Number(n)) => EventId::from_string(n.to_string()),
        Some(_) => {
            return Err(DecodeError::InvalidField {
                field: "id",
                reason: "expected a non-empty string".into(),
            });
        }
        None => return Err(DecodeError::MissingField("id")),
    };
    let timestamp = raw.timestamp.ok_or(DecodeError::MissingField("timestamp"))?;
    let timestamp = DateTime::parse_from_rfc3339(&timestamp)
        .map_err(|e| DecodeError::InvalidField {
            field: "timestamp",
            reason: e.to_string(),
        })?
        .with_timezone(&Utc);

    match T::from_payload(&kind, raw.payload)? {
        Some(event) => Ok(Decoded::Event(Envelope {
            id,
            timestamp,
            session_id: raw.session_id.map(SessionId::from_string),
            event,
        })),
        None => Ok(Decoded::Unknown { kind }),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
