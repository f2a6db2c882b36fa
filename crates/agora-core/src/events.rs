//! Wire event kinds.
//!
//! Inbound server events and outbound client intents are closed enums; the
//! codec maps the envelope's `type` tag onto a variant with one exhaustive
//! match per direction. Payload structs are shared by both ends of the wire.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::errors::DecodeError;
use crate::ids::{CorrelationId, MessageId, ParticipantId};
use crate::model::{Rating, SessionStatus, Source};

/// An event body that can travel inside an envelope.
pub trait WireEvent: Sized {
    /// The envelope `type` tag.
    fn kind(&self) -> &'static str;

    /// The envelope `payload` object.
    fn to_payload(&self) -> Result<Value, serde_json::Error>;

    /// Build the body for `kind`. `Ok(None)` means the tag is not recognised.
    fn from_payload(kind: &str, payload: Value) -> Result<Option<Self>, DecodeError>;
}

fn parse<T: for<'de> Deserialize<'de>>(payload: Value) -> Result<T, DecodeError> {
    // A missing payload is treated as an empty object so that optional fields default.
    let payload = if payload.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        payload
    };
    Ok(serde_json::from_value(payload)?)
}

fn empty() -> Value {
    Value::Object(serde_json::Map::new())
}

// ─────────────────────────────────────────────────────────────────────────────
// Payloads
// ─────────────────────────────────────────────────────────────────────────────

/// `connection_established` payload.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionEstablished {
    /// Participant the server attached this connection to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub participant_id: Option<ParticipantId>,
    /// Session status at connect time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<SessionStatus>,
}

/// `user_joined` / `user_left` payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Presence {
    /// The human participant.
    pub user_id: ParticipantId,
    /// Display name, when the server knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// `expert_joined` payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpertJoined {
    /// The expert.
    pub expert_id: ParticipantId,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Expertise tags.
    #[serde(default)]
    pub expertise: Vec<String>,
}

/// `expert_typing` payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpertTyping {
    /// The expert.
    pub expert_id: ParticipantId,
    /// `false` ends the typing window early.
    #[serde(default = "default_true")]
    pub is_typing: bool,
}

fn default_true() -> bool {
    true
}

/// `expert_message` payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpertMessage {
    /// Server-assigned message id.
    pub id: MessageId,
    /// Author.
    pub expert_id: ParticipantId,
    /// Reply text.
    pub content: String,
    /// Citations; plain strings are accepted as titles.
    #[serde(default, deserialize_with = "lenient_sources")]
    pub references: Vec<Source>,
}

/// `user_message` payload in the server-to-client direction (the echo).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMessageEcho {
    /// Message id as confirmed by the server.
    pub id: MessageId,
    /// Author.
    pub user_id: ParticipantId,
    /// Message text.
    pub content: String,
    /// Correlation key sent with the original intent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
}

/// `fact_check_result` payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactCheckResult {
    /// Message the result belongs to.
    pub message_id: MessageId,
    /// Verdict.
    pub verified: bool,
    /// Confidence in `[0, 1]`, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Supporting sources.
    #[serde(default, deserialize_with = "lenient_sources")]
    pub sources: Vec<Source>,
}

/// `status_changed` payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChanged {
    /// New status.
    pub status: SessionStatus,
}

/// `error` payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    /// Human-readable message.
    pub message: String,
    /// Machine-readable code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// `user_message` payload in the client-to-server direction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    /// Client-assigned id; the server assigns one when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,
    /// Message text.
    pub content: String,
    /// Key the echo must carry back.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
}

/// `rate_message` payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateMessage {
    /// Rated message.
    pub message_id: MessageId,
    /// Verdict.
    pub rating: Rating,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SourceRepr {
    Title(String),
    Full(Source),
}

fn lenient_sources<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Source>, D::Error> {
    let reprs = Option::<Vec<SourceRepr>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(reprs
        .into_iter()
        .map(|r| match r {
            SourceRepr::Title(title) => Source::titled(title),
            SourceRepr::Full(source) => source,
        })
        .collect())
}

// ─────────────────────────────────────────────────────────────────────────────
// ServerEvent
// ─────────────────────────────────────────────────────────────────────────────

/// Events sent by the server.
#[derive(Clone, Debug, PartialEq)]
pub enum ServerEvent {
    /// `connect` / `connection_established`.
    ConnectionEstablished(ConnectionEstablished),
    /// `user_joined`.
    UserJoined(Presence),
    /// `user_left`.
    UserLeft(Presence),
    /// `expert_joined`.
    ExpertJoined(ExpertJoined),
    /// `expert_typing`.
    ExpertTyping(ExpertTyping),
    /// `expert_message`.
    ExpertMessage(ExpertMessage),
    /// `user_message` echo.
    UserMessage(UserMessageEcho),
    /// `fact_check_result`.
    FactCheckResult(FactCheckResult),
    /// `status_changed`.
    StatusChanged(StatusChanged),
    /// `heartbeat`.
    Heartbeat,
    /// `error`.
    Error(ServerError),
}

impl WireEvent for ServerEvent {
    fn kind(&self) -> &'static str {
        match self {
            Self::ConnectionEstablished(_) => "connection_established",
            Self::UserJoined(_) => "user_joined",
            Self::UserLeft(_) => "user_left",
            Self::ExpertJoined(_) => "expert_joined",
            Self::ExpertTyping(_) => "expert_typing",
            Self::ExpertMessage(_) => "expert_message",
            Self::UserMessage(_) => "user_message",
            Self::FactCheckResult(_) => "fact_check_result",
            Self::StatusChanged(_) => "status_changed",
            Self::Heartbeat => "heartbeat",
            Self::Error(_) => "error",
        }
    }

    fn to_payload(&self) -> Result<Value, serde_json::Error> {
        match self {
            Self::ConnectionEstablished(p) => serde_json::to_value(p),
            Self::UserJoined(p) | Self::UserLeft(p) => serde_json::to_value(p),
            Self::ExpertJoined(p) => serde_json::to_value(p),
            Self::ExpertTyping(p) => serde_json::to_value(p),
            Self::ExpertMessage(p) => serde_json::to_value(p),
            Self::UserMessage(p) => serde_json::to_value(p),
            Self::FactCheckResult(p) => serde_json::to_value(p),
            Self::StatusChanged(p) => serde_json::to_value(p),
            Self::Heartbeat => Ok(empty()),
            Self::Error(p) => serde_json::to_value(p),
        }
    }

    fn from_payload(kind: &str, payload: Value) -> Result<Option<Self>, DecodeError> {
        let event = match kind {
            "connect" | "connection_established" => Self::ConnectionEstablished(parse(payload)?),
            "user_joined" => Self::UserJoined(parse(payload)?),
            "user_left" => Self::UserLeft(parse(payload)?),
            "expert_joined" => Self::ExpertJoined(parse(payload)?),
            "expert_typing" => Self::ExpertTyping(parse(payload)?),
            "expert_message" => Self::ExpertMessage(parse(payload)?),
            "user_message" => Self::UserMessage(parse(payload)?),
            "fact_check_result" => Self::FactCheckResult(parse(payload)?),
            "status_changed" => Self::StatusChanged(parse(payload)?),
            "heartbeat" => Self::Heartbeat,
            "error" => Self::Error(parse(payload)?),
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ClientIntent
// ─────────────────────────────────────────────────────────────────────────────

/// Intents sent by the client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientIntent {
    /// `user_message`.
    UserMessage(OutgoingMessage),
    /// `typing_start`.
    TypingStart,
    /// `typing_end`.
    TypingEnd,
    /// `rate_message`.
    RateMessage(RateMessage),
    /// `toggle_status`.
    ToggleStatus,
    /// `heartbeat`.
    Heartbeat,
}

impl WireEvent for ClientIntent {
    fn kind(&self) -> &'static str {
        match self {
            Self::UserMessage(_) => "user_message",
            Self::TypingStart => "typing_start",
            Self::TypingEnd => "typing_end",
            Self::RateMessage(_) => "rate_message",
            Self::ToggleStatus => "toggle_status",
            Self::Heartbeat => "heartbeat",
        }
    }

    fn to_payload(&self) -> Result<Value, serde_json::Error> {
        match self {
            Self::UserMessage(p) => serde_json::to_value(p),
            Self::RateMessage(p) => serde_json::to_value(p),
            Self::TypingStart | Self::TypingEnd | Self::ToggleStatus | Self::Heartbeat => {
                Ok(empty())
            }
        }
    }

    fn from_payload(kind: &str, payload: Value) -> Result<Option<Self>, DecodeError> {
        let intent = match kind {
            "user_message" => Self::UserMessage(parse(payload)?),
            "typing_start" => Self::TypingStart,
            "typing_end" => Self::TypingEnd,
            "rate_message" => Self::RateMessage(parse(payload)?),
            "toggle_status" => Self::ToggleStatus,
            "heartbeat" => Self::Heartbeat,
            _ => return Ok(None),
        };
        Ok(Some(intent))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
