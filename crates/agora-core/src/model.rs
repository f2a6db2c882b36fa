//! Session, participant and message types shared by every crate.
//!
//! Messages carry two independent lifecycles: the verification status, which
//! only ever advances (`unchecked → checking → verified | contested`), and the
//! provenance, which records whether the entry is a local optimistic copy or
//! the server-confirmed original.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{CorrelationId, MessageId, ParticipantId, SessionId};

// ─────────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle status of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Participants reply to new messages.
    Active,
    /// Messages are accepted but experts stay quiet.
    Paused,
    /// Terminal; the session is never deleted, only completed.
    Completed,
}

impl SessionStatus {
    /// Status reached by a `toggle_status` intent. `None` once completed.
    pub fn toggled(self) -> Option<Self> {
        match self {
            Self::Active => Some(Self::Paused),
            Self::Paused => Some(Self::Active),
            Self::Completed => None,
        }
    }

    /// Wire string for this status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            other => Err(format!("unknown session status: {other}")),
        }
    }
}

/// Per-session switches for background analysis.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// Run verification on expert replies.
    pub fact_checking: bool,
    /// Also verify messages written by humans.
    pub verify_human_messages: bool,
    /// Track and display typing indicators.
    pub typing_indicators: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            fact_checking: true,
            verify_human_messages: false,
            typing_indicators: true,
        }
    }
}

/// A participant attached to a session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    /// Participant id.
    pub id: ParticipantId,
    /// Display name.
    pub name: String,
    /// Expertise tags, empty for humans.
    #[serde(default)]
    pub expertise: Vec<String>,
    /// Whether a human is behind this participant.
    pub is_human: bool,
}

impl Participant {
    /// A human participant without expertise tags.
    pub fn human(id: impl Into<ParticipantId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            expertise: Vec::new(),
            is_human: true,
        }
    }

    /// A simulated expert.
    pub fn expert(
        id: impl Into<ParticipantId>,
        name: impl Into<String>,
        expertise: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            expertise: expertise.into_iter().map(Into::into).collect(),
            is_human: false,
        }
    }
}

/// One debate session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Session id.
    pub id: SessionId,
    /// Debate topic.
    pub topic: String,
    /// Participants in join order.
    #[serde(default)]
    pub participants: Vec<Participant>,
    /// Messages in ledger order.
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Current status.
    pub status: SessionStatus,
    /// Background analysis switches.
    #[serde(default)]
    pub settings: SessionSettings,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// A new active session with no messages.
    pub fn new(topic: impl Into<String>, participants: Vec<Participant>) -> Self {
        Self {
            id: SessionId::new(),
            topic: topic.into(),
            participants,
            messages: Vec::new(),
            status: SessionStatus::Active,
            settings: SessionSettings::default(),
            created_at: Utc::now(),
        }
    }

    /// Look up a participant by id.
    pub fn participant(&self, id: &ParticipantId) -> Option<&Participant> {
        self.participants.iter().find(|p| &p.id == id)
    }

    /// Simulated experts in join order.
    pub fn experts(&self) -> impl Iterator<Item = &Participant> {
        self.participants.iter().filter(|p| !p.is_human)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Message
// ─────────────────────────────────────────────────────────────────────────────

/// Verification progress of a message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    /// Not yet checked (or released after a failed check).
    #[default]
    Unchecked,
    /// A check is in flight.
    Checking,
    /// Confidence met the threshold.
    Verified,
    /// Confidence fell below the threshold.
    Contested,
}

impl VerificationStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Unchecked => 0,
            Self::Checking => 1,
            Self::Verified | Self::Contested => 2,
        }
    }

    /// Whether this status is final.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Verified | Self::Contested)
    }

    /// Whether moving from `self` to `next` is a forward step.
    pub fn can_advance_to(self, next: Self) -> bool {
        next.rank() > self.rank()
    }

    /// Wire string for this status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unchecked => "unchecked",
            Self::Checking => "checking",
            Self::Verified => "verified",
            Self::Contested => "contested",
        }
    }
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VerificationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unchecked" => Ok(Self::Unchecked),
            "checking" => Ok(Self::Checking),
            "verified" => Ok(Self::Verified),
            "contested" => Ok(Self::Contested),
            other => Err(format!("unknown verification status: {other}")),
        }
    }
}

/// A citation attached to a message or a verification result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    /// Human-readable title.
    pub title: String,
    /// Link, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Quoted excerpt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

impl Source {
    /// A source with only a title.
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: None,
            snippet: None,
        }
    }
}

/// A human verdict on a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rating {
    /// Counts as +1.
    Helpful,
    /// Counts as 0.
    Neutral,
    /// Counts as −1.
    Unhelpful,
}

impl Rating {
    /// Numeric reaction score stored on the message.
    pub fn score(self) -> i8 {
        match self {
            Self::Helpful => 1,
            Self::Neutral => 0,
            Self::Unhelpful => -1,
        }
    }

    /// Wire string for this rating.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Helpful => "helpful",
            Self::Neutral => "neutral",
            Self::Unhelpful => "unhelpful",
        }
    }
}

impl FromStr for Rating {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "helpful" => Ok(Self::Helpful),
            "neutral" => Ok(Self::Neutral),
            "unhelpful" => Ok(Self::Unhelpful),
            other => Err(format!("unknown rating: {other}")),
        }
    }
}

/// Where a ledger entry came from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Shown locally before the server confirmed it.
    LocalPending,
    /// Received from (or acknowledged by) the server.
    #[default]
    ServerConfirmed,
}

/// One message in a session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Message id.
    pub id: MessageId,
    /// Owning session.
    pub session_id: SessionId,
    /// Author.
    pub sender_id: ParticipantId,
    /// Opaque content.
    pub content: String,
    /// Creation time; with `id`, the ordering key.
    pub created_at: DateTime<Utc>,
    /// Verification progress.
    #[serde(default)]
    pub verification: VerificationStatus,
    /// Citations.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<Source>,
    /// Reaction score derived from `rating`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<i8>,
    /// Last verdict given by the local user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<Rating>,
    /// Local optimistic copy or server-confirmed.
    #[serde(default)]
    pub provenance: Provenance,
    /// Key linking an optimistic copy to its echo.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
    /// Appended while offline and not yet acknowledged.
    #[serde(default)]
    pub unsent: bool,
    /// Confidence reported by the last verification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Reason the last verification attempt failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_failure: Option<String>,
}

impl Message {
    /// A server-confirmed message.
    pub fn confirmed(
        id: MessageId,
        session_id: SessionId,
        sender_id: ParticipantId,
        content: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            session_id,
            sender_id,
            content: content.into(),
            created_at,
            verification: VerificationStatus::Unchecked,
            sources: Vec::new(),
            score: None,
            rating: None,
            provenance: Provenance::ServerConfirmed,
            correlation_id: None,
            unsent: false,
            confidence: None,
            verification_failure: None,
        }
    }

    /// A locally-originated optimistic message with fresh id and correlation key.
    pub fn local(
        session_id: SessionId,
        sender_id: ParticipantId,
        content: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            provenance: Provenance::LocalPending,
            correlation_id: Some(CorrelationId::new()),
            ..Self::confirmed(MessageId::new(), session_id, sender_id, content, created_at)
        }
    }

    /// Attach a correlation key.
    #[must_use]
    pub fn with_correlation(mut self, correlation_id: Option<CorrelationId>) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    /// Attach citations.
    #[must_use]
    pub fn with_sources(mut self, sources: Vec<Source>) -> Self {
        self.sources = sources;
        self
    }

    /// Whether this entry is still a local optimistic copy.
    pub fn is_pending(&self) -> bool {
        self.provenance == Provenance::LocalPending
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
