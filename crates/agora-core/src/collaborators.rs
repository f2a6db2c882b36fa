//! Narrow interfaces to external collaborators.
//!
//! The sync core and the reference server only see these traits. Concrete
//! implementations live in `agora-providers` (reply generation, fact
//! verification) and `agora-store` (durable sessions).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::{ReplyError, StoreError, VerificationError};
use crate::ids::SessionId;
use crate::model::{Message, Participant, Session, SessionStatus, Source};

/// Context handed to a reply generator alongside the prompt.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyContext {
    /// Debate topic.
    pub topic: String,
    /// The expert that should answer.
    pub expert: Participant,
    /// Most recent messages, oldest first.
    pub history: Vec<Message>,
}

/// Produces expert replies. Content is opaque to the caller.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    /// Generate the reply text for `prompt`.
    async fn generate_reply(
        &self,
        prompt: &str,
        context: &ReplyContext,
    ) -> Result<String, ReplyError>;
}

/// Outcome of a successful verification call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// Supporting sources.
    #[serde(default)]
    pub sources: Vec<Source>,
}

/// Checks a statement against an external source of truth.
#[async_trait]
pub trait FactVerifier: Send + Sync {
    /// Verify `statement`.
    async fn verify(&self, statement: &str) -> Result<VerificationReport, VerificationError>;
}

/// Durable session storage.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load a session with its messages in order.
    async fn load_session(&self, id: &SessionId) -> Result<Session, StoreError>;

    /// Append a message, returning `false` when its id was already stored.
    ///
    /// Appending an id that already exists leaves the stored message untouched.
    async fn append_message(
        &self,
        id: &SessionId,
        message: &Message,
    ) -> Result<bool, StoreError>;

    /// Persist a new session.
    async fn create_session(&self, session: &Session) -> Result<(), StoreError>;

    /// Change a session's status.
    async fn update_status(&self, id: &SessionId, status: SessionStatus) -> Result<(), StoreError>;
}
