//! Error hierarchy.
//!
//! One [`thiserror`] enum per fault domain, plus [`AgoraError`] wrapping them
//! all with a [`ErrorCategory`] used for logging and retry decisions:
//!
//! - transport faults recover through reconnect
//! - protocol faults are logged and discarded
//! - verification faults are recorded on the message
//! - exhaustion is the only persistent offline state

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ─────────────────────────────────────────────────────────────────────────────
// Domain errors
// ─────────────────────────────────────────────────────────────────────────────

/// Failure to decode a wire envelope.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Not valid JSON, or the envelope shape is wrong.
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    /// A required field is absent.
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    /// A field is present but unusable.
    #[error("invalid field `{field}`: {reason}")]
    InvalidField {
        /// Field name.
        field: &'static str,
        /// What was wrong with it.
        reason: String,
    },
}

/// Channel-level failure.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Could not open the channel.
    #[error("failed to open channel to {url}: {reason}")]
    Open {
        /// Endpoint that was dialled.
        url: String,
        /// Underlying cause.
        reason: String,
    },

    /// Opening took longer than the connect timeout.
    #[error("connect timed out after {0}ms")]
    Timeout(u64),

    /// The channel is closed.
    #[error("channel closed")]
    Closed,

    /// Endpoint could not be resolved.
    #[error("cannot resolve endpoint: {0}")]
    Resolve(String),
}

/// Connection manager failure.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Reconnect budget spent; manual reconnect required.
    #[error("gave up after {attempts} reconnect attempts")]
    Exhausted {
        /// Attempts made.
        attempts: u32,
    },

    /// Underlying transport failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The manager was torn down while connecting.
    #[error("connection cancelled")]
    Cancelled,

    /// Reconnect requested before any connect.
    #[error("no session to reconnect to")]
    NotConfigured,
}

/// Fact verification failure.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum VerificationError {
    /// Provider did not answer in time.
    #[error("verification timed out after {0}ms")]
    Timeout(u64),

    /// Provider answered with an error.
    #[error("verifier error: {0}")]
    Provider(String),

    /// Provider answered with something unreadable.
    #[error("malformed verifier response: {0}")]
    Malformed(String),
}

/// Reply generation failure.
#[derive(Debug, Error)]
pub enum ReplyError {
    /// Request could not be sent or completed.
    #[error("reply request failed: {0}")]
    Request(String),

    /// Non-success HTTP status.
    #[error("reply provider returned status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },

    /// Response did not contain a reply.
    #[error("malformed reply response: {0}")]
    Malformed(String),
}

/// Durable store failure.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database driver error.
    #[error("database error: {0}")]
    Database(String),

    /// Row or session absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Conflicting write (e.g. duplicate id).
    #[error("conflict: {0}")]
    Conflict(String),

    /// JSON column could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ─────────────────────────────────────────────────────────────────────────────
// AgoraError
// ─────────────────────────────────────────────────────────────────────────────

/// Fault category, used for log fields and retry decisions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// Connection drop or send failure.
    Transport,
    /// Malformed or unknown wire event.
    Protocol,
    /// Verification provider failure.
    Verification,
    /// Reconnect budget spent.
    Exhaustion,
    /// Durable store failure.
    Storage,
    /// Anything else.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Transport => "transport",
            Self::Protocol => "protocol",
            Self::Verification => "verification",
            Self::Exhaustion => "exhaustion",
            Self::Storage => "storage",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Umbrella error for the workspace.
#[derive(Debug, Error)]
pub enum AgoraError {
    /// See [`DecodeError`].
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// See [`TransportError`].
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// See [`ConnectionError`].
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    /// See [`VerificationError`].
    #[error(transparent)]
    Verification(#[from] VerificationError),
    /// See [`ReplyError`].
    #[error(transparent)]
    Reply(#[from] ReplyError),
    /// See [`StoreError`].
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Internal invariant failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AgoraError {
    /// Fault category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Decode(_) => ErrorCategory::Protocol,
            Self::Transport(_)
            | Self::Connection(ConnectionError::Transport(_) | ConnectionError::Cancelled) => {
                ErrorCategory::Transport
            }
            Self::Connection(ConnectionError::Exhausted { .. }) => ErrorCategory::Exhaustion,
            Self::Verification(_) => ErrorCategory::Verification,
            Self::Store(_) => ErrorCategory::Storage,
            Self::Reply(_)
            | Self::Internal(_)
            | Self::Connection(ConnectionError::NotConfigured) => ErrorCategory::Internal,
        }
    }

    /// Whether retrying the operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_)
            | Self::Connection(ConnectionError::Transport(_))
            | Self::Verification(VerificationError::Timeout(_))
            | Self::Reply(ReplyError::Request(_))
            | Self::Store(StoreError::Database(_)) => true,
            Self::Reply(ReplyError::Status { status, .. }) => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Convenience alias.
pub type Result<T, E = AgoraError> = std::result::Result<T, E>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
