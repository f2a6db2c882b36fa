//! # agora-core
//!
//! Shared vocabulary for the Agora debate-session workspace:
//!
//! - **Branded IDs**: `SessionId`, `MessageId`, `ParticipantId`, `EventId`, `CorrelationId`
//! - **Model**: sessions, participants, messages with verification status and provenance
//! - **Wire events**: `ServerEvent` / `ClientIntent` enums and the envelope codec
//! - **Errors**: per-domain `thiserror` enums under the `AgoraError` umbrella
//! - **Collaborators**: reply generation, fact verification and session store traits

#![deny(unsafe_code)]

pub mod codec;
pub mod collaborators;
pub mod errors;
pub mod events;
pub mod ids;
pub mod model;

pub use codec::{Decoded, Envelope, decode, encode};
pub use collaborators::{
    FactVerifier, ReplyContext, ReplyGenerator, SessionStore, VerificationReport,
};
pub use errors::{AgoraError, ErrorCategory};
pub use events::{ClientIntent, ServerEvent, WireEvent};
pub use ids::{CorrelationId, EventId, MessageId, ParticipantId, SessionId};
pub use model::{
    Message, Participant, Provenance, Rating, Session, SessionSettings, SessionStatus, Source,
    VerificationStatus,
};
