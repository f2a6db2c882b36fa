//! # agora-sync
//!
//! Client-side synchronization core for debate sessions.
//!
//! - [`connection`]: one duplex channel per session with heartbeat and a
//!   bounded constant-delay reconnect
//! - [`registry`]: process-wide, reference-counted managers keyed by session
//! - [`typing`]: composing participants with per-entry expiry
//! - [`ledger`]: ordered, deduplicated messages with optimistic reconciliation
//! - [`factcheck`]: single-consumer verification queue
//! - [`facade`]: actions plus a reactive snapshot for a presentation layer
//! - [`export`]: JSON, Markdown and text transcripts

#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod export;
pub mod facade;
pub mod factcheck;
pub mod ledger;
pub mod registry;
pub mod transport;
pub mod typing;

pub use config::SyncConfig;
pub use connection::{ConnectionEvent, ConnectionManager, ConnectionState, DisconnectReason};
pub use export::{ExportFormat, export};
pub use facade::{Advisory, FacadeOptions, SessionFacade, SessionSnapshot};
pub use factcheck::{FactCheckQueue, VerificationRequest, VerificationSink};
pub use ledger::{AppendOutcome, MessageLedger, Verdict, VerificationOutcome};
pub use registry::{ConnectionLease, ConnectionRegistry};
pub use transport::{
    EndpointResolver, Frame, MemoryPeer, MemoryTransport, StaticEndpoint, Transport,
    TransportChannel, WsTransport,
};
pub use typing::TypingTracker;
