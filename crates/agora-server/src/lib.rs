//! # agora-server
//!
//! Reference axum server for debate sessions. Clients join a session over
//! `GET /ws?sessionId=…&token=…` and exchange enveloped events; the server
//! persists messages through a [`SessionStore`](agora_core::SessionStore),
//! fans events out per session and lets each simulated expert answer in turn.
//!
//! - [`server`]: router, HTTP handlers, [`start`] and [`ServerHandle`]
//! - [`hub`]: intent handling and reply rounds
//! - [`health`]: the `/health` body built from hub figures
//! - [`websocket`]: connection state, broadcast, heartbeat and socket lifecycle

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod health;
pub mod hub;
pub mod server;
pub mod websocket;

pub use config::ServerConfig;
pub use error::ApiError;
pub use health::{HealthResponse, HubStats, ServingState};
pub use hub::{CreateSessionRequest, DebateHub, ExpertSpec, HumanSpec};
pub use server::{AppState, ServerHandle, build_router, start};
