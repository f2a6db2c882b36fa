//! WebSocket plumbing: per-client connection state, session fan-out,
//! liveness checks and the socket lifecycle.

pub mod broadcast;
pub mod connection;
pub mod heartbeat;
pub mod session;
