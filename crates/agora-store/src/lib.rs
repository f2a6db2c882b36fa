//! # agora-store
//!
//! [`SessionStore`](agora_core::SessionStore) implementations:
//! [`MemorySessionStore`] for tests and ephemeral servers, and
//! [`SqliteSessionStore`] backed by `rusqlite` for durable sessions.

#![deny(unsafe_code)]

mod database;
mod memory;
mod schema;
mod sqlite;

pub use database::Database;
pub use memory::MemorySessionStore;
pub use sqlite::SqliteSessionStore;
