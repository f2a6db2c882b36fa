use std::path::Path;

use agora_core::collaborators::SessionStore;
use agora_core::errors::StoreError;
use agora_core::ids::SessionId;
use agora_core::model::{Message, Session, SessionStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};
use tracing::{debug, instrument};

use crate::database::{Database, sql};

/// SQLite-backed [`SessionStore`].
///
/// Messages are stored as JSON payloads keyed by `(session_id, id)`, so a
/// repeated append of the same id is ignored.
#[derive(Clone)]
pub struct SqliteSessionStore {
    db: Database,
}

impl SqliteSessionStore {
    /// Wrap an open database.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Open (or create) the database file at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Database::open(path).map(Self::new)
    }

    /// Fresh in-memory store.
    pub fn in_memory() -> Result<Self, StoreError> {
        Database::in_memory().map(Self::new)
    }

    async fn blocking<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Database) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| StoreError::Database(format!("store task failed: {e}")))?
    }
}

fn create(db: &Database, session: &Session) -> Result<(), StoreError> {
    let participants = serde_json::to_string(&session.participants)?;
    let settings = serde_json::to_string(&session.settings)?;
    let created_at = session.created_at.to_rfc3339();
    db.with_conn(|conn| {
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO sessions
                     (id, topic, status, participants, settings, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![
                    session.id.as_str(),
                    session.topic,
                    session.status.as_str(),
                    participants,
                    settings,
                    created_at,
                ],
            )
            .map_err(sql)?;
        if inserted == 0 {
            return Err(StoreError::Conflict(format!("session {} already exists", session.id)));
        }
        for message in &session.messages {
            insert_message(conn, &session.id, message)?;
        }
        Ok(())
    })
}

fn insert_message(
    conn: &rusqlite::Connection,
    id: &SessionId,
    message: &Message,
) -> Result<bool, StoreError> {
    let payload = serde_json::to_string(message)?;
    let inserted = conn
        .execute(
            "INSERT OR IGNORE INTO messages (session_id, id, sender_id, created_at, payload)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id.as_str(),
                message.id.as_str(),
                message.sender_id.as_str(),
                message.created_at.to_rfc3339(),
                payload,
            ],
        )
        .map_err(sql)?;
    Ok(inserted > 0)
}

fn session_exists(conn: &rusqlite::Connection, id: &SessionId) -> Result<bool, StoreError> {
    conn.query_row("SELECT 1 FROM sessions WHERE id = ?1", [id.as_str()], |_| Ok(()))
        .optional()
        .map(|row| row.is_some())
        .map_err(sql)
}

fn append(db: &Database, id: &SessionId, message: &Message) -> Result<bool, StoreError> {
    db.with_conn(|conn| {
        if !session_exists(conn, id)? {
            return Err(StoreError::NotFound(format!("session {id}")));
        }
        let inserted = insert_message(conn, id, message)?;
        if inserted {
            let _ = conn
                .execute(
                    "UPDATE sessions SET updated_at = ?2 WHERE id = ?1",
                    params![id.as_str(), Utc::now().to_rfc3339()],
                )
                .map_err(sql)?;
        } else {
            debug!(session_id = %id, message_id = %message.id, "message already stored");
        }
        Ok(inserted)
    })
}

fn load(db: &Database, id: &SessionId) -> Result<Session, StoreError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT topic, status, participants, settings, created_at
                 FROM sessions WHERE id = ?1",
                [id.as_str()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()
            .map_err(sql)?;
        let Some((topic, status, participants, settings, created_at)) = row else {
            return Err(StoreError::NotFound(format!("session {id}")));
        };

        let mut stmt = conn
            .prepare(
                "SELECT payload FROM messages WHERE session_id = ?1 ORDER BY created_at, id",
            )
            .map_err(sql)?;
        let payloads = stmt
            .query_map([id.as_str()], |row| row.get::<_, String>(0))
            .map_err(sql)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(sql)?;
        let mut messages = payloads
            .iter()
            .map(|p| serde_json::from_str::<Message>(p))
            .collect::<Result<Vec<_>, _>>()?;
        // RFC 3339 text sorts lexically only within one offset; re-sort on the parsed value.
        messages.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));

        Ok(Session {
            id: id.clone(),
            topic,
            participants: serde_json::from_str(&participants)?,
            messages,
            status: status.parse().map_err(StoreError::Database)?,
            settings: serde_json::from_str(&settings)?,
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .map_err(|e| StoreError::Database(format!("bad created_at: {e}")))?
                .with_timezone(&Utc),
        })
    })
}

fn set_status(db: &Database, id: &SessionId, status: SessionStatus) -> Result<(), StoreError> {
    db.with_conn(|conn| {
        let changed = conn
            .execute(
                "UPDATE sessions SET status = ?2, updated_at = ?3 WHERE id = ?1",
                params![id.as_str(), status.as_str(), Utc::now().to_rfc3339()],
            )
            .map_err(sql)?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("session {id}")));
        }
        Ok(())
    })
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    #[instrument(skip_all, fields(session_id = %id))]
    async fn load_session(&self, id: &SessionId) -> Result<Session, StoreError> {
        let id = id.clone();
        self.blocking(move |db| load(db, &id)).await
    }

    #[instrument(skip_all, fields(session_id = %id, message_id = %message.id))]
    async fn append_message(
        &self,
        id: &SessionId,
        message: &Message,
    ) -> Result<bool, StoreError> {
        let (id, message) = (id.clone(), message.clone());
        self.blocking(move |db| append(db, &id, &message)).await
    }

    #[instrument(skip_all, fields(session_id = %session.id))]
    async fn create_session(&self, session: &Session) -> Result<(), StoreError> {
        let session = session.clone();
        self.blocking(move |db| create(db, &session)).await
    }

    #[instrument(skip_all, fields(session_id = %id, %status))]
    async fn update_status(&self, id: &SessionId, status: SessionStatus) -> Result<(), StoreError> {
        let id = id.clone();
        self.blocking(move |db| set_status(db, &id, status)).await
    }
}
