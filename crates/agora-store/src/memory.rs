use std::collections::HashMap;
use std::sync::Arc;

use agora_core::collaborators::SessionStore;
use agora_core::errors::StoreError;
use agora_core::ids::SessionId;
use agora_core::model::{Message, Session, SessionStatus};
use async_trait::async_trait;
use parking_lot::Mutex;

/// Process-local [`SessionStore`] for tests and ephemeral servers.
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    sessions: Arc<Mutex<HashMap<SessionId, Session>>>,
}

impl MemorySessionStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions.
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Whether no session is stored.
    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load_session(&self, id: &SessionId) -> Result<Session, StoreError> {
        self.sessions
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("session {id}")))
    }

    async fn append_message(
        &self,
        id: &SessionId,
        message: &Message,
    ) -> Result<bool, StoreError> {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("session {id}")))?;
        if session.messages.iter().any(|m| m.id == message.id) {
            return Ok(false);
        }
        let pos = session
            .messages
            .partition_point(|m| (m.created_at, &m.id) <= (message.created_at, &message.id));
        session.messages.insert(pos, message.clone());
        Ok(true)
    }

    async fn create_session(&self, session: &Session) -> Result<(), StoreError> {
        let mut sessions = self.sessions.lock();
        if sessions.contains_key(&session.id) {
            return Err(StoreError::Conflict(format!("session {} already exists", session.id)));
        }
        let _ = sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn update_status(&self, id: &SessionId, status: SessionStatus) -> Result<(), StoreError> {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("session {id}")))?;
        session.status = status;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_core::ids::{MessageId, ParticipantId};
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn append_orders_and_deduplicates() {
        let store = MemorySessionStore::new();
        let session = Session::new("Tides", Vec::new());
        store.create_session(&session).await.unwrap();
        let now = Utc::now();
        let later = Message::confirmed(
            MessageId::from("b"),
            session.id.clone(),
            ParticipantId::from("u1"),
            "second",
            now + Duration::seconds(1),
        );
        let earlier = Message::confirmed(
            MessageId::from("a"),
            session.id.clone(),
            ParticipantId::from("u1"),
            "first",
            now,
        );
        assert!(store.append_message(&session.id, &later).await.unwrap());
        assert!(store.append_message(&session.id, &earlier).await.unwrap());
        assert!(!store.append_message(&session.id, &earlier).await.unwrap());
        let loaded = store.load_session(&session.id).await.unwrap();
        let ids: Vec<&str> = loaded.messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn missing_session_is_not_found() {
        let store = MemorySessionStore::new();
        assert!(matches!(
            store.load_session(&SessionId::new()).await,
            Err(StoreError::NotFound(_))
        ));
    }
}
