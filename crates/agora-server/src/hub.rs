//! Debate orchestration: session lifecycle, intent handling and expert replies.
//!
//! The hub is the only component that talks to the [`SessionStore`]. Inbound
//! intents arrive already decoded from a client's socket; outbound events go
//! through the [`BroadcastManager`]. Reply rounds run on their own tasks and
//! are serialized per session so experts answer in join order.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use agora_core::errors::StoreError;
use agora_core::events::{
    ConnectionEstablished, ExpertJoined, ExpertMessage, ExpertTyping, OutgoingMessage, Presence,
    ServerError, StatusChanged, UserMessageEcho,
};
use agora_core::{
    ClientIntent, Decoded, Message, MessageId, Participant, ParticipantId, ReplyContext,
    ReplyGenerator, ServerEvent, Session, SessionId, SessionSettings, SessionStatus, SessionStore,
    decode,
};
use chrono::Utc;
use dashmap::DashMap;
use serde::Deserialize;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::ServerConfig;
use crate::error::ApiError;
use crate::health::HubStats;
use crate::websocket::broadcast::BroadcastManager;
use crate::websocket::connection::ClientConnection;

// ─────────────────────────────────────────────────────────────────────────────
// Requests
// ─────────────────────────────────────────────────────────────────────────────

/// Body of `POST /api/sessions`.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    /// Debate topic.
    pub topic: String,
    /// Simulated experts, in reply order.
    #[serde(default)]
    pub experts: Vec<ExpertSpec>,
    /// Human participants known up front.
    #[serde(default)]
    pub participants: Vec<HumanSpec>,
    /// Background analysis switches.
    #[serde(default)]
    pub settings: Option<SessionSettings>,
}

/// One expert in a create request.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpertSpec {
    /// Fixed id; generated when absent.
    #[serde(default)]
    pub id: Option<ParticipantId>,
    /// Display name.
    pub name: String,
    /// Expertise tags.
    #[serde(default)]
    pub expertise: Vec<String>,
}

/// One human in a create request.
#[derive(Clone, Debug, Deserialize)]
pub struct HumanSpec {
    /// Participant id, also the connection token.
    pub id: ParticipantId,
    /// Display name.
    pub name: String,
}

impl CreateSessionRequest {
    fn into_session(self) -> Result<Session, ApiError> {
        let topic = self.topic.trim();
        if topic.is_empty() {
            return Err(ApiError::BadRequest("topic must not be empty".into()));
        }
        if self.experts.iter().any(|e| e.name.trim().is_empty()) {
            return Err(ApiError::BadRequest("expert name must not be empty".into()));
        }

        let humans = self.participants.into_iter().map(|h| Participant::human(h.id, h.name));
        let experts = self.experts.into_iter().map(|e| {
            Participant::expert(e.id.unwrap_or_default(), e.name, e.expertise)
        });
        let mut session = Session::new(topic, humans.chain(experts).collect());
        if let Some(settings) = self.settings {
            session.settings = settings;
        }
        Ok(session)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Hub
// ─────────────────────────────────────────────────────────────────────────────

/// Shared orchestration state for every connected session.
pub struct DebateHub {
    store: Arc<dyn SessionStore>,
    replies: Arc<dyn ReplyGenerator>,
    broadcast: Arc<BroadcastManager>,
    config: ServerConfig,
    rounds: DashMap<SessionId, Arc<AsyncMutex<()>>>,
    stored: AtomicU64,
    duplicates: AtomicU64,
    cancel: CancellationToken,
}

impl DebateHub {
    /// Create a hub; reply rounds stop when `cancel` fires.
    pub fn new(
        store: Arc<dyn SessionStore>,
        replies: Arc<dyn ReplyGenerator>,
        broadcast: Arc<BroadcastManager>,
        config: ServerConfig,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            replies,
            broadcast,
            config,
            rounds: DashMap::new(),
            stored: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            cancel,
        })
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Broadcast fan-out shared with the socket tasks.
    pub fn broadcast(&self) -> &Arc<BroadcastManager> {
        &self.broadcast
    }

    /// Whether shutdown has begun.
    pub fn is_draining(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Live figures for `/health`.
    pub fn stats(&self) -> HubStats {
        HubStats {
            connections: self.broadcast.connection_count(),
            active_sessions: self.broadcast.active_sessions(),
            reply_rounds: self.rounds.iter().filter(|r| r.value().try_lock().is_err()).count(),
            messages_stored: self.stored.load(Ordering::Relaxed),
            duplicates_ignored: self.duplicates.load(Ordering::Relaxed),
            frames_dropped: self.broadcast.frames_dropped(),
        }
    }

    /// Validate and persist a new session.
    #[instrument(skip_all, fields(topic = %request.topic))]
    pub async fn create_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<Session, ApiError> {
        let session = request.into_session()?;
        self.store.create_session(&session).await?;
        info!(session_id = %session.id, experts = session.experts().count(), "session created");
        Ok(session)
    }

    /// Load a session snapshot from the store.
    pub async fn load_session(&self, id: &SessionId) -> Result<Session, StoreError> {
        self.store.load_session(id).await
    }

    /// Register a connection and announce it.
    ///
    /// The joiner receives `connection_established` followed by one
    /// `expert_joined` per expert; everyone else in the session receives
    /// `user_joined`.
    pub fn join(&self, conn: &Arc<ClientConnection>, session: &Session) {
        self.broadcast.add(Arc::clone(conn));

        let _ = conn.send_event(ServerEvent::ConnectionEstablished(ConnectionEstablished {
            participant_id: Some(conn.participant_id().clone()),
            status: Some(session.status),
        }));
        for expert in session.experts() {
            let _ = conn.send_event(ServerEvent::ExpertJoined(ExpertJoined {
                expert_id: expert.id.clone(),
                name: expert.name.clone(),
                expertise: expert.expertise.clone(),
            }));
        }

        let presence = Presence {
            user_id: conn.participant_id().clone(),
            name: session.participant(conn.participant_id()).map(|p| p.name.clone()),
        };
        let _ = self.broadcast.broadcast_except(
            &session.id,
            ServerEvent::UserJoined(presence),
            Some(&conn.id),
        );
        info!(client_id = %conn.id, participant_id = %conn.participant_id(), "participant joined");
    }

    /// Unregister a connection and tell the rest of the session.
    ///
    /// The last client out also releases the session's round lock unless a
    /// round still holds it; that round releases it when it ends.
    pub fn leave(&self, conn: &ClientConnection) {
        if self.broadcast.remove(&conn.id).is_none() {
            return;
        }
        let presence = Presence {
            user_id: conn.participant_id().clone(),
            name: None,
        };
        let _ = self
            .broadcast
            .broadcast_to_session(conn.session_id(), ServerEvent::UserLeft(presence));
        self.release_round_lock(conn.session_id());
        info!(
            client_id = %conn.id,
            participant_id = %conn.participant_id(),
            dropped = conn.drop_count(),
            "participant left"
        );
    }

    /// Decode and dispatch one inbound text frame.
    pub async fn handle_frame(self: &Arc<Self>, conn: &Arc<ClientConnection>, text: &str) {
        match decode::<ClientIntent>(text) {
            Ok(Decoded::Event(envelope)) => {
                let foreign = envelope
                    .session_id
                    .as_ref()
                    .is_some_and(|id| id != conn.session_id());
                if foreign {
                    warn!(client_id = %conn.id, "discarding intent addressed to another session");
                    return;
                }
                self.handle_intent(conn, envelope.event).await;
            }
            Ok(Decoded::Unknown { kind }) => {
                debug!(client_id = %conn.id, %kind, "ignoring unknown intent");
            }
            Err(error) => {
                warn!(client_id = %conn.id, %error, "malformed intent");
                send_error(conn, error.to_string(), "bad_request");
            }
        }
    }

    /// Apply one decoded intent from `conn`.
    #[instrument(skip_all, fields(client_id = %conn.id, session_id = %conn.session_id()))]
    pub async fn handle_intent(
        self: &Arc<Self>,
        conn: &Arc<ClientConnection>,
        intent: ClientIntent,
    ) {
        match intent {
            ClientIntent::UserMessage(message) => self.on_user_message(conn, message).await,
            ClientIntent::ToggleStatus => self.on_toggle_status(conn).await,
            ClientIntent::Heartbeat => {
                let _ = conn.send_event(ServerEvent::Heartbeat);
            }
            ClientIntent::RateMessage(rating) => {
                info!(
                    message_id = %rating.message_id,
                    rating = rating.rating.as_str(),
                    participant_id = %conn.participant_id(),
                    "message rated"
                );
            }
            ClientIntent::TypingStart | ClientIntent::TypingEnd => {
                debug!(participant_id = %conn.participant_id(), "typing notification");
            }
        }
    }

    async fn on_user_message(
        self: &Arc<Self>,
        conn: &Arc<ClientConnection>,
        message: OutgoingMessage,
    ) {
        if message.content.trim().is_empty() {
            send_error(conn, "message content must not be empty".into(), "empty_message");
            return;
        }
        let session_id = conn.session_id().clone();
        let session = match self.store.load_session(&session_id).await {
            Ok(session) => session,
            Err(error) => {
                warn!(%error, "failed to load session");
                send_error(conn, error.to_string(), "session_unavailable");
                return;
            }
        };
        if session.status == SessionStatus::Completed {
            send_error(conn, "session is completed".into(), "session_completed");
            return;
        }

        let id = message.id.unwrap_or_default();
        let record = Message::confirmed(
            id.clone(),
            session_id.clone(),
            conn.participant_id().clone(),
            message.content.clone(),
            Utc::now(),
        )
        .with_correlation(message.correlation_id.clone());
        // The store decides: of two racing copies of one id, exactly one is inserted.
        let duplicate = match self.store.append_message(&session_id, &record).await {
            Ok(inserted) => !inserted,
            Err(error) => {
                warn!(message_id = %id, %error, "failed to persist message");
                send_error(conn, error.to_string(), "persist_failed");
                return;
            }
        };
        let counter = if duplicate { &self.duplicates } else { &self.stored };
        let _ = counter.fetch_add(1, Ordering::Relaxed);

        let echo = UserMessageEcho {
            id: id.clone(),
            user_id: conn.participant_id().clone(),
            content: message.content.clone(),
            correlation_id: message.correlation_id,
        };
        let _ = self.broadcast.broadcast_to_session(&session_id, ServerEvent::UserMessage(echo));
        debug!(message_id = %id, duplicate, "user message echoed");

        if !duplicate && session.status == SessionStatus::Active {
            let hub = Arc::clone(self);
            let _ = tokio::spawn(async move { hub.reply_round(session_id, message.content).await });
        }
    }

    async fn on_toggle_status(&self, conn: &ClientConnection) {
        let session_id = conn.session_id();
        let current = match self.store.load_session(session_id).await {
            Ok(session) => session.status,
            Err(error) => {
                warn!(%error, "failed to load session");
                send_error(conn, error.to_string(), "session_unavailable");
                return;
            }
        };
        let Some(next) = current.toggled() else {
            send_error(conn, "session is completed".into(), "session_completed");
            return;
        };
        if let Err(error) = self.store.update_status(session_id, next).await {
            warn!(%error, "failed to update status");
            send_error(conn, error.to_string(), "persist_failed");
            return;
        }
        info!(from = %current, to = %next, "session status toggled");
        let event = ServerEvent::StatusChanged(StatusChanged { status: next });
        let _ = self.broadcast.broadcast_to_session(session_id, event);
    }

    fn round_lock(&self, session_id: &SessionId) -> Arc<AsyncMutex<()>> {
        Arc::clone(self.rounds.entry(session_id.clone()).or_default().value())
    }

    /// Forget the round lock of a session nobody is connected to.
    ///
    /// A lock still cloned by a running or queued round is kept.
    fn release_round_lock(&self, session_id: &SessionId) {
        if self.broadcast.has_session(session_id) {
            return;
        }
        if self.rounds.remove_if(session_id, |_, lock| Arc::strong_count(lock) == 1).is_some() {
            debug!(%session_id, "released round lock");
        }
    }

    /// Number of sessions holding a round lock.
    pub fn tracked_rounds(&self) -> usize {
        self.rounds.len()
    }

    /// Run one reply round under the session's lock, then release the lock if
    /// the session emptied meanwhile.
    #[instrument(skip_all, fields(session_id = %session_id))]
    async fn reply_round(self: Arc<Self>, session_id: SessionId, prompt: String) {
        {
            let lock = self.round_lock(&session_id);
            let _guard = lock.lock().await;
            self.run_round(&session_id, &prompt).await;
        }
        self.release_round_lock(&session_id);
    }

    /// Let each expert answer `prompt` in turn.
    ///
    /// The session is reloaded before every expert so a pause or completion
    /// mid-round stops the remaining replies.
    async fn run_round(&self, session_id: &SessionId, prompt: &str) {
        let experts: Vec<Participant> = match self.store.load_session(session_id).await {
            Ok(session) => session.experts().cloned().collect(),
            Err(error) => {
                warn!(%error, "failed to load session for replies");
                return;
            }
        };

        for expert in experts {
            let session = match self.store.load_session(session_id).await {
                Ok(session) if session.status == SessionStatus::Active => session,
                Ok(session) => {
                    debug!(status = %session.status, "session no longer active, ending round");
                    return;
                }
                Err(error) => {
                    warn!(%error, "failed to reload session");
                    return;
                }
            };
            if self.cancel.is_cancelled() {
                return;
            }
            self.reply_as(&session, expert, prompt).await;
        }
    }

    async fn reply_as(&self, session: &Session, expert: Participant, prompt: &str) {
        let typing = |is_typing| {
            ServerEvent::ExpertTyping(ExpertTyping {
                expert_id: expert.id.clone(),
                is_typing,
            })
        };
        let _ = self.broadcast.broadcast_to_session(&session.id, typing(true));

        let skip = session.messages.len().saturating_sub(self.config.history_window);
        let context = ReplyContext {
            topic: session.topic.clone(),
            expert: expert.clone(),
            history: session.messages[skip..].to_vec(),
        };
        let reply = tokio::select! {
            () = self.cancel.cancelled() => return,
            (reply, ()) = async {
                tokio::join!(
                    self.replies.generate_reply(prompt, &context),
                    tokio::time::sleep(self.config.reply_delay),
                )
            } => reply,
        };

        let content = match reply {
            Ok(content) => content,
            Err(error) => {
                warn!(expert_id = %expert.id, %error, "reply generation failed");
                let _ = self.broadcast.broadcast_to_session(&session.id, typing(false));
                return;
            }
        };

        let message = Message::confirmed(
            MessageId::new(),
            session.id.clone(),
            expert.id.clone(),
            content,
            Utc::now(),
        );
        match self.store.append_message(&session.id, &message).await {
            Ok(_) => {
                let _ = self.stored.fetch_add(1, Ordering::Relaxed);
            }
            Err(error) => {
                warn!(expert_id = %expert.id, %error, "failed to persist expert reply");
                let _ = self.broadcast.broadcast_to_session(&session.id, typing(false));
                return;
            }
        }

        let event = ServerEvent::ExpertMessage(ExpertMessage {
            id: message.id.clone(),
            expert_id: expert.id.clone(),
            content: message.content,
            references: message.sources,
        });
        let delivered = self.broadcast.broadcast_to_session(&session.id, event);
        debug!(expert_id = %expert.id, message_id = %message.id, delivered, "expert replied");
    }
}

fn send_error(conn: &ClientConnection, message: String, code: &str) {
    let _ = conn.send_event(ServerEvent::Error(ServerError {
        message,
        code: Some(code.to_string()),
    }));
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
