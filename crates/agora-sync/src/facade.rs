//! Session facade.
//!
//! The one object a presentation layer talks to. Actions are synchronous and
//! report submission only; observable state is a [`SessionSnapshot`] behind a
//! `watch` channel, republished after every mutation. Inbound frames, typing
//! expiry and fact-check results are applied by background tasks that share
//! one lock over the session state, so every mutation is atomic with respect
//! to every other.

use std::sync::{Arc, Weak};

use agora_core::codec::{Decoded, Envelope, decode};
use agora_core::collaborators::{FactVerifier, SessionStore};
use agora_core::errors::{ConnectionError, StoreError, VerificationError};
use agora_core::events::{ClientIntent, OutgoingMessage, RateMessage, ServerEvent};
use agora_core::ids::{MessageId, ParticipantId, SessionId};
use agora_core::model::{
    Message, Participant, Rating, Session, SessionSettings, SessionStatus, VerificationStatus,
};
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::config::SyncConfig;
use crate::connection::{ConnectionEvent, ConnectionManager, ConnectionState, DisconnectReason};
use crate::export::{ExportFormat, export};
use crate::factcheck::{FactCheckQueue, VerificationRequest, VerificationSink, verdict_for};
use crate::ledger::{AppendOutcome, MessageLedger, Verdict, VerificationOutcome};
use crate::registry::{ConnectionLease, ConnectionRegistry};
use crate::typing::TypingTracker;

/// Read-only view of a session.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    /// Session id.
    pub session_id: SessionId,
    /// Debate topic.
    pub topic: String,
    /// Current participants.
    pub participants: Vec<Participant>,
    /// Messages in order.
    pub messages: Vec<Message>,
    /// Participants currently composing, sorted.
    pub typing_participants: Vec<ParticipantId>,
    /// Connection lifecycle state.
    pub connection_state: ConnectionState,
    /// Session lifecycle state.
    pub session_status: SessionStatus,
    /// Reconnect budget spent; sends are kept locally as unsent.
    pub offline: bool,
}

/// Non-fatal notifications for the presentation layer.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Advisory {
    /// A verification came back below the confidence threshold.
    LowConfidence {
        /// Checked message.
        message_id: MessageId,
        /// Reported confidence.
        confidence: f64,
    },
    /// A verification attempt failed; the message is unchecked again.
    VerificationFailed {
        /// Checked message.
        message_id: MessageId,
        /// Failure description.
        reason: String,
    },
    /// The reconnect budget is spent.
    Offline {
        /// Attempts made.
        attempts: u32,
    },
    /// The server reported an error.
    ServerError {
        /// Server message.
        message: String,
        /// Server code.
        code: Option<String>,
    },
}

/// Who is using the facade.
#[derive(Clone, Debug)]
pub struct FacadeOptions {
    /// The local human participant.
    pub local_participant: ParticipantId,
    /// Opaque participant token passed to the endpoint resolver.
    pub token: String,
}

struct SessionState {
    topic: String,
    participants: Vec<Participant>,
    ledger: MessageLedger,
    typing: TypingTracker,
    status: SessionStatus,
    settings: SessionSettings,
    offline: bool,
}

struct Shared {
    session_id: SessionId,
    local: ParticipantId,
    config: SyncConfig,
    manager: Arc<ConnectionManager>,
    state: Mutex<SessionState>,
    snapshots: watch::Sender<SessionSnapshot>,
    advisories: broadcast::Sender<Advisory>,
    cancel: CancellationToken,
}

/// Subscriptions feeding the event loop.
struct Inputs {
    events: broadcast::Receiver<ConnectionEvent>,
    frames: mpsc::Receiver<Arc<str>>,
    states: watch::Receiver<ConnectionState>,
}

/// Facade over one session for one client.
pub struct SessionFacade {
    shared: Arc<Shared>,
    queue: FactCheckQueue,
    token: String,
    cancel: CancellationToken,
    _lease: ConnectionLease,
}

impl SessionFacade {
    /// Open a facade over `session` and start its background tasks.
    ///
    /// The connection is not opened; call [`SessionFacade::connect`].
    pub fn open(
        registry: &Arc<ConnectionRegistry>,
        verifier: Arc<dyn FactVerifier>,
        session: Session,
        options: FacadeOptions,
    ) -> Self {
        let config = registry.config().clone();
        let lease = registry.acquire(&session.id);
        let manager = Arc::clone(lease.manager());
        let cancel = CancellationToken::new();

        let state = SessionState {
            topic: session.topic,
            participants: session.participants,
            ledger: MessageLedger::with_messages(
                config.optimistic_match_window,
                session.messages,
            ),
            typing: TypingTracker::new(config.typing_window),
            status: session.status,
            settings: session.settings,
            offline: manager.is_exhausted(),
        };
        let initial = snapshot_of(&session.id, &state, manager.state());
        let (snapshots, _) = watch::channel(initial);
        let (advisories, _) = broadcast::channel(config.event_buffer);

        let shared = Arc::new(Shared {
            session_id: session.id,
            local: options.local_participant,
            config: config.clone(),
            manager: Arc::clone(&manager),
            state: Mutex::new(state),
            snapshots,
            advisories,
            cancel: cancel.clone(),
        });

        let weak: Weak<Shared> = Arc::downgrade(&shared);
        let sink: Weak<dyn VerificationSink> = weak;
        let queue = FactCheckQueue::spawn(
            verifier,
            sink,
            config.confidence_threshold,
            config.verification_timeout,
            cancel.child_token(),
        );

        let inputs = Inputs {
            events: manager.subscribe(),
            frames: manager.subscribe_frames(),
            states: manager.watch_state(),
        };
        let _events = tokio::spawn(Arc::clone(&shared).run_events(
            queue.clone(),
            inputs,
            cancel.child_token(),
        ));
        let _sweep = tokio::spawn(Arc::clone(&shared).run_typing_sweep(cancel.child_token()));

        info!(session_id = %shared.session_id, "session facade opened");
        Self {
            shared,
            queue,
            token: options.token,
            cancel,
            _lease: lease,
        }
    }

    /// Load the session from `store` and open a facade over it.
    pub async fn open_from_store(
        registry: &Arc<ConnectionRegistry>,
        verifier: Arc<dyn FactVerifier>,
        store: &dyn SessionStore,
        session_id: &SessionId,
        options: FacadeOptions,
    ) -> Result<Self, StoreError> {
        let session = store.load_session(session_id).await?;
        debug!(session_id = %session_id, messages = session.messages.len(), "session loaded");
        Ok(Self::open(registry, verifier, session, options))
    }

    /// Open the connection. A no-op if it is already open.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        self.shared
            .manager
            .connect(self.shared.session_id.clone(), self.token.clone())
            .await
    }

    /// Manual reconnect; clears the offline state on success.
    pub async fn reconnect(&self) -> Result<(), ConnectionError> {
        self.shared.manager.reconnect().await
    }

    /// Session id.
    pub fn session_id(&self) -> &SessionId {
        &self.shared.session_id
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.snapshots.borrow().clone()
    }

    /// Subscribe to snapshot updates.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.shared.snapshots.subscribe()
    }

    /// Subscribe to advisories.
    pub fn advisories(&self) -> broadcast::Receiver<Advisory> {
        self.shared.advisories.subscribe()
    }

    /// Fact checks queued or in flight.
    pub fn pending_checks(&self) -> usize {
        self.queue.pending()
    }

    /// Append a local message and submit it.
    ///
    /// The message is always appended. It keeps the unsent tag unless the
    /// frame was handed to an open connection; the return value says which.
    #[instrument(skip_all, fields(session_id = %self.shared.session_id))]
    pub fn send_message(&self, content: &str) -> bool {
        let content = content.trim();
        if content.is_empty() {
            return false;
        }
        let mut message = Message::local(
            self.shared.session_id.clone(),
            self.shared.local.clone(),
            content,
            Utc::now(),
        );
        message.unsent = true;
        let intent = ClientIntent::UserMessage(OutgoingMessage {
            id: Some(message.id.clone()),
            content: message.content.clone(),
            correlation_id: message.correlation_id.clone(),
        });
        let id = message.id.clone();
        {
            let mut state = self.shared.state.lock();
            if state.status == SessionStatus::Completed {
                debug!("session completed, message refused");
                return false;
            }
            let _ = state.ledger.append(message);
        }

        let submitted = self.shared.manager.send_intent(intent);
        if submitted {
            let _ = self.shared.state.lock().ledger.mark_sent(&id);
        } else {
            debug!(message_id = %id, "message kept as unsent");
        }
        self.shared.publish();
        submitted
    }

    /// Record a rating and submit it.
    pub fn rate_message(&self, message_id: &MessageId, rating: Rating) -> bool {
        let resolved = {
            let mut state = self.shared.state.lock();
            let Some(resolved) = state.ledger.resolve(message_id) else {
                return false;
            };
            let _ = state.ledger.set_rating(&resolved, rating);
            resolved
        };
        self.shared.publish();
        self.shared.manager.send_intent(ClientIntent::RateMessage(RateMessage {
            message_id: resolved,
            rating,
        }))
    }

    /// Ask the server to flip active and paused. The status changes when the
    /// server confirms it.
    pub fn toggle_status(&self) -> bool {
        if self.shared.state.lock().status.toggled().is_none() {
            return false;
        }
        self.shared.manager.send_intent(ClientIntent::ToggleStatus)
    }

    /// Tell the others the local participant started or stopped composing.
    pub fn notify_typing(&self, composing: bool) -> bool {
        if !self.shared.state.lock().settings.typing_indicators {
            return false;
        }
        let intent = if composing {
            ClientIntent::TypingStart
        } else {
            ClientIntent::TypingEnd
        };
        self.shared.manager.send_intent(intent)
    }

    /// Render the current transcript.
    pub fn export_session(&self, format: ExportFormat) -> Result<String, serde_json::Error> {
        export(&self.snapshot(), format)
    }

    /// Stop background work and release the connection lease.
    pub fn close(self) {
        info!(session_id = %self.shared.session_id, "session facade closed");
    }
}

impl Drop for SessionFacade {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn snapshot_of(
    session_id: &SessionId,
    state: &SessionState,
    connection: ConnectionState,
) -> SessionSnapshot {
    SessionSnapshot {
        session_id: session_id.clone(),
        topic: state.topic.clone(),
        participants: state.participants.clone(),
        messages: state.ledger.messages(),
        typing_participants: state.typing.composing(),
        connection_state: connection,
        session_status: state.status,
        offline: state.offline,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Background processing
// ─────────────────────────────────────────────────────────────────────────────

impl Shared {
    fn publish(&self) {
        let connection = self.manager.state();
        let snapshot = {
            let state = self.state.lock();
            snapshot_of(&self.session_id, &state, connection)
        };
        let _ = self.snapshots.send_replace(snapshot);
    }

    fn advise(&self, advisory: Advisory) {
        let _ = self.advisories.send(advisory);
    }

    async fn run_events(
        self: Arc<Self>,
        queue: FactCheckQueue,
        mut inputs: Inputs,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                changed = inputs.states.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    self.publish();
                }
                frame = inputs.frames.recv() => match frame {
                    Some(text) => self.on_frame(&text, &queue),
                    None => break,
                },
                event = inputs.events.recv() => match event {
                    Ok(event) => self.on_connection_event(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(session_id = %self.session_id, skipped, "lifecycle events lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        debug!(session_id = %self.session_id, "event loop stopped");
    }

    async fn run_typing_sweep(self: Arc<Self>, cancel: CancellationToken) {
        let period = self.config.typing_sweep_interval;
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let changed = self.state.lock().typing.sweep(Instant::now());
                    if changed {
                        trace!(session_id = %self.session_id, "typing entries expired");
                        self.publish();
                    }
                }
            }
        }
    }

    fn on_connection_event(&self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Connected | ConnectionEvent::Reconnected => {
                self.state.lock().offline = false;
                self.retransmit_unsent();
                self.publish();
            }
            ConnectionEvent::Reconnecting { attempt } => {
                debug!(session_id = %self.session_id, attempt, "reconnecting");
            }
            ConnectionEvent::Disconnected { reason } => {
                if let DisconnectReason::Exhausted { attempts } = reason {
                    warn!(
                        session_id = %self.session_id,
                        attempts,
                        "offline, manual reconnect required"
                    );
                    self.state.lock().offline = true;
                    self.advise(Advisory::Offline { attempts });
                }
                self.publish();
            }
            ConnectionEvent::Error { message } => {
                debug!(session_id = %self.session_id, error = %message, "connection error");
            }
        }
    }

    /// Resubmit every unsent message with its original id and correlation key.
    /// Entries stay tagged until their echo arrives.
    fn retransmit_unsent(&self) {
        let unsent = self.state.lock().ledger.unsent();
        for message in unsent {
            let sent = self.manager.send_intent(ClientIntent::UserMessage(OutgoingMessage {
                id: Some(message.id.clone()),
                content: message.content,
                correlation_id: message.correlation_id,
            }));
            debug!(message_id = %message.id, sent, "retransmitted unsent message");
        }
    }

    fn on_frame(&self, text: &str, queue: &FactCheckQueue) {
        let envelope = match decode::<ServerEvent>(text) {
            Ok(Decoded::Event(envelope)) => envelope,
            Ok(Decoded::Unknown { kind }) => {
                debug!(session_id = %self.session_id, kind = %kind, "ignoring unknown kind");
                return;
            }
            Err(e) => {
                warn!(session_id = %self.session_id, error = %e, "discarding malformed frame");
                return;
            }
        };
        if let Some(sid) = &envelope.session_id {
            if sid != &self.session_id {
                warn!(
                    session_id = %self.session_id,
                    frame_session = %sid,
                    "discarding frame for another session"
                );
                return;
            }
        }
        let check = self.apply(envelope);
        if let Some(request) = check {
            if !queue.enqueue(request) {
                debug!(session_id = %self.session_id, "fact-check queue stopped");
            }
        }
        self.publish();
    }

    /// Apply one event to the state. Returns a fact check to queue, if any.
    fn apply(&self, envelope: Envelope<ServerEvent>) -> Option<VerificationRequest> {
        let created_at = envelope.timestamp;
        let mut state = self.state.lock();
        match envelope.event {
            ServerEvent::ConnectionEstablished(ack) => {
                debug!(session_id = %self.session_id, status = ?ack.status, "connection acked");
                None
            }
            ServerEvent::Heartbeat => None,
            ServerEvent::UserJoined(presence) => {
                if !state.participants.iter().any(|p| p.id == presence.user_id) {
                    let name = presence.name.unwrap_or_else(|| presence.user_id.to_string());
                    state.participants.push(Participant::human(presence.user_id, name));
                }
                None
            }
            ServerEvent::UserLeft(presence) => {
                let _ = state.typing.stop(&presence.user_id);
                if presence.user_id != self.local {
                    state.participants.retain(|p| p.id != presence.user_id);
                }
                None
            }
            ServerEvent::ExpertJoined(joined) => {
                if !state.participants.iter().any(|p| p.id == joined.expert_id) {
                    let name = if joined.name.is_empty() {
                        joined.expert_id.to_string()
                    } else {
                        joined.name
                    };
                    state
                        .participants
                        .push(Participant::expert(joined.expert_id, name, joined.expertise));
                }
                None
            }
            ServerEvent::ExpertTyping(typing) => {
                if !state.settings.typing_indicators {
                    return None;
                }
                if typing.is_typing {
                    let _ = state.typing.start(typing.expert_id, Instant::now());
                } else {
                    let _ = state.typing.stop(&typing.expert_id);
                }
                None
            }
            ServerEvent::ExpertMessage(reply) => {
                let _ = state.typing.stop(&reply.expert_id);
                let message = Message::confirmed(
                    reply.id,
                    self.session_id.clone(),
                    reply.expert_id,
                    reply.content,
                    created_at,
                )
                .with_sources(reply.references);
                let request = VerificationRequest {
                    message_id: message.id.clone(),
                    statement: message.content.clone(),
                };
                let outcome = state.ledger.append(message);
                let verify = state.settings.fact_checking;
                (verify && outcome == AppendOutcome::Accepted).then_some(request)
            }
            ServerEvent::UserMessage(echo) => {
                let _ = state.typing.stop(&echo.user_id);
                let message = Message::confirmed(
                    echo.id,
                    self.session_id.clone(),
                    echo.user_id,
                    echo.content,
                    created_at,
                )
                .with_correlation(echo.correlation_id);
                let request = VerificationRequest {
                    message_id: message.id.clone(),
                    statement: message.content.clone(),
                };
                let outcome = state.ledger.append(message);
                let verify = state.settings.fact_checking && state.settings.verify_human_messages;
                (verify && outcome != AppendOutcome::Duplicate).then_some(request)
            }
            ServerEvent::FactCheckResult(result) => {
                let confidence = result.confidence;
                let status = if result.verified {
                    VerificationStatus::Verified
                } else {
                    VerificationStatus::Contested
                };
                let outcome = state.ledger.apply_verification(
                    &result.message_id,
                    Verdict {
                        status,
                        confidence,
                        sources: result.sources,
                    },
                );
                drop(state);
                if outcome == VerificationOutcome::Applied {
                    if let Some(confidence) = confidence {
                        self.check_confidence(&result.message_id, confidence);
                    }
                }
                None
            }
            ServerEvent::StatusChanged(changed) => {
                info!(session_id = %self.session_id, status = %changed.status, "status changed");
                state.status = changed.status;
                None
            }
            ServerEvent::Error(error) => {
                drop(state);
                warn!(session_id = %self.session_id, error = %error.message, "server error");
                self.advise(Advisory::ServerError {
                    message: error.message,
                    code: error.code,
                });
                None
            }
        }
    }

    fn check_confidence(&self, message_id: &MessageId, confidence: f64) {
        let status = verdict_for(confidence, self.config.confidence_threshold);
        if status == VerificationStatus::Contested {
            self.advise(Advisory::LowConfidence {
                message_id: message_id.clone(),
                confidence,
            });
        }
    }
}

impl VerificationSink for Shared {
    fn begin(&self, message_id: &MessageId) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        let started = self.state.lock().ledger.mark_checking(message_id);
        if started {
            self.publish();
        }
        started
    }

    fn complete(&self, message_id: &MessageId, verdict: Verdict) {
        if self.cancel.is_cancelled() {
            debug!(message_id = %message_id, "session closed, verdict discarded");
            return;
        }
        let confidence = verdict.confidence;
        let outcome = self
            .state
            .lock()
            .ledger
            .apply_verification(message_id, verdict);
        if outcome == VerificationOutcome::Applied {
            if let Some(confidence) = confidence {
                self.check_confidence(message_id, confidence);
            }
        }
        self.publish();
    }

    fn fail(&self, message_id: &MessageId, error: &VerificationError) {
        if self.cancel.is_cancelled() {
            return;
        }
        let reason = error.to_string();
        let released = self
            .state
            .lock()
            .ledger
            .release_verification(message_id, reason.clone());
        if released {
            self.advise(Advisory::VerificationFailed {
                message_id: message_id.clone(),
                reason,
            });
        }
        self.publish();
    }
}
