//! Session facade scenarios over an in-process peer, on virtual time.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use agora_core::codec::{Decoded, Envelope, decode};
use agora_core::collaborators::{FactVerifier, SessionStore, VerificationReport};
use agora_core::errors::{StoreError, VerificationError};
use agora_core::events::{
    ClientIntent, ExpertMessage, ExpertTyping, FactCheckResult, RateMessage, ServerError,
    ServerEvent, StatusChanged, UserMessageEcho,
};
use agora_core::ids::{MessageId, ParticipantId, SessionId};
use agora_core::model::{
    Message, Participant, Rating, Session, SessionStatus, Source, VerificationStatus,
};
use agora_store::MemorySessionStore;
use agora_sync::{
    Advisory, ConnectionRegistry, ConnectionState, ExportFormat, FacadeOptions, MemoryPeer,
    MemoryTransport, SessionFacade, SessionSnapshot, StaticEndpoint, SyncConfig,
};
use assert_matches::assert_matches;
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Semaphore, broadcast, mpsc, watch};
use tokio::time::{Instant, sleep, timeout};

const WAIT: Duration = Duration::from_secs(120);

// ─────────────────────────────────────────────────────────────────────────────
// Fixtures
// ─────────────────────────────────────────────────────────────────────────────

/// Answers with a fixed confidence once a permit is available.
struct FixedVerifier {
    confidence: f64,
    gate: Semaphore,
}

impl FixedVerifier {
    fn open(confidence: f64) -> Arc<Self> {
        Arc::new(Self {
            confidence,
            gate: Semaphore::new(Semaphore::MAX_PERMITS),
        })
    }

    fn gated(confidence: f64) -> Arc<Self> {
        Arc::new(Self {
            confidence,
            gate: Semaphore::new(0),
        })
    }

    fn release(&self) {
        self.gate.add_permits(1);
    }
}

#[async_trait]
impl FactVerifier for FixedVerifier {
    async fn verify(&self, _statement: &str) -> Result<VerificationReport, VerificationError> {
        self.gate
            .acquire()
            .await
            .map_err(|e| VerificationError::Provider(e.to_string()))?
            .forget();
        Ok(VerificationReport {
            confidence: self.confidence,
            sources: vec![Source::titled("Atlas")],
        })
    }
}

/// Takes `latency` per call and records that the call ran to the end.
struct SlowVerifier {
    latency: Duration,
    finished: AtomicBool,
}

#[async_trait]
impl FactVerifier for SlowVerifier {
    async fn verify(&self, _statement: &str) -> Result<VerificationReport, VerificationError> {
        sleep(self.latency).await;
        self.finished.store(true, Ordering::SeqCst);
        Ok(VerificationReport {
            confidence: 0.9,
            sources: Vec::new(),
        })
    }
}

struct FailingVerifier;

#[async_trait]
impl FactVerifier for FailingVerifier {
    async fn verify(&self, _statement: &str) -> Result<VerificationReport, VerificationError> {
        Err(VerificationError::Provider("upstream unavailable".into()))
    }
}

struct Harness {
    registry: Arc<ConnectionRegistry>,
    transport: MemoryTransport,
    peers: mpsc::UnboundedReceiver<MemoryPeer>,
    facade: SessionFacade,
    snapshots: watch::Receiver<SessionSnapshot>,
    advisories: broadcast::Receiver<Advisory>,
}

fn config() -> SyncConfig {
    SyncConfig {
        heartbeat_interval: Duration::from_secs(30),
        reconnect_delay: Duration::from_secs(3),
        max_reconnect_attempts: 5,
        typing_window: Duration::from_secs(3),
        typing_sweep_interval: Duration::from_millis(250),
        confidence_threshold: 0.7,
        ..SyncConfig::default()
    }
}

fn session() -> Session {
    let mut session = Session::new(
        "Capital cities",
        vec![
            Participant::human("u1", "Ada"),
            Participant::expert("e1", "Dr. Atlas", ["geography"]),
        ],
    );
    session.id = SessionId::from("s1");
    session
}

fn options() -> FacadeOptions {
    FacadeOptions {
        local_participant: ParticipantId::from("u1"),
        token: "tok".into(),
    }
}

fn registry(
    config: SyncConfig,
) -> (
    Arc<ConnectionRegistry>,
    MemoryTransport,
    mpsc::UnboundedReceiver<MemoryPeer>,
) {
    let (transport, peers) = MemoryTransport::new();
    let registry = ConnectionRegistry::new(
        config,
        Arc::new(transport.clone()),
        Arc::new(StaticEndpoint::new("mem://agora/ws")),
    );
    (registry, transport, peers)
}

fn harness(config: SyncConfig, verifier: Arc<dyn FactVerifier>, session: Session) -> Harness {
    let (registry, transport, peers) = registry(config);
    let facade = SessionFacade::open(&registry, verifier, session, options());
    let snapshots = facade.subscribe();
    let advisories = facade.advisories();
    Harness {
        registry,
        transport,
        peers,
        facade,
        snapshots,
        advisories,
    }
}

async fn connected(
    config: SyncConfig,
    verifier: Arc<dyn FactVerifier>,
    session: Session,
) -> (Harness, MemoryPeer) {
    let mut h = harness(config, verifier, session);
    h.facade.connect().await.unwrap();
    let peer = next_peer(&mut h.peers).await;
    (h, peer)
}

async fn next_peer(peers: &mut mpsc::UnboundedReceiver<MemoryPeer>) -> MemoryPeer {
    timeout(WAIT, peers.recv()).await.expect("peer in time").expect("transport alive")
}

/// Next intent from the client, skipping heartbeats.
async fn next_intent(peer: &mut MemoryPeer) -> ClientIntent {
    loop {
        let text = timeout(WAIT, peer.recv_text())
            .await
            .expect("intent in time")
            .expect("channel open");
        match decode::<ClientIntent>(&text).expect("valid intent") {
            Decoded::Event(env) if env.event == ClientIntent::Heartbeat => {}
            Decoded::Event(env) => return env.event,
            Decoded::Unknown { kind } => panic!("unexpected intent kind {kind}"),
        }
    }
}

async fn wait(
    rx: &mut watch::Receiver<SessionSnapshot>,
    condition: impl FnMut(&SessionSnapshot) -> bool,
) -> SessionSnapshot {
    timeout(WAIT, rx.wait_for(condition))
        .await
        .expect("state reached in time")
        .expect("facade alive")
        .clone()
}

async fn next_advisory(rx: &mut broadcast::Receiver<Advisory>) -> Advisory {
    timeout(WAIT, rx.recv()).await.expect("advisory in time").expect("facade alive")
}

fn frame(event: ServerEvent) -> String {
    Envelope::new(Some(SessionId::from("s1")), event).encode().unwrap()
}

fn expert_message(id: &str, content: &str) -> String {
    frame(ServerEvent::ExpertMessage(ExpertMessage {
        id: MessageId::from(id),
        expert_id: ParticipantId::from("e1"),
        content: content.into(),
        references: Vec::new(),
    }))
}

fn message<'a>(snapshot: &'a SessionSnapshot, id: &str) -> Option<&'a Message> {
    snapshot.messages.iter().find(|m| m.id.as_str() == id)
}

fn no_fact_checking() -> Session {
    let mut session = session();
    session.settings.fact_checking = false;
    session
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenarios
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn sent_message_is_confirmed_and_reply_is_verified() {
    let verifier = FixedVerifier::gated(0.92);
    let (mut h, mut peer) = connected(config(), verifier.clone(), session()).await;

    assert!(h.facade.send_message("What is the capital of Germany?"));
    let snapshot = h.facade.snapshot();
    assert_eq!(snapshot.messages.len(), 1);
    let mine = &snapshot.messages[0];
    assert!(!mine.unsent);
    assert!(mine.is_pending());

    let ClientIntent::UserMessage(out) = next_intent(&mut peer).await else {
        panic!("expected user_message");
    };
    assert_eq!(out.id.as_ref(), Some(&mine.id));
    assert_eq!(out.correlation_id, mine.correlation_id);

    assert!(
        peer.send_text(frame(ServerEvent::UserMessage(UserMessageEcho {
            id: mine.id.clone(),
            user_id: ParticipantId::from("u1"),
            content: out.content.clone(),
            correlation_id: out.correlation_id.clone(),
        })))
        .await
    );
    let snapshot = wait(&mut h.snapshots, |s| s.messages.iter().all(|m| !m.is_pending())).await;
    assert_eq!(snapshot.messages.len(), 1);

    assert!(peer.send_text(expert_message("srv-e1", "Berlin.")).await);
    let snapshot = wait(&mut h.snapshots, |s| s.messages.len() == 2).await;
    let reply = message(&snapshot, "srv-e1").unwrap();
    assert_eq!(reply.sender_id.as_str(), "e1");
    assert_matches!(
        reply.verification,
        VerificationStatus::Unchecked | VerificationStatus::Checking
    );

    verifier.release();
    let snapshot = wait(&mut h.snapshots, |s| {
        message(s, "srv-e1").is_some_and(|m| m.verification == VerificationStatus::Verified)
    })
    .await;
    let reply = message(&snapshot, "srv-e1").unwrap();
    assert_eq!(reply.confidence, Some(0.92));
    assert_eq!(reply.sources, vec![Source::titled("Atlas")]);
    assert_eq!(h.facade.pending_checks(), 0);
}

#[tokio::test(start_paused = true)]
async fn echo_with_server_id_replaces_optimistic_entry() {
    let (mut h, mut peer) = connected(config(), FixedVerifier::open(0.9), no_fact_checking()).await;

    assert!(h.facade.send_message("Is Canberra the capital?"));
    let ClientIntent::UserMessage(out) = next_intent(&mut peer).await else {
        panic!("expected user_message");
    };
    assert!(
        peer.send_text(frame(ServerEvent::UserMessage(UserMessageEcho {
            id: MessageId::from("srv-u1"),
            user_id: ParticipantId::from("u1"),
            content: out.content,
            correlation_id: out.correlation_id,
        })))
        .await
    );

    let snapshot = wait(&mut h.snapshots, |s| message(s, "srv-u1").is_some()).await;
    assert_eq!(snapshot.messages.len(), 1);
    assert!(!snapshot.messages[0].is_pending());

    // Ratings addressed to the optimistic id still land.
    let local_id = out.id.unwrap();
    assert!(h.facade.rate_message(&local_id, Rating::Neutral));
    assert_eq!(
        next_intent(&mut peer).await,
        ClientIntent::RateMessage(RateMessage {
            message_id: MessageId::from("srv-u1"),
            rating: Rating::Neutral,
        })
    );
}

#[tokio::test(start_paused = true)]
async fn lost_connection_keeps_unsent_messages_and_retransmits_them() {
    let (mut h, peer) = connected(config(), FixedVerifier::open(0.9), no_fact_checking()).await;

    drop(peer);
    let _ = wait(&mut h.snapshots, |s| s.connection_state == ConnectionState::Reconnecting).await;

    assert!(!h.facade.send_message("Are you still there?"));
    let snapshot = h.facade.snapshot();
    let pending = snapshot.messages[0].clone();
    assert!(pending.unsent);

    let mut peer = next_peer(&mut h.peers).await;
    let ClientIntent::UserMessage(out) = next_intent(&mut peer).await else {
        panic!("expected retransmitted user_message");
    };
    assert_eq!(out.id, Some(pending.id.clone()));
    assert_eq!(out.correlation_id, pending.correlation_id);
    let snapshot =
        wait(&mut h.snapshots, |s| s.connection_state == ConnectionState::Connected).await;
    assert!(snapshot.messages[0].unsent);

    assert!(
        peer.send_text(frame(ServerEvent::UserMessage(UserMessageEcho {
            id: pending.id.clone(),
            user_id: ParticipantId::from("u1"),
            content: out.content,
            correlation_id: out.correlation_id,
        })))
        .await
    );
    let snapshot = wait(&mut h.snapshots, |s| !s.messages[0].unsent).await;
    assert_eq!(snapshot.messages.len(), 1);
    assert_eq!(h.transport.open_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn exhausted_budget_enters_degraded_mode_until_manual_reconnect() {
    let cfg = SyncConfig {
        max_reconnect_attempts: 2,
        reconnect_delay: Duration::from_millis(100),
        ..config()
    };
    let (mut h, peer) = connected(cfg, FixedVerifier::open(0.9), no_fact_checking()).await;

    h.transport.set_available(false);
    drop(peer);
    let _ = wait(&mut h.snapshots, |s| s.offline).await;
    assert_eq!(next_advisory(&mut h.advisories).await, Advisory::Offline { attempts: 2 });

    assert!(!h.facade.send_message("Hello?"));
    let snapshot = h.facade.snapshot();
    assert_eq!(snapshot.connection_state, ConnectionState::Disconnected);
    assert!(snapshot.messages[0].unsent);

    h.transport.set_available(true);
    h.facade.reconnect().await.unwrap();
    let mut peer = next_peer(&mut h.peers).await;
    let snapshot = wait(&mut h.snapshots, |s| {
        !s.offline && s.connection_state == ConnectionState::Connected
    })
    .await;
    assert_eq!(snapshot.messages.len(), 1);
    assert_matches!(
        next_intent(&mut peer).await,
        ClientIntent::UserMessage(out) if out.content == "Hello?"
    );
}

#[tokio::test(start_paused = true)]
async fn typing_indicator_expires_without_further_events() {
    let (mut h, peer) = connected(config(), FixedVerifier::open(0.9), session()).await;

    assert!(
        peer.send_text(frame(ServerEvent::ExpertTyping(ExpertTyping {
            expert_id: ParticipantId::from("e1"),
            is_typing: true,
        })))
        .await
    );
    let _ = wait(&mut h.snapshots, |s| {
        s.typing_participants == vec![ParticipantId::from("e1")]
    })
    .await;
    let start = Instant::now();

    let _ = wait(&mut h.snapshots, |s| s.typing_participants.is_empty()).await;
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(3), "expired early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(3500), "expired late: {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn expert_message_ends_typing_immediately() {
    let (mut h, peer) = connected(config(), FixedVerifier::open(0.9), no_fact_checking()).await;

    assert!(
        peer.send_text(frame(ServerEvent::ExpertTyping(ExpertTyping {
            expert_id: ParticipantId::from("e1"),
            is_typing: true,
        })))
        .await
    );
    let _ = wait(&mut h.snapshots, |s| !s.typing_participants.is_empty()).await;
    let start = Instant::now();
    assert!(peer.send_text(expert_message("m1", "Paris.")).await);
    let snapshot = wait(&mut h.snapshots, |s| s.messages.len() == 1).await;
    assert!(snapshot.typing_participants.is_empty());
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn foreign_unknown_and_malformed_frames_are_discarded() {
    let (mut h, peer) = connected(config(), FixedVerifier::open(0.9), no_fact_checking()).await;

    let foreign = Envelope::new(
        Some(SessionId::from("another-session")),
        ServerEvent::ExpertMessage(ExpertMessage {
            id: MessageId::from("m-foreign"),
            expert_id: ParticipantId::from("e1"),
            content: "wrong room".into(),
            references: Vec::new(),
        }),
    )
    .encode()
    .unwrap();
    assert!(peer.send_text(foreign).await);
    let mystery =
        r#"{"type":"mystery","id":"x1","timestamp":"2024-01-01T00:00:00Z","payload":{}}"#;
    let hollow =
        r#"{"type":"expert_message","id":"x2","timestamp":"2024-01-01T00:00:00Z","payload":{}}"#;
    assert!(peer.send_text(mystery).await);
    assert!(peer.send_text("not json at all").await);
    assert!(peer.send_text(hollow).await);
    assert!(peer.send_text(expert_message("m-ok", "Rome.")).await);

    let snapshot = wait(&mut h.snapshots, |s| !s.messages.is_empty()).await;
    assert_eq!(snapshot.messages.len(), 1);
    assert_eq!(snapshot.messages[0].id.as_str(), "m-ok");
}

#[tokio::test(start_paused = true)]
async fn duplicate_expert_message_is_ignored() {
    let (mut h, peer) = connected(config(), FixedVerifier::open(0.9), no_fact_checking()).await;

    assert!(peer.send_text(expert_message("m1", "first")).await);
    assert!(peer.send_text(expert_message("m1", "second")).await);
    assert!(peer.send_text(expert_message("m2", "marker")).await);

    let snapshot = wait(&mut h.snapshots, |s| s.messages.len() == 2).await;
    assert_eq!(message(&snapshot, "m1").unwrap().content, "first");
}

#[tokio::test(start_paused = true)]
async fn server_verdict_below_threshold_raises_advisory_and_never_regresses() {
    let (mut h, peer) = connected(config(), FixedVerifier::open(0.9), no_fact_checking()).await;

    assert!(peer.send_text(expert_message("m1", "Sydney is the capital of Australia.")).await);
    let _ = wait(&mut h.snapshots, |s| s.messages.len() == 1).await;

    assert!(
        peer.send_text(frame(ServerEvent::FactCheckResult(FactCheckResult {
            message_id: MessageId::from("m1"),
            verified: false,
            confidence: Some(0.3),
            sources: vec![Source::titled("Atlas")],
        })))
        .await
    );
    let _ = wait(&mut h.snapshots, |s| {
        message(s, "m1").is_some_and(|m| m.verification == VerificationStatus::Contested)
    })
    .await;
    assert_eq!(
        next_advisory(&mut h.advisories).await,
        Advisory::LowConfidence {
            message_id: MessageId::from("m1"),
            confidence: 0.3,
        }
    );

    assert!(
        peer.send_text(frame(ServerEvent::FactCheckResult(FactCheckResult {
            message_id: MessageId::from("m1"),
            verified: true,
            confidence: Some(0.99),
            sources: Vec::new(),
        })))
        .await
    );
    assert!(peer.send_text(expert_message("m2", "marker")).await);
    let snapshot = wait(&mut h.snapshots, |s| s.messages.len() == 2).await;
    let m1 = message(&snapshot, "m1").unwrap();
    assert_eq!(m1.verification, VerificationStatus::Contested);
    assert_eq!(m1.confidence, Some(0.3));
}

#[tokio::test(start_paused = true)]
async fn verifier_failure_returns_message_to_unchecked() {
    let (mut h, peer) = connected(config(), Arc::new(FailingVerifier), session()).await;

    assert!(peer.send_text(expert_message("m1", "Berlin.")).await);
    let snapshot = wait(&mut h.snapshots, |s| {
        message(s, "m1").is_some_and(|m| m.verification_failure.is_some())
    })
    .await;
    let m1 = message(&snapshot, "m1").unwrap();
    assert_eq!(m1.verification, VerificationStatus::Unchecked);
    assert_matches!(
        next_advisory(&mut h.advisories).await,
        Advisory::VerificationFailed { message_id, .. } if message_id.as_str() == "m1"
    );
}

#[tokio::test(start_paused = true)]
async fn status_toggle_waits_for_server_confirmation() {
    let (mut h, mut peer) = connected(config(), FixedVerifier::open(0.9), session()).await;

    assert!(h.facade.toggle_status());
    assert_eq!(h.facade.snapshot().session_status, SessionStatus::Active);
    assert_eq!(next_intent(&mut peer).await, ClientIntent::ToggleStatus);

    assert!(
        peer.send_text(frame(ServerEvent::StatusChanged(StatusChanged {
            status: SessionStatus::Paused,
        })))
        .await
    );
    let _ = wait(&mut h.snapshots, |s| s.session_status == SessionStatus::Paused).await;
}

#[tokio::test(start_paused = true)]
async fn server_error_is_an_advisory() {
    let (mut h, peer) = connected(config(), FixedVerifier::open(0.9), session()).await;
    assert!(
        peer.send_text(frame(ServerEvent::Error(ServerError {
            message: "rate limited".into(),
            code: Some("429".into()),
        })))
        .await
    );
    assert_eq!(
        next_advisory(&mut h.advisories).await,
        Advisory::ServerError {
            message: "rate limited".into(),
            code: Some("429".into()),
        }
    );
}

#[tokio::test(start_paused = true)]
async fn typing_notifications_and_ratings_are_sent() {
    let (mut h, mut peer) = connected(config(), FixedVerifier::open(0.9), no_fact_checking()).await;

    assert!(h.facade.notify_typing(true));
    assert_eq!(next_intent(&mut peer).await, ClientIntent::TypingStart);
    assert!(h.facade.notify_typing(false));
    assert_eq!(next_intent(&mut peer).await, ClientIntent::TypingEnd);

    assert!(peer.send_text(expert_message("m1", "Berlin.")).await);
    let _ = wait(&mut h.snapshots, |s| s.messages.len() == 1).await;
    assert!(h.facade.rate_message(&MessageId::from("m1"), Rating::Helpful));
    let m1 = message(&h.facade.snapshot(), "m1").cloned().unwrap();
    assert_eq!(m1.rating, Some(Rating::Helpful));
    assert_eq!(m1.score, Some(1));
    assert_eq!(
        next_intent(&mut peer).await,
        ClientIntent::RateMessage(RateMessage {
            message_id: MessageId::from("m1"),
            rating: Rating::Helpful,
        })
    );
    assert!(!h.facade.rate_message(&MessageId::from("ghost"), Rating::Helpful));
}

#[tokio::test(start_paused = true)]
async fn facades_on_one_session_share_a_connection() {
    let (registry, transport, mut peers) = registry(config());
    let verifier: Arc<dyn FactVerifier> = FixedVerifier::open(0.9);
    let first = SessionFacade::open(&registry, Arc::clone(&verifier), session(), options());
    let second = SessionFacade::open(&registry, verifier, session(), options());

    first.connect().await.unwrap();
    second.connect().await.unwrap();
    let mut peer = next_peer(&mut peers).await;
    assert_eq!(transport.open_count(), 1);
    assert_eq!(registry.lease_count(&SessionId::from("s1")), 2);

    first.close();
    assert_eq!(registry.lease_count(&SessionId::from("s1")), 1);
    second.close();
    assert!(registry.is_empty());
    assert_eq!(timeout(WAIT, peer.recv_text()).await.unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn open_from_store_seeds_the_ledger() {
    let store = MemorySessionStore::new();
    let mut stored = session();
    stored.messages.push(Message::confirmed(
        MessageId::from("m1"),
        stored.id.clone(),
        ParticipantId::from("e1"),
        "Welcome to the debate.",
        Utc::now(),
    ));
    store.create_session(&stored).await.unwrap();

    let (registry, _transport, _peers) = registry(config());
    let facade = SessionFacade::open_from_store(
        &registry,
        FixedVerifier::open(0.9),
        &store,
        &stored.id,
        options(),
    )
    .await
    .unwrap();
    let snapshot = facade.snapshot();
    assert_eq!(snapshot.topic, "Capital cities");
    assert_eq!(snapshot.messages.len(), 1);
    assert_eq!(snapshot.connection_state, ConnectionState::Disconnected);

    let missing = SessionFacade::open_from_store(
        &registry,
        FixedVerifier::open(0.9),
        &store,
        &SessionId::from("nope"),
        options(),
    )
    .await;
    assert!(matches!(missing, Err(StoreError::NotFound(_))));
}

#[tokio::test(start_paused = true)]
async fn export_renders_the_current_transcript() {
    let (mut h, peer) = connected(config(), FixedVerifier::open(0.9), no_fact_checking()).await;
    assert!(peer.send_text(expert_message("m1", "Berlin is the capital.")).await);
    let _ = wait(&mut h.snapshots, |s| s.messages.len() == 1).await;

    let markdown = h.facade.export_session(ExportFormat::Markdown).unwrap();
    assert!(markdown.starts_with("# Capital cities"));
    assert!(markdown.contains("**Dr. Atlas**"));
    assert!(markdown.contains("> Berlin is the capital."));

    let exported = h.facade.export_session(ExportFormat::Json).unwrap();
    let json: serde_json::Value = serde_json::from_str(&exported).unwrap();
    assert_eq!(json["sessionId"], "s1");
    assert_eq!(h.registry.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn burst_of_frames_larger_than_the_buffer_is_applied_in_full() {
    let cfg = SyncConfig {
        event_buffer: 16,
        ..config()
    };
    let (mut h, peer) = connected(cfg, FixedVerifier::open(0.9), no_fact_checking()).await;

    let sender = tokio::spawn(async move {
        for i in 0..200 {
            let text = expert_message(&format!("m{i}"), &format!("Point {i}."));
            assert!(peer.send_text(text).await);
        }
        peer
    });
    let snapshot = wait(&mut h.snapshots, |s| s.messages.len() == 200).await;
    assert!((0..200).all(|i| message(&snapshot, &format!("m{i}")).is_some()));
    let _peer = sender.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn check_in_flight_runs_to_completion_after_the_facade_is_dropped() {
    let verifier = Arc::new(SlowVerifier {
        latency: Duration::from_secs(5),
        finished: AtomicBool::new(false),
    });
    let (mut h, peer) = connected(config(), verifier.clone(), session()).await;

    assert!(peer.send_text(expert_message("m1", "Berlin.")).await);
    let _ = wait(&mut h.snapshots, |s| {
        message(s, "m1").is_some_and(|m| m.verification == VerificationStatus::Checking)
    })
    .await;

    drop(h);
    sleep(Duration::from_secs(30)).await;
    assert!(verifier.finished.load(Ordering::SeqCst));
}
