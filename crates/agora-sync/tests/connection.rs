//! Connection manager lifecycle against an in-process peer, on virtual time.

use std::sync::Arc;
use std::time::Duration;

use agora_core::codec::{Decoded, decode};
use agora_core::errors::ConnectionError;
use agora_core::events::ClientIntent;
use agora_core::ids::SessionId;
use agora_sync::{
    ConnectionEvent, ConnectionManager, ConnectionState, DisconnectReason, MemoryPeer,
    MemoryTransport, StaticEndpoint, SyncConfig,
};
use assert_matches::assert_matches;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, sleep, timeout, timeout_at};

const WAIT: Duration = Duration::from_secs(300);
const HEARTBEAT: &str =
    r#"{"type":"heartbeat","id":"h1","timestamp":"2024-01-01T00:00:00Z","payload":{}}"#;

/// `elapsed` is `secs` give or take timer granularity.
fn within(elapsed: Duration, secs: u64) -> bool {
    let target = Duration::from_secs(secs);
    elapsed >= target && elapsed < target + Duration::from_millis(50)
}

fn config() -> SyncConfig {
    SyncConfig {
        heartbeat_interval: Duration::from_secs(30),
        heartbeat_timeout_multiplier: 2,
        reconnect_delay: Duration::from_secs(3),
        max_reconnect_attempts: 5,
        ..SyncConfig::default()
    }
}

fn setup(
    config: SyncConfig,
) -> (
    Arc<ConnectionManager>,
    MemoryTransport,
    mpsc::UnboundedReceiver<MemoryPeer>,
) {
    let (transport, peers) = MemoryTransport::new();
    let manager = ConnectionManager::new(
        config,
        Arc::new(transport.clone()),
        Arc::new(StaticEndpoint::new("mem://agora/ws")),
    );
    (manager, transport, peers)
}

async fn next_peer(peers: &mut mpsc::UnboundedReceiver<MemoryPeer>) -> MemoryPeer {
    timeout(WAIT, peers.recv()).await.expect("peer in time").expect("transport alive")
}

async fn next_event(events: &mut broadcast::Receiver<ConnectionEvent>) -> ConnectionEvent {
    timeout(WAIT, events.recv())
        .await
        .expect("event in time")
        .expect("manager alive")
}

#[tokio::test(start_paused = true)]
async fn repeated_connect_opens_one_channel() {
    let (manager, transport, mut peers) = setup(config());
    let session = SessionId::from("s1");
    manager.connect(session.clone(), "tok").await.unwrap();
    manager.connect(session.clone(), "tok").await.unwrap();
    manager.connect(session, "tok").await.unwrap();

    assert_eq!(transport.open_count(), 1);
    let _peer = next_peer(&mut peers).await;
    assert!(peers.try_recv().is_err());
    assert_eq!(manager.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn heartbeat_is_sent_on_the_interval() {
    let (manager, _transport, mut peers) = setup(config());
    manager.connect(SessionId::from("s1"), "tok").await.unwrap();
    let mut peer = next_peer(&mut peers).await;

    let start = Instant::now();
    let text = timeout(WAIT, peer.recv_text()).await.unwrap().unwrap();
    assert!(within(start.elapsed(), 30));
    assert_matches!(
        decode::<ClientIntent>(&text),
        Ok(Decoded::Event(env)) if env.event == ClientIntent::Heartbeat
    );
}

#[tokio::test(start_paused = true)]
async fn duplicate_connects_do_not_duplicate_heartbeats() {
    let (manager, _transport, mut peers) = setup(config());
    let session = SessionId::from("s1");
    manager.connect(session.clone(), "tok").await.unwrap();
    manager.connect(session, "tok").await.unwrap();
    let mut peer = next_peer(&mut peers).await;

    // Answer every heartbeat so the channel stays alive.
    let mut heartbeats = 0;
    let deadline = Instant::now() + Duration::from_secs(95);
    while let Ok(Some(_)) = timeout_at(deadline, peer.recv_text()).await {
        heartbeats += 1;
        assert!(peer.send_text(HEARTBEAT).await);
    }
    assert_eq!(heartbeats, 3);
}

#[tokio::test(start_paused = true)]
async fn inbound_text_reaches_every_frame_subscriber() {
    let (manager, _transport, mut peers) = setup(config());
    let mut first = manager.subscribe_frames();
    let mut second = manager.subscribe_frames();
    manager.connect(SessionId::from("s1"), "tok").await.unwrap();
    let peer = next_peer(&mut peers).await;

    assert!(peer.send_text("hello").await);
    assert_eq!(timeout(WAIT, first.recv()).await.unwrap().as_deref(), Some("hello"));
    assert_eq!(timeout(WAIT, second.recv()).await.unwrap().as_deref(), Some("hello"));
}

#[tokio::test(start_paused = true)]
async fn burst_larger_than_the_buffer_arrives_complete_and_in_order() {
    let cfg = SyncConfig {
        event_buffer: 4,
        ..config()
    };
    let (manager, _transport, mut peers) = setup(cfg);
    let mut frames = manager.subscribe_frames();
    manager.connect(SessionId::from("s1"), "tok").await.unwrap();
    let peer = next_peer(&mut peers).await;

    let sender = tokio::spawn(async move {
        for i in 0..100 {
            assert!(peer.send_text(format!("frame-{i}")).await);
        }
        peer
    });
    for i in 0..100 {
        let text = timeout(WAIT, frames.recv()).await.unwrap().unwrap();
        assert_eq!(&*text, format!("frame-{i}"));
    }
    let _peer = sender.await.unwrap();
    assert!(manager.is_connected());
}

#[tokio::test(start_paused = true)]
async fn dropped_frame_subscriber_does_not_block_the_others() {
    let cfg = SyncConfig {
        event_buffer: 1,
        ..config()
    };
    let (manager, _transport, mut peers) = setup(cfg);
    let abandoned = manager.subscribe_frames();
    let mut kept = manager.subscribe_frames();
    manager.connect(SessionId::from("s1"), "tok").await.unwrap();
    let peer = next_peer(&mut peers).await;
    drop(abandoned);

    for i in 0..5 {
        assert!(peer.send_text(format!("frame-{i}")).await);
        let text = timeout(WAIT, kept.recv()).await.unwrap().unwrap();
        assert_eq!(&*text, format!("frame-{i}"));
    }
}

#[tokio::test(start_paused = true)]
async fn silence_is_treated_as_closure() {
    let (manager, _transport, mut peers) = setup(config());
    let mut events = manager.subscribe();
    manager.connect(SessionId::from("s1"), "tok").await.unwrap();
    let _silent_peer = next_peer(&mut peers).await;
    assert_eq!(next_event(&mut events).await, ConnectionEvent::Connected);

    let start = Instant::now();
    assert_eq!(next_event(&mut events).await, ConnectionEvent::Reconnecting { attempt: 1 });
    assert!(within(start.elapsed(), 60));
}

#[tokio::test(start_paused = true)]
async fn lost_connection_reconnects_after_the_fixed_delay() {
    let (manager, transport, mut peers) = setup(config());
    let mut events = manager.subscribe();
    manager.connect(SessionId::from("s1"), "tok").await.unwrap();
    let peer = next_peer(&mut peers).await;
    assert_eq!(next_event(&mut events).await, ConnectionEvent::Connected);

    let start = Instant::now();
    drop(peer);
    assert_eq!(next_event(&mut events).await, ConnectionEvent::Reconnecting { attempt: 1 });
    assert_eq!(manager.state(), ConnectionState::Reconnecting);
    assert!(start.elapsed() < Duration::from_secs(3));

    assert_eq!(next_event(&mut events).await, ConnectionEvent::Reconnected);
    assert!(within(start.elapsed(), 3));
    let _peer = next_peer(&mut peers).await;
    assert!(manager.is_connected());
    assert_eq!(manager.attempts(), 0);
    assert_eq!(transport.open_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn reconnect_gives_up_after_the_budget() {
    let (manager, transport, mut peers) = setup(config());
    let mut events = manager.subscribe();
    manager.connect(SessionId::from("s1"), "tok").await.unwrap();
    let peer = next_peer(&mut peers).await;
    assert_eq!(next_event(&mut events).await, ConnectionEvent::Connected);

    transport.set_available(false);
    drop(peer);
    for attempt in 1..=5 {
        assert_eq!(next_event(&mut events).await, ConnectionEvent::Reconnecting { attempt });
        assert_matches!(next_event(&mut events).await, ConnectionEvent::Error { .. });
    }
    assert_eq!(
        next_event(&mut events).await,
        ConnectionEvent::Disconnected {
            reason: DisconnectReason::Exhausted { attempts: 5 }
        }
    );
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert!(manager.is_exhausted());
    assert_eq!(transport.open_count(), 6);

    sleep(Duration::from_secs(600)).await;
    assert_eq!(transport.open_count(), 6);
    assert!(events.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn manual_reconnect_clears_exhaustion() {
    let cfg = SyncConfig {
        max_reconnect_attempts: 2,
        reconnect_delay: Duration::from_millis(100),
        ..config()
    };
    let (manager, transport, mut peers) = setup(cfg);
    let mut events = manager.subscribe();
    manager.connect(SessionId::from("s1"), "tok").await.unwrap();
    let peer = next_peer(&mut peers).await;

    transport.set_available(false);
    drop(peer);
    loop {
        if let ConnectionEvent::Disconnected { reason } = next_event(&mut events).await {
            assert_eq!(reason, DisconnectReason::Exhausted { attempts: 2 });
            break;
        }
    }

    transport.set_available(true);
    manager.reconnect().await.unwrap();
    let peer = next_peer(&mut peers).await;
    assert_eq!(peer.url, "mem://agora/ws?sessionId=s1&token=tok");
    assert!(manager.is_connected());
    assert!(!manager.is_exhausted());
    assert_eq!(manager.attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn disconnect_cancels_a_pending_retry() {
    let (manager, transport, mut peers) = setup(config());
    let mut events = manager.subscribe();
    manager.connect(SessionId::from("s1"), "tok").await.unwrap();
    let peer = next_peer(&mut peers).await;
    assert_eq!(next_event(&mut events).await, ConnectionEvent::Connected);

    drop(peer);
    assert_eq!(next_event(&mut events).await, ConnectionEvent::Reconnecting { attempt: 1 });
    manager.disconnect();
    assert_eq!(
        next_event(&mut events).await,
        ConnectionEvent::Disconnected {
            reason: DisconnectReason::Requested
        }
    );

    sleep(Duration::from_secs(30)).await;
    assert_eq!(transport.open_count(), 1);
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert!(peers.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn disconnect_closes_the_channel() {
    let (manager, _transport, mut peers) = setup(config());
    manager.connect(SessionId::from("s1"), "tok").await.unwrap();
    let mut peer = next_peer(&mut peers).await;

    manager.disconnect();
    assert_eq!(timeout(WAIT, peer.recv_text()).await.unwrap(), None);
    assert!(!manager.send("late".into()));
}

#[tokio::test(start_paused = true)]
async fn initial_connect_failure_is_reported() {
    let (manager, transport, _peers) = setup(config());
    transport.set_available(false);
    let err = manager.connect(SessionId::from("s1"), "tok").await.unwrap_err();
    assert_matches!(err, ConnectionError::Transport(_));
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert!(!manager.is_exhausted());
}
