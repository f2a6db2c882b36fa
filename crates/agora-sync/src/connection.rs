//! Connection manager.
//!
//! Owns one duplex channel for one session. A supervisor task reads inbound
//! frames, sends heartbeats on a fixed interval and treats silence longer
//! than `interval × multiplier` as closure. After an unexpected closure it
//! retries with a constant delay until the attempt budget is spent, then
//! stays disconnected until [`ConnectionManager::reconnect`] is called.
//!
//! Lifecycle notifications go out on a `broadcast` channel. Inbound frames
//! go to each frame subscriber over its own bounded queue; a full queue
//! holds the reader back instead of dropping frames.

use std::fmt;
use std::sync::Arc;

use agora_core::codec::Envelope;
use agora_core::errors::{ConnectionError, TransportError};
use agora_core::events::ClientIntent;
use agora_core::ids::SessionId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::config::SyncConfig;
use crate::transport::{EndpointResolver, Frame, Transport, TransportChannel};

/// Connection lifecycle state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No channel and no retry pending.
    #[default]
    Disconnected,
    /// First open in progress.
    Connecting,
    /// Channel open.
    Connected,
    /// Channel lost; retry pending or in progress.
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        };
        f.write_str(s)
    }
}

/// Why the manager ended up disconnected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `disconnect()` was called.
    Requested,
    /// The reconnect budget is spent; only a manual reconnect clears this.
    Exhausted {
        /// Attempts made before giving up.
        attempts: u32,
    },
}

/// Lifecycle notifications published by the manager.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// First open succeeded.
    Connected,
    /// The manager stopped.
    Disconnected {
        /// Why.
        reason: DisconnectReason,
    },
    /// A retry is scheduled.
    Reconnecting {
        /// 1-based attempt number.
        attempt: u32,
    },
    /// A retry succeeded.
    Reconnected,
    /// A non-fatal failure (open error, failed retry).
    Error {
        /// Description.
        message: String,
    },
}

struct Target {
    session_id: SessionId,
    token: String,
}

struct Inner {
    state: ConnectionState,
    attempts: u32,
    exhausted: bool,
    target: Option<Target>,
    outbound: Option<mpsc::Sender<Frame>>,
    cancel: CancellationToken,
}

enum PumpEnd {
    Cancelled,
    Closed(&'static str),
}

/// One duplex connection for one session.
pub struct ConnectionManager {
    config: SyncConfig,
    transport: Arc<dyn Transport>,
    resolver: Arc<dyn EndpointResolver>,
    inner: Mutex<Inner>,
    events: broadcast::Sender<ConnectionEvent>,
    frames: Mutex<Vec<mpsc::Sender<Arc<str>>>>,
    state_tx: watch::Sender<ConnectionState>,
}

impl ConnectionManager {
    /// Create a disconnected manager.
    pub fn new(
        config: SyncConfig,
        transport: Arc<dyn Transport>,
        resolver: Arc<dyn EndpointResolver>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(config.event_buffer);
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Arc::new(Self {
            config,
            transport,
            resolver,
            inner: Mutex::new(Inner {
                state: ConnectionState::Disconnected,
                attempts: 0,
                exhausted: false,
                target: None,
                outbound: None,
                cancel: CancellationToken::new(),
            }),
            events,
            frames: Mutex::new(Vec::new()),
            state_tx,
        })
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// Whether a channel is open.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Consecutive failed reconnect attempts.
    pub fn attempts(&self) -> u32 {
        self.inner.lock().attempts
    }

    /// Whether the reconnect budget is spent.
    pub fn is_exhausted(&self) -> bool {
        self.inner.lock().exhausted
    }

    /// Session this manager was last connected for.
    pub fn session_id(&self) -> Option<SessionId> {
        self.inner.lock().target.as_ref().map(|t| t.session_id.clone())
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    /// Subscribe to inbound text frames, in arrival order and without loss.
    ///
    /// The queue holds `event_buffer` frames. A subscriber that falls behind
    /// stalls delivery to every subscriber until it catches up. Dropping the
    /// receiver unsubscribes.
    pub fn subscribe_frames(&self) -> mpsc::Receiver<Arc<str>> {
        let (tx, rx) = mpsc::channel(self.config.event_buffer);
        let mut frames = self.frames.lock();
        frames.retain(|existing| !existing.is_closed());
        frames.push(tx);
        rx
    }

    /// Watch state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, inner: &mut Inner, state: ConnectionState) {
        inner.state = state;
        let _ = self.state_tx.send_replace(state);
    }

    fn emit(&self, event: ConnectionEvent) {
        let _ = self.events.send(event);
    }

    /// Open the channel for `session_id`.
    ///
    /// A no-op while connecting, connected or reconnecting, so at most one
    /// supervisor (and heartbeat) runs per manager.
    #[instrument(skip_all, fields(session_id = %session_id))]
    pub async fn connect(
        self: &Arc<Self>,
        session_id: SessionId,
        token: impl Into<String>,
    ) -> Result<(), ConnectionError> {
        let token = token.into();
        let cancel = {
            let mut inner = self.inner.lock();
            if inner.state != ConnectionState::Disconnected {
                debug!(state = %inner.state, "connect ignored, connection already active");
                return Ok(());
            }
            inner.cancel = CancellationToken::new();
            inner.attempts = 0;
            inner.exhausted = false;
            inner.target = Some(Target {
                session_id: session_id.clone(),
                token: token.clone(),
            });
            self.set_state(&mut inner, ConnectionState::Connecting);
            inner.cancel.clone()
        };

        let opened = match self.resolver.resolve(&session_id, &token) {
            Ok(url) => self.open_channel(&url, &cancel).await,
            Err(e) => Err(e.into()),
        };

        match opened {
            Ok(channel) => {
                let Some(inbound) = self.install(channel, &cancel) else {
                    return Err(ConnectionError::Cancelled);
                };
                info!("connected");
                self.emit(ConnectionEvent::Connected);
                let manager = Arc::clone(self);
                let _supervisor = tokio::spawn(manager.supervise(inbound, session_id, cancel));
                Ok(())
            }
            Err(e) => {
                {
                    let mut inner = self.inner.lock();
                    if !cancel.is_cancelled() {
                        self.set_state(&mut inner, ConnectionState::Disconnected);
                    }
                }
                warn!(error = %e, "connect failed");
                self.emit(ConnectionEvent::Error { message: e.to_string() });
                Err(e)
            }
        }
    }

    /// Manual reconnect; clears the exhausted state and resets the budget.
    pub async fn reconnect(self: &Arc<Self>) -> Result<(), ConnectionError> {
        let target = {
            let mut inner = self.inner.lock();
            match inner.state {
                ConnectionState::Connected | ConnectionState::Connecting => return Ok(()),
                ConnectionState::Reconnecting => {
                    inner.cancel.cancel();
                    self.set_state(&mut inner, ConnectionState::Disconnected);
                }
                ConnectionState::Disconnected => {}
            }
            inner
                .target
                .as_ref()
                .map(|t| (t.session_id.clone(), t.token.clone()))
        };
        let Some((session_id, token)) = target else {
            return Err(ConnectionError::NotConfigured);
        };
        info!(session_id = %session_id, "manual reconnect");
        self.connect(session_id, token).await
    }

    /// Close the channel and cancel any pending retry.
    pub fn disconnect(&self) {
        let previous = {
            let mut inner = self.inner.lock();
            inner.cancel.cancel();
            if let Some(tx) = inner.outbound.take() {
                let _ = tx.try_send(Frame::Close);
            }
            inner.attempts = 0;
            inner.exhausted = false;
            let previous = inner.state;
            self.set_state(&mut inner, ConnectionState::Disconnected);
            previous
        };
        if previous != ConnectionState::Disconnected {
            info!("disconnected");
            self.emit(ConnectionEvent::Disconnected {
                reason: DisconnectReason::Requested,
            });
        }
    }

    /// Queue a text frame. Reports submission only.
    pub fn send(&self, text: String) -> bool {
        let inner = self.inner.lock();
        if inner.state != ConnectionState::Connected {
            return false;
        }
        let Some(tx) = &inner.outbound else {
            return false;
        };
        match tx.try_send(Frame::Text(text)) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "outbound frame dropped");
                false
            }
        }
    }

    /// Encode and queue an intent for the connected session.
    pub fn send_intent(&self, intent: ClientIntent) -> bool {
        let Some(session_id) = self.session_id() else {
            return false;
        };
        match Envelope::new(Some(session_id), intent).encode() {
            Ok(text) => self.send(text),
            Err(e) => {
                warn!(error = %e, "failed to encode intent");
                false
            }
        }
    }

    async fn open_channel(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<TransportChannel, ConnectionError> {
        let timeout = self.config.connect_timeout;
        tokio::select! {
            () = cancel.cancelled() => Err(ConnectionError::Cancelled),
            result = time::timeout(timeout, self.transport.open(url)) => match result {
                Ok(Ok(channel)) => Ok(channel),
                Ok(Err(e)) => Err(e.into()),
                Err(_) => Err(TransportError::Timeout(
                    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                )
                .into()),
            },
        }
    }

    /// Mark the channel live. `None` if the run was cancelled meanwhile.
    fn install(
        &self,
        channel: TransportChannel,
        cancel: &CancellationToken,
    ) -> Option<mpsc::Receiver<Frame>> {
        let mut inner = self.inner.lock();
        if cancel.is_cancelled() {
            return None;
        }
        inner.outbound = Some(channel.outbound);
        inner.attempts = 0;
        inner.exhausted = false;
        self.set_state(&mut inner, ConnectionState::Connected);
        Some(channel.inbound)
    }

    #[instrument(skip_all, fields(session_id = %session_id))]
    async fn supervise(
        self: Arc<Self>,
        mut inbound: mpsc::Receiver<Frame>,
        session_id: SessionId,
        cancel: CancellationToken,
    ) {
        loop {
            let reason = match self.pump(&mut inbound, &session_id, &cancel).await {
                PumpEnd::Cancelled => return,
                PumpEnd::Closed(reason) => reason,
            };
            {
                let mut inner = self.inner.lock();
                if cancel.is_cancelled() {
                    return;
                }
                inner.outbound = None;
            }
            warn!(reason, "channel closed unexpectedly");
            match self.retry(&cancel).await {
                Some(next) => inbound = next,
                None => return,
            }
        }
    }

    async fn pump(
        &self,
        inbound: &mut mpsc::Receiver<Frame>,
        session_id: &SessionId,
        cancel: &CancellationToken,
    ) -> PumpEnd {
        let interval = self.config.heartbeat_interval;
        let silence_limit = self.config.heartbeat_timeout();
        let mut ticker = time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_activity = Instant::now();

        loop {
            tokio::select! {
                () = cancel.cancelled() => return PumpEnd::Cancelled,
                frame = inbound.recv() => match frame {
                    None => return PumpEnd::Closed("channel ended"),
                    Some(Frame::Close) => return PumpEnd::Closed("closed by peer"),
                    Some(Frame::Text(text)) => {
                        if !self.deliver(Arc::from(text), cancel).await {
                            return PumpEnd::Cancelled;
                        }
                        last_activity = Instant::now();
                    }
                    Some(Frame::Ping(_) | Frame::Pong(_)) => last_activity = Instant::now(),
                },
                _ = ticker.tick() => {
                    if last_activity.elapsed() >= silence_limit {
                        return PumpEnd::Closed("heartbeat timeout");
                    }
                    let heartbeat =
                        Envelope::new(Some(session_id.clone()), ClientIntent::Heartbeat);
                    match heartbeat.encode() {
                        Ok(text) => {
                            if !self.send(text) {
                                debug!("heartbeat not queued");
                            }
                        }
                        Err(e) => warn!(error = %e, "failed to encode heartbeat"),
                    }
                }
            }
        }
    }

    /// Hand one frame to every subscriber, waiting for room in each queue.
    /// `false` if cancelled meanwhile.
    async fn deliver(&self, text: Arc<str>, cancel: &CancellationToken) -> bool {
        let subscribers = self.frames.lock().clone();
        let mut gone = false;
        for tx in &subscribers {
            tokio::select! {
                () = cancel.cancelled() => return false,
                sent = tx.send(Arc::clone(&text)) => gone |= sent.is_err(),
            }
        }
        if gone {
            self.frames.lock().retain(|tx| !tx.is_closed());
        }
        if subscribers.is_empty() {
            trace!("no frame subscribers, frame dropped");
        }
        true
    }

    /// Constant-delay retry loop. Returns the new inbound queue on success.
    async fn retry(&self, cancel: &CancellationToken) -> Option<mpsc::Receiver<Frame>> {
        let max = self.config.max_reconnect_attempts;
        loop {
            let (attempt, resolved) = {
                let mut inner = self.inner.lock();
                if cancel.is_cancelled() {
                    return None;
                }
                inner.attempts += 1;
                if inner.attempts > max {
                    inner.attempts = max;
                    inner.exhausted = true;
                    self.set_state(&mut inner, ConnectionState::Disconnected);
                    drop(inner);
                    warn!(attempts = max, "reconnect budget exhausted, giving up");
                    self.emit(ConnectionEvent::Disconnected {
                        reason: DisconnectReason::Exhausted { attempts: max },
                    });
                    return None;
                }
                self.set_state(&mut inner, ConnectionState::Reconnecting);
                let target = inner.target.as_ref()?;
                (
                    inner.attempts,
                    self.resolver.resolve(&target.session_id, &target.token),
                )
            };

            info!(
                attempt,
                delay_ms = self.config.reconnect_delay.as_millis(),
                "reconnect scheduled"
            );
            self.emit(ConnectionEvent::Reconnecting { attempt });

            tokio::select! {
                () = cancel.cancelled() => return None,
                () = time::sleep(self.config.reconnect_delay) => {}
            }

            let opened = match resolved {
                Ok(url) => self.open_channel(&url, cancel).await,
                Err(e) => Err(e.into()),
            };
            match opened {
                Ok(channel) => {
                    let inbound = self.install(channel, cancel)?;
                    info!(attempt, "reconnected");
                    self.emit(ConnectionEvent::Reconnected);
                    return Some(inbound);
                }
                Err(ConnectionError::Cancelled) => return None,
                Err(e) => {
                    warn!(attempt, error = %e, "reconnect attempt failed");
                    self.emit(ConnectionEvent::Error { message: e.to_string() });
                }
            }
        }
    }
}
