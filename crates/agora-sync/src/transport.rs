//! Duplex channel abstraction.
//!
//! A [`Transport`] opens one channel per call and hands back a pair of
//! in-process queues. The channel is considered closed when the inbound
//! queue ends. [`WsTransport`] pumps a `tokio-tungstenite` socket through
//! these queues; [`MemoryTransport`] connects them to an in-process peer.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use agora_core::errors::TransportError;
use agora_core::ids::SessionId;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};

/// One unit on the channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// Encoded envelope.
    Text(String),
    /// Liveness ping.
    Ping(Vec<u8>),
    /// Liveness answer.
    Pong(Vec<u8>),
    /// Orderly close.
    Close,
}

/// Client half of an open channel.
#[derive(Debug)]
pub struct TransportChannel {
    /// Frames to the peer.
    pub outbound: mpsc::Sender<Frame>,
    /// Frames from the peer; `None` once the channel is gone.
    pub inbound: mpsc::Receiver<Frame>,
}

/// Opens duplex channels.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a channel to `url`.
    async fn open(&self, url: &str) -> Result<TransportChannel, TransportError>;
}

/// Maps a session and participant token to an opaque endpoint URL.
pub trait EndpointResolver: Send + Sync {
    /// Endpoint for `session_id`.
    fn resolve(&self, session_id: &SessionId, token: &str) -> Result<String, TransportError>;
}

/// Resolver appending `sessionId` and `token` query parameters to a base URL.
#[derive(Clone, Debug)]
pub struct StaticEndpoint {
    base: String,
}

impl StaticEndpoint {
    /// Resolver for `base` (e.g. `ws://127.0.0.1:8080/ws`).
    pub fn new(base: impl Into<String>) -> Self {
        Self { base: base.into() }
    }
}

impl EndpointResolver for StaticEndpoint {
    fn resolve(&self, session_id: &SessionId, token: &str) -> Result<String, TransportError> {
        if self.base.is_empty() {
            return Err(TransportError::Resolve("empty base URL".into()));
        }
        let sep = if self.base.contains('?') { '&' } else { '?' };
        Ok(format!(
            "{}{sep}sessionId={}&token={}",
            self.base,
            urlencoding::encode(session_id.as_str()),
            urlencoding::encode(token)
        ))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// WebSocket transport
// ─────────────────────────────────────────────────────────────────────────────

/// `tokio-tungstenite` client transport.
#[derive(Clone, Debug)]
pub struct WsTransport {
    buffer: usize,
}

impl WsTransport {
    /// Transport whose queues hold `buffer` frames.
    pub fn new(buffer: usize) -> Self {
        Self { buffer: buffer.max(1) }
    }
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn open(&self, url: &str) -> Result<TransportChannel, TransportError> {
        let (socket, _response) = tokio_tungstenite::connect_async(url).await.map_err(|e| {
            TransportError::Open {
                url: url.to_string(),
                reason: e.to_string(),
            }
        })?;
        let (mut sink, mut stream) = socket.split();
        let (out_tx, mut out_rx) = mpsc::channel::<Frame>(self.buffer);
        let (in_tx, in_rx) = mpsc::channel::<Frame>(self.buffer);

        // Writer: ends when the client drops its sender or the socket fails.
        let _writer = tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                let message = match frame {
                    Frame::Text(text) => WsMessage::Text(text.into()),
                    Frame::Ping(data) => WsMessage::Ping(data.into()),
                    Frame::Pong(data) => WsMessage::Pong(data.into()),
                    Frame::Close => {
                        let _ = sink.send(WsMessage::Close(None)).await;
                        break;
                    }
                };
                if let Err(e) = sink.send(message).await {
                    debug!(error = %e, "websocket write failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        // Reader: dropping `in_tx` signals closure to the client.
        let _reader = tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                let frame = match message {
                    Ok(WsMessage::Text(text)) => Frame::Text(text.as_str().to_owned()),
                    Ok(WsMessage::Binary(data)) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => Frame::Text(text),
                        Err(_) => {
                            debug!(len = data.len(), "dropping non-UTF8 binary frame");
                            continue;
                        }
                    },
                    Ok(WsMessage::Ping(data)) => Frame::Ping(data.to_vec()),
                    Ok(WsMessage::Pong(data)) => Frame::Pong(data.to_vec()),
                    Ok(WsMessage::Close(_)) => Frame::Close,
                    Ok(WsMessage::Frame(_)) => continue,
                    Err(e) => {
                        warn!(error = %e, "websocket read failed");
                        break;
                    }
                };
                let closing = frame == Frame::Close;
                if in_tx.send(frame).await.is_err() || closing {
                    break;
                }
            }
        });

        Ok(TransportChannel {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// In-process transport
// ─────────────────────────────────────────────────────────────────────────────

/// Server half of a [`MemoryTransport`] channel.
#[derive(Debug)]
pub struct MemoryPeer {
    /// URL the client opened.
    pub url: String,
    /// Frames to the client. Dropping this closes the channel.
    pub outbound: mpsc::Sender<Frame>,
    /// Frames from the client.
    pub inbound: mpsc::Receiver<Frame>,
}

impl MemoryPeer {
    /// Send a text frame to the client.
    pub async fn send_text(&self, text: impl Into<String>) -> bool {
        self.outbound.send(Frame::Text(text.into())).await.is_ok()
    }

    /// Next text frame from the client, skipping control frames.
    pub async fn recv_text(&mut self) -> Option<String> {
        loop {
            match self.inbound.recv().await? {
                Frame::Text(text) => return Some(text),
                Frame::Close => return None,
                Frame::Ping(_) | Frame::Pong(_) => {}
            }
        }
    }
}

/// In-process transport; every successful open yields a [`MemoryPeer`].
#[derive(Clone)]
pub struct MemoryTransport {
    peers: mpsc::UnboundedSender<MemoryPeer>,
    available: Arc<AtomicBool>,
    opens: Arc<AtomicUsize>,
    buffer: usize,
}

impl MemoryTransport {
    /// A transport and the stream of peers it produces.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MemoryPeer>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Self {
            peers: tx,
            available: Arc::new(AtomicBool::new(true)),
            opens: Arc::new(AtomicUsize::new(0)),
            buffer: 64,
        };
        (transport, rx)
    }

    /// Make subsequent opens succeed or fail.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of open attempts so far, failed ones included.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self, url: &str) -> Result<TransportChannel, TransportError> {
        let _ = self.opens.fetch_add(1, Ordering::SeqCst);
        if !self.available.load(Ordering::SeqCst) {
            return Err(TransportError::Open {
                url: url.to_string(),
                reason: "peer unavailable".into(),
            });
        }
        let (client_tx, server_rx) = mpsc::channel(self.buffer);
        let (server_tx, client_rx) = mpsc::channel(self.buffer);
        let peer = MemoryPeer {
            url: url.to_string(),
            outbound: server_tx,
            inbound: server_rx,
        };
        self.peers.send(peer).map_err(|_| TransportError::Open {
            url: url.to_string(),
            reason: "no peer listening".into(),
        })?;
        Ok(TransportChannel {
            outbound: client_tx,
            inbound: client_rx,
        })
    }
}
