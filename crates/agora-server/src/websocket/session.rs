//! WebSocket session lifecycle: one connected participant from upgrade
//! through disconnect.

use std::sync::Arc;
use std::time::Duration;

use agora_core::{ParticipantId, Session};
use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::connection::{ClientConnection, Outbound};
use super::heartbeat::{HeartbeatResult, run_heartbeat};
use crate::hub::DebateHub;

/// How long the write task may take to flush a Close frame on exit.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Run a WebSocket session for a participant joined to `session`.
///
/// 1. Registers the connection with the hub, which announces it
/// 2. Forwards queued frames to the socket from a write task
/// 3. Dispatches inbound text frames as intents
/// 4. Drops the client once it stays silent past the heartbeat timeout
/// 5. Unregisters on disconnect or server shutdown
#[instrument(skip_all, fields(client_id = %client_id, session_id = %session.id))]
pub async fn run_ws_session(
    ws: WebSocket,
    hub: Arc<DebateHub>,
    session: Session,
    participant_id: ParticipantId,
    client_id: String,
    shutdown: CancellationToken,
) {
    let config = hub.config().clone();
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (send_tx, mut send_rx) = mpsc::channel::<Outbound>(config.client_buffer);
    let connection = Arc::new(ClientConnection::new(
        client_id,
        session.id.clone(),
        participant_id,
        send_tx,
    ));

    hub.join(&connection, &session);

    let writer = tokio::spawn(async move {
        while let Some(frame) = send_rx.recv().await {
            let (message, last) = match frame {
                Outbound::Text(text) => (Message::Text(text.to_string().into()), false),
                Outbound::Ping => (Message::Ping(Bytes::new()), false),
                Outbound::Close => (Message::Close(None), true),
            };
            if ws_tx.send(message).await.is_err() || last {
                break;
            }
        }
    });

    let heartbeat = run_heartbeat(
        Arc::clone(&connection),
        config.heartbeat_interval,
        config.heartbeat_timeout,
        shutdown.child_token(),
    );
    tokio::pin!(heartbeat);

    loop {
        tokio::select! {
            result = &mut heartbeat => {
                if result == HeartbeatResult::TimedOut {
                    warn!(
                        idle_secs = connection.idle_for().as_secs(),
                        "client unresponsive, disconnecting"
                    );
                }
                break;
            }
            incoming = ws_rx.next() => {
                let Some(Ok(message)) = incoming else { break };
                connection.mark_alive();
                let text = match message {
                    Message::Text(text) => text.as_str().to_owned(),
                    Message::Binary(data) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => text,
                        Err(_) => {
                            debug!(len = data.len(), "ignoring non-UTF8 binary frame");
                            continue;
                        }
                    },
                    Message::Close(_) => {
                        debug!("client sent close frame");
                        break;
                    }
                    Message::Ping(_) | Message::Pong(_) => continue,
                };
                hub.handle_frame(&connection, &text).await;
            }
        }
    }

    hub.leave(&connection);
    let _ = connection.close();
    drop(connection);
    let abort = writer.abort_handle();
    if tokio::time::timeout(CLOSE_GRACE, writer).await.is_err() {
        abort.abort();
    }
    info!("client disconnected");
}
