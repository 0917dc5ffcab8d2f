pub mod events;
pub mod hub;
pub mod session;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::state::AppState;
use events::{close_code, ClientMessage, ServerMessage};
use hub::HubHandle;
use session::{GatewaySession, SessionHandle};

pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Opaque, process-unique session id.
pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (ws_sink, mut ws_stream) = socket.split();
    let session_id = new_session_id();
    let (handle, rx) = SessionHandle::new(&session_id, state.gateway.session_queue);

    tracing::info!(session_id = %session_id, "gateway connection opened");

    let writer = tokio::spawn(write_loop(
        ws_sink,
        rx,
        handle.clone(),
        state.hub.clone(),
    ));

    // HELLO is queued by the hub as part of registration; nothing is read
    // from the client until it is, so HELLO always goes out first.
    if let Err(e) = state.hub.register(handle.clone()).await {
        tracing::warn!(session_id = %session_id, error = %e, "could not register session");
        handle.close(close_code::GOING_AWAY);
    }

    let closer = handle.clone();
    let closed = handle.close_token();
    let mut session = GatewaySession::new(handle, state.gateway.clone());

    let code = loop {
        tokio::select! {
            _ = closed.cancelled() => break None,
            _ = session.heartbeat_tick() => {
                if session.heartbeat_expired() {
                    tracing::warn!(session_id = %session_id, "heartbeat timed out");
                    break Some(close_code::SESSION_TIMED_OUT);
                }
            }
            msg = ws_stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => match ClientMessage::decode(&text) {
                        Ok(msg) => {
                            if let Err(e) = session.handle(msg) {
                                tracing::warn!(session_id = %session_id, error = %e, "dropping session");
                                break Some(close_code::UNKNOWN_ERROR);
                            }
                        }
                        Err(e) => {
                            tracing::warn!(session_id = %session_id, error = %e, "ignoring bad frame");
                        }
                    },
                    Some(Ok(Message::Close(_))) | None => break Some(close_code::NORMAL),
                    Some(Err(e)) => {
                        tracing::debug!(session_id = %session_id, error = %e, "read error");
                        break Some(close_code::UNKNOWN_ERROR);
                    }
                    _ => {}
                }
            }
        }
    };

    if let Some(code) = code {
        let _ = state.hub.unregister(&session_id, code).await;
        // The hub may already be gone; make sure the writer still stops.
        closer.close(code);
    }
    let _ = writer.await;
    tracing::info!(session_id = %session_id, "gateway connection closed");
}

/// Drain the session's outbound queue onto the socket, stamping dispatch
/// sequence numbers in dequeue order.
async fn write_loop(
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<ServerMessage>,
    handle: SessionHandle,
    hub: HubHandle,
) {
    let closed: CancellationToken = handle.close_token();
    let mut sequence: u64 = 0;

    loop {
        let msg = tokio::select! {
            biased;
            // Frames still queued at close are dropped; the client is gone or
            // being disconnected.
            _ = closed.cancelled() => break,
            msg = rx.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };

        let seq = if msg.is_dispatch() {
            sequence += 1;
            Some(sequence)
        } else {
            None
        };

        let text = match msg.to_frame(seq).and_then(|f| serde_json::to_string(&f)) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(session_id = %handle.session_id(), error = %e, "failed to encode frame");
                continue;
            }
        };

        if ws_sink.send(Message::Text(text.into())).await.is_err() {
            tracing::debug!(session_id = %handle.session_id(), "write error");
            let _ = hub
                .unregister(handle.session_id(), close_code::UNKNOWN_ERROR)
                .await;
            handle.close(close_code::UNKNOWN_ERROR);
            return;
        }
    }

    let frame = CloseFrame {
        code: handle.close_code(),
        reason: close_reason(handle.close_code()).to_string().into(),
    };
    let _ = ws_sink.send(Message::Close(Some(frame))).await;
    let _ = ws_sink.close().await;
}

fn close_reason(code: u16) -> &'static str {
    match code {
        close_code::SESSION_TIMED_OUT => "session timed out",
        close_code::UNKNOWN_ERROR => "unknown error",
        close_code::GOING_AWAY => "server shutting down",
        _ => "",
    }
}
