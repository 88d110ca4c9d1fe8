//! WebSocket upgrade handler and message dispatch.
//!
//! Each connected client receives:
//! 1. A [`RelayMessage::Snapshot`] of the current session on connect.
//! 2. A [`RelayMessage::ProgressUpdate`] for every session event.
//!
//! Clients can send commands back: `start`, `stop`, `cancel`, `confirm`.
//! A rejected command is answered with [`RelayMessage::CommandError`] to
//! that client only.

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt, stream::SplitSink};
use research_loop::controller::SessionController;
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use crate::api::StartRequest;
use crate::broadcast::RelayMessage;

/// Shared state for WebSocket handlers.
#[derive(Clone)]
pub struct WsState {
    pub controller: SessionController,
    pub broadcast_tx: broadcast::Sender<RelayMessage>,
}

/// Commands a client may send.
#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Start(StartRequest),
    Stop,
    Cancel,
    Confirm,
}

/// GET /ws: WebSocket upgrade handler.
pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(ws_state): State<WsState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, ws_state))
}

/// Handle a single WebSocket connection.
async fn handle_socket(socket: WebSocket, ws_state: WsState) {
    let (mut sink, mut stream) = socket.split();

    // Subscribe before the snapshot so no update falls between the two.
    let mut broadcast_rx = ws_state.broadcast_tx.subscribe();
    let snapshot = RelayMessage::Snapshot(ws_state.controller.get_session());
    if ws_send(&mut sink, &snapshot).await.is_err() {
        return;
    }
    debug!("WebSocket client connected");
    let (direct_tx, mut direct_rx) = mpsc::channel::<RelayMessage>(8);

    let controller = ws_state.controller.clone();
    let forward_task = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                received = broadcast_rx.recv() => match received {
                    Ok(msg) => msg,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("WebSocket client lagged by {n} messages, resending snapshot");
                        RelayMessage::Snapshot(controller.get_session())
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                Some(msg) = direct_rx.recv() => msg,
            };
            if ws_send(&mut sink, &msg).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = stream.next().await {
        match msg {
            Message::Text(text) => handle_client_message(&text, &ws_state.controller, &direct_tx),
            Message::Close(_) => break,
            _ => {}
        }
    }

    debug!("WebSocket client disconnected");
    forward_task.abort();
}

/// Run a client command. Controller calls await the host surface, so they
/// run on their own task rather than blocking the read loop.
fn handle_client_message(text: &str, controller: &SessionController, reply: &mpsc::Sender<RelayMessage>) {
    let Ok(msg) = serde_json::from_str::<ClientMessage>(text) else {
        debug!("Ignoring malformed WebSocket message");
        return;
    };
    debug!("WebSocket command: {msg:?}");

    let controller = controller.clone();
    let reply = reply.clone();
    tokio::spawn(async move {
        let result = match msg {
            ClientMessage::Start(req) => controller
                .start(&req.topic, req.options(), req.session_id.clone())
                .await
                .map(|_| ()),
            ClientMessage::Stop => controller.stop().await,
            ClientMessage::Cancel => controller.cancel().await.map(|_| ()),
            ClientMessage::Confirm => controller.confirm_and_proceed().await,
        };
        if let Err(e) = result {
            let _ = reply.send(RelayMessage::CommandError(e.to_string())).await;
        }
    });
}

/// Serialize a `RelayMessage` and send it over the WebSocket sink.
async fn ws_send(sink: &mut SplitSink<WebSocket, Message>, msg: &RelayMessage) -> Result<(), ()> {
    let json = serde_json::to_string(msg).unwrap_or_default();
    sink.send(Message::Text(json.into())).await.map_err(|_| ())
}
