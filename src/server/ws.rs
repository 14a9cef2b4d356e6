//! Per-connection session wiring.
//!
//! Binary frames are raw PCM; text frames are the JSON control protocol.
//! A dedicated writer task owns the outbound half of the socket, so
//! events reach the client in exactly the order the session emitted them.

use crate::pipeline::messages::ClientEvent;
use crate::pipeline::{Session, SessionHandle, SessionInput};
use crate::server::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    info!("client connected");
    let (session, handle) = Session::new(&state.deps);
    let SessionHandle {
        input,
        mut outbound,
    } = handle;
    let session_task = tokio::spawn(session.run());

    let (mut sink, mut stream) = socket.split();

    // Writer task: sole owner of the outbound half.
    let writer = tokio::spawn(async move {
        while let Some(event) = outbound.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    warn!("failed to encode outbound event: {e}");
                    continue;
                }
            };
            if sink.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(msg) = stream.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                debug!("socket receive error: {e}");
                break;
            }
        };
        match msg {
            Message::Binary(data) => {
                if input.send(SessionInput::Pcm(data)).await.is_err() {
                    break;
                }
            }
            Message::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => {
                    if input.send(SessionInput::Control(event)).await.is_err() {
                        break;
                    }
                }
                // One bad message never tears the session down.
                Err(e) => warn!("ignoring malformed client message: {e}"),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    // Dropping the input sender lets the session loop wind down.
    drop(input);
    let _ = session_task.await;
    writer.abort();
    info!("client disconnected");
}
