use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};

use crate::realtime::{ClientEvent, RealtimeHub};
use crate::state::AppState;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.realtime))
}

/// Registers the socket with the hub, forwards hub frames to the client and
/// feeds client frames back into the hub until either side closes.
async fn handle_socket(socket: WebSocket, hub: Arc<RealtimeHub>) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(conn_id = %conn_id, "realtime client connected");

    let mut rx = hub.connect(&conn_id).await;
    let (mut sink, mut stream) = socket.split();

    let sender_conn_id = conn_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sink.send(Message::Text(frame)).await.is_err() {
                tracing::debug!(conn_id = %sender_conn_id, "realtime sink closed");
                break;
            }
        }
    });

    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => hub.handle_event(&conn_id, event).await,
                Err(err) => {
                    tracing::debug!(conn_id = %conn_id, error = %err, "ignored realtime frame");
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(err) => {
                tracing::debug!(conn_id = %conn_id, error = %err, "realtime receive error");
                break;
            }
        }
    }

    hub.disconnect(&conn_id).await;
    send_task.abort();
    tracing::info!(conn_id = %conn_id, "realtime client disconnected");
}
