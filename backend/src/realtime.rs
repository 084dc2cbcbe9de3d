//! In-memory chat relay keyed by request id.
//!
//! Each WebSocket connection registers an outbound channel with the
//! [`RealtimeHub`] and may join any number of request rooms. Membership lives
//! only as long as the connection; nothing here is persisted.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};

pub const EVENT_MESSAGE_RECEIVED: &str = "messageReceived";

pub type OutboundSender = mpsc::UnboundedSender<String>;

/// Frames sent by clients.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "joinRequest")]
    JoinRequest(String),
    #[serde(rename = "leaveRequest")]
    LeaveRequest(String),
    #[serde(rename = "newMessage")]
    NewMessage {
        #[serde(rename = "requestId")]
        request_id: String,
        message: Value,
    },
}

#[derive(Debug, Serialize)]
struct ServerEvent<'a> {
    event: &'a str,
    data: &'a Value,
}

struct Connection {
    sender: OutboundSender,
    rooms: HashSet<String>,
}

#[derive(Default)]
struct HubState {
    connections: HashMap<String, Connection>,
    rooms: HashMap<String, HashSet<String>>,
}

#[derive(Default)]
pub struct RealtimeHub {
    state: RwLock<HubState>,
}

impl RealtimeHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn connect(&self, conn_id: &str) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.write().await;
        state.connections.insert(
            conn_id.to_string(),
            Connection {
                sender: tx,
                rooms: HashSet::new(),
            },
        );
        rx
    }

    /// Drops the connection and all of its room memberships.
    pub async fn disconnect(&self, conn_id: &str) {
        let mut state = self.state.write().await;
        let Some(connection) = state.connections.remove(conn_id) else {
            return;
        };
        for room in connection.rooms {
            remove_member(&mut state.rooms, &room, conn_id);
        }
    }

    pub async fn join(&self, conn_id: &str, room: &str) {
        let mut state = self.state.write().await;
        let Some(connection) = state.connections.get_mut(conn_id) else {
            return;
        };
        connection.rooms.insert(room.to_string());
        state
            .rooms
            .entry(room.to_string())
            .or_default()
            .insert(conn_id.to_string());
    }

    pub async fn leave(&self, conn_id: &str, room: &str) {
        let mut state = self.state.write().await;
        if let Some(connection) = state.connections.get_mut(conn_id) {
            connection.rooms.remove(room);
        }
        remove_member(&mut state.rooms, room, conn_id);
    }

    /// Sends `messageReceived` to every member of `room`; returns how many
    /// connections accepted the frame.
    pub async fn broadcast_message(&self, room: &str, message: &Value) -> usize {
        let frame = match serde_json::to_string(&ServerEvent {
            event: EVENT_MESSAGE_RECEIVED,
            data: message,
        }) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::error!(error = %err, "failed to encode realtime frame");
                return 0;
            }
        };

        let state = self.state.read().await;
        let Some(members) = state.rooms.get(room) else {
            return 0;
        };
        members
            .iter()
            .filter_map(|member| state.connections.get(member))
            .filter(|connection| connection.sender.send(frame.clone()).is_ok())
            .count()
    }

    pub async fn handle_event(&self, conn_id: &str, event: ClientEvent) {
        match event {
            ClientEvent::JoinRequest(room) => self.join(conn_id, &room).await,
            ClientEvent::LeaveRequest(room) => self.leave(conn_id, &room).await,
            ClientEvent::NewMessage {
                request_id,
                message,
            } => {
                let delivered = self.broadcast_message(&request_id, &message).await;
                tracing::debug!(conn_id, request_id = %request_id, delivered, "relayed chat message");
            }
        }
    }

    pub async fn room_size(&self, room: &str) -> usize {
        self.state
            .read()
            .await
            .rooms
            .get(room)
            .map(HashSet::len)
            .unwrap_or(0)
    }

    pub async fn connection_count(&self) -> usize {
        self.state.read().await.connections.len()
    }
}

fn remove_member(rooms: &mut HashMap<String, HashSet<String>>, room: &str, conn_id: &str) {
    if let Some(members) = rooms.get_mut(room) {
        members.remove(conn_id);
        if members.is_empty() {
            rooms.remove(room);
        }
    }
}
