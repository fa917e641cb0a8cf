//! Socket registry and room bookkeeping behind the core's transport trait.
//!
//! The coordinator never sees a WebSocket. It calls the
//! [`ChannelTransport`] capabilities implemented here, which deliver
//! outbound messages through each connection's mpsc queue.

use async_trait::async_trait;
use beacon_core::{ChannelTransport, ConnectionId};
use dashmap::{DashMap, DashSet};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// An outbound message to one connection.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OutboundMessage {
    /// Event name.
    pub event: String,
    /// Channel the message concerns, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// Event payload.
    pub data: Value,
}

impl OutboundMessage {
    /// Greeting carrying the socket id assigned to the connection.
    #[must_use]
    pub fn connection_established(socket_id: &ConnectionId) -> Self {
        Self {
            event: "connection_established".to_string(),
            channel: None,
            data: serde_json::json!({ "socket_id": socket_id.as_str() }),
        }
    }

    /// Successful subscription, with the presence roster when there is one.
    #[must_use]
    pub fn subscription_succeeded(channel: &str, data: Value) -> Self {
        Self {
            event: "subscription_succeeded".to_string(),
            channel: Some(channel.to_string()),
            data,
        }
    }

    /// Rejected subscription.
    #[must_use]
    pub fn subscription_error(channel: &str, status: u16) -> Self {
        Self {
            event: "subscription_error".to_string(),
            channel: Some(channel.to_string()),
            data: serde_json::json!({ "status": status }),
        }
    }

    /// A relayed client event.
    #[must_use]
    pub fn relayed(channel: &str, event: &str, payload: &Value) -> Self {
        Self {
            event: event.to_string(),
            channel: Some(channel.to_string()),
            data: payload.clone(),
        }
    }
}

/// Sender half of a connection's outbound queue.
pub type OutboundSender = mpsc::UnboundedSender<OutboundMessage>;

/// WebSocket-backed [`ChannelTransport`].
#[derive(Debug, Default)]
pub struct WsTransport {
    /// Outbound queues by connection.
    sockets: DashMap<ConnectionId, OutboundSender>,
    /// Room membership by channel.
    rooms: DashMap<String, DashSet<ConnectionId>>,
}

impl WsTransport {
    /// Create an empty transport.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection's outbound queue.
    pub fn register(&self, conn: ConnectionId, sender: OutboundSender) {
        debug!(connection = %conn, "Connection registered");
        self.sockets.insert(conn, sender);
    }

    /// Drop a connection's outbound queue and sweep it from every room.
    pub fn unregister(&self, conn: &ConnectionId) {
        self.sockets.remove(conn);
        self.rooms.retain(|_, members| {
            members.remove(conn);
            !members.is_empty()
        });
        debug!(connection = %conn, "Connection unregistered");
    }

    /// Queue a message to one connection.
    ///
    /// A closed or unknown connection drops the message silently; the
    /// disconnect path will sweep it.
    pub fn send(&self, conn: &ConnectionId, message: OutboundMessage) {
        if let Some(sender) = self.sockets.get(conn) {
            let _ = sender.send(message);
        }
    }

    /// Number of connections in a channel's room.
    #[must_use]
    pub fn room_size(&self, channel: &str) -> usize {
        self.rooms.get(channel).map(|m| m.len()).unwrap_or(0)
    }

    /// Number of registered connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.sockets.len()
    }
}

#[async_trait]
impl ChannelTransport for WsTransport {
    async fn join_room(&self, conn: &ConnectionId, channel: &str) {
        self.rooms
            .entry(channel.to_string())
            .or_default()
            .insert(conn.clone());
        trace!(channel = %channel, connection = %conn, "Joined room");
    }

    async fn leave_room(&self, conn: &ConnectionId, channel: &str) {
        if let Some(members) = self.rooms.get(channel) {
            members.remove(conn);
            if members.is_empty() {
                drop(members);
                self.rooms.remove_if(channel, |_, m| m.is_empty());
            }
        }
        trace!(channel = %channel, connection = %conn, "Left room");
    }

    async fn relay(&self, channel: &str, exclude: &ConnectionId, event: &str, payload: &Value) {
        let Some(members) = self.rooms.get(channel) else {
            return;
        };

        let message = OutboundMessage::relayed(channel, event, payload);
        let mut recipients = 0;
        for member in members.iter() {
            if member.key() == exclude {
                continue;
            }
            self.send(member.key(), message.clone());
            recipients += 1;
        }

        trace!(channel = %channel, event = %event, recipients, "Relayed client event");
    }

    async fn reject(&self, conn: &ConnectionId, channel: &str, status: u16) {
        self.send(conn, OutboundMessage::subscription_error(channel, status));
    }
}
