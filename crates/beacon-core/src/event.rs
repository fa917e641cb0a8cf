//! Lifecycle event types for Beacon.
//!
//! A `LifecycleEvent` is produced and consumed within a single join, leave,
//! or client-event flow. It is never persisted.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The kind of lifecycle transition being reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleKind {
    /// A user truly joined a channel.
    Join,
    /// A user truly left a channel, or a connection left a non-presence channel.
    Leave,
    /// A subscriber broadcast a client event to its peers.
    ClientEvent,
}

impl LifecycleKind {
    /// Stable name used in the webhook body.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleKind::Join => "join",
            LifecycleKind::Leave => "leave",
            LifecycleKind::ClientEvent => "client_event",
        }
    }
}

/// A lifecycle transition reported to the application server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    /// What happened.
    pub kind: LifecycleKind,
    /// The channel it happened on.
    pub channel: String,
    /// The logical user involved, when the channel tracks users.
    pub user_id: Option<String>,
    /// Event payload forwarded to the application server.
    pub payload: Value,
}

impl LifecycleEvent {
    /// A `join` event for a presence channel user.
    #[must_use]
    pub fn join(channel: impl Into<String>, user_id: impl Into<String>) -> Self {
        let user_id = user_id.into();
        Self {
            kind: LifecycleKind::Join,
            channel: channel.into(),
            payload: serde_json::json!({ "user_id": user_id.clone() }),
            user_id: Some(user_id),
        }
    }

    /// A `leave` event for a presence channel user.
    #[must_use]
    pub fn leave(channel: impl Into<String>, user_id: impl Into<String>) -> Self {
        let user_id = user_id.into();
        Self {
            kind: LifecycleKind::Leave,
            channel: channel.into(),
            payload: serde_json::json!({ "user_id": user_id.clone() }),
            user_id: Some(user_id),
        }
    }

    /// A `leave` event for a channel without per-user membership.
    #[must_use]
    pub fn vacated(channel: impl Into<String>) -> Self {
        Self {
            kind: LifecycleKind::Leave,
            channel: channel.into(),
            user_id: None,
            payload: serde_json::json!({}),
        }
    }

    /// A `client_event` notification carrying the event name merged into
    /// the payload.
    #[must_use]
    pub fn client_event(channel: impl Into<String>, event: &str, payload: &Value) -> Self {
        let merged = match payload {
            Value::Object(map) => {
                let mut map = map.clone();
                map.insert("event".to_string(), Value::String(event.to_string()));
                Value::Object(map)
            }
            other => serde_json::json!({ "event": event, "data": other }),
        };

        Self {
            kind: LifecycleKind::ClientEvent,
            channel: channel.into(),
            user_id: None,
            payload: merged,
        }
    }
}
