//! Capability traits consumed by the coordinator.
//!
//! The coordinator never talks to a socket runtime or the application server
//! directly; it goes through these traits, which keeps the lifecycle state
//! machine testable with in-memory implementations.

use crate::event::LifecycleEvent;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Unique identifier for a transport-level connection.
///
/// Owned by the transport; the core references it by identity only.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Create a new connection ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self(String::new())
    }
}

/// Connection-scoped context captured at accept time.
///
/// `request_headers` are the headers of the original upgrade request;
/// `auth_headers` are the subset forwarded to the application server on
/// auth and webhook calls.
#[derive(Debug, Clone, Default)]
pub struct ConnectionInfo {
    /// The connection's identity.
    pub id: ConnectionId,
    /// Headers of the original request that opened the connection.
    pub request_headers: HashMap<String, String>,
    /// Headers forwarded to the application server.
    pub auth_headers: HashMap<String, String>,
}

impl ConnectionInfo {
    /// Create a context with no captured headers.
    #[must_use]
    pub fn new(id: impl Into<ConnectionId>) -> Self {
        Self {
            id: id.into(),
            request_headers: HashMap::new(),
            auth_headers: HashMap::new(),
        }
    }

    /// The session cookie of the original request, if any.
    #[must_use]
    pub fn cookie(&self) -> Option<&str> {
        self.request_headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("cookie"))
            .map(|(_, v)| v.as_str())
    }
}

/// Outcome of authenticating a connection against a channel.
///
/// There is exactly one failure channel: every transport or protocol error
/// on the way to the application server collapses into `Denied`.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthResult {
    /// The application server authorized the subscription.
    Authorized {
        /// Opaque payload returned by the application server, if any.
        channel_data: Option<Value>,
    },
    /// The application server denied the subscription, or could not be
    /// reached.
    Denied {
        /// Human-readable reason.
        reason: String,
        /// Status code surfaced to the connection.
        status: u16,
    },
}

impl AuthResult {
    /// Denial with the given status and reason.
    #[must_use]
    pub fn denied(status: u16, reason: impl Into<String>) -> Self {
        Self::Denied {
            reason: reason.into(),
            status,
        }
    }
}

/// Authenticates a connection against a channel via the application server.
///
/// Only invoked for private and presence channels.
#[async_trait]
pub trait ChannelAuthenticator: Send + Sync {
    /// Authenticate `conn` for `channel`.
    ///
    /// Suspends on a network round trip. Must never fail past this
    /// boundary: all failures are converted into `AuthResult::Denied`.
    async fn authenticate(
        &self,
        conn: &ConnectionInfo,
        channel: &str,
        auth_token: Option<&str>,
    ) -> AuthResult;
}

/// The transport capabilities the coordinator calls back into.
///
/// Connection acceptance, socket-level room storage, and fan-out delivery
/// live behind this trait.
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    /// Register `conn` with the room for `channel`.
    async fn join_room(&self, conn: &ConnectionId, channel: &str);

    /// Remove `conn` from the room for `channel`.
    async fn leave_room(&self, conn: &ConnectionId, channel: &str);

    /// Deliver `event` to every subscriber of `channel` except `exclude`.
    async fn relay(&self, channel: &str, exclude: &ConnectionId, event: &str, payload: &Value);

    /// Notify `conn` that its subscription to `channel` was rejected.
    async fn reject(&self, conn: &ConnectionId, channel: &str, status: u16);
}

/// Receives lifecycle notifications.
///
/// Implementations are fire-and-forget from the coordinator's perspective:
/// `dispatch` must return promptly and swallow delivery failures.
#[async_trait]
pub trait LifecycleHook: Send + Sync {
    /// Dispatch a lifecycle event, using `conn` for forwarded headers.
    async fn dispatch(&self, event: LifecycleEvent, conn: &ConnectionInfo);
}

/// A hook sink that drops every event. Used when webhooks are disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHook;

#[async_trait]
impl LifecycleHook for NoopHook {
    async fn dispatch(&self, _event: LifecycleEvent, _conn: &ConnectionInfo) {}
}
