//! Channel lifecycle coordination for Beacon.
//!
//! The coordinator is the component a transport integrates against. It owns
//! the join, leave, and client-event flows: classification, the auth
//! handshake, presence bookkeeping, and webhook gating on true per-user
//! transitions. It holds no lock across a suspension point; the presence
//! registry serializes racing joins and leaves internally.

use crate::classify::{ChannelClassifier, ChannelKind};
use crate::event::LifecycleEvent;
use crate::presence::{JoinTransition, LeaveTransition, PresenceMember, PresenceRegistry};
use crate::traits::{
    AuthResult, ChannelAuthenticator, ChannelTransport, ConnectionId, ConnectionInfo,
    LifecycleHook,
};
use dashmap::DashMap;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of a join flow, returned to the transport so it can answer the
/// subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum JoinOutcome {
    /// The connection is now subscribed.
    Joined {
        /// The channel's kind.
        kind: ChannelKind,
        /// Opaque payload from the auth handshake, if any.
        channel_data: Option<Value>,
        /// Current roster, populated for presence channels.
        members: Option<Vec<PresenceMember>>,
    },
    /// The subscription was rejected; the connection has been notified.
    Rejected {
        /// Status code reported by the application server.
        status: u16,
        /// Reason reported by the application server.
        reason: String,
    },
}

/// A connection's live subscription to one channel.
#[derive(Debug, Clone)]
struct Subscription {
    kind: ChannelKind,
    /// Presence identity recorded at join time, needed to leave.
    user_id: Option<String>,
}

/// Orchestrates join, leave, and client-event flows.
pub struct ChannelCoordinator {
    classifier: ChannelClassifier,
    registry: PresenceRegistry,
    transport: Arc<dyn ChannelTransport>,
    authenticator: Arc<dyn ChannelAuthenticator>,
    hook: Arc<dyn LifecycleHook>,
    /// Client events that relay but never trigger a webhook.
    excluded_client_events: HashSet<String>,
    /// Channels each connection is subscribed to.
    subscriptions: DashMap<ConnectionId, HashMap<String, Subscription>>,
}

impl ChannelCoordinator {
    /// Create a coordinator wired to the given collaborators.
    #[must_use]
    pub fn new(
        classifier: ChannelClassifier,
        transport: Arc<dyn ChannelTransport>,
        authenticator: Arc<dyn ChannelAuthenticator>,
        hook: Arc<dyn LifecycleHook>,
        excluded_client_events: HashSet<String>,
    ) -> Self {
        Self {
            classifier,
            registry: PresenceRegistry::new(),
            transport,
            authenticator,
            hook,
            excluded_client_events,
            subscriptions: DashMap::new(),
        }
    }

    /// The presence registry, for roster queries and metrics.
    #[must_use]
    pub fn registry(&self) -> &PresenceRegistry {
        &self.registry
    }

    /// The classifier in use.
    #[must_use]
    pub fn classifier(&self) -> &ChannelClassifier {
        &self.classifier
    }

    /// Whether `conn` is currently subscribed to `channel`.
    #[must_use]
    pub fn is_subscribed(&self, conn: &ConnectionInfo, channel: &str) -> bool {
        self.subscriptions
            .get(&conn.id)
            .is_some_and(|subs| subs.contains_key(channel))
    }

    /// Run the join flow for `conn` and `channel`.
    ///
    /// Public channels subscribe immediately. Private and presence channels
    /// authenticate first; a denial notifies the connection and leaves every
    /// piece of state untouched. A presence `FirstJoin` dispatches exactly
    /// one `join` webhook.
    pub async fn join(
        &self,
        conn: &ConnectionInfo,
        channel: &str,
        auth_token: Option<&str>,
    ) -> JoinOutcome {
        let kind = self.classifier.classify(channel);

        let channel_data = if kind.requires_auth() {
            match self.authenticator.authenticate(conn, channel, auth_token).await {
                AuthResult::Authorized { channel_data } => channel_data,
                AuthResult::Denied { reason, status } => {
                    debug!(channel = %channel, connection = %conn.id, status, "Subscription denied");
                    self.transport.reject(&conn.id, channel, status).await;
                    return JoinOutcome::Rejected { status, reason };
                }
            }
        } else {
            None
        };

        self.transport.join_room(&conn.id, channel).await;

        let (user_id, members) = if kind == ChannelKind::Presence {
            let member = member_from_channel_data(conn, channel_data.as_ref());
            let user_id = member.user_id.clone();

            if self.registry.join(channel, &conn.id, member) == JoinTransition::FirstJoin {
                self.hook
                    .dispatch(LifecycleEvent::join(channel, user_id.clone()), conn)
                    .await;
            }

            (Some(user_id), Some(self.registry.members(channel)))
        } else {
            (None, None)
        };

        self.subscriptions
            .entry(conn.id.clone())
            .or_default()
            .insert(channel.to_string(), Subscription { kind, user_id });

        debug!(channel = %channel, connection = %conn.id, ?kind, "Subscribed");

        JoinOutcome::Joined {
            kind,
            channel_data,
            members,
        }
    }

    /// Run the leave flow for `conn` and `channel`.
    ///
    /// Leaving a channel the connection never joined is a no-op: no webhook,
    /// no error. The transport room is vacated regardless of webhook
    /// outcome.
    pub async fn leave(&self, conn: &ConnectionInfo, channel: &str) {
        let subscription = self
            .subscriptions
            .get_mut(&conn.id)
            .and_then(|mut subs| subs.remove(channel));

        if let Some(subscription) = subscription {
            self.settle_leave(conn, channel, &subscription).await;
        }

        self.transport.leave_room(&conn.id, channel).await;
    }

    /// Run the client-event flow.
    ///
    /// The event relays only when the name is classified as a client event,
    /// the channel is private or presence, and the sender is currently
    /// subscribed; any condition failing relays nothing. Relayed events
    /// dispatch a `client_event` webhook unless the name is excluded.
    ///
    /// Returns whether the event was relayed.
    pub async fn client_event(
        &self,
        conn: &ConnectionInfo,
        channel: &str,
        event: &str,
        payload: &Value,
    ) -> bool {
        if !self.classifier.is_client_event(event) {
            warn!(channel = %channel, connection = %conn.id, event = %event, "Dropped non-client event");
            return false;
        }

        if !self.classifier.classify(channel).requires_auth() {
            warn!(channel = %channel, connection = %conn.id, "Dropped client event on public channel");
            return false;
        }

        if !self.is_subscribed(conn, channel) {
            warn!(channel = %channel, connection = %conn.id, "Dropped client event from non-subscriber");
            return false;
        }

        self.transport.relay(channel, &conn.id, event, payload).await;

        if !self.excluded_client_events.contains(event) {
            self.hook
                .dispatch(LifecycleEvent::client_event(channel, event, payload), conn)
                .await;
        }

        true
    }

    /// Leave every channel `conn` is subscribed to.
    ///
    /// Called by the transport when a connection drops, so last-tab
    /// disconnects produce the same webhooks as explicit leaves.
    pub async fn disconnect(&self, conn: &ConnectionInfo) {
        let Some((_, subs)) = self.subscriptions.remove(&conn.id) else {
            return;
        };

        for (channel, subscription) in subs {
            self.settle_leave(conn, &channel, &subscription).await;
            self.transport.leave_room(&conn.id, &channel).await;
        }

        debug!(connection = %conn.id, "Disconnected from all channels");
    }

    /// Presence bookkeeping and the leave webhook for one settled
    /// subscription.
    async fn settle_leave(&self, conn: &ConnectionInfo, channel: &str, sub: &Subscription) {
        match (&sub.kind, &sub.user_id) {
            (ChannelKind::Presence, Some(user_id)) => {
                match self.registry.leave(channel, &conn.id, user_id) {
                    LeaveTransition::LastLeave => {
                        self.hook
                            .dispatch(LifecycleEvent::leave(channel, user_id.clone()), conn)
                            .await;
                    }
                    LeaveTransition::StillPresent | LeaveTransition::NotFound => {}
                }
            }
            _ => {
                // No per-user membership concept to deduplicate against.
                self.hook
                    .dispatch(LifecycleEvent::vacated(channel), conn)
                    .await;
            }
        }

        debug!(channel = %channel, connection = %conn.id, "Unsubscribed");
    }
}

/// Resolve the presence identity from the auth handshake's `channel_data`.
///
/// Falls back to the connection id when the application server supplied no
/// `user_id`, degrading dedup to per-connection rather than failing the
/// join.
fn member_from_channel_data(conn: &ConnectionInfo, channel_data: Option<&Value>) -> PresenceMember {
    let user_id = channel_data
        .and_then(|data| data.get("user_id"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| conn.id.as_str().to_string());

    let user_info = channel_data
        .and_then(|data| data.get("user_info"))
        .cloned()
        .unwrap_or(Value::Null);

    PresenceMember::new(user_id).with_info(user_info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ClassifierRules;
    use crate::traits::ConnectionId;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingTransport {
        joins: Mutex<Vec<(String, String)>>,
        leaves: Mutex<Vec<(String, String)>>,
        relays: Mutex<Vec<(String, String, String, Value)>>,
        rejects: Mutex<Vec<(String, String, u16)>>,
    }

    #[async_trait]
    impl ChannelTransport for RecordingTransport {
        async fn join_room(&self, conn: &ConnectionId, channel: &str) {
            self.joins
                .lock()
                .unwrap()
                .push((conn.to_string(), channel.to_string()));
        }

        async fn leave_room(&self, conn: &ConnectionId, channel: &str) {
            self.leaves
                .lock()
                .unwrap()
                .push((conn.to_string(), channel.to_string()));
        }

        async fn relay(&self, channel: &str, exclude: &ConnectionId, event: &str, payload: &Value) {
            self.relays.lock().unwrap().push((
                channel.to_string(),
                exclude.to_string(),
                event.to_string(),
                payload.clone(),
            ));
        }

        async fn reject(&self, conn: &ConnectionId, channel: &str, status: u16) {
            self.rejects
                .lock()
                .unwrap()
                .push((conn.to_string(), channel.to_string(), status));
        }
    }

    struct FixedAuthenticator {
        result: AuthResult,
        calls: Mutex<usize>,
    }

    impl FixedAuthenticator {
        fn authorizing(channel_data: Option<Value>) -> Self {
            Self {
                result: AuthResult::Authorized { channel_data },
                calls: Mutex::new(0),
            }
        }

        fn denying(status: u16) -> Self {
            Self {
                result: AuthResult::denied(status, "denied"),
                calls: Mutex::new(0),
            }
        }

        fn call_count(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl ChannelAuthenticator for FixedAuthenticator {
        async fn authenticate(
            &self,
            _conn: &ConnectionInfo,
            _channel: &str,
            _auth_token: Option<&str>,
        ) -> AuthResult {
            *self.calls.lock().unwrap() += 1;
            self.result.clone()
        }
    }

    #[derive(Default)]
    struct RecordingHook {
        events: Mutex<Vec<LifecycleEvent>>,
    }

    impl RecordingHook {
        fn events(&self) -> Vec<LifecycleEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LifecycleHook for RecordingHook {
        async fn dispatch(&self, event: LifecycleEvent, _conn: &ConnectionInfo) {
            self.events.lock().unwrap().push(event);
        }
    }

    struct Harness {
        coordinator: ChannelCoordinator,
        transport: Arc<RecordingTransport>,
        authenticator: Arc<FixedAuthenticator>,
        hook: Arc<RecordingHook>,
    }

    fn harness(authenticator: FixedAuthenticator) -> Harness {
        harness_with_exclusions(authenticator, HashSet::new())
    }

    fn harness_with_exclusions(
        authenticator: FixedAuthenticator,
        excluded: HashSet<String>,
    ) -> Harness {
        let transport = Arc::new(RecordingTransport::default());
        let authenticator = Arc::new(authenticator);
        let hook = Arc::new(RecordingHook::default());

        let coordinator = ChannelCoordinator::new(
            ChannelClassifier::new(ClassifierRules::default()),
            Arc::clone(&transport) as Arc<dyn ChannelTransport>,
            Arc::clone(&authenticator) as Arc<dyn ChannelAuthenticator>,
            Arc::clone(&hook) as Arc<dyn LifecycleHook>,
            excluded,
        );

        Harness {
            coordinator,
            transport,
            authenticator,
            hook,
        }
    }

    fn presence_data(user_id: &str) -> Option<Value> {
        Some(json!({"user_id": user_id, "user_info": {"name": user_id}}))
    }

    #[tokio::test]
    async fn test_public_join_skips_auth_and_hooks() {
        let h = harness(FixedAuthenticator::denying(403));
        let conn = ConnectionInfo::new("c1");

        let outcome = h.coordinator.join(&conn, "news", None).await;

        assert!(matches!(
            outcome,
            JoinOutcome::Joined {
                kind: ChannelKind::Public,
                ..
            }
        ));
        assert_eq!(h.authenticator.call_count(), 0);
        assert_eq!(
            h.transport.joins.lock().unwrap().as_slice(),
            &[("c1".to_string(), "news".to_string())]
        );
        assert!(h.hook.events().is_empty());
    }

    #[tokio::test]
    async fn test_denied_join_rejects_and_mutates_nothing() {
        let h = harness(FixedAuthenticator::denying(403));
        let conn = ConnectionInfo::new("c1");

        let outcome = h.coordinator.join(&conn, "private-orders", Some("token")).await;

        assert_eq!(
            outcome,
            JoinOutcome::Rejected {
                status: 403,
                reason: "denied".to_string()
            }
        );
        assert_eq!(
            h.transport.rejects.lock().unwrap().as_slice(),
            &[("c1".to_string(), "private-orders".to_string(), 403)]
        );
        assert!(h.transport.joins.lock().unwrap().is_empty());
        assert!(h.hook.events().is_empty());
        assert_eq!(h.coordinator.registry().total_members(), 0);
        assert!(!h.coordinator.is_subscribed(&conn, "private-orders"));
    }

    #[tokio::test]
    async fn test_denied_presence_join_leaves_registry_untouched() {
        let h = harness(FixedAuthenticator::denying(401));
        let conn = ConnectionInfo::new("c1");

        h.coordinator.join(&conn, "presence-room1", None).await;

        assert_eq!(h.coordinator.registry().member_count("presence-room1"), 0);
        assert!(h.hook.events().is_empty());
    }

    #[tokio::test]
    async fn test_presence_first_join_dispatches_one_hook() {
        let h = harness(FixedAuthenticator::authorizing(presence_data("u1")));
        let conn = ConnectionInfo::new("c1");

        let outcome = h.coordinator.join(&conn, "presence-room1", None).await;

        let events = h.hook.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0], LifecycleEvent::join("presence-room1", "u1"));

        match outcome {
            JoinOutcome::Joined {
                kind,
                members: Some(members),
                ..
            } => {
                assert_eq!(kind, ChannelKind::Presence);
                assert_eq!(members.len(), 1);
                assert_eq!(members[0].user_id, "u1");
                assert_eq!(members[0].user_info, json!({"name": "u1"}));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_two_tabs_one_join_one_leave_hook() {
        // Same user on two connections: exactly one join and one leave
        // webhook across the whole sequence.
        let h = harness(FixedAuthenticator::authorizing(presence_data("u1")));
        let c1 = ConnectionInfo::new("c1");
        let c2 = ConnectionInfo::new("c2");

        h.coordinator.join(&c1, "presence-room1", None).await;
        h.coordinator.join(&c2, "presence-room1", None).await;
        h.coordinator.leave(&c1, "presence-room1").await;

        assert_eq!(h.hook.events().len(), 1, "no leave hook while a tab remains");
        assert_eq!(h.coordinator.registry().member_count("presence-room1"), 1);

        h.coordinator.leave(&c2, "presence-room1").await;

        let events = h.hook.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], LifecycleEvent::join("presence-room1", "u1"));
        assert_eq!(events[1], LifecycleEvent::leave("presence-room1", "u1"));
        assert_eq!(h.coordinator.registry().member_count("presence-room1"), 0);
    }

    #[tokio::test]
    async fn test_leave_never_joined_is_noop() {
        let h = harness(FixedAuthenticator::authorizing(None));
        let conn = ConnectionInfo::new("c1");

        h.coordinator.leave(&conn, "private-orders").await;

        assert!(h.hook.events().is_empty());
        // The room is still vacated at the transport level.
        assert_eq!(
            h.transport.leaves.lock().unwrap().as_slice(),
            &[("c1".to_string(), "private-orders".to_string())]
        );
    }

    #[tokio::test]
    async fn test_non_presence_leave_fires_empty_payload_hook() {
        let h = harness(FixedAuthenticator::authorizing(None));
        let conn = ConnectionInfo::new("c1");

        h.coordinator.join(&conn, "private-orders", None).await;
        h.coordinator.leave(&conn, "private-orders").await;

        let events = h.hook.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0], LifecycleEvent::vacated("private-orders"));
    }

    #[tokio::test]
    async fn test_client_event_relays_and_hooks() {
        let h = harness(FixedAuthenticator::authorizing(presence_data("u1")));
        let conn = ConnectionInfo::new("c1");
        h.coordinator.join(&conn, "presence-room1", None).await;

        let relayed = h
            .coordinator
            .client_event(&conn, "presence-room1", "client-move", &json!({"x": 1}))
            .await;

        assert!(relayed);
        assert_eq!(
            h.transport.relays.lock().unwrap().as_slice(),
            &[(
                "presence-room1".to_string(),
                "c1".to_string(),
                "client-move".to_string(),
                json!({"x": 1})
            )]
        );

        let events = h.hook.events();
        assert_eq!(events.len(), 2); // join + client_event
        assert_eq!(
            events[1],
            LifecycleEvent::client_event("presence-room1", "client-move", &json!({"x": 1}))
        );
    }

    #[tokio::test]
    async fn test_client_event_gating() {
        let h = harness(FixedAuthenticator::authorizing(None));
        let conn = ConnectionInfo::new("c1");
        h.coordinator.join(&conn, "private-orders", None).await;
        h.coordinator.join(&conn, "news", None).await;

        // Not a client event name.
        assert!(
            !h.coordinator
                .client_event(&conn, "private-orders", "order-created", &json!({}))
                .await
        );
        // Public channel.
        assert!(
            !h.coordinator
                .client_event(&conn, "news", "client-hello", &json!({}))
                .await
        );
        // Not subscribed.
        assert!(
            !h.coordinator
                .client_event(&conn, "private-other", "client-hello", &json!({}))
                .await
        );

        assert!(h.transport.relays.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_excluded_client_event_relays_without_hook() {
        let excluded = HashSet::from(["client-typing".to_string()]);
        let h = harness_with_exclusions(
            FixedAuthenticator::authorizing(presence_data("u1")),
            excluded,
        );
        let conn = ConnectionInfo::new("c1");
        h.coordinator.join(&conn, "presence-room1", None).await;

        let relayed = h
            .coordinator
            .client_event(&conn, "presence-room1", "client-typing", &json!({}))
            .await;

        assert!(relayed);
        assert_eq!(h.transport.relays.lock().unwrap().len(), 1);
        // Only the join hook fired.
        assert_eq!(h.hook.events().len(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_settles_all_subscriptions() {
        let h = harness(FixedAuthenticator::authorizing(presence_data("u1")));
        let conn = ConnectionInfo::new("c1");

        h.coordinator.join(&conn, "presence-room1", None).await;
        h.coordinator.join(&conn, "news", None).await;
        h.coordinator.disconnect(&conn).await;

        let events = h.hook.events();
        assert!(events.contains(&LifecycleEvent::join("presence-room1", "u1")));
        assert!(events.contains(&LifecycleEvent::leave("presence-room1", "u1")));
        // Public channel leaves carry no per-user identity.
        assert!(events.contains(&LifecycleEvent::vacated("news")));
        assert_eq!(h.coordinator.registry().total_members(), 0);
        assert!(!h.coordinator.is_subscribed(&conn, "news"));
    }

    #[tokio::test]
    async fn test_missing_user_id_falls_back_to_connection_identity() {
        let h = harness(FixedAuthenticator::authorizing(Some(json!("opaque"))));
        let c1 = ConnectionInfo::new("c1");
        let c2 = ConnectionInfo::new("c2");

        h.coordinator.join(&c1, "presence-room1", None).await;
        h.coordinator.join(&c2, "presence-room1", None).await;

        // Without a shared user id, each connection is its own member.
        assert_eq!(h.coordinator.registry().member_count("presence-room1"), 2);
        assert_eq!(h.hook.events().len(), 2);
    }
}
