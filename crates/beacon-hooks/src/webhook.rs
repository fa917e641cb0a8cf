//! Lifecycle webhooks to the application server.
//!
//! Delivery is best-effort, at-most-once: the POST is spawned onto the
//! runtime and the triggering flow never waits on its outcome. Failures are
//! logged and counted, never retried. This is a documented limitation of
//! the webhook contract, not an oversight.

use crate::metrics_names;
use async_trait::async_trait;
use beacon_core::{ConnectionInfo, LifecycleEvent, LifecycleHook};
use metrics::counter;
use tracing::{debug, warn};

/// Header marking webhook requests for the application server.
const REQUESTED_WITH: (&str, &str) = ("X-Requested-With", "XMLHttpRequest");

/// HTTP-backed [`LifecycleHook`].
///
/// With no endpoint configured every dispatch is a no-op, which is how
/// webhooks are disabled.
pub struct WebhookDispatcher {
    client: reqwest::Client,
    endpoint: Option<String>,
}

impl WebhookDispatcher {
    /// Create a dispatcher posting to `endpoint`, or a disabled one when
    /// `endpoint` is `None`.
    #[must_use]
    pub fn new(client: reqwest::Client, endpoint: Option<String>) -> Self {
        Self { client, endpoint }
    }

    /// A dispatcher that drops every event.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: None,
        }
    }

    /// Whether an endpoint is configured.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.endpoint.is_some()
    }
}

/// The form body of a webhook POST: `{event, channel, payload}`.
fn webhook_form(event: &LifecycleEvent) -> Vec<(&'static str, String)> {
    vec![
        ("event", event.kind.as_str().to_string()),
        ("channel", event.channel.clone()),
        (
            "payload",
            serde_json::to_string(&event.payload).unwrap_or_else(|_| "{}".to_string()),
        ),
    ]
}

/// Headers forwarded with every webhook: the connection's original auth
/// headers, its session cookie, and the `X-Requested-With` marker.
fn forwarded_headers(conn: &ConnectionInfo) -> Vec<(String, String)> {
    let mut headers: Vec<(String, String)> = conn
        .auth_headers
        .iter()
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();

    if let Some(cookie) = conn.cookie() {
        headers.push(("Cookie".to_string(), cookie.to_string()));
    }

    headers.push((REQUESTED_WITH.0.to_string(), REQUESTED_WITH.1.to_string()));
    headers
}

#[async_trait]
impl LifecycleHook for WebhookDispatcher {
    async fn dispatch(&self, event: LifecycleEvent, conn: &ConnectionInfo) {
        let Some(endpoint) = &self.endpoint else {
            return;
        };

        let mut request = self.client.post(endpoint).form(&webhook_form(&event));
        for (name, value) in forwarded_headers(conn) {
            request = request.header(name.as_str(), value.as_str());
        }

        let channel = event.channel.clone();
        let kind = event.kind.as_str();

        // Fire and forget: the join/leave/client-event flow that produced
        // this event must not block on delivery.
        tokio::spawn(async move {
            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    counter!(metrics_names::WEBHOOKS_TOTAL, "outcome" => "delivered").increment(1);
                    debug!(channel = %channel, event = kind, "Webhook delivered");
                }
                Ok(response) => {
                    counter!(metrics_names::WEBHOOKS_TOTAL, "outcome" => "failed").increment(1);
                    warn!(
                        channel = %channel,
                        event = kind,
                        status = response.status().as_u16(),
                        "Webhook rejected"
                    );
                }
                Err(err) => {
                    counter!(metrics_names::WEBHOOKS_TOTAL, "outcome" => "failed").increment(1);
                    warn!(channel = %channel, event = kind, error = %err, "Webhook delivery failed");
                }
            }
        });
    }
}
