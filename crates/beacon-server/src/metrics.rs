//! Metrics collection and export for Beacon.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "beacon_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "beacon_connections_active";
    pub const JOINS_TOTAL: &str = "beacon_joins_total";
    pub const LEAVES_TOTAL: &str = "beacon_leaves_total";
    pub const CLIENT_EVENTS_TOTAL: &str = "beacon_client_events_total";
    pub const AUTH_DENIED_TOTAL: &str = "beacon_auth_denied_total";
    pub const PRESENCE_MEMBERS: &str = "beacon_presence_members";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(names::JOINS_TOTAL, "Total number of channel subscriptions");
    metrics::describe_counter!(names::LEAVES_TOTAL, "Total number of channel unsubscriptions");
    metrics::describe_counter!(
        names::CLIENT_EVENTS_TOTAL,
        "Total number of relayed client events"
    );
    metrics::describe_counter!(
        names::AUTH_DENIED_TOTAL,
        "Total number of denied subscription attempts"
    );
    metrics::describe_gauge!(
        names::PRESENCE_MEMBERS,
        "Current number of presence members across all channels"
    );
    metrics::describe_counter!(
        beacon_hooks::metrics_names::WEBHOOKS_TOTAL,
        "Total number of webhook deliveries by outcome"
    );

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a successful subscription.
pub fn record_join(kind: &'static str) {
    counter!(names::JOINS_TOTAL, "kind" => kind).increment(1);
}

/// Record an unsubscription.
pub fn record_leave() {
    counter!(names::LEAVES_TOTAL).increment(1);
}

/// Record a relayed client event.
pub fn record_client_event() {
    counter!(names::CLIENT_EVENTS_TOTAL).increment(1);
}

/// Record a denied subscription attempt.
pub fn record_auth_denied() {
    counter!(names::AUTH_DENIED_TOTAL).increment(1);
}

/// Update the presence member gauge.
pub fn set_presence_members(count: usize) {
    gauge!(names::PRESENCE_MEMBERS).set(count as f64);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}
