//! # beacon-hooks
//!
//! HTTP integrations between Beacon and the external application server:
//!
//! - **HttpAuthenticator** - The auth handshake for private and presence
//!   channels; fails closed into a denial
//! - **WebhookDispatcher** - Best-effort, at-most-once lifecycle webhooks
//! - **ClientTls** - Optional mutual-TLS identity and trust policy for
//!   both paths
//!
//! Both clients implement the capability traits from `beacon-core`, so the
//! coordinator never depends on this crate directly.

pub mod auth;
pub mod tls;
pub mod webhook;

use std::path::PathBuf;
use thiserror::Error;

pub use auth::HttpAuthenticator;
pub use tls::{build_client, ClientTls, TlsMaterial};
pub use webhook::WebhookDispatcher;

/// Metric names recorded by this crate, described by the server's metrics
/// initialization.
pub mod metrics_names {
    /// Webhook deliveries, labeled by `outcome` (`delivered` / `failed`).
    pub const WEBHOOKS_TOTAL: &str = "beacon_webhooks_total";
}

/// Errors constructing the HTTP integration layer.
///
/// Delivery-time failures never surface here; they are logged and counted
/// at the call site.
#[derive(Debug, Error)]
pub enum HookError {
    /// TLS material could not be read.
    #[error("failed to read TLS material from {path}: {source}")]
    TlsRead {
        /// The offending path.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The configured key is passphrase-protected.
    #[error("encrypted client keys are not supported; provide an unencrypted key")]
    EncryptedKey,

    /// The certificate/key pair did not form a valid identity.
    #[error("invalid client identity: {0}")]
    InvalidIdentity(#[source] reqwest::Error),

    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
}
