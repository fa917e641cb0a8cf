//! # Beacon Server
//!
//! Realtime pub/sub authorization and presence server.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! beacon
//!
//! # Run with a config file at ./beacon.toml
//! beacon
//!
//! # Run with environment variables
//! BEACON_PORT=8080 BEACON_HOST=0.0.0.0 beacon
//! ```

mod config;
mod handlers;
mod metrics;
mod transport;

use anyhow::{bail, Context, Result};
use beacon_core::{
    ChannelAuthenticator, ChannelClassifier, ChannelCoordinator, ChannelTransport, LifecycleHook,
};
use beacon_hooks::{build_client, ClientTls, HttpAuthenticator, TlsMaterial, WebhookDispatcher};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::Config::load()?;

    // Initialize tracing; dev_mode only widens the default filter.
    let default_filter = if config.dev_mode {
        "beacon=debug"
    } else {
        "beacon=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Beacon server on {}:{}", config.host, config.port);

    metrics::init_metrics();
    if config.metrics.enabled {
        if let Err(err) = metrics::start_metrics_server(config.metrics.port) {
            tracing::error!("Failed to start metrics server: {}", err);
        }
    }

    let state = build_state(config)?;
    handlers::run_server(state).await?;

    Ok(())
}

/// Wire the classifier, registry, HTTP integrations, and transport into
/// the shared server state.
fn build_state(config: config::Config) -> Result<Arc<handlers::AppState>> {
    let tls = client_tls(&config.app)?;
    let client = build_client(&tls).context("Failed to build application server client")?;

    let authenticator: Arc<dyn ChannelAuthenticator> = Arc::new(HttpAuthenticator::new(
        client.clone(),
        config.app.auth_url(),
    ));

    let hook_url = config.app.hook_url();
    if hook_url.is_none() {
        tracing::info!("No webhook endpoint configured; lifecycle webhooks disabled");
    }
    let hook: Arc<dyn LifecycleHook> = Arc::new(WebhookDispatcher::new(client, hook_url));

    let transport = Arc::new(transport::WsTransport::new());
    let classifier = ChannelClassifier::new(config.channels.rules.clone());
    let excluded: HashSet<String> = config
        .channels
        .excluded_client_events
        .iter()
        .cloned()
        .collect();

    let coordinator = Arc::new(ChannelCoordinator::new(
        classifier,
        Arc::clone(&transport) as Arc<dyn ChannelTransport>,
        authenticator,
        hook,
        excluded,
    ));

    Ok(Arc::new(handlers::AppState {
        coordinator,
        transport,
        config,
    }))
}

/// Assemble the TLS policy for calls to the application server.
fn client_tls(app: &config::AppServerConfig) -> Result<ClientTls> {
    let material = match (&app.ssl_cert_path, &app.ssl_key_path) {
        (Some(cert), Some(key)) => Some(TlsMaterial {
            cert_path: PathBuf::from(cert),
            key_path: PathBuf::from(key),
            passphrase: app.ssl_passphrase.clone(),
        }),
        (None, None) => None,
        _ => bail!("ssl_cert_path and ssl_key_path must be configured together"),
    };

    Ok(ClientTls {
        material,
        accept_invalid_certs: app.accept_invalid_certs,
    })
}
