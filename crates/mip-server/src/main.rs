//! MIP node binary.
//!
//! Loads configuration, generates the node identity, starts the outbound
//! worker and serves the HTTP API until SIGINT/SIGTERM.

use mip_federation::MipNode;
use mip_identity::NodeIdentity;
use mip_server::{app, background, config, AppState, MipClient};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("MIP_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration");

    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    let settings = config.identity_settings();
    let identity = tokio::task::spawn_blocking(move || NodeIdentity::generate(settings))
        .await
        .expect("identity generation task panicked")
        .expect("failed to generate node keypair");
    let identity = Arc::new(identity);

    tracing::info!(
        mip_identifier = identity.mip_identifier(),
        mip_url = identity.mip_url(),
        organization = identity.organization_name(),
        trust_threshold = identity.trust_threshold(),
        "node identity ready"
    );

    let node = Arc::new(MipNode::new(identity.clone(), config.node_policy()));
    let loaded = node
        .add_members(config.members.clone())
        .expect("failed to load member directory");
    if loaded > 0 {
        tracing::info!(count = loaded, "loaded member directory");
    }

    let client = MipClient::new(identity, config.outbound_timeout())
        .expect("failed to build outbound HTTP client");
    let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound.queue_capacity);
    let worker = tokio::spawn(background::run_outbound_worker(
        node.clone(),
        client.clone(),
        outbound_rx,
        config.outbound.max_concurrent_deliveries,
    ));

    if config.admin.token.is_none() {
        tracing::warn!("admin.token is not set; the admin API is disabled");
    }

    let state = AppState {
        node,
        outbound: outbound_tx,
        client,
        admin_token: config.admin.token.clone(),
    };

    let app = app(state);
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(%addr, "starting MIP node");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind listen address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // The router held the last queue sender; the worker finishes what is
    // already queued and exits.
    if let Err(e) = worker.await {
        tracing::error!(error = %e, "outbound worker task failed");
    }

    tracing::info!("MIP node shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
