//! ESL Bridge Server
//!
//! Connects to every configured switch, routes agent and call events to
//! pub/sub channels and serves the WebSocket endpoint plus health and
//! monitoring routes.
//!
//! ## Configuration
//!
//! Read from `ESL_BRIDGE_CONFIG` or the first of `config.toml`,
//! `esl-bridge.toml`, `./config/esl-bridge.toml`, `/etc/esl-bridge/config.toml`.
//! `ESL_BRIDGE_*` environment variables override file values.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use esl_bridge::{
    create_router, AppState, BridgeRuntime, BridgeState, CallStoreConfig, EvictionPolicy,
    PubSubHub, ReconnectPolicy, RuntimeConfig,
};
use esl_config::{AppConfig, CallStoreSettings, EvictionMode, ReconnectConfig, ReconnectMode};
use esl_source::{Endpoint, InboundConnector};
use tokio::{net::TcpListener, signal, sync::broadcast};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (for local development)
    let _ = dotenvy::dotenv();

    esl_common::logging::init_logging("esl-bridge");

    info!("Starting ESL Bridge");

    let config = AppConfig::load()?;
    config.validate()?;

    let policy = reconnect_policy(&config.supervisor.reconnect)?;
    info!(
        switches = config.switches.len(),
        policy = ?policy,
        max_calls = config.calls.max_calls,
        eviction = ?config.calls.eviction,
        "Configuration loaded"
    );

    let endpoints: Vec<Endpoint> = config
        .switches
        .iter()
        .map(|s| Endpoint::new(s.host.clone(), s.port, s.password.clone()))
        .collect();

    let hub = Arc::new(PubSubHub::new(config.web.channel_capacity));
    let runtime = BridgeRuntime::new(
        BridgeState::new(endpoints, policy, call_store_config(&config.calls)),
        Arc::new(InboundConnector::new()),
        hub.clone(),
        RuntimeConfig {
            reconnect_check_interval: Duration::from_secs(config.supervisor.check_interval_secs),
            maintenance_interval: Duration::from_secs(config.calls.maintenance_interval_secs),
        },
    );

    let app = create_router(
        AppState {
            hub,
            snapshots: runtime.snapshots(),
        },
        &config.web.mount,
    )
    .layer(TraceLayer::new_for_http());

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let runtime_handle = tokio::spawn(runtime.run(shutdown_rx));

    let addr = format!("{}:{}", config.web.host, config.web.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, mount = %config.web.mount, "ESL Bridge has been started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(Duration::from_secs(10), runtime_handle).await {
        Ok(_) => info!("Bridge runtime stopped"),
        Err(_) => warn!("Bridge runtime did not stop within 10s"),
    }

    info!("ESL Bridge shutdown complete");
    Ok(())
}

fn reconnect_policy(config: &ReconnectConfig) -> Result<ReconnectPolicy> {
    let policy = match config.mode {
        ReconnectMode::Fixed => ReconnectPolicy::Fixed(Duration::from_secs(config.threshold_secs)),
        ReconnectMode::Daytime => ReconnectPolicy::daytime(
            config.day_start_hour,
            config.day_end_hour,
            Duration::from_secs(config.day_threshold_secs),
            Duration::from_secs(config.night_threshold_secs),
        )?,
    };
    Ok(policy)
}

fn call_store_config(settings: &CallStoreSettings) -> CallStoreConfig {
    CallStoreConfig {
        answered_ttl: Duration::from_secs(settings.answered_ttl_secs),
        unanswered_ttl: Duration::from_secs(settings.unanswered_ttl_secs),
        max_calls: settings.max_calls,
        eviction: match settings.eviction {
            EvictionMode::LeastRecentlyUpdated => EvictionPolicy::LeastRecentlyUpdated,
            EvictionMode::Random => EvictionPolicy::Random,
        },
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
