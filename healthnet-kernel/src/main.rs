/**
 * HEALTHNET KERNEL - Point d'entrée du coordinateur de vivacité
 *
 * RÔLE : Orchestration des modules : config, logs, registre + watchdog
 * (Monitor), sinks de notification, API HTTP.
 *
 * ARCHITECTURE : heartbeat HTTP → Monitor (registre + watchdog par client)
 * → expiration → NotificationSink (log / MQTT).
 */

mod config;
mod health;
mod http;
mod models;
mod monitor;
mod notify;
mod registry;
mod watchdog;

use crate::config::load_config;
use crate::health::HealthTracker;
use crate::http::AppState;
use crate::monitor::Monitor;
use crate::notify::{LogSink, MqttSink, NotificationSink};

use anyhow::Context;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();
    init_logging();

    let cfg = load_config().await.context("failed to load kernel configuration")?;

    // health tracker
    let health_tracker = HealthTracker::new();

    // sink de notification : MQTT si configuré, sinon logs seuls
    let sink: Arc<dyn NotificationSink> = match &cfg.mqtt {
        Some(mqtt) => Arc::new(MqttSink::connect(mqtt, health_tracker.clone())),
        None => Arc::new(LogSink),
    };

    let monitor = Monitor::start(&cfg.network_name, cfg.grace_period(), sink);

    // fabrique l'état unique pour Axum
    let app_state = AppState {
        monitor,
        health_tracker,
    };
    let app = http::build_router(app_state);

    let listener = TcpListener::bind(cfg.bind)
        .await
        .with_context(|| format!("failed to bind {}", cfg.bind))?;
    info!("listening on http://{}", cfg.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;

    info!("kernel stopped");
    Ok(())
}

/// RUST_LOG prioritaire, sinon HEALTHNET_DEBUG_LOGS=true → debug, défaut info
fn init_logging() {
    let debug = std::env::var("HEALTHNET_DEBUG_LOGS")
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    let fallback = if debug { "healthnet_kernel=debug,info" } else { "info" };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)))
        .init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
