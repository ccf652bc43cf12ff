use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::Context;
use sms_drip::api::api_routes;
use sms_drip::config::EngineConfig;
use sms_drip::dispatch::{DeliveryGateway, FallbackGateway, gateway_from_env, spawn_dispatch_ticker};
use sms_drip::engine::Engine;
use sms_drip::error::GatewayError;
use sms_drip::store::{CampaignStore, LibSqlBackend};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Optional daily log file alongside stderr; the guard flushes on exit.
    let (file_layer, _log_guard) = match std::env::var("DRIP_LOG_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "sms-drip.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        Err(_) => (None, None),
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    let config = EngineConfig::from_env().context("invalid configuration")?;

    let port: u16 = std::env::var("DRIP_HTTP_PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse()
        .context("DRIP_HTTP_PORT must be a port number")?;

    // ── Database ─────────────────────────────────────────────────────────
    let db_path = std::env::var("DRIP_DB_PATH").unwrap_or_else(|_| "./data/sms-drip.db".to_string());
    let store: Arc<dyn CampaignStore> = Arc::new(
        LibSqlBackend::new_local(std::path::Path::new(&db_path))
            .await
            .with_context(|| format!("failed to open database at {db_path}"))?,
    );

    // ── Gateway ──────────────────────────────────────────────────────────
    let gateway: Arc<dyn DeliveryGateway> = match gateway_from_env(config.dispatch.send_timeout) {
        Ok(gateway) => Arc::new(gateway),
        Err(GatewayError::NotConfigured) => {
            tracing::warn!("No SMS provider configured (DRIP_GATEWAY_URL); every send will fail");
            Arc::new(FallbackGateway::new(Vec::new()))
        }
        Err(e) => return Err(e).context("failed to build SMS gateway"),
    };

    let schedule = config.dispatch.schedule.clone();
    let engine = Arc::new(Engine::new(config, store, gateway));

    // ── Dispatch ticker ──────────────────────────────────────────────────
    let (ticker, shutdown) = spawn_dispatch_ticker(Arc::clone(&engine.dispatcher), &schedule)?;
    tracing::info!(schedule = %schedule, "Dispatch scheduled");

    // ── HTTP ─────────────────────────────────────────────────────────────
    let app = api_routes(Arc::clone(&engine));
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .with_context(|| format!("failed to bind port {port}"))?;
    tracing::info!(port, db = %db_path, "SMS drip engine started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    tracing::info!("Shutting down");
    shutdown.store(true, Ordering::Relaxed);
    ticker.await.ok();
    Ok(())
}
