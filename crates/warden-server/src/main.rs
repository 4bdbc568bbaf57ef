mod config;

use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use warden_api::notify::BroadcastNotifier;
use warden_api::state::AppStateInner;
use warden_db::Database;
use warden_moderation::stats::run_flush_loop;
use warden_moderation::{Moderation, ModerationConfig};
use warden_types::events::ModerationEvent;

use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warden=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let config = ServerConfig::from_env()?;
    let moderation_config = ModerationConfig::from_env();

    // Init database
    let db = Arc::new(Database::open(&config.db_path)?);

    let notifier = BroadcastNotifier::new(256);
    tokio::spawn(log_events(notifier.subscribe()));

    let moderation = Moderation::with_sqlite(db, &moderation_config, Arc::new(notifier));
    let stats = moderation.service.stats().clone();
    tokio::spawn(run_flush_loop(stats.clone(), moderation_config.stats_flush_interval));

    let app = warden_api::router(AppStateInner::new(moderation, config.jwt_secret))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    info!("Warden server listening on {}", config.addr);

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Persist every window, the open one included
    let flushed = stats.flush_all().await;
    info!("Shutdown complete, flushed {} stats windows", flushed.len());

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Stands in for the mail/push sender until one is configured.
async fn log_events(mut rx: broadcast::Receiver<ModerationEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => match &event {
                ModerationEvent::QueueItemResolved {
                    item_id, outcome, ..
                } => info!(item_id = %item_id, outcome = outcome.as_str(), "Queue item resolved"),
                ModerationEvent::AppealResolved {
                    appeal_id, status, ..
                } => info!(
                    appeal_id = %appeal_id,
                    recipient = ?event.recipient(),
                    status = status.as_str(),
                    "Appeal resolved, notifying user"
                ),
            },
            Err(RecvError::Lagged(n)) => warn!("Event log lagged, skipped {} events", n),
            Err(RecvError::Closed) => break,
        }
    }
}
