//! Promobot service - payment webhooks and Telegram ingestion.
//!
//! This is the main entry point for the promobot service.

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use promobot_core::PlanCatalog;
use promobot_service::{create_router, AppState, HttpGenerator, ServiceConfig};
use promobot_store::{PgStore, Store};
use promobot_telegram::{
    BotApi, Generator, Messenger, Poller, PollerState, Router as UpdateRouter,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,promobot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting promobot service");

    // Load configuration from environment
    let config = ServiceConfig::from_env();

    tracing::info!(
        listen_addr = %config.listen_addr,
        generator_url = %config.generator_url,
        telegram_override = %config.telegram_api_url.is_some(),
        poll_wait_seconds = config.poll_wait_seconds,
        "Service configuration loaded"
    );

    // Connect to PostgreSQL and apply migrations
    tracing::info!("Connecting to PostgreSQL");
    let store: Arc<dyn Store> = Arc::new(PgStore::connect(&config.database_url).await?);

    // Telegram Bot API client, shared by the poller and the webhook
    // notification path
    let bot = match &config.telegram_api_url {
        Some(url) => BotApi::with_base_url(url.clone()),
        None => BotApi::new(&config.bot_token),
    };
    let messenger: Arc<dyn Messenger> = Arc::new(bot.clone());
    let generator: Arc<dyn Generator> = Arc::new(HttpGenerator::new(
        config.generator_url.clone(),
        config.generator_api_key.clone(),
    ));
    let catalog = Arc::new(PlanCatalog::default());

    // Build app state
    let state = AppState::new(
        Arc::clone(&store),
        Arc::clone(&catalog),
        Arc::clone(&messenger),
        config.clone(),
    );

    // Start the update ingestion loop
    let cancel = CancellationToken::new();
    let update_router = UpdateRouter::new(
        Arc::clone(&store),
        state.ledger.clone(),
        generator,
        messenger,
        catalog,
    );
    let mut poller = Poller::new(bot, update_router, config.backoff_policy(), cancel.clone())
        .with_poll_wait(Duration::from_secs(config.poll_wait_seconds));
    let mut poller_task = tokio::spawn(async move { poller.run().await });
    tracing::info!("Update ingestion loop started");

    // Start HTTP server
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    tracing::info!(listen_addr = %config.listen_addr, "Starting HTTP server");

    let shutdown_cancel = cancel.clone();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
            shutdown_cancel.cancel();
        })
        .into_future();

    // Run until the server stops or the ingestion loop gives up. A halted
    // loop is fatal: the supervisor restarts the whole process.
    tokio::select! {
        result = server => {
            result?;
            cancel.cancel();
            if poller_task.await? == PollerState::Halted {
                return Err("update ingestion loop halted".into());
            }
        }
        state = &mut poller_task => {
            cancel.cancel();
            if state? == PollerState::Halted {
                tracing::error!("Update ingestion loop halted, exiting");
                return Err("update ingestion loop halted".into());
            }
        }
    }

    tracing::info!("Service stopped");
    Ok(())
}
