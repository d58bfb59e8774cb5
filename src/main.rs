//! Sinker webhook delivery service.
//!
//! Main entry point for the delivery engine. Loads configuration, prepares
//! the database, wires the stores, bus, and engine together, and coordinates
//! graceful startup and shutdown.

mod config;

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use sinker_bus::EventBus;
use sinker_core::{Clock, RealClock, Storage};
use sinker_delivery::DeliveryEngine;
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};

use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("starting sinker webhook delivery service");

    let config = Config::load()?;
    info!(
        database_url = %config.database_url_masked(),
        max_connections = config.database_max_connections,
        http_timeout_secs = config.http_timeout_secs,
        sweep_interval_secs = config.sweep_interval_secs,
        "configuration loaded"
    );

    let db_pool = create_database_pool(&config).await?;
    info!("database connection pool established");

    run_migrations(&db_pool).await?;
    info!("database migrations completed");

    let storage = Storage::new(db_pool.clone());
    storage.health_check().await.context("database health check failed")?;

    let clock: Arc<dyn Clock> = Arc::new(RealClock::new());
    let bus = Arc::new(EventBus::new(clock.clone()));
    let mut engine = DeliveryEngine::new(
        storage.events.clone(),
        storage.subscriptions.clone(),
        bus,
        clock,
        config.to_engine_config(),
    )?;

    engine.start();
    info!("sinker is ready to deliver webhooks");

    shutdown_signal().await;
    info!("shutdown signal received, starting graceful shutdown");

    if let Err(e) = engine.shutdown_graceful(config.shutdown_timeout()).await {
        error!(error = %e, "engine shutdown did not complete cleanly");
    }

    db_pool.close().await;
    info!("database connections closed");

    info!("sinker shutdown complete");
    Ok(())
}

/// Initializes tracing with environment-based configuration.
fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,sinker=debug,sinker_delivery=debug"))
        .expect("Invalid RUST_LOG environment variable");

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}

/// Creates the database connection pool with retry logic.
async fn create_database_pool(config: &Config) -> Result<sqlx::PgPool> {
    let mut retries = 0;
    const MAX_RETRIES: u32 = 5;
    const RETRY_DELAY: Duration = Duration::from_secs(2);

    loop {
        match PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(config.database_min_connections)
            .acquire_timeout(Duration::from_secs(config.database_connection_timeout))
            .idle_timeout(Duration::from_secs(600))
            .max_lifetime(Duration::from_secs(1800))
            .connect(&config.database_url)
            .await
        {
            Ok(pool) => return Ok(pool),
            Err(_e) if retries < MAX_RETRIES => {
                retries += 1;
                info!(
                    attempt = retries,
                    max_retries = MAX_RETRIES,
                    "database connection failed, retrying..."
                );
                tokio::time::sleep(RETRY_DELAY).await;
            },
            Err(e) => {
                return Err(e).context("failed to create database connection pool after retries");
            },
        }
    }
}

/// Runs database migrations.
async fn run_migrations(pool: &sqlx::PgPool) -> Result<()> {
    // TODO: move to sqlx::migrate! once a migrations/ directory lands

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS webhook_events (
            id UUID PRIMARY KEY,
            url TEXT NOT NULL,
            method TEXT NOT NULL,
            headers TEXT,
            payload TEXT,
            status TEXT NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            max_attempts INTEGER NOT NULL,
            response_time_ms BIGINT,
            error_message TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await
    .context("failed to create webhook_events table")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS webhook_subscriptions (
            id UUID PRIMARY KEY,
            name TEXT NOT NULL,
            url TEXT NOT NULL,
            events JSONB NOT NULL DEFAULT '[]'::jsonb,
            secret TEXT NOT NULL,
            active BOOLEAN NOT NULL DEFAULT TRUE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await
    .context("failed to create webhook_subscriptions table")?;

    // The retry sweep filters on status and updated_at; recency listings
    // order by created_at.
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_webhook_events_status
        ON webhook_events(status, updated_at)
        "#,
    )
    .execute(pool)
    .await
    .context("failed to create webhook_events status index")?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_webhook_events_created
        ON webhook_events(created_at DESC)
        "#,
    )
    .execute(pool)
    .await
    .context("failed to create webhook_events recency index")?;

    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_webhook_subscriptions_url
        ON webhook_subscriptions(url)
        "#,
    )
    .execute(pool)
    .await
    .context("failed to create webhook_subscriptions url index")?;

    Ok(())
}

/// Waits for shutdown signal (CTRL+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
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
        _ = ctrl_c => {
            info!("received CTRL+C signal");
        },
        _ = terminate => {
            info!("received SIGTERM signal");
        },
    }
}
