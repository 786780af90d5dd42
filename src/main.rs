//! Mada Transfer - Main Application Entry Point
//!
//! REST API backend for sending money from Canada to Madagascar. Clients
//! manage beneficiaries and send one-time or recurring transfers paid by
//! card; the Madagascar team pays them out and confirms delivery; admins
//! run the back office.
//!
//! # Architecture
//!
//! - **Web Framework**: Axum (async HTTP server)
//! - **Database**: PostgreSQL with sqlx (async queries)
//! - **Authentication**: opaque bearer session tokens, stored as SHA-256 hashes
//! - **Payments**: Stripe (customers, subscriptions, payment intents, webhooks)
//! - **Format**: JSON requests/responses
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment variables
//! 2. Create database connection pool
//! 3. Run database migrations
//! 4. Build the payment processor and the scheduled jobs service
//! 5. Build HTTP router with routes and middleware
//! 6. Serve until Ctrl-C, then stop the scheduled jobs

mod app;
mod config;
mod db;
mod error;
mod extract;
mod handlers;
mod middleware;
mod models;
mod services;
#[cfg(test)]
mod test_support;
mod validation;

use std::net::SocketAddr;

use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging with tracing subscriber. Reads RUST_LOG environment variable (defaults to "info" level)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = config::Config::from_env()?;
    tracing::info!("Configuration loaded");

    let pool = db::create_pool(&config.database_url, config.database_max_connections).await?;
    tracing::info!("Database pool created");

    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations complete");

    let payments = services::payments::build_processor(&config)?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let autostart = config.scheduler_autostart;
    let state = app::AppState::new(pool, config, payments);

    if autostart {
        state.scheduler.start().await;
    } else {
        tracing::info!("scheduled jobs not started (SCHEDULER_AUTOSTART=false)");
    }

    let scheduler = state.scheduler.clone();
    let router = app::build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Server listening on {}", addr);

    // Connect info feeds the per-client rate limiter
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    scheduler.stop().await;
    tracing::info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
