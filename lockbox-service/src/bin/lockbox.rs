//! Lockbox service binary.
//!
//! This is the main entry point for the lockbox vault service. It
//! initializes tracing and starts the service with configuration from
//! command-line arguments or environment variables.
//!
//! The in-memory storage and mailer backends are wired in here, so the
//! binary asserts the `dev` environment; production deployments embed
//! [`lockbox_service::ServiceBuilder`] with their own backends.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use eyre::Context as _;
use lockbox_service::ServiceBuilder;
use lockbox_service::config::LockboxConfig;
use lockbox_service::services::email::MemoryMailer;
use lockbox_service::services::storage::memory::MemoryStorage;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> eyre::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = LockboxConfig::parse();
    // the memory backends hold nothing across restarts
    config.environment.assert_is_dev();
    tracing::info!("starting lockbox-service on {}", config.bind_addr);

    let cancellation_token = CancellationToken::new();
    tokio::spawn({
        let cancellation_token = cancellation_token.clone();
        async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!("could not listen for shutdown signal: {err}");
            }
            tracing::info!("shutdown signal received");
            cancellation_token.cancel();
        }
    });

    let (router, sweeper) = ServiceBuilder::init(
        &config,
        Arc::new(MemoryStorage::new()),
        Arc::new(MemoryMailer::new()),
        cancellation_token.clone(),
    )
    .context("while initiating lockbox service")?
    .build();

    let tcp_listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .context("while binding tcp-listener")?;

    let axum_cancel_token = cancellation_token.clone();
    let server = tokio::spawn(async move {
        let shutdown_signal = axum_cancel_token.clone();
        let axum_result = axum::serve(tcp_listener, router)
            .with_graceful_shutdown(async move { shutdown_signal.cancelled().await })
            .await;
        tracing::info!("axum server shutdown");
        if let Err(err) = axum_result {
            tracing::error!("got error from axum: {err:?}");
        }
        // cancel in case axum errored so the rest of the service stops too
        axum_cancel_token.cancel();
    });

    tracing::info!("everything started successfully - now waiting for shutdown...");
    cancellation_token.cancelled().await;

    let graceful = tokio::time::timeout(config.max_wait_time_shutdown, async move {
        let _ = tokio::join!(server, sweeper);
    })
    .await
    .is_ok();

    if graceful {
        tracing::info!("successfully finished shutdown in time");
        Ok(ExitCode::SUCCESS)
    } else {
        tracing::warn!("could not finish shutdown in time");
        Ok(ExitCode::FAILURE)
    }
}
