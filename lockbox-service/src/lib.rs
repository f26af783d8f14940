#![deny(missing_docs)]
//! HTTP service for the lockbox credential vault.
//!
//! The main entry point is the [`ServiceBuilder`]. It wires the storage and
//! mailer backends into the API surface and returns an `axum::Router` that
//! hosting applications serve, plus a `JoinHandle` for the background
//! sweeper task.
//!
//! If internal services encounter a fatal error, the provided
//! `CancellationToken` is cancelled so the hosting application can shut down
//! gracefully. The token can also be cancelled externally to stop the
//! service; hosting applications should await the returned `JoinHandle`
//! after cancelling.
//!
//! The service itself never sees plaintext: every stored entity is the
//! end-to-end encrypted serialized form, sessions are established through an
//! SRP handshake, and permission checks are structural (accessor tables,
//! admin-group membership).

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use axum::Router;
use secrecy::ExposeSecret as _;
use sha2::{Digest as _, Sha256};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use lockbox_core::auth::ServerSecret;

use crate::config::LockboxConfig;
use crate::services::email::{MailerService, VerificationTokens};
use crate::services::rate_limit::RateLimiter;
use crate::services::sessions::{HandshakeStore, SessionStore};
use crate::services::storage::StorageService;

pub(crate) mod api;
pub mod config;
pub mod services;

/// Knobs the request handlers need at runtime.
pub(crate) struct Tuning {
    pub(crate) session_lifetime: Duration,
    pub(crate) handshake_lifetime: Duration,
    pub(crate) verification_token_lifetime: Duration,
}

/// Shared state behind every request handler.
#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) storage: StorageService,
    pub(crate) mailer: MailerService,
    pub(crate) tokens: VerificationTokens,
    pub(crate) sessions: SessionStore,
    pub(crate) handshakes: HandshakeStore,
    pub(crate) rate_limiter: RateLimiter,
    pub(crate) server_secret: Arc<ServerSecret>,
    pub(crate) tuning: Arc<Tuning>,
}

/// [`ServiceBuilder`] to initialize the lockbox service.
pub struct ServiceBuilder {
    state: AppState,
    sweep_interval: Duration,
    cancellation_token: CancellationToken,
}

impl ServiceBuilder {
    /// Initializes the service state from config and backends.
    ///
    /// The server secret behind simulated auth responses is derived from the
    /// configured secret string, so restarts keep simulated records stable.
    pub fn init(
        config: &LockboxConfig,
        storage: StorageService,
        mailer: MailerService,
        cancellation_token: CancellationToken,
    ) -> eyre::Result<Self> {
        let secret_digest = Sha256::digest(config.server_secret.expose_secret().as_bytes());
        let server_secret = ServerSecret::from_slice(&secret_digest)
            .map_err(|err| eyre::eyre!("while deriving server secret: {err}"))?;

        let state = AppState {
            storage,
            mailer,
            tokens: VerificationTokens::default(),
            sessions: SessionStore::default(),
            handshakes: HandshakeStore::default(),
            rate_limiter: RateLimiter::new(config.max_failed_logins, config.failed_login_window),
            server_secret: Arc::new(server_secret),
            tuning: Arc::new(Tuning {
                session_lifetime: config.session_lifetime,
                handshake_lifetime: config.handshake_lifetime,
                verification_token_lifetime: config.verification_token_lifetime,
            }),
        };
        Ok(Self {
            state,
            sweep_interval: config.sweep_interval,
            cancellation_token,
        })
    }

    /// Build the `axum` [`Router`] and spawn the background sweeper.
    ///
    /// # Returns
    ///
    /// Returns a tuple containing:
    /// - An Axum `Router` instance with the configured REST API routes.
    /// - A `JoinHandle` for the sweeper task.
    pub fn build(self) -> (Router, tokio::task::JoinHandle<eyre::Result<()>>) {
        let sweeper = tokio::spawn({
            let state = self.state.clone();
            let cancellation_token = self.cancellation_token.clone();
            let mut interval = tokio::time::interval(self.sweep_interval);
            async move {
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            let now = SystemTime::now();
                            state.sessions.sweep(now);
                            state.handshakes.sweep(now);
                            state.tokens.sweep(now);
                            state.rate_limiter.sweep(now);
                        }
                        _ = cancellation_token.cancelled() => {
                            tracing::info!("sweeper shutting down");
                            return Ok(());
                        }
                    }
                }
            }
        });

        let router = Router::new()
            .merge(api::health::routes())
            .nest("/api/v1", api::v1::routes(self.state))
            .layer(TraceLayer::new_for_http());
        (router, sweeper)
    }
}
