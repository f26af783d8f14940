//! Configuration types and CLI/environment parsing for the lockbox service.
//!
//! Everything can be set via environment variables or command line arguments
//! using `clap`. Embedding applications may flatten [`LockboxConfig`] into a
//! larger config with `#[clap(flatten)]`.
//!
//! Additionally this module defines the [`Environment`] to assert dev-only
//! code paths (like the in-memory storage backend).

use std::net::SocketAddr;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use secrecy::SecretString;

/// The environment the service is running in.
///
/// Components that must never carry real vault data (in-memory storage, the
/// in-memory mailer, ...) guard their construction with
/// [`Environment::assert_is_dev`].
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Environment {
    /// Production environment.
    Prod,
    /// Development environment.
    Dev,
}

impl Environment {
    /// Refuses to proceed outside `dev`: panics when a dev-only backend is
    /// wired into a `prod` service.
    pub fn assert_is_dev(&self) {
        assert!(
            matches!(self, Environment::Dev),
            "dev-only backend refused outside the dev environment"
        )
    }
}

/// The configuration for the lockbox service.
#[derive(Parser, Debug)]
pub struct LockboxConfig {
    /// The environment of the service (either `prod` or `dev`).
    #[clap(long, env = "LOCKBOX_ENVIRONMENT", default_value = "prod")]
    pub environment: Environment,

    /// The address the HTTP server binds to.
    #[clap(long, env = "LOCKBOX_BIND_ADDR", default_value = "127.0.0.1:8080")]
    pub bind_addr: SocketAddr,

    /// Max time an issued session is valid.
    #[clap(
        long,
        env = "LOCKBOX_SESSION_LIFETIME",
        default_value = "12h",
        value_parser = humantime::parse_duration
    )]
    pub session_lifetime: Duration,

    /// Deadline for the client to answer `init_auth` with its proof.
    ///
    /// Stale handshakes are discarded by the sweeper.
    #[clap(
        long,
        env = "LOCKBOX_HANDSHAKE_LIFETIME",
        default_value = "2min",
        value_parser = humantime::parse_duration
    )]
    pub handshake_lifetime: Duration,

    /// Max time an email-verification token stays redeemable.
    #[clap(
        long,
        env = "LOCKBOX_VERIFICATION_TOKEN_LIFETIME",
        default_value = "1h",
        value_parser = humantime::parse_duration
    )]
    pub verification_token_lifetime: Duration,

    /// Failed login proofs allowed per account within the window.
    #[clap(long, env = "LOCKBOX_MAX_FAILED_LOGINS", default_value = "5")]
    pub max_failed_logins: u32,

    /// The window for counting failed login proofs.
    #[clap(
        long,
        env = "LOCKBOX_FAILED_LOGIN_WINDOW",
        default_value = "10min",
        value_parser = humantime::parse_duration
    )]
    pub failed_login_window: Duration,

    /// Interval of the background sweep over expired sessions, handshakes and
    /// verification tokens.
    #[clap(
        long,
        env = "LOCKBOX_SWEEP_INTERVAL",
        default_value = "1min",
        value_parser = humantime::parse_duration
    )]
    pub sweep_interval: Duration,

    /// The server secret behind simulated auth responses. Never logged.
    #[clap(long, env = "LOCKBOX_SERVER_SECRET")]
    pub server_secret: SecretString,

    /// Max time to wait for service shutdown before giving up.
    #[clap(
        long,
        env = "LOCKBOX_MAX_WAIT_TIME_SHUTDOWN",
        default_value = "10s",
        value_parser = humantime::parse_duration
    )]
    pub max_wait_time_shutdown: Duration,
}
