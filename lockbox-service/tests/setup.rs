use std::sync::Arc;
use std::time::Duration;

use axum_test::TestServer;
use lockbox_client::Client;
use lockbox_service::ServiceBuilder;
use lockbox_service::config::{Environment, LockboxConfig};
use lockbox_service::services::email::MemoryMailer;
use lockbox_service::services::storage::memory::MemoryStorage;
use lockbox_types::api::v1::VerificationPurpose;
use tokio_util::sync::CancellationToken;

pub struct TestNode {
    pub server: TestServer,
    pub base_url: String,
    pub mailer: Arc<MemoryMailer>,
    pub _cancellation_token: CancellationToken,
}

impl TestNode {
    pub async fn start() -> Self {
        let config = LockboxConfig {
            environment: Environment::Dev,
            bind_addr: "127.0.0.1:0".parse().expect("valid bind addr"),
            session_lifetime: Duration::from_secs(3600),
            handshake_lifetime: Duration::from_secs(60),
            verification_token_lifetime: Duration::from_secs(60),
            max_failed_logins: 3,
            failed_login_window: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(1),
            server_secret: "test-server-secret".to_owned().into(),
            max_wait_time_shutdown: Duration::from_secs(5),
        };

        let mailer = Arc::new(MemoryMailer::new());
        let cancellation_token = CancellationToken::new();
        let (router, _sweeper) = ServiceBuilder::init(
            &config,
            Arc::new(MemoryStorage::new()),
            mailer.clone(),
            cancellation_token.clone(),
        )
        .expect("can init service")
        .build();

        let server = TestServer::builder()
            .http_transport()
            .build(router)
            .expect("Can build test-server");
        let base_url = server
            .server_address()
            .expect("http transport has an address")
            .to_string();

        TestNode {
            server,
            base_url,
            mailer,
            _cancellation_token: cancellation_token,
        }
    }

    pub fn client(&self) -> Client {
        Client::new(self.base_url.trim_end_matches('/'))
    }

    /// Requests a signup verification mail and plucks the token out of the
    /// in-memory outbox.
    pub async fn signup_token(&self, client: &Client, email: &str) -> String {
        client
            .verify_email(email, VerificationPurpose::Signup)
            .await
            .expect("verify_email succeeds");
        self.mailer
            .last_token_for(email)
            .expect("token was delivered")
    }

    /// Signs up and logs in a fresh account, returning the ready client and
    /// the account with its unlocked keys.
    pub async fn onboard(
        &self,
        email: &str,
        name: &str,
        password: &str,
    ) -> (
        Client,
        lockbox_core::Account,
        lockbox_core::UnlockedAccount,
    ) {
        let mut client = self.client();
        let token = self.signup_token(&client, email).await;
        let (account, unlocked) = client
            .signup(email, name, password, &token, None)
            .await
            .expect("signup succeeds");
        client.login(email, password).await.expect("login succeeds");
        (client, account, unlocked)
    }
}
