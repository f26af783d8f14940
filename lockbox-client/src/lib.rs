#![deny(missing_docs, clippy::unwrap_used)]
//! Client library for the lockbox credential-vault service.
//!
//! All cryptography happens on this side of the wire: [`Client::signup`]
//! derives the master key and builds the envelope and auth record locally,
//! [`Client::login`] runs the SRP handshake so the password never leaves the
//! process, and vault/org payloads are sealed before they are sent. The
//! server only ever receives the serialized, end-to-end encrypted entities.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::instrument;

use lockbox_core::account::{Account, AccountError, AccountId, UnlockedAccount};
use lockbox_core::auth::{AuthError, AuthRecord, ClientHandshake};
use lockbox_core::crypto::AeadKey;
use lockbox_core::invite::{self, Invite, InviteId};
use lockbox_core::org::{Org, OrgId};
use lockbox_core::vault::{Vault, VaultId};
use lockbox_types::SessionId;
use lockbox_types::api::{ErrorBody, ErrorCode};
use lockbox_types::api::v1::{
    AcceptInviteRequest, CreateAccountRequest, CreateSessionRequest, InitAuthRequest,
    InitAuthResponse, InviteRef, InviteResponse, RecoverAccountRequest, SessionInfo,
    UpdateAuthRequest, VerificationPurpose, VerifyEmailRequest,
};

/// Errors returned by the lockbox client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The server answered with an error body.
    #[error("server returned {code}: {message}")]
    Api {
        /// The stable error code.
        code: ErrorCode,
        /// The human-readable message.
        message: String,
    },
    /// The server answered with a non-success status and no parsable body.
    #[error("unexpected server response: {0}")]
    UnexpectedResponse(reqwest::StatusCode),
    /// The HTTP transport failed.
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    /// A handshake step failed, including server-proof verification.
    #[error(transparent)]
    Auth(#[from] AuthError),
    /// A local account operation failed.
    #[error(transparent)]
    Account(#[from] AccountError),
    /// The operation needs a session; call [`Client::login`] first.
    #[error("not logged in")]
    NotLoggedIn,
}

/// The invitee's side of an invite: the id and the token received out of
/// band, ready to be answered during signup.
#[derive(Debug, Clone)]
pub struct InviteJoin {
    /// The issuing org.
    pub org: OrgId,
    /// The invite id.
    pub id: InviteId,
    /// The out-of-band invite token.
    pub token: Vec<u8>,
}

struct SessionHandle {
    id: SessionId,
    // retained for channel binding once transport-level use lands
    _key: AeadKey,
}

/// A client of the lockbox service.
///
/// Holds at most one session. Entity plaintext never passes through the
/// client unencrypted; sealing and unsealing happen in `lockbox-core` under
/// keys only this process holds.
pub struct Client {
    http: reqwest::Client,
    base_url: String,
    session: Option<SessionHandle>,
}

impl Client {
    /// Creates a client against `base_url` (e.g. `http://127.0.0.1:8080`).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            session: None,
        }
    }

    /// The current session id, if logged in.
    pub fn session(&self) -> Option<SessionId> {
        self.session.as_ref().map(|session| session.id)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{path}", self.base_url)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.session {
            Some(session) => req.bearer_auth(session.id),
            None => req,
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, Error> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        match response.json::<ErrorBody>().await {
            Ok(body) => Err(Error::Api {
                code: body.code,
                message: body.message,
            }),
            Err(_) => Err(Error::UnexpectedResponse(status)),
        }
    }

    async fn post<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        path: &str,
        body: &Req,
    ) -> Result<Resp, Error> {
        let response = self
            .authorize(self.http.post(self.url(path)).json(body))
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn post_empty<Req: Serialize>(&self, path: &str, body: &Req) -> Result<(), Error> {
        let response = self
            .authorize(self.http.post(self.url(path)).json(body))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn get<Resp: DeserializeOwned>(&self, path: &str) -> Result<Resp, Error> {
        let response = self.authorize(self.http.get(self.url(path))).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn put<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        path: &str,
        body: &Req,
    ) -> Result<Resp, Error> {
        let response = self
            .authorize(self.http.put(self.url(path)).json(body))
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn delete(&self, path: &str) -> Result<(), Error> {
        let response = self
            .authorize(self.http.delete(self.url(path)))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    /// Requests an email-verification token for `email`.
    pub async fn verify_email(
        &self,
        email: &str,
        purpose: VerificationPurpose,
    ) -> Result<(), Error> {
        self.post_empty(
            "/verify_email",
            &VerifyEmailRequest {
                email: email.to_owned(),
                purpose,
            },
        )
        .await
    }

    /// Creates an account: derives the master key, generates the keypair,
    /// seals the envelope and submits account plus auth record.
    ///
    /// `verify` is the token delivered for [`VerificationPurpose::Signup`];
    /// `invite` lets an invited signup answer its invite instead of
    /// presenting a separate verification token.
    #[instrument(level = "debug", skip_all, fields(email))]
    pub async fn signup(
        &self,
        email: &str,
        name: &str,
        password: &str,
        verify: &str,
        invite: Option<InviteJoin>,
    ) -> Result<(Account, UnlockedAccount), Error> {
        // rng stays out of the futures so they remain Send
        let (account, unlocked, auth) = {
            let mut rng = rand::thread_rng();
            let (account, unlocked) = Account::create(&mut rng, email, name, password)?;
            let auth = AuthRecord::create(
                &mut rng,
                account.id,
                email,
                password,
                account.kdf_params.clone(),
            )?;
            (account, unlocked, auth)
        };
        // the binding proof commits the freshly generated account id to the
        // out-of-band invite token
        let invite = invite.map(|join| InviteRef {
            org: join.org,
            id: join.id,
            proof: invite::binding_proof(&join.token, email, account.id),
        });
        let created: Account = self
            .post(
                "/accounts",
                &CreateAccountRequest {
                    account,
                    auth,
                    verify: verify.to_owned(),
                    invite,
                },
            )
            .await?;
        Ok((created, unlocked))
    }

    /// Runs the SRP login handshake and stores the issued session.
    ///
    /// The server's proof is verified before the session is adopted, so a
    /// server that does not know the verifier cannot impersonate the real
    /// one. Returns the session info on success.
    #[instrument(level = "debug", skip_all, fields(email))]
    pub async fn login(&mut self, email: &str, password: &str) -> Result<SessionInfo, Error> {
        let init: InitAuthResponse = self
            .post(
                "/init_auth",
                &InitAuthRequest {
                    email: email.to_owned(),
                },
            )
            .await?;
        let (a_pub, login) = {
            let mut rng = rand::thread_rng();
            let handshake = ClientHandshake::start(&mut rng);
            let a_pub = handshake.a_pub();
            let login = handshake.finish(&init.auth, password, &init.b_pub)?;
            (a_pub, login)
        };
        let info: SessionInfo = self
            .post(
                "/sessions",
                &CreateSessionRequest {
                    account: init.auth.account,
                    a_pub,
                    proof: login.proof.clone(),
                },
            )
            .await?;
        login.verify_server(&info.server_proof)?;
        self.session = Some(SessionHandle {
            id: info.id,
            _key: login.session_key,
        });
        Ok(info)
    }

    /// Revokes the current session.
    pub async fn logout(&mut self) -> Result<(), Error> {
        let session = self.session.as_ref().ok_or(Error::NotLoggedIn)?;
        let path = format!("/sessions/{}", session.id);
        self.delete(&path).await?;
        self.session = None;
        Ok(())
    }

    /// Fetches the session's account.
    pub async fn account(&self) -> Result<Account, Error> {
        self.get("/accounts/me").await
    }

    /// Fetches and unlocks the session's account in one step.
    pub async fn unlock_account(&self, password: &str) -> Result<UnlockedAccount, Error> {
        let account = self.account().await?;
        Ok(account.unlock(password)?)
    }

    /// Replaces the session's account record.
    pub async fn update_account(&self, account: &Account) -> Result<Account, Error> {
        self.put("/accounts/me", account).await
    }

    /// Replaces the auth record, e.g. after a password change.
    pub async fn update_auth(&self, auth: AuthRecord) -> Result<(), Error> {
        self.post_empty("/update_auth", &UpdateAuthRequest { auth })
            .await
    }

    /// Recovers an account: re-locks the envelope under a new password and
    /// replaces the auth record. `verify` is the token delivered for
    /// [`VerificationPurpose::Recover`].
    ///
    /// The keypair is preserved when `unlocked` (the old credentials) is
    /// available; otherwise a fresh keypair is issued and shared containers
    /// must be re-granted by their owners.
    #[instrument(level = "debug", skip_all)]
    pub async fn recover(
        &self,
        mut account: Account,
        new_password: &str,
        verify: &str,
        unlocked: Option<&UnlockedAccount>,
    ) -> Result<(Account, UnlockedAccount), Error> {
        let (reissued, auth) = {
            let mut rng = rand::thread_rng();
            let reissued = account.recover(&mut rng, new_password, unlocked)?;
            let auth = AuthRecord::create(
                &mut rng,
                account.id,
                &account.email,
                new_password,
                account.kdf_params.clone(),
            )?;
            (reissued, auth)
        };
        let stored: Account = self
            .post(
                "/accounts/recover",
                &RecoverAccountRequest {
                    account,
                    auth,
                    verify: verify.to_owned(),
                },
            )
            .await?;
        Ok((stored, reissued))
    }

    /// Stores a freshly created vault.
    pub async fn create_vault(&self, vault: &Vault) -> Result<Vault, Error> {
        self.post("/vaults", vault).await
    }

    /// Fetches a vault.
    pub async fn vault(&self, id: VaultId) -> Result<Vault, Error> {
        self.get(&format!("/vaults/{id}")).await
    }

    /// Replaces a vault.
    pub async fn update_vault(&self, vault: &Vault) -> Result<Vault, Error> {
        self.put(&format!("/vaults/{}", vault.id()), vault).await
    }

    /// Deletes a vault.
    pub async fn delete_vault(&self, id: VaultId) -> Result<(), Error> {
        self.delete(&format!("/vaults/{id}")).await
    }

    /// Stores a freshly initialized org.
    pub async fn create_org(&self, org: &Org) -> Result<Org, Error> {
        self.post("/orgs", org).await
    }

    /// Fetches an org.
    pub async fn org(&self, id: OrgId) -> Result<Org, Error> {
        self.get(&format!("/orgs/{id}")).await
    }

    /// Replaces an org.
    pub async fn update_org(&self, org: &Org) -> Result<Org, Error> {
        self.put(&format!("/orgs/{}", org.id()), org).await
    }

    /// Publishes an invite minted with `Org::create_invite`.
    pub async fn publish_invite(&self, invite: &Invite) -> Result<Invite, Error> {
        let response: InviteResponse = self
            .post(&format!("/orgs/{}/invites", invite.org), invite)
            .await?;
        Ok(response.invite)
    }

    /// Fetches an invite (token always redacted).
    pub async fn invite(&self, org: OrgId, id: InviteId) -> Result<Invite, Error> {
        let response: InviteResponse = self
            .get(&format!("/orgs/{org}/invites/{id}"))
            .await?;
        Ok(response.invite)
    }

    /// Accepts an invite by presenting the binding proof computed from the
    /// out-of-band token.
    pub async fn accept_invite(
        &self,
        org: OrgId,
        id: InviteId,
        account: AccountId,
        proof: Vec<u8>,
    ) -> Result<Invite, Error> {
        let response: InviteResponse = self
            .post(
                &format!("/orgs/{org}/invites/{id}/accept"),
                &AcceptInviteRequest { account, proof },
            )
            .await?;
        Ok(response.invite)
    }
}
