//! The v1 HTTP API of the lockbox service.
//!
//! All handlers operate on the serializable, end-to-end encrypted forms of
//! the entities; the service never holds plaintext payloads or private keys.
//! Permission checks are therefore structural: who appears in an accessor
//! table, who is an admin-group accessor of an org — not what any payload
//! contains.

use std::time::SystemTime;

use axum::extract::{FromRequestParts, Path, State};
use axum::http::request::Parts;
use axum::routing::{get, post};
use axum::{Json, Router};
use subtle::ConstantTimeEq as _;
use tracing::instrument;

use lockbox_core::account::{Account, AccountId};
use lockbox_core::auth::{AuthInfo, ServerHandshake};
use lockbox_core::container::AccessorId;
use lockbox_core::invite::{self, InviteId, unix_seconds};
use lockbox_core::org::{Org, OrgId};
use lockbox_core::vault::{Vault, VaultId};
use lockbox_types::SessionId;
use lockbox_types::api::ErrorCode;
use lockbox_types::api::v1::{
    AcceptInviteRequest, CreateAccountRequest, CreateSessionRequest, InitAuthRequest,
    InitAuthResponse, InviteResponse, RecoverAccountRequest, SessionInfo, UpdateAuthRequest,
    VerificationPurpose, VerifyEmailRequest,
};

use crate::AppState;
use crate::api::errors::ApiError;

/// Create the router with every v1 endpoint.
pub(crate) fn routes(state: AppState) -> Router {
    Router::new()
        .route("/verify_email", post(verify_email))
        .route("/init_auth", post(init_auth))
        .route("/update_auth", post(update_auth))
        .route("/sessions", post(create_session))
        .route("/sessions/{id}", axum::routing::delete(revoke_session))
        .route("/accounts", post(create_account))
        .route("/accounts/me", get(get_account).put(update_account))
        .route("/accounts/recover", post(recover_account))
        .route("/vaults", post(create_vault))
        .route(
            "/vaults/{id}",
            get(get_vault).put(update_vault).delete(delete_vault),
        )
        .route("/orgs", post(create_org))
        .route("/orgs/{id}", get(get_org).put(update_org))
        .route("/orgs/{org}/invites", post(publish_invite))
        .route("/orgs/{org}/invites/{id}", get(get_invite))
        .route("/orgs/{org}/invites/{id}/accept", post(accept_invite))
        .with_state(state)
}

/// The authenticated session behind a request's bearer token.
pub(crate) struct SessionAuth {
    /// The account the session belongs to.
    pub(crate) account: AccountId,
}

impl FromRequestParts<AppState> for SessionAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let denied = || ApiError::code(ErrorCode::AuthenticationFailed);
        let token = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or_else(denied)?;
        let session: SessionId = token.parse().map_err(|_| denied())?;
        let account = state
            .sessions
            .authenticate(session, SystemTime::now())
            .ok_or_else(denied)?;
        Ok(SessionAuth { account })
    }
}

/// Issues an email-verification token and hands it to the mailer.
///
/// Always responds `200 OK`, whether or not an account exists for the email.
#[instrument(level = "debug", skip_all, fields(purpose = ?req.purpose))]
async fn verify_email(
    State(state): State<AppState>,
    Json(req): Json<VerifyEmailRequest>,
) -> Result<(), ApiError> {
    let token = state.tokens.issue(
        &mut rand::thread_rng(),
        &req.email,
        req.purpose,
        state.tuning.verification_token_lifetime,
        SystemTime::now(),
    );
    state
        .mailer
        .send_verification(&req.email, &token, req.purpose)
        .await?;
    Ok(())
}

/// Starts a login handshake.
///
/// Always answers with well-formed auth parameters and a server ephemeral.
/// For an email with no account the response is fabricated deterministically
/// from the server secret, so account existence is not revealed.
#[instrument(level = "debug", skip_all)]
async fn init_auth(
    State(state): State<AppState>,
    Json(req): Json<InitAuthRequest>,
) -> Result<Json<InitAuthResponse>, ApiError> {
    let now = SystemTime::now();
    let auth = match state.storage.auth_by_email(&req.email).await? {
        Some(auth) => auth,
        None => state.server_secret.simulated_record(&req.email),
    };
    let handshake = ServerHandshake::start(&mut rand::thread_rng(), &auth);
    let b_pub = handshake.b_pub().to_vec();
    state
        .handshakes
        .insert(auth.account, handshake, now + state.tuning.handshake_lifetime);
    Ok(Json(InitAuthResponse {
        auth: AuthInfo::from(&auth),
        b_pub,
    }))
}

/// Verifies the client proof and issues a session.
///
/// Unknown-account and wrong-password failures are indistinguishable: both
/// run the same verifier math (against a simulated record in the former
/// case) and produce the same error code.
#[instrument(level = "debug", skip_all, fields(account = %req.account))]
async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<Json<SessionInfo>, ApiError> {
    let now = SystemTime::now();
    if !state.rate_limiter.check(req.account, now) {
        return Err(ApiError::code(ErrorCode::RateLimited));
    }
    let Some(handshake) = state.handshakes.take(req.account, now) else {
        state.rate_limiter.record_failure(req.account, now);
        return Err(ApiError::code(ErrorCode::AuthenticationFailed));
    };
    let login = match handshake.verify(&req.a_pub, &req.proof) {
        Ok(login) => login,
        Err(err) => {
            state.rate_limiter.record_failure(req.account, now);
            return Err(err.into());
        }
    };
    // a simulated handshake can never verify, but the session must also be
    // tied to a stored account
    if state.storage.account(req.account).await?.is_none() {
        state.rate_limiter.record_failure(req.account, now);
        return Err(ApiError::code(ErrorCode::AuthenticationFailed));
    }
    state.rate_limiter.clear(req.account);
    let expires_at = now + state.tuning.session_lifetime;
    let id = state
        .sessions
        .insert(req.account, login.session_key, expires_at);
    tracing::debug!("session {id} issued");
    Ok(Json(SessionInfo {
        id,
        account: req.account,
        expires_at: unix_seconds(expires_at),
        server_proof: login.server_proof,
    }))
}

/// Revokes one of the caller's sessions.
#[instrument(level = "debug", skip_all)]
async fn revoke_session(
    State(state): State<AppState>,
    auth: SessionAuth,
    Path(id): Path<SessionId>,
) -> Result<(), ApiError> {
    if state.sessions.revoke(id, auth.account) {
        Ok(())
    } else {
        Err(ApiError::code(ErrorCode::NotFound))
    }
}

/// Replaces the auth record of the session's account.
#[instrument(level = "debug", skip_all)]
async fn update_auth(
    State(state): State<AppState>,
    auth: SessionAuth,
    Json(req): Json<UpdateAuthRequest>,
) -> Result<(), ApiError> {
    if req.auth.account != auth.account {
        return Err(ApiError::invalid("auth record names a different account"));
    }
    let account = state
        .storage
        .account(auth.account)
        .await?
        .ok_or_else(|| ApiError::code(ErrorCode::NotFound))?;
    if account.email != req.auth.email {
        return Err(ApiError::invalid("auth record names a different email"));
    }
    state.storage.put_auth(req.auth).await?;
    Ok(())
}

/// Creates an account, gated on an email-verification token or a valid
/// invite proof.
#[instrument(level = "debug", skip_all, fields(account = %req.account.id))]
async fn create_account(
    State(state): State<AppState>,
    Json(req): Json<CreateAccountRequest>,
) -> Result<Json<Account>, ApiError> {
    let now = SystemTime::now();
    let account = req.account;
    if req.auth.account != account.id || req.auth.email != account.email {
        return Err(ApiError::invalid("auth record does not match account"));
    }
    if state
        .storage
        .account_by_email(&account.email)
        .await?
        .is_some()
    {
        return Err(ApiError::code(ErrorCode::AlreadyExists));
    }

    if let Some(invite_ref) = req.invite {
        let mut invite = state
            .storage
            .invite(invite_ref.org, invite_ref.id)
            .await?
            .ok_or_else(|| ApiError::code(ErrorCode::NotFound))?;
        if invite.email != account.email {
            return Err(ApiError::invalid("invite was issued for a different email"));
        }
        let expected = invite::binding_proof(&invite.token, &invite.email, account.id);
        if !bool::from(expected.ct_eq(&invite_ref.proof)) {
            return Err(ApiError::code(ErrorCode::AuthenticationFailed));
        }
        invite.record_acceptance(account.id, invite_ref.proof, now)?;
        state.storage.put_invite(invite).await?;
    } else if !state
        .tokens
        .redeem(&account.email, VerificationPurpose::Signup, &req.verify, now)
    {
        return Err(ApiError::code(ErrorCode::VerificationRequired));
    }

    state.storage.put_account(account.clone()).await?;
    state.storage.put_auth(req.auth).await?;
    tracing::info!("account {} created", account.id);
    Ok(Json(account))
}

/// Returns the session's account.
#[instrument(level = "debug", skip_all)]
async fn get_account(
    State(state): State<AppState>,
    auth: SessionAuth,
) -> Result<Json<Account>, ApiError> {
    let account = state
        .storage
        .account(auth.account)
        .await?
        .ok_or_else(|| ApiError::code(ErrorCode::NotFound))?;
    Ok(Json(account))
}

/// Updates the session's account (name, envelope, KDF parameters).
///
/// Identity fields are immutable here; recovery is the only way to re-key.
#[instrument(level = "debug", skip_all)]
async fn update_account(
    State(state): State<AppState>,
    auth: SessionAuth,
    Json(account): Json<Account>,
) -> Result<Json<Account>, ApiError> {
    if account.id != auth.account {
        return Err(ApiError::invalid("account id does not match session"));
    }
    let existing = state
        .storage
        .account(auth.account)
        .await?
        .ok_or_else(|| ApiError::code(ErrorCode::NotFound))?;
    if existing.email != account.email {
        return Err(ApiError::invalid("email cannot be changed"));
    }
    state.storage.put_account(account.clone()).await?;
    Ok(Json(account))
}

/// Replaces the auth record and envelope of an account after a verified
/// recovery, and revokes every outstanding session of the account.
#[instrument(level = "debug", skip_all, fields(account = %req.account.id))]
async fn recover_account(
    State(state): State<AppState>,
    Json(req): Json<RecoverAccountRequest>,
) -> Result<Json<Account>, ApiError> {
    let now = SystemTime::now();
    let account = req.account;
    if req.auth.account != account.id || req.auth.email != account.email {
        return Err(ApiError::invalid("auth record does not match account"));
    }
    let existing = state
        .storage
        .account_by_email(&account.email)
        .await?
        .ok_or_else(|| ApiError::code(ErrorCode::NotFound))?;
    if existing.id != account.id {
        return Err(ApiError::invalid("account id does not match email"));
    }
    if !state
        .tokens
        .redeem(&account.email, VerificationPurpose::Recover, &req.verify, now)
    {
        return Err(ApiError::code(ErrorCode::VerificationRequired));
    }
    state.storage.put_account(account.clone()).await?;
    state.storage.put_auth(req.auth).await?;
    state.sessions.revoke_all(account.id);
    tracing::info!("account {} recovered", account.id);
    Ok(Json(account))
}

/// Returns `true` iff `account` can reach the vault: directly, through the
/// owning org's admin group, or through any org group in the accessor table.
async fn can_access_vault(
    state: &AppState,
    account: AccountId,
    vault: &Vault,
) -> Result<bool, ApiError> {
    if vault.has_accessor(AccessorId::Account(account)) {
        return Ok(true);
    }
    let Some(org_id) = vault.org else {
        return Ok(false);
    };
    let Some(org) = state.storage.org(org_id).await? else {
        return Ok(false);
    };
    if org.is_admin(account) {
        return Ok(true);
    }
    for entry in vault.accessors() {
        if let AccessorId::Group(group_id) = entry.id
            && let Some(group) = org.group(group_id)
            && group.has_accessor(AccessorId::Account(account))
        {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Creates a vault. Org vaults require org adminship; personal vaults must
/// list their creator as an accessor.
#[instrument(level = "debug", skip_all)]
async fn create_vault(
    State(state): State<AppState>,
    auth: SessionAuth,
    Json(vault): Json<Vault>,
) -> Result<Json<Vault>, ApiError> {
    if vault.accessors().is_empty() {
        return Err(ApiError::invalid("vault has no accessors"));
    }
    match vault.org {
        Some(org_id) => {
            let org = state
                .storage
                .org(org_id)
                .await?
                .ok_or_else(|| ApiError::code(ErrorCode::NotFound))?;
            if !org.is_admin(auth.account) {
                return Err(ApiError::code(ErrorCode::InsufficientPermissions));
            }
        }
        None => {
            if !vault.has_accessor(AccessorId::Account(auth.account)) {
                return Err(ApiError::code(ErrorCode::InsufficientPermissions));
            }
        }
    }
    if state.storage.vault(vault.id()).await?.is_some() {
        return Err(ApiError::code(ErrorCode::AlreadyExists));
    }
    state.storage.put_vault(vault.clone()).await?;
    tracing::info!("vault {} created", vault.id());
    Ok(Json(vault))
}

/// Returns a vault the session can access.
#[instrument(level = "debug", skip_all)]
async fn get_vault(
    State(state): State<AppState>,
    auth: SessionAuth,
    Path(id): Path<VaultId>,
) -> Result<Json<Vault>, ApiError> {
    let vault = state
        .storage
        .vault(id)
        .await?
        .ok_or_else(|| ApiError::code(ErrorCode::NotFound))?;
    if !can_access_vault(&state, auth.account, &vault).await? {
        return Err(ApiError::code(ErrorCode::InsufficientPermissions));
    }
    Ok(Json(vault))
}

/// Replaces a vault wholesale. Readers see either the old record or the new
/// one, which is what makes accessor updates atomic to them.
#[instrument(level = "debug", skip_all)]
async fn update_vault(
    State(state): State<AppState>,
    auth: SessionAuth,
    Path(id): Path<VaultId>,
    Json(vault): Json<Vault>,
) -> Result<Json<Vault>, ApiError> {
    if vault.id() != id {
        return Err(ApiError::invalid("vault id does not match path"));
    }
    let existing = state
        .storage
        .vault(id)
        .await?
        .ok_or_else(|| ApiError::code(ErrorCode::NotFound))?;
    if existing.org != vault.org {
        return Err(ApiError::invalid("org back-reference cannot be changed"));
    }
    if !can_access_vault(&state, auth.account, &existing).await? {
        return Err(ApiError::code(ErrorCode::InsufficientPermissions));
    }
    state.storage.put_vault(vault.clone()).await?;
    Ok(Json(vault))
}

/// Deletes a vault. Org vaults require org adminship.
#[instrument(level = "debug", skip_all)]
async fn delete_vault(
    State(state): State<AppState>,
    auth: SessionAuth,
    Path(id): Path<VaultId>,
) -> Result<(), ApiError> {
    let vault = state
        .storage
        .vault(id)
        .await?
        .ok_or_else(|| ApiError::code(ErrorCode::NotFound))?;
    let allowed = match vault.org {
        Some(org_id) => state
            .storage
            .org(org_id)
            .await?
            .is_some_and(|org| org.is_admin(auth.account)),
        None => vault.has_accessor(AccessorId::Account(auth.account)),
    };
    if !allowed {
        return Err(ApiError::code(ErrorCode::InsufficientPermissions));
    }
    state.storage.delete_vault(id).await?;
    tracing::info!("vault {id} deleted");
    Ok(())
}

/// Creates an org. The creator must be an admin-group accessor and a member
/// of the org they submit.
#[instrument(level = "debug", skip_all)]
async fn create_org(
    State(state): State<AppState>,
    auth: SessionAuth,
    Json(org): Json<Org>,
) -> Result<Json<Org>, ApiError> {
    if !org.is_admin(auth.account) {
        return Err(ApiError::invalid("creator must be an org admin"));
    }
    if org.member(auth.account).is_none() {
        return Err(ApiError::invalid("creator must be an org member"));
    }
    if state.storage.org(org.id()).await?.is_some() {
        return Err(ApiError::code(ErrorCode::AlreadyExists));
    }
    state.storage.put_org(org.clone()).await?;
    tracing::info!("org {} created", org.id());
    Ok(Json(org))
}

/// Returns an org to one of its members.
#[instrument(level = "debug", skip_all)]
async fn get_org(
    State(state): State<AppState>,
    auth: SessionAuth,
    Path(id): Path<OrgId>,
) -> Result<Json<Org>, ApiError> {
    let org = state
        .storage
        .org(id)
        .await?
        .ok_or_else(|| ApiError::code(ErrorCode::NotFound))?;
    if org.member(auth.account).is_none() && !org.is_admin(auth.account) {
        return Err(ApiError::code(ErrorCode::InsufficientPermissions));
    }
    Ok(Json(org))
}

/// Replaces an org wholesale. Only admins may write, and the signing key is
/// immutable so recorded member signatures cannot be re-rooted.
#[instrument(level = "debug", skip_all)]
async fn update_org(
    State(state): State<AppState>,
    auth: SessionAuth,
    Path(id): Path<OrgId>,
    Json(org): Json<Org>,
) -> Result<Json<Org>, ApiError> {
    if org.id() != id {
        return Err(ApiError::invalid("org id does not match path"));
    }
    let existing = state
        .storage
        .org(id)
        .await?
        .ok_or_else(|| ApiError::code(ErrorCode::NotFound))?;
    if !existing.is_admin(auth.account) {
        return Err(ApiError::code(ErrorCode::InsufficientPermissions));
    }
    if existing.public_key != org.public_key {
        return Err(ApiError::invalid("org signing key cannot be changed"));
    }
    state.storage.put_org(org.clone()).await?;
    Ok(Json(org))
}

/// Publishes an invite minted by an org admin.
///
/// The token in the body is the admin's own HMAC under the org invites key;
/// the server stores it verbatim and only ever returns it redacted.
#[instrument(level = "debug", skip_all)]
async fn publish_invite(
    State(state): State<AppState>,
    auth: SessionAuth,
    Path(org_id): Path<OrgId>,
    Json(invite): Json<lockbox_core::invite::Invite>,
) -> Result<Json<InviteResponse>, ApiError> {
    if invite.org != org_id {
        return Err(ApiError::invalid("invite org does not match path"));
    }
    let org = state
        .storage
        .org(org_id)
        .await?
        .ok_or_else(|| ApiError::code(ErrorCode::NotFound))?;
    if !org.is_admin(auth.account) {
        return Err(ApiError::code(ErrorCode::InsufficientPermissions));
    }
    if !org.verify_invite(&invite) {
        return Err(ApiError::invalid("invite signature does not verify"));
    }
    if state.storage.invite(org_id, invite.id).await?.is_some() {
        return Err(ApiError::code(ErrorCode::AlreadyExists));
    }
    state.storage.put_invite(invite.clone()).await?;
    tracing::info!("invite {} published for org {org_id}", invite.id);
    Ok(Json(InviteResponse {
        invite: invite.redacted(),
    }))
}

/// Returns an invite with the token redacted.
///
/// Unauthenticated: the invitee holds only the invite id at this point. The
/// issuer never needs the server's copy of the token, it can recompute it
/// from the org payload.
#[instrument(level = "debug", skip_all)]
async fn get_invite(
    State(state): State<AppState>,
    Path((org, id)): Path<(OrgId, InviteId)>,
) -> Result<Json<InviteResponse>, ApiError> {
    let invite = state
        .storage
        .invite(org, id)
        .await?
        .ok_or_else(|| ApiError::code(ErrorCode::NotFound))?;
    Ok(Json(InviteResponse {
        invite: invite.redacted(),
    }))
}

/// Records an invite acceptance.
///
/// The binding proof is checked against the published token, the invite is
/// one-shot, and a replay fails exactly like an expired invite.
#[instrument(level = "debug", skip_all)]
async fn accept_invite(
    State(state): State<AppState>,
    Path((org, id)): Path<(OrgId, InviteId)>,
    Json(req): Json<AcceptInviteRequest>,
) -> Result<Json<InviteResponse>, ApiError> {
    let now = SystemTime::now();
    let mut invite = state
        .storage
        .invite(org, id)
        .await?
        .ok_or_else(|| ApiError::code(ErrorCode::NotFound))?;
    let expected = invite::binding_proof(&invite.token, &invite.email, req.account);
    if !bool::from(expected.ct_eq(&req.proof)) {
        return Err(ApiError::code(ErrorCode::AuthenticationFailed));
    }
    invite.record_acceptance(req.account, req.proof, now)?;
    state.storage.put_invite(invite.clone()).await?;
    tracing::info!("invite {id} accepted by {}", req.account);
    Ok(Json(InviteResponse {
        invite: invite.redacted(),
    }))
}
