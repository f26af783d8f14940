//! # v1 API types
//!
//! Request and response payloads exchanged between clients and the lockbox
//! service. Binary fields are base64 strings on the wire; entities embed the
//! serializable forms from `lockbox-core`, which never include plaintext or
//! private-key material.

use serde::{Deserialize, Serialize};

use lockbox_core::account::{Account, AccountId};
use lockbox_core::auth::{AuthInfo, AuthRecord};
use lockbox_core::crypto::base64_bytes;
use lockbox_core::invite::{Invite, InviteId};
use lockbox_core::org::OrgId;

use crate::SessionId;

/// Purposes an email-verification token can be issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationPurpose {
    /// Account signup.
    Signup,
    /// Account recovery.
    Recover,
}

/// `POST /verify_email`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyEmailRequest {
    /// The address to verify.
    pub email: String,
    /// What the verification token will be used for.
    pub purpose: VerificationPurpose,
}

/// `POST /init_auth`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitAuthRequest {
    /// The email to start a handshake for.
    pub email: String,
}

/// Response to `POST /init_auth`.
///
/// Returned for every email; unknown addresses receive a simulated `auth`
/// indistinguishable in shape from a real one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitAuthResponse {
    /// KDF parameters and identifiers the client needs to answer.
    pub auth: AuthInfo,
    /// The server's SRP public ephemeral `B`.
    #[serde(with = "base64_bytes")]
    pub b_pub: Vec<u8>,
}

/// `POST /sessions`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    /// The account id from the `init_auth` response.
    pub account: AccountId,
    /// The client's SRP public ephemeral `A`.
    #[serde(with = "base64_bytes")]
    pub a_pub: Vec<u8>,
    /// The client proof `M`.
    #[serde(with = "base64_bytes")]
    pub proof: Vec<u8>,
}

/// An issued session. The session key itself never crosses the wire; both
/// sides derive it from the handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    /// The session id, presented as a bearer token.
    pub id: SessionId,
    /// The authenticated account.
    pub account: AccountId,
    /// Expiry as unix seconds.
    pub expires_at: u64,
    /// The server proof `M2`, letting the client authenticate the server.
    #[serde(with = "base64_bytes")]
    pub server_proof: Vec<u8>,
}

/// Reference to an invite presented during signup, letting an invited account
/// skip separate email verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InviteRef {
    /// The issuing org.
    pub org: OrgId,
    /// The invite id.
    pub id: InviteId,
    /// The invitee's binding proof.
    #[serde(with = "base64_bytes")]
    pub proof: Vec<u8>,
}

/// `POST /accounts`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAccountRequest {
    /// The new account (public material and sealed envelope only).
    pub account: Account,
    /// The matching auth record.
    pub auth: AuthRecord,
    /// The email-verification token obtained via `verify_email`.
    pub verify: String,
    /// Optional invite this signup answers.
    pub invite: Option<InviteRef>,
}

/// `POST /accounts/recover`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoverAccountRequest {
    /// The account with its replacement envelope.
    pub account: Account,
    /// The replacement auth record.
    pub auth: AuthRecord,
    /// The email-verification token obtained via `verify_email`.
    pub verify: String,
}

/// `POST /update_auth`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateAuthRequest {
    /// The replacement auth record for the session's account.
    pub auth: AuthRecord,
}

/// `POST /orgs/{org}/invites/{id}/accept`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptInviteRequest {
    /// The accepting account.
    pub account: AccountId,
    /// The binding proof computed from the out-of-band token.
    #[serde(with = "base64_bytes")]
    pub proof: Vec<u8>,
}

/// Response to invite reads. The token never leaves the server; issuers
/// recompute it from the org payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InviteResponse {
    /// The invite, token redacted.
    pub invite: Invite,
}
