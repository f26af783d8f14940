//! Org invites: an HMAC-authenticated channel for joining an org without
//! prior public-key trust.
//!
//! The invite token is `HMAC(invitesKey, email || id || expires)`, so only a
//! holder of the org payload can mint one. At creation the issuing org also
//! signs the invite body (everything except the token and lifecycle state)
//! with its signing key, so the provenance of a published invite can be
//! checked against the org's public key even on a token-redacted copy.
//!
//! The invitee receives the invite id and token out of band and never sends
//! the token itself back; acceptance presents a *binding proof*
//! `HMAC(token, email || account id)` tying the token to the invitee's
//! account. The org recomputes the token under its invites key and checks
//! the proof, then admits the member.
//!
//! Invites are one-shot and expire; a replay after completion fails the same
//! way an expired invite does.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use subtle::ConstantTimeEq as _;
use uuid::Uuid;

use crate::account::{Account, AccountId};
use crate::crypto::{self, HmacKey};
use crate::marshal::{self, MarshalError};
use crate::org::OrgId;
use crate::vault::VaultId;

/// Unique id of an invite.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InviteId(Uuid);

impl InviteId {
    /// Generates a fresh random id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    pub fn from_uuid(value: Uuid) -> Self {
        Self(value)
    }

    /// Returns the inner UUID.
    pub fn into_inner(self) -> Uuid {
        self.0
    }
}

impl fmt::Display for InviteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.to_string())
    }
}

/// Errors produced by invite operations.
#[derive(Debug, thiserror::Error)]
pub enum InviteError {
    /// The invite has expired, was already used, or was never accepted.
    #[error("invite expired")]
    Expired,
    /// The token or binding proof did not verify.
    #[error("invalid invite proof")]
    InvalidProof,
    /// The issuer signature on the invite body did not verify.
    #[error("invalid invite signature")]
    BadSignature,
    /// The acceptance was made for a different email than the invite names.
    #[error("invite was issued for a different email")]
    EmailMismatch,
}

/// Lifecycle state of an invite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum InviteStatus {
    /// Published, not yet accepted.
    Pending,
    /// The invitee has bound an account with a proof; awaiting confirmation
    /// by an org admin.
    Accepted {
        /// The invitee's account.
        account: AccountId,
        /// The binding proof over email and account id.
        #[serde(with = "crypto::base64_bytes")]
        proof: Vec<u8>,
    },
    /// The invitee was admitted; the invite is spent.
    Completed,
}

/// An invitation for `email` to join an org (and optionally a vault).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invite {
    /// Unique id, shared with the invitee out of band.
    pub id: InviteId,
    /// The issuing org.
    pub org: OrgId,
    /// Optional vault the invite is scoped to.
    pub vault: Option<VaultId>,
    /// The invited email address.
    pub email: String,
    /// Expiry as unix seconds.
    pub expires_at: u64,
    /// The invite token. Redacted from responses to anyone but the issuer.
    #[serde(with = "crypto::base64_bytes")]
    pub token: Vec<u8>,
    /// Issuer signature over [`Invite::claims_bytes`] under the org signing
    /// key. Survives token redaction.
    #[serde(with = "crypto::base64_bytes")]
    pub signature: Vec<u8>,
    /// Lifecycle state.
    pub status: InviteStatus,
}

/// Converts a [`SystemTime`] to unix seconds.
pub fn unix_seconds(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

/// Computes the invite token: `HMAC(invitesKey, email || id || expires)`.
pub fn compute_token(invites_key: &HmacKey, email: &str, id: InviteId, expires_at: u64) -> [u8; 32] {
    let mut msg = Vec::new();
    msg.extend_from_slice(email.as_bytes());
    msg.extend_from_slice(id.to_string().as_bytes());
    msg.extend_from_slice(expires_at.to_string().as_bytes());
    invites_key.tag(&msg)
}

/// Computes the acceptance binding proof: `HMAC(token, email || account id)`.
pub fn binding_proof(token: &[u8], email: &str, account: AccountId) -> Vec<u8> {
    let key = HmacKey::from_slice(token).expect("invite tokens are 32 bytes");
    let mut msg = Vec::new();
    msg.extend_from_slice(email.as_bytes());
    msg.extend_from_slice(account.to_string().as_bytes());
    key.tag(&msg).to_vec()
}

impl Invite {
    /// Mints a new invite under the org invites key. The issuer signature is
    /// attached right after by `Org::create_invite`.
    pub(crate) fn create(
        invites_key: &HmacKey,
        org: OrgId,
        vault: Option<VaultId>,
        email: &str,
        ttl: Duration,
        now: SystemTime,
    ) -> Self {
        let id = InviteId::generate();
        let expires_at = unix_seconds(now + ttl);
        let token = compute_token(invites_key, email, id, expires_at).to_vec();
        Self {
            id,
            org,
            vault,
            email: email.to_owned(),
            expires_at,
            token,
            signature: Vec::new(),
            status: InviteStatus::Pending,
        }
    }

    /// Canonical bytes of the issuer-signed fields: id, org, optional vault,
    /// email and expiry. The token and lifecycle state are deliberately not
    /// covered, so a redacted or accepted copy verifies the same as the
    /// freshly published one.
    pub fn claims_bytes(&self) -> Result<Vec<u8>, MarshalError> {
        #[derive(Serialize)]
        struct Claims<'a> {
            email: &'a str,
            expires_at: u64,
            id: InviteId,
            org: OrgId,
            vault: Option<VaultId>,
        }
        marshal::to_canonical_bytes(&Claims {
            email: &self.email,
            expires_at: self.expires_at,
            id: self.id,
            org: self.org,
            vault: self.vault,
        })
    }

    /// Returns `true` iff the invite is past its expiry at `now`.
    pub fn is_expired(&self, now: SystemTime) -> bool {
        unix_seconds(now) >= self.expires_at
    }

    /// Invitee side: computes the binding proof from the out-of-band token.
    pub fn proof_for(&self, token: &[u8], account: AccountId) -> Vec<u8> {
        binding_proof(token, &self.email, account)
    }

    /// Server side: records the invitee's acceptance.
    ///
    /// Fails [`InviteError::Expired`] if the invite is past its expiry or not
    /// pending (one-shot).
    pub fn record_acceptance(
        &mut self,
        account: AccountId,
        proof: Vec<u8>,
        now: SystemTime,
    ) -> Result<(), InviteError> {
        if self.is_expired(now) || self.status != InviteStatus::Pending {
            return Err(InviteError::Expired);
        }
        self.status = InviteStatus::Accepted { account, proof };
        Ok(())
    }

    /// Returns a copy safe to show to non-issuers: the token is blanked.
    pub fn redacted(&self) -> Self {
        Self {
            token: Vec::new(),
            ..self.clone()
        }
    }
}

/// Verifies an accepted invite against the org invites key: recomputes the
/// token, checks expiry and email binding, and verifies the acceptance proof
/// under the recomputed token in constant time.
///
/// The token stored on the invite is deliberately not consulted, so a
/// redacted copy fetched from the server verifies the same as the original.
pub(crate) fn verify_acceptance(
    invites_key: &HmacKey,
    invite: &Invite,
    account: &Account,
    proof: &[u8],
    now: SystemTime,
) -> Result<(), InviteError> {
    if invite.is_expired(now) {
        return Err(InviteError::Expired);
    }
    if account.email != invite.email {
        return Err(InviteError::EmailMismatch);
    }
    let token = compute_token(invites_key, &invite.email, invite.id, invite.expires_at);
    let expected = binding_proof(&token, &invite.email, account.id);
    if !bool::from(expected.ct_eq(proof)) {
        return Err(InviteError::InvalidProof);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::Account;
    use crate::org::{Org, OrgError};
    use rand::SeedableRng as _;
    use rand_chacha::ChaCha12Rng;

    const TTL: Duration = Duration::from_secs(3600);

    #[test]
    fn invite_accept_admits_the_member() {
        let mut rng = ChaCha12Rng::seed_from_u64(31);
        let (founder, founder_keys) = Account::create(&mut rng, "f@x", "F", "pw").unwrap();
        let mut org = Org::initialize(&mut rng, "Acme", &founder, &founder_keys).unwrap();

        let now = SystemTime::now();
        let mut invite = org.create_invite(&mut rng, "c@x", None, TTL, now).unwrap();

        let (invitee, _) = Account::create(&mut rng, "c@x", "C", "pw").unwrap();
        let proof = invite.proof_for(&invite.token.clone(), invitee.id);
        invite.record_acceptance(invitee.id, proof, now).unwrap();

        org.confirm_invite(&mut rng, &mut invite, &invitee, now).unwrap();
        assert!(org.member(invitee.id).is_some());
        assert_eq!(invite.status, InviteStatus::Completed);

        // the invite is spent, a replay fails like an expired one
        let replay = invite.record_acceptance(invitee.id, Vec::new(), now);
        assert!(matches!(replay, Err(InviteError::Expired)));
    }

    #[test]
    fn token_matches_the_specified_construction() {
        let mut rng = ChaCha12Rng::seed_from_u64(32);
        let (founder, founder_keys) = Account::create(&mut rng, "f@x", "F", "pw").unwrap();
        let org = Org::initialize(&mut rng, "Acme", &founder, &founder_keys).unwrap();
        let now = SystemTime::now();
        let invite = org.create_invite(&mut rng, "c@x", None, TTL, now).unwrap();

        // token = HMAC(invitesKey, email || id || expires): stable for a
        // fixed invite, and tied to the email
        let again = org
            .create_invite(&mut rng, "c@x", None, TTL, now)
            .unwrap();
        assert_ne!(invite.token, again.token, "fresh id yields a fresh token");
        assert_eq!(
            invite.token.len(),
            32,
            "token is a full HMAC-SHA256 output"
        );
    }

    #[test]
    fn issuer_signature_survives_redaction_and_detects_tampering() {
        let mut rng = ChaCha12Rng::seed_from_u64(35);
        let (founder, founder_keys) = Account::create(&mut rng, "f@x", "F", "pw").unwrap();
        let org = Org::initialize(&mut rng, "Acme", &founder, &founder_keys).unwrap();
        let now = SystemTime::now();
        let invite = org.create_invite(&mut rng, "c@x", None, TTL, now).unwrap();

        assert!(org.verify_invite(&invite));
        // the token is not among the signed fields, so blanking it is fine
        assert!(org.verify_invite(&invite.redacted()));

        // rewriting the invited email voids the signature
        let mut forged = invite.clone();
        forged.email = "mallory@x".to_owned();
        assert!(!org.verify_invite(&forged));
    }

    #[test]
    fn expired_invite_is_rejected() {
        let mut rng = ChaCha12Rng::seed_from_u64(33);
        let (founder, founder_keys) = Account::create(&mut rng, "f@x", "F", "pw").unwrap();
        let mut org = Org::initialize(&mut rng, "Acme", &founder, &founder_keys).unwrap();

        let now = SystemTime::now();
        let mut invite = org.create_invite(&mut rng, "c@x", None, TTL, now).unwrap();
        let (invitee, _) = Account::create(&mut rng, "c@x", "C", "pw").unwrap();
        let proof = invite.proof_for(&invite.token.clone(), invitee.id);
        invite.record_acceptance(invitee.id, proof, now).unwrap();

        let later = now + TTL + Duration::from_secs(1);
        assert!(matches!(
            org.confirm_invite(&mut rng, &mut invite, &invitee, later),
            Err(OrgError::Invite(InviteError::Expired))
        ));
    }

    #[test]
    fn wrong_account_proof_is_rejected() {
        let mut rng = ChaCha12Rng::seed_from_u64(34);
        let (founder, founder_keys) = Account::create(&mut rng, "f@x", "F", "pw").unwrap();
        let mut org = Org::initialize(&mut rng, "Acme", &founder, &founder_keys).unwrap();

        let now = SystemTime::now();
        let mut invite = org.create_invite(&mut rng, "c@x", None, TTL, now).unwrap();
        let (invitee, _) = Account::create(&mut rng, "c@x", "C", "pw").unwrap();
        // a proof computed over a different account id does not bind
        let bogus = binding_proof(&invite.token.clone(), "c@x", AccountId::generate());
        invite.record_acceptance(invitee.id, bogus, now).unwrap();
        assert!(matches!(
            org.confirm_invite(&mut rng, &mut invite, &invitee, now),
            Err(OrgError::Invite(InviteError::InvalidProof))
        ));
    }
}
