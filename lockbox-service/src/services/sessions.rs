//! In-memory session and handshake tables.
//!
//! A [`SessionStore`] holds the sessions issued by `createSession`; a
//! [`HandshakeStore`] holds the server side of SRP handshakes between
//! `init_auth` and `createSession`. Both are swept periodically; an expired
//! entry behaves exactly like a missing one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use lockbox_core::account::AccountId;
use lockbox_core::auth::ServerHandshake;
use lockbox_core::crypto::AeadKey;
use lockbox_types::SessionId;
use parking_lot::Mutex;

/// A live session binding an account to an authenticated channel.
pub struct Session {
    /// The session id, presented by clients as a bearer token.
    pub id: SessionId,
    /// The authenticated account.
    pub account: AccountId,
    /// The AEAD session key both sides derived from the handshake.
    pub key: AeadKey,
    /// Expiry instant.
    pub expires_at: SystemTime,
}

/// Keeps track of all currently live sessions.
#[derive(Default, Clone)]
pub(crate) struct SessionStore(Arc<Mutex<HashMap<SessionId, Session>>>);

impl SessionStore {
    /// Issues a new session for `account`.
    pub(crate) fn insert(
        &self,
        account: AccountId,
        key: AeadKey,
        expires_at: SystemTime,
    ) -> SessionId {
        let id = SessionId::generate();
        self.0.lock().insert(
            id,
            Session {
                id,
                account,
                key,
                expires_at,
            },
        );
        id
    }

    /// Resolves a bearer session id to its account.
    ///
    /// Expired sessions are evicted on the spot and resolve to `None`.
    pub(crate) fn authenticate(&self, id: SessionId, now: SystemTime) -> Option<AccountId> {
        let mut sessions = self.0.lock();
        match sessions.get(&id) {
            Some(session) if session.expires_at > now => Some(session.account),
            Some(_) => {
                sessions.remove(&id);
                None
            }
            None => None,
        }
    }

    /// Revokes a session. Returns `false` if the session does not exist or
    /// belongs to another account.
    pub(crate) fn revoke(&self, id: SessionId, account: AccountId) -> bool {
        let mut sessions = self.0.lock();
        match sessions.get(&id) {
            Some(session) if session.account == account => {
                sessions.remove(&id);
                true
            }
            _ => false,
        }
    }

    /// Revokes every session of `account`, e.g. after recovery.
    pub(crate) fn revoke_all(&self, account: AccountId) {
        self.0.lock().retain(|_, session| session.account != account);
    }

    /// Evicts expired sessions.
    pub(crate) fn sweep(&self, now: SystemTime) {
        self.0.lock().retain(|_, session| session.expires_at > now);
    }
}

/// Pending server handshake state, waiting for the client proof.
struct PendingHandshake {
    handshake: ServerHandshake,
    deadline: SystemTime,
}

/// Keeps the server side of SRP handshakes between `init_auth` and
/// `createSession`, keyed by account id.
#[derive(Default, Clone)]
pub(crate) struct HandshakeStore(Arc<Mutex<HashMap<AccountId, PendingHandshake>>>);

impl HandshakeStore {
    /// Stores a handshake with a proof deadline. A newer handshake for the
    /// same account replaces the old one.
    pub(crate) fn insert(
        &self,
        account: AccountId,
        handshake: ServerHandshake,
        deadline: SystemTime,
    ) {
        self.0
            .lock()
            .insert(account, PendingHandshake { handshake, deadline });
    }

    /// Takes the pending handshake for `account`. Handshakes are single-use;
    /// a stale one counts as absent.
    pub(crate) fn take(&self, account: AccountId, now: SystemTime) -> Option<ServerHandshake> {
        let pending = self.0.lock().remove(&account)?;
        (pending.deadline > now).then_some(pending.handshake)
    }

    /// Discards stale handshakes.
    pub(crate) fn sweep(&self, now: SystemTime) {
        self.0.lock().retain(|_, pending| pending.deadline > now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng as _;
    use rand_chacha::ChaCha12Rng;
    use std::time::Duration;

    #[test]
    fn expired_sessions_fail_authentication() {
        let mut rng = ChaCha12Rng::seed_from_u64(1);
        let store = SessionStore::default();
        let account = AccountId::generate();
        let now = SystemTime::now();
        let id = store.insert(account, AeadKey::generate(&mut rng), now + Duration::from_secs(60));

        assert_eq!(store.authenticate(id, now), Some(account));
        assert_eq!(store.authenticate(id, now + Duration::from_secs(61)), None);
        // the expired entry was evicted, not just hidden
        assert_eq!(store.authenticate(id, now), None);
    }

    #[test]
    fn revoke_is_scoped_to_the_owning_account() {
        let mut rng = ChaCha12Rng::seed_from_u64(2);
        let store = SessionStore::default();
        let owner = AccountId::generate();
        let now = SystemTime::now();
        let id = store.insert(owner, AeadKey::generate(&mut rng), now + Duration::from_secs(60));

        assert!(!store.revoke(id, AccountId::generate()));
        assert!(store.revoke(id, owner));
        assert_eq!(store.authenticate(id, now), None);
    }
}
