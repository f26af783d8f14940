//! User accounts: identity, long-term keypair, and the private-key envelope.
//!
//! The private key never exists server-side in the clear. At creation the
//! client derives a master key from the password, generates the RSA keypair,
//! and seals the PKCS#8 private key under the master key with the account id
//! as associated data. [`Account::unlock`] reverses that to obtain an
//! [`UnlockedAccount`], which is the only form that can act as an accessor of
//! shared containers.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::container::{Accessor, AccessorId, ActingAccessor, ContainerError};
use crate::crypto::{
    self, AeadKey, CryptoError, KdfParams, KeyPair, PrivateKey, PublicKey, SealedBytes, WrappedKey,
};

/// Unique id of an account.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(Uuid);

impl AccountId {
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

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.to_string())
    }
}

/// Errors produced by account operations.
#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    /// A primitive failed. A wrong password surfaces as
    /// [`CryptoError::DecryptionFailed`] from the envelope open.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    /// The unlocked state presented for recovery belongs to another account.
    #[error("unlocked state does not match account {0}")]
    ForeignUnlock(AccountId),
}

/// A user account. The serializable form carries only public material plus
/// the sealed private-key envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Unique id.
    pub id: AccountId,
    /// Email address; also the SRP identity.
    pub email: String,
    /// Display name.
    pub name: String,
    /// The long-term RSA public key.
    pub public_key: PublicKey,
    /// KDF parameters for the envelope master key.
    pub kdf_params: KdfParams,
    /// The PKCS#8 private key, AEAD-sealed under the master key.
    pub envelope: SealedBytes,
}

impl Account {
    /// Creates a new account from an email, display name and password.
    ///
    /// Returns both the serializable account and its unlocked state so the
    /// caller can immediately act with it (e.g. to initialize an org).
    pub fn create<R: rand::Rng + rand::CryptoRng>(
        rng: &mut R,
        email: &str,
        name: &str,
        password: &str,
    ) -> Result<(Self, UnlockedAccount), AccountError> {
        let id = AccountId::generate();
        let kdf_params = KdfParams::generate(rng);
        let master_key = crypto::derive_key(password.as_bytes(), &kdf_params)?;
        let pair = KeyPair::generate(rng)?;
        let envelope = seal_envelope(rng, &master_key, id, &pair.private)?;
        let account = Self {
            id,
            email: email.to_owned(),
            name: name.to_owned(),
            public_key: pair.public.clone(),
            kdf_params,
            envelope,
        };
        let unlocked = UnlockedAccount {
            id,
            public_key: pair.public,
            private_key: pair.private,
        };
        Ok((account, unlocked))
    }

    /// Opens the envelope with the password.
    pub fn unlock(&self, password: &str) -> Result<UnlockedAccount, AccountError> {
        let master_key = crypto::derive_key(password.as_bytes(), &self.kdf_params)?;
        let der = master_key.open(envelope_aad(self.id).as_bytes(), &self.envelope)?;
        let private_key = PrivateKey::from_pkcs8_der(&der)?;
        Ok(UnlockedAccount {
            id: self.id,
            public_key: self.public_key.clone(),
            private_key,
        })
    }

    /// Replaces the envelope (and KDF parameters) for a new password.
    ///
    /// When the caller can still present the old private key the keypair is
    /// preserved, so every container entry wrapped to this account stays
    /// decryptable. Without it a fresh keypair is issued; stale accessor
    /// entries then surface as `KeyMismatch` until the container owners
    /// re-grant access.
    pub fn recover<R: rand::Rng + rand::CryptoRng>(
        &mut self,
        rng: &mut R,
        new_password: &str,
        unlocked: Option<&UnlockedAccount>,
    ) -> Result<UnlockedAccount, AccountError> {
        let private_key = match unlocked {
            Some(unlocked) if unlocked.id != self.id => {
                return Err(AccountError::ForeignUnlock(self.id));
            }
            Some(unlocked) => unlocked.private_key.clone(),
            None => {
                let pair = KeyPair::generate(rng)?;
                self.public_key = pair.public;
                pair.private
            }
        };
        self.kdf_params = KdfParams::generate(rng);
        let master_key = crypto::derive_key(new_password.as_bytes(), &self.kdf_params)?;
        self.envelope = seal_envelope(rng, &master_key, self.id, &private_key)?;
        Ok(UnlockedAccount {
            id: self.id,
            public_key: self.public_key.clone(),
            private_key,
        })
    }
}

fn envelope_aad(id: AccountId) -> String {
    format!("account/{id}")
}

fn seal_envelope<R: rand::Rng + rand::CryptoRng>(
    rng: &mut R,
    master_key: &AeadKey,
    id: AccountId,
    private_key: &PrivateKey,
) -> Result<SealedBytes, AccountError> {
    let der = private_key.to_pkcs8_der()?;
    Ok(master_key.seal(rng, envelope_aad(id).as_bytes(), &der)?)
}

/// An account whose private key is loaded in memory.
///
/// Only this form can unwrap container data keys; the serializable
/// [`Account`] can merely be granted access.
pub struct UnlockedAccount {
    /// The account id.
    pub id: AccountId,
    /// The long-term RSA public key.
    pub public_key: PublicKey,
    private_key: PrivateKey,
}

impl fmt::Debug for UnlockedAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnlockedAccount").field("id", &self.id).finish()
    }
}

impl Accessor for Account {
    fn accessor_id(&self) -> AccessorId {
        AccessorId::Account(self.id)
    }

    fn public_key(&self) -> &PublicKey {
        &self.public_key
    }
}

impl Accessor for UnlockedAccount {
    fn accessor_id(&self) -> AccessorId {
        AccessorId::Account(self.id)
    }

    fn public_key(&self) -> &PublicKey {
        &self.public_key
    }
}

impl ActingAccessor for UnlockedAccount {
    fn unwrap_key(&self, blob: &WrappedKey) -> Result<AeadKey, ContainerError> {
        self.private_key
            .unwrap_key(blob)
            .map_err(ContainerError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng as _;
    use rand_chacha::ChaCha12Rng;

    fn rng() -> ChaCha12Rng {
        ChaCha12Rng::seed_from_u64(13)
    }

    #[test]
    fn create_and_unlock() {
        let mut rng = rng();
        let (account, unlocked) = Account::create(&mut rng, "a@x", "Ada", "pw1").unwrap();
        let reopened = account.unlock("pw1").unwrap();
        assert_eq!(reopened.id, unlocked.id);
        assert_eq!(
            reopened.public_key.fingerprint(),
            account.public_key.fingerprint()
        );
    }

    #[test]
    fn unlock_with_wrong_password_fails() {
        let mut rng = rng();
        let (account, _) = Account::create(&mut rng, "a@x", "Ada", "pw1").unwrap();
        assert!(matches!(
            account.unlock("pw2"),
            Err(AccountError::Crypto(CryptoError::DecryptionFailed))
        ));
    }

    #[test]
    fn recover_with_old_key_preserves_keypair() {
        let mut rng = rng();
        let (mut account, unlocked) = Account::create(&mut rng, "a@x", "Ada", "pw1").unwrap();
        let old_fingerprint = account.public_key.fingerprint();
        account.recover(&mut rng, "pw2", Some(&unlocked)).unwrap();
        assert_eq!(account.public_key.fingerprint(), old_fingerprint);
        assert!(account.unlock("pw1").is_err());
        account.unlock("pw2").unwrap();
    }

    #[test]
    fn recover_without_old_key_rotates_keypair() {
        let mut rng = rng();
        let (mut account, _) = Account::create(&mut rng, "a@x", "Ada", "pw1").unwrap();
        let old_fingerprint = account.public_key.fingerprint();
        account.recover(&mut rng, "pw2", None).unwrap();
        assert_ne!(account.public_key.fingerprint(), old_fingerprint);
        account.unlock("pw2").unwrap();
    }
}
