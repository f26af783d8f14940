//! The shared-container primitive.
//!
//! A [`SharedContainer`] encrypts a payload under a per-container symmetric
//! data key `K` and wraps `K` once per accessor under that accessor's RSA
//! public key. Possession of any listed private key is therefore sufficient
//! and necessary to reach the payload.
//!
//! The accessor table stores, per accessor, the public key it was wrapped to
//! and that key's fingerprint. On [`SharedContainer::access`] the fingerprint
//! is checked against the accessor's *current* key, so a key substituted
//! after the wrap is detected instead of silently honored.
//!
//! `K` never rotates implicitly. Removing an accessor from the table only
//! stops future wraps; [`SharedContainer::rotate_key`] is the explicit
//! operation that generates a fresh `K`, re-seals the payload and re-wraps
//! for every remaining accessor in one step.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::account::AccountId;
use crate::crypto::{AeadKey, CryptoError, Fingerprint, PublicKey, SealedBytes, WrappedKey};
use crate::group::GroupId;

/// Identifies an accessor in a container's table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum AccessorId {
    /// An account acting with its long-term keypair.
    Account(AccountId),
    /// A group acting with its group keypair.
    Group(GroupId),
}

impl fmt::Display for AccessorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessorId::Account(id) => write!(f, "account/{id}"),
            AccessorId::Group(id) => write!(f, "group/{id}"),
        }
    }
}

/// A principal that can be granted access to a container.
///
/// Granting needs only the public half; see [`ActingAccessor`] for the
/// decrypting side.
pub trait Accessor {
    /// The accessor's table id.
    fn accessor_id(&self) -> AccessorId;
    /// The public key data keys are wrapped to.
    fn public_key(&self) -> &PublicKey;
}

/// An accessor that currently holds its private key and can unwrap data keys.
pub trait ActingAccessor: Accessor {
    /// Unwraps a data key wrapped to this accessor.
    fn unwrap_key(&self, blob: &WrappedKey) -> Result<AeadKey, ContainerError>;
}

/// Errors produced by container operations.
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    /// The accessor has no entry in the table.
    #[error("no access entry for {0}")]
    MissingAccess(AccessorId),
    /// The stored fingerprint does not match the accessor's current key.
    #[error("public key mismatch for {0}")]
    KeyMismatch(AccessorId),
    /// The operation needs the data key, but the container has not been
    /// accessed (or was created elsewhere and never unlocked here).
    #[error("container is locked")]
    Locked,
    /// The container has no payload yet.
    #[error("container has no payload")]
    NoData,
    /// A primitive failed; an AEAD failure here means tampering.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// One row of the accessor table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessorEntry {
    /// The accessor this entry belongs to.
    pub id: AccessorId,
    /// The public key the data key was wrapped to.
    pub public_key: PublicKey,
    /// Fingerprint of `public_key`, checked against the presenting
    /// accessor's current key on access.
    pub fingerprint: Fingerprint,
    /// The data key, wrapped under `public_key`.
    pub wrapped_key: WrappedKey,
}

/// A payload encrypted under a data key that is wrapped per accessor.
///
/// The in-memory data key is never serialized; deserialized containers start
/// locked and must be [`SharedContainer::access`]ed before the payload or the
/// accessor table can be touched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedContainer {
    id: Uuid,
    accessors: Vec<AccessorEntry>,
    #[serde(rename = "data")]
    sealed: Option<SealedBytes>,
    #[serde(skip)]
    key: Option<AeadKey>,
}

impl SharedContainer {
    /// Creates an empty container bound to `id`.
    ///
    /// The id doubles as the AEAD associated data, so a payload cannot be
    /// transplanted between containers without failing authentication.
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            accessors: Vec::new(),
            sealed: None,
            key: None,
        }
    }

    /// The container id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The current accessor table.
    pub fn accessors(&self) -> &[AccessorEntry] {
        &self.accessors
    }

    /// Returns `true` iff `id` has an entry in the table.
    pub fn has_accessor(&self, id: AccessorId) -> bool {
        self.accessors.iter().any(|entry| entry.id == id)
    }

    /// Returns `true` iff the data key is currently in memory.
    pub fn is_unlocked(&self) -> bool {
        self.key.is_some()
    }

    /// Drops the in-memory data key.
    pub fn lock(&mut self) {
        self.key = None;
    }

    fn aad(&self) -> String {
        format!("container/{}", self.id)
    }

    /// Ensures a data key is present, generating one for a brand-new
    /// container. A container with a sealed payload but no in-memory key is
    /// locked and cannot mint a new one.
    fn ensure_key<R: rand::Rng + rand::CryptoRng>(
        &mut self,
        rng: &mut R,
    ) -> Result<(), ContainerError> {
        if self.key.is_none() {
            if self.sealed.is_some() {
                return Err(ContainerError::Locked);
            }
            self.key = Some(AeadKey::generate(rng));
        }
        Ok(())
    }

    /// Seals `plaintext` as the container payload under a fresh nonce.
    pub fn set_data<R: rand::Rng + rand::CryptoRng>(
        &mut self,
        rng: &mut R,
        plaintext: &[u8],
    ) -> Result<(), ContainerError> {
        let aad = self.aad();
        self.ensure_key(rng)?;
        let key = self.key.as_ref().expect("key present after ensure_key");
        self.sealed = Some(key.seal(rng, aad.as_bytes(), plaintext)?);
        Ok(())
    }

    /// Returns the decrypted payload. Requires a prior [`SharedContainer::access`].
    pub fn data(&self) -> Result<Zeroizing<Vec<u8>>, ContainerError> {
        let key = self.key.as_ref().ok_or(ContainerError::Locked)?;
        let sealed = self.sealed.as_ref().ok_or(ContainerError::NoData)?;
        Ok(key.open(self.aad().as_bytes(), sealed)?)
    }

    /// Replaces the accessor table, wrapping the data key for each accessor.
    ///
    /// The table is built completely before it is swapped in, so a failed
    /// wrap leaves the old table in place. The data key does **not** rotate
    /// here; revocation that must invalidate already-held keys goes through
    /// [`SharedContainer::rotate_key`].
    pub fn update_accessors<R: rand::Rng + rand::CryptoRng>(
        &mut self,
        rng: &mut R,
        accessors: &[&dyn Accessor],
    ) -> Result<(), ContainerError> {
        self.ensure_key(rng)?;
        let key = self.key.as_ref().expect("key present after ensure_key");
        let mut table = Vec::with_capacity(accessors.len());
        for accessor in accessors {
            let public_key = accessor.public_key().clone();
            let wrapped_key = public_key.wrap_key(rng, key)?;
            table.push(AccessorEntry {
                id: accessor.accessor_id(),
                fingerprint: public_key.fingerprint(),
                public_key,
                wrapped_key,
            });
        }
        self.accessors = table;
        Ok(())
    }

    /// Unwraps the data key as `accessor`, loading it into memory.
    ///
    /// # Errors
    /// * [`ContainerError::MissingAccess`] — no table entry for the accessor.
    /// * [`ContainerError::KeyMismatch`] — the accessor's current public key
    ///   differs from the one the entry was wrapped to.
    pub fn access(&mut self, accessor: &dyn ActingAccessor) -> Result<(), ContainerError> {
        let id = accessor.accessor_id();
        let entry = self
            .accessors
            .iter()
            .find(|entry| entry.id == id)
            .ok_or(ContainerError::MissingAccess(id))?;
        if entry.fingerprint != accessor.public_key().fingerprint() {
            return Err(ContainerError::KeyMismatch(id));
        }
        let key = accessor.unwrap_key(&entry.wrapped_key)?;
        self.key = Some(key);
        Ok(())
    }

    /// Generates a fresh data key, re-seals the payload and re-wraps for
    /// every accessor currently in the table, atomically.
    ///
    /// Requires the container to be unlocked (the payload must be re-sealed).
    pub fn rotate_key<R: rand::Rng + rand::CryptoRng>(
        &mut self,
        rng: &mut R,
    ) -> Result<(), ContainerError> {
        if self.key.is_none() {
            return Err(ContainerError::Locked);
        }
        let plaintext = match &self.sealed {
            Some(_) => Some(self.data()?),
            None => None,
        };
        let new_key = AeadKey::generate(rng);
        let new_sealed = match &plaintext {
            Some(plaintext) => Some(new_key.seal(rng, self.aad().as_bytes(), plaintext)?),
            None => None,
        };
        let mut table = Vec::with_capacity(self.accessors.len());
        for entry in &self.accessors {
            table.push(AccessorEntry {
                id: entry.id,
                public_key: entry.public_key.clone(),
                fingerprint: entry.fingerprint,
                wrapped_key: entry.public_key.wrap_key(rng, &new_key)?,
            });
        }
        // everything succeeded, swap it all in
        self.accessors = table;
        self.sealed = new_sealed;
        self.key = Some(new_key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::Account;
    use rand::SeedableRng as _;
    use rand_chacha::ChaCha12Rng;

    fn rng() -> ChaCha12Rng {
        ChaCha12Rng::seed_from_u64(99)
    }

    fn account(rng: &mut ChaCha12Rng, email: &str) -> (Account, crate::account::UnlockedAccount) {
        Account::create(rng, email, email, "pw").unwrap()
    }

    #[test]
    fn every_accessor_can_read_back_the_payload() {
        let mut rng = rng();
        let (a, a_unlocked) = account(&mut rng, "a@x");
        let (b, b_unlocked) = account(&mut rng, "b@x");
        let mut container = SharedContainer::new(Uuid::new_v4());
        container
            .update_accessors(&mut rng, &[&a as &dyn Accessor, &b])
            .unwrap();
        container.set_data(&mut rng, b"the payload").unwrap();

        let serialized = serde_json::to_string(&container).unwrap();
        for unlocked in [&a_unlocked, &b_unlocked] {
            let mut fresh: SharedContainer = serde_json::from_str(&serialized).unwrap();
            assert!(!fresh.is_unlocked());
            fresh.access(unlocked).unwrap();
            assert_eq!(&fresh.data().unwrap()[..], b"the payload");
        }
    }

    #[test]
    fn non_accessor_gets_missing_access() {
        let mut rng = rng();
        let (a, _) = account(&mut rng, "a@x");
        let (_, outsider) = account(&mut rng, "c@x");
        let mut container = SharedContainer::new(Uuid::new_v4());
        container.update_accessors(&mut rng, &[&a as &dyn Accessor]).unwrap();
        container.set_data(&mut rng, b"secret").unwrap();
        container.lock();
        assert!(matches!(
            container.access(&outsider),
            Err(ContainerError::MissingAccess(_))
        ));
    }

    #[test]
    fn substituted_public_key_is_detected() {
        let mut rng = rng();
        let (mut a, _) = account(&mut rng, "a@x");
        let mut container = SharedContainer::new(Uuid::new_v4());
        container.update_accessors(&mut rng, &[&a as &dyn Accessor]).unwrap();
        container.set_data(&mut rng, b"secret").unwrap();
        container.lock();

        // the account's keypair is replaced between wrap and access
        let replacement = a.recover(&mut rng, "pw2", None).unwrap();
        assert!(matches!(
            container.access(&replacement),
            Err(ContainerError::KeyMismatch(_))
        ));
    }

    #[test]
    fn rotate_key_revokes_removed_accessors() {
        let mut rng = rng();
        let (a, a_unlocked) = account(&mut rng, "a@x");
        let (b, b_unlocked) = account(&mut rng, "b@x");
        let mut container = SharedContainer::new(Uuid::new_v4());
        container.update_accessors(&mut rng, &[&a as &dyn Accessor, &b]).unwrap();
        container.set_data(&mut rng, b"rotating").unwrap();

        container.update_accessors(&mut rng, &[&a as &dyn Accessor]).unwrap();
        container.rotate_key(&mut rng).unwrap();

        container.lock();
        container.access(&a_unlocked).unwrap();
        assert_eq!(&container.data().unwrap()[..], b"rotating");

        container.lock();
        assert!(matches!(
            container.access(&b_unlocked),
            Err(ContainerError::MissingAccess(_))
        ));
    }

    #[test]
    fn tampered_payload_fails_to_open() {
        let mut rng = rng();
        let (a, a_unlocked) = account(&mut rng, "a@x");
        let mut container = SharedContainer::new(Uuid::new_v4());
        container.update_accessors(&mut rng, &[&a as &dyn Accessor]).unwrap();
        container.set_data(&mut rng, b"integrity").unwrap();

        let mut json: serde_json::Value = serde_json::to_value(&container).unwrap();
        let ct = json["data"]["ciphertext"].as_str().unwrap().to_owned();
        use base64::Engine as _;
        let mut raw = base64::engine::general_purpose::STANDARD.decode(ct).unwrap();
        raw[0] ^= 0x01;
        json["data"]["ciphertext"] =
            base64::engine::general_purpose::STANDARD.encode(raw).into();
        let mut tampered: SharedContainer = serde_json::from_value(json).unwrap();

        tampered.access(&a_unlocked).unwrap();
        assert!(matches!(
            tampered.data(),
            Err(ContainerError::Crypto(CryptoError::DecryptionFailed))
        ));
    }

    #[test]
    fn payload_cannot_move_between_containers() {
        let mut rng = rng();
        let (a, a_unlocked) = account(&mut rng, "a@x");
        let mut first = SharedContainer::new(Uuid::new_v4());
        first.update_accessors(&mut rng, &[&a as &dyn Accessor]).unwrap();
        first.set_data(&mut rng, b"bound").unwrap();

        // graft first's payload and table onto a container with another id
        let mut json = serde_json::to_value(&first).unwrap();
        json["id"] = serde_json::to_value(Uuid::new_v4()).unwrap();
        let mut grafted: SharedContainer = serde_json::from_value(json).unwrap();
        grafted.access(&a_unlocked).unwrap();
        assert!(grafted.data().is_err());
    }
}
