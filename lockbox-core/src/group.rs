//! Groups: shared containers whose payload is a keypair.
//!
//! A group lets a set of accounts be treated as a single principal. The
//! group's private key is the container payload, so being an accessor of the
//! group is exactly the capability to act *as* the group anywhere the group
//! itself is an accessor.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::container::{
    Accessor, AccessorEntry, AccessorId, ActingAccessor, ContainerError, SharedContainer,
};
use crate::crypto::{self, AeadKey, CryptoError, KeyPair, PrivateKey, PublicKey, SignedPublicKey, WrappedKey};
use crate::marshal::{self, MarshalError};

/// Unique id of a group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(Uuid);

impl GroupId {
    /// Wraps an existing UUID.
    pub fn from_uuid(value: Uuid) -> Self {
        Self(value)
    }

    /// Returns the inner UUID.
    pub fn into_inner(self) -> Uuid {
        self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.to_string())
    }
}

/// Errors produced by group operations.
#[derive(Debug, thiserror::Error)]
pub enum GroupError {
    /// The group has no keypair yet; call [`Group::generate_keys`] first.
    #[error("group has no keypair")]
    NoKeys,
    /// The underlying container failed.
    #[error(transparent)]
    Container(#[from] ContainerError),
    /// The payload could not be (un)marshaled.
    #[error(transparent)]
    Marshal(#[from] MarshalError),
    /// A primitive failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// The decrypted group payload.
#[derive(Serialize, Deserialize)]
struct GroupPayload {
    #[serde(with = "crypto::base64_bytes")]
    private_key: Vec<u8>,
}

/// A named shared container holding a keypair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    /// Display name of the group.
    pub name: String,
    /// The group public key, present once keys were generated.
    pub public_key: Option<PublicKey>,
    /// Signature over the public key issued by the owning org, if any.
    pub signed_public_key: Option<SignedPublicKey>,
    container: SharedContainer,
    #[serde(skip)]
    private_key: Option<PrivateKey>,
}

impl Group {
    /// Creates an empty group with a fresh id.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            public_key: None,
            signed_public_key: None,
            container: SharedContainer::new(Uuid::new_v4()),
            private_key: None,
        }
    }

    /// The group id.
    pub fn id(&self) -> GroupId {
        GroupId(self.container.id())
    }

    /// The accessor table of the underlying container.
    pub fn accessors(&self) -> &[AccessorEntry] {
        self.container.accessors()
    }

    /// Returns `true` iff `id` is an accessor of this group.
    pub fn has_accessor(&self, id: AccessorId) -> bool {
        self.container.has_accessor(id)
    }

    /// Replaces the accessor table; see [`SharedContainer::update_accessors`].
    pub fn update_accessors<R: rand::Rng + rand::CryptoRng>(
        &mut self,
        rng: &mut R,
        accessors: &[&dyn Accessor],
    ) -> Result<(), GroupError> {
        Ok(self.container.update_accessors(rng, accessors)?)
    }

    /// Generates a fresh keypair and stores the private key as the payload.
    ///
    /// Any previous org signature is dropped since it no longer matches.
    pub fn generate_keys<R: rand::Rng + rand::CryptoRng>(
        &mut self,
        rng: &mut R,
    ) -> Result<(), GroupError> {
        let pair = KeyPair::generate(rng)?;
        let payload = GroupPayload {
            private_key: pair.private.to_pkcs8_der()?.to_vec(),
        };
        let bytes = marshal::to_canonical_bytes(&payload)?;
        self.container.set_data(rng, &bytes)?;
        self.public_key = Some(pair.public);
        self.private_key = Some(pair.private);
        self.signed_public_key = None;
        Ok(())
    }

    /// Unlocks the group as one of its accessors, loading the private key.
    pub fn unlock(&mut self, accessor: &dyn ActingAccessor) -> Result<(), GroupError> {
        self.container.access(accessor)?;
        let bytes = self.container.data()?;
        let payload: GroupPayload = marshal::from_bytes(&bytes)?;
        self.private_key = Some(PrivateKey::from_pkcs8_der(&payload.private_key)?);
        Ok(())
    }

    /// Returns `true` iff the group private key is in memory.
    pub fn is_unlocked(&self) -> bool {
        self.private_key.is_some()
    }

    /// Drops all in-memory key material.
    pub fn lock(&mut self) {
        self.private_key = None;
        self.container.lock();
    }

    /// Rotates the container data key; see [`SharedContainer::rotate_key`].
    pub fn rotate_key<R: rand::Rng + rand::CryptoRng>(
        &mut self,
        rng: &mut R,
    ) -> Result<(), GroupError> {
        Ok(self.container.rotate_key(rng)?)
    }
}

impl Accessor for Group {
    fn accessor_id(&self) -> AccessorId {
        AccessorId::Group(self.id())
    }

    /// # Panics
    /// Panics if [`Group::generate_keys`] has not been called; a group only
    /// becomes an accessor after it has a keypair.
    fn public_key(&self) -> &PublicKey {
        self.public_key
            .as_ref()
            .expect("group keys must be generated before it can act as accessor")
    }
}

impl ActingAccessor for Group {
    fn unwrap_key(&self, blob: &WrappedKey) -> Result<AeadKey, ContainerError> {
        let private_key = self.private_key.as_ref().ok_or(ContainerError::Locked)?;
        private_key.unwrap_key(blob).map_err(ContainerError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::Account;
    use rand::SeedableRng as _;
    use rand_chacha::ChaCha12Rng;

    #[test]
    fn membership_is_exactly_the_ability_to_unlock() {
        let mut rng = ChaCha12Rng::seed_from_u64(5);
        let (member, member_unlocked) = Account::create(&mut rng, "m@x", "M", "pw").unwrap();
        let (_, outsider) = Account::create(&mut rng, "o@x", "O", "pw").unwrap();

        let mut group = Group::new("devs");
        group.update_accessors(&mut rng, &[&member as &dyn Accessor]).unwrap();
        group.generate_keys(&mut rng).unwrap();
        group.lock();

        assert!(matches!(
            group.unlock(&outsider),
            Err(GroupError::Container(ContainerError::MissingAccess(_)))
        ));
        group.unlock(&member_unlocked).unwrap();
        assert!(group.is_unlocked());
    }
}
