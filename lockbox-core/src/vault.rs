//! Vaults: shared containers carrying a user's encrypted records.
//!
//! The record encoding is opaque here; the vault only guarantees that the
//! serialized record list is sealed under the vault data key and reachable by
//! exactly the accessors in its table (accounts and/or groups).

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::container::{Accessor, AccessorEntry, AccessorId, ActingAccessor, ContainerError, SharedContainer};
use crate::org::OrgId;

/// Unique id of a vault.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VaultId(Uuid);

impl VaultId {
    /// Wraps an existing UUID.
    pub fn from_uuid(value: Uuid) -> Self {
        Self(value)
    }

    /// Returns the inner UUID.
    pub fn into_inner(self) -> Uuid {
        self.0
    }
}

impl fmt::Display for VaultId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.to_string())
    }
}

/// A shared container holding an encrypted record list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vault {
    /// Display name of the vault.
    pub name: String,
    /// Owning org, by id only. `None` for a personal vault.
    pub org: Option<OrgId>,
    container: SharedContainer,
}

impl Vault {
    /// Creates an empty personal vault.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            org: None,
            container: SharedContainer::new(Uuid::new_v4()),
        }
    }

    /// Creates an empty vault owned by an org.
    pub fn for_org(name: &str, org: OrgId) -> Self {
        Self {
            name: name.to_owned(),
            org: Some(org),
            container: SharedContainer::new(Uuid::new_v4()),
        }
    }

    /// The vault id.
    pub fn id(&self) -> VaultId {
        VaultId(self.container.id())
    }

    /// The accessor table.
    pub fn accessors(&self) -> &[AccessorEntry] {
        self.container.accessors()
    }

    /// Returns `true` iff `id` is an accessor of this vault.
    pub fn has_accessor(&self, id: AccessorId) -> bool {
        self.container.has_accessor(id)
    }

    /// Replaces the accessor table; see [`SharedContainer::update_accessors`].
    pub fn update_accessors<R: rand::Rng + rand::CryptoRng>(
        &mut self,
        rng: &mut R,
        accessors: &[&dyn Accessor],
    ) -> Result<(), ContainerError> {
        self.container.update_accessors(rng, accessors)
    }

    /// Unlocks the vault as `accessor`; see [`SharedContainer::access`].
    pub fn access(&mut self, accessor: &dyn ActingAccessor) -> Result<(), ContainerError> {
        self.container.access(accessor)
    }

    /// Seals the serialized record list.
    pub fn set_data<R: rand::Rng + rand::CryptoRng>(
        &mut self,
        rng: &mut R,
        records: &[u8],
    ) -> Result<(), ContainerError> {
        self.container.set_data(rng, records)
    }

    /// Returns the serialized record list. Requires a prior [`Vault::access`].
    pub fn data(&self) -> Result<Zeroizing<Vec<u8>>, ContainerError> {
        self.container.data()
    }

    /// Rotates the vault data key; see [`SharedContainer::rotate_key`].
    pub fn rotate_key<R: rand::Rng + rand::CryptoRng>(
        &mut self,
        rng: &mut R,
    ) -> Result<(), ContainerError> {
        self.container.rotate_key(rng)
    }

    /// Returns `true` iff the data key is in memory.
    pub fn is_unlocked(&self) -> bool {
        self.container.is_unlocked()
    }

    /// Drops the in-memory data key.
    pub fn lock(&mut self) {
        self.container.lock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::Account;
    use crate::group::Group;
    use rand::SeedableRng as _;
    use rand_chacha::ChaCha12Rng;

    #[test]
    fn group_membership_grants_transitive_vault_access() {
        let mut rng = ChaCha12Rng::seed_from_u64(17);
        let (member, member_unlocked) = Account::create(&mut rng, "m@x", "M", "pw").unwrap();

        let mut group = Group::new("devs");
        group.update_accessors(&mut rng, &[&member as &dyn Accessor]).unwrap();
        group.generate_keys(&mut rng).unwrap();

        let mut vault = Vault::new("Secrets");
        vault.update_accessors(&mut rng, &[&group as &dyn Accessor]).unwrap();
        vault.set_data(&mut rng, b"records").unwrap();
        vault.lock();
        group.lock();

        group.unlock(&member_unlocked).unwrap();
        vault.access(&group).unwrap();
        assert_eq!(&vault.data().unwrap()[..], b"records");
    }

    #[test]
    fn locked_group_cannot_open_the_vault() {
        let mut rng = ChaCha12Rng::seed_from_u64(18);
        let (member, _) = Account::create(&mut rng, "m@x", "M", "pw").unwrap();

        let mut group = Group::new("devs");
        group.update_accessors(&mut rng, &[&member as &dyn Accessor]).unwrap();
        group.generate_keys(&mut rng).unwrap();

        let mut vault = Vault::new("Secrets");
        vault.update_accessors(&mut rng, &[&group as &dyn Accessor]).unwrap();
        vault.set_data(&mut rng, b"records").unwrap();
        vault.lock();
        group.lock();

        assert!(matches!(
            vault.access(&group),
            Err(ContainerError::Locked)
        ));
    }
}
