//! In-memory storage backend for dev and tests.
//!
//! Entities are kept in their persisted form: canonical marshaled records,
//! replaced wholesale on every write. That keeps the backend honest about the
//! storage contract (self-describing records, byte-identical re-marshal,
//! atomic whole-record replacement) instead of shortcutting through shared
//! in-memory objects.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use eyre::Context as _;
use lockbox_core::account::{Account, AccountId};
use lockbox_core::auth::AuthRecord;
use lockbox_core::invite::{Invite, InviteId};
use lockbox_core::marshal::Record;
use lockbox_core::org::{Org, OrgId};
use lockbox_core::vault::{Vault, VaultId};
use parking_lot::Mutex;

use super::Storage;

#[derive(Default)]
struct Tables {
    accounts: HashMap<AccountId, Vec<u8>>,
    auth: HashMap<String, Vec<u8>>,
    vaults: HashMap<VaultId, Vec<u8>>,
    orgs: HashMap<OrgId, Vec<u8>>,
    invites: HashMap<(OrgId, InviteId), Vec<u8>>,
}

/// The in-memory [`Storage`] implementation.
#[derive(Default, Clone)]
pub struct MemoryStorage {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStorage {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

fn pack<T: serde::Serialize>(id: impl ToString, entity: &T) -> eyre::Result<Vec<u8>> {
    Record::new(id.to_string(), entity)
        .context("while packing record")?
        .to_bytes()
        .context("while marshaling record")
}

fn unpack<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> eyre::Result<T> {
    Record::from_bytes(bytes)
        .context("while parsing record")?
        .unpack()
        .context("while unpacking record")
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn put_account(&self, account: Account) -> eyre::Result<()> {
        let bytes = pack(account.id, &account)?;
        self.tables.lock().accounts.insert(account.id, bytes);
        Ok(())
    }

    async fn account(&self, id: AccountId) -> eyre::Result<Option<Account>> {
        self.tables
            .lock()
            .accounts
            .get(&id)
            .map(|bytes| unpack(bytes))
            .transpose()
    }

    async fn account_by_email(&self, email: &str) -> eyre::Result<Option<Account>> {
        let tables = self.tables.lock();
        for bytes in tables.accounts.values() {
            let account: Account = unpack(bytes)?;
            if account.email == email {
                return Ok(Some(account));
            }
        }
        Ok(None)
    }

    async fn put_auth(&self, auth: AuthRecord) -> eyre::Result<()> {
        let bytes = pack(&auth.email, &auth)?;
        self.tables.lock().auth.insert(auth.email.clone(), bytes);
        Ok(())
    }

    async fn auth_by_email(&self, email: &str) -> eyre::Result<Option<AuthRecord>> {
        self.tables
            .lock()
            .auth
            .get(email)
            .map(|bytes| unpack(bytes))
            .transpose()
    }

    async fn put_vault(&self, vault: Vault) -> eyre::Result<()> {
        let bytes = pack(vault.id(), &vault)?;
        self.tables.lock().vaults.insert(vault.id(), bytes);
        Ok(())
    }

    async fn vault(&self, id: VaultId) -> eyre::Result<Option<Vault>> {
        self.tables
            .lock()
            .vaults
            .get(&id)
            .map(|bytes| unpack(bytes))
            .transpose()
    }

    async fn delete_vault(&self, id: VaultId) -> eyre::Result<()> {
        self.tables.lock().vaults.remove(&id);
        Ok(())
    }

    async fn put_org(&self, org: Org) -> eyre::Result<()> {
        let bytes = pack(org.id(), &org)?;
        self.tables.lock().orgs.insert(org.id(), bytes);
        Ok(())
    }

    async fn org(&self, id: OrgId) -> eyre::Result<Option<Org>> {
        self.tables
            .lock()
            .orgs
            .get(&id)
            .map(|bytes| unpack(bytes))
            .transpose()
    }

    async fn put_invite(&self, invite: Invite) -> eyre::Result<()> {
        let bytes = pack(invite.id, &invite)?;
        self.tables
            .lock()
            .invites
            .insert((invite.org, invite.id), bytes);
        Ok(())
    }

    async fn invite(&self, org: OrgId, id: InviteId) -> eyre::Result<Option<Invite>> {
        self.tables
            .lock()
            .invites
            .get(&(org, id))
            .map(|bytes| unpack(bytes))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng as _;
    use rand_chacha::ChaCha12Rng;

    #[tokio::test]
    async fn accounts_roundtrip_through_records() {
        let mut rng = ChaCha12Rng::seed_from_u64(3);
        let storage = MemoryStorage::new();
        let (account, _) = Account::create(&mut rng, "a@x", "Ada", "pw").unwrap();
        storage.put_account(account.clone()).await.unwrap();

        let by_id = storage.account(account.id).await.unwrap().unwrap();
        assert_eq!(by_id.email, account.email);
        let by_email = storage.account_by_email("a@x").await.unwrap().unwrap();
        assert_eq!(by_email.id, account.id);
        assert!(storage.account_by_email("b@x").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn vault_writes_replace_wholesale() {
        let mut rng = ChaCha12Rng::seed_from_u64(4);
        let (account, _) = Account::create(&mut rng, "a@x", "Ada", "pw").unwrap();
        let storage = MemoryStorage::new();

        let mut vault = Vault::new("Personal");
        vault.update_accessors(&mut rng, &[&account as &dyn lockbox_core::container::Accessor]).unwrap();
        vault.set_data(&mut rng, b"v1").unwrap();
        storage.put_vault(vault.clone()).await.unwrap();

        vault.set_data(&mut rng, b"v2").unwrap();
        storage.put_vault(vault.clone()).await.unwrap();

        let loaded = storage.vault(vault.id()).await.unwrap().unwrap();
        // the loaded record is the complete second write, key table included
        assert_eq!(loaded.accessors().len(), 1);
        storage.delete_vault(vault.id()).await.unwrap();
        assert!(storage.vault(vault.id()).await.unwrap().is_none());
    }
}
