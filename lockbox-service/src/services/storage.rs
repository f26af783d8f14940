//! Storage interface for the lockbox service.
//!
//! This module defines the [`Storage`] trait, which persists the serialized
//! entities of the system. Writes are whole-record replacements: a reader
//! observes either the old record or the new one, never a mix, which is what
//! makes accessor-table updates and org initialization appear atomic.
//!
//! Current `Storage` implementations:
//! - Memory (dev and tests)

use std::sync::Arc;

use async_trait::async_trait;
use lockbox_core::account::{Account, AccountId};
use lockbox_core::auth::AuthRecord;
use lockbox_core::invite::{Invite, InviteId};
use lockbox_core::org::{Org, OrgId};
use lockbox_core::vault::{Vault, VaultId};

pub mod memory;

/// Dynamic trait object for the storage service.
///
/// Must be `Send + Sync` to work with async contexts (e.g., Axum).
pub type StorageService = Arc<dyn Storage + Send + Sync>;

/// Trait that storage backends must provide.
///
/// Every getter returns `Ok(None)` for an absent entity; `Err` is reserved
/// for backend failures.
#[async_trait]
pub trait Storage {
    /// Stores or replaces an account.
    async fn put_account(&self, account: Account) -> eyre::Result<()>;

    /// Loads an account by id.
    async fn account(&self, id: AccountId) -> eyre::Result<Option<Account>>;

    /// Loads an account by email.
    async fn account_by_email(&self, email: &str) -> eyre::Result<Option<Account>>;

    /// Stores or replaces the auth record of an account.
    async fn put_auth(&self, auth: AuthRecord) -> eyre::Result<()>;

    /// Loads an auth record by email.
    async fn auth_by_email(&self, email: &str) -> eyre::Result<Option<AuthRecord>>;

    /// Stores or replaces a vault.
    async fn put_vault(&self, vault: Vault) -> eyre::Result<()>;

    /// Loads a vault by id.
    async fn vault(&self, id: VaultId) -> eyre::Result<Option<Vault>>;

    /// Deletes a vault. Deleting an absent vault is a no-op.
    async fn delete_vault(&self, id: VaultId) -> eyre::Result<()>;

    /// Stores or replaces an org.
    async fn put_org(&self, org: Org) -> eyre::Result<()>;

    /// Loads an org by id.
    async fn org(&self, id: OrgId) -> eyre::Result<Option<Org>>;

    /// Stores or replaces an invite.
    async fn put_invite(&self, invite: Invite) -> eyre::Result<()>;

    /// Loads an invite by issuing org and id.
    async fn invite(&self, org: OrgId, id: InviteId) -> eyre::Result<Option<Invite>>;
}
