//! Organizations: admin-signed public-key infrastructure over shared containers.
//!
//! An org is itself a shared container whose payload holds the org signing
//! private key and the invites HMAC key. The chain of custody is strictly
//! layered:
//!
//! * the **admin group**'s accessors are accounts;
//! * the org container's sole accessor is the admin group;
//! * every other capability (signing members, minting invites, keying new
//!   vaults) needs the org payload and therefore admin-group membership.
//!
//! Members and groups carry a `signedPublicKey` issued under the org signing
//! key. Consumers must verify that signature before trusting a key for wrap
//! or verify; [`Org::verify_member`] and [`Org::verify_group`] do exactly
//! that check.
//!
//! The **everyone group**'s accessor set is kept in sync with the member list
//! by [`Org::add_member`] and [`Org::remove_member`]. Removing a member does
//! not rotate any data key; revocation that must invalidate held keys is the
//! explicit rotation on the affected containers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime};
use uuid::Uuid;

use crate::account::{Account, AccountId, UnlockedAccount};
use crate::container::{Accessor, AccessorId, ContainerError, SharedContainer};
use crate::crypto::{
    self, CryptoError, HmacKey, KeyPair, PrivateKey, PublicKey, SignedPublicKey, SigningParams,
};
use crate::group::{Group, GroupError, GroupId};
use crate::invite::{self, Invite, InviteError, InviteId, InviteStatus};
use crate::marshal::{self, MarshalError};
use crate::vault::{Vault, VaultId};

/// Unique id of an org.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrgId(Uuid);

impl OrgId {
    /// Wraps an existing UUID.
    pub fn from_uuid(value: Uuid) -> Self {
        Self(value)
    }

    /// Returns the inner UUID.
    pub fn into_inner(self) -> Uuid {
        self.0
    }
}

impl fmt::Display for OrgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.to_string())
    }
}

/// Errors produced by org operations.
#[derive(Debug, thiserror::Error)]
pub enum OrgError {
    /// The caller has not accessed the org; the operation needs the org
    /// payload in memory.
    #[error("insufficient permissions")]
    InsufficientPermissions,
    /// The account is already a member.
    #[error("account {0} is already a member")]
    AlreadyMember(AccountId),
    /// The account is not a member.
    #[error("account {0} is not a member")]
    NotAMember(AccountId),
    /// No group with this id exists in the org.
    #[error("unknown group {0}")]
    UnknownGroup(GroupId),
    /// The invite belongs to a different org.
    #[error("invite {0} was not issued by this org")]
    ForeignInvite(InviteId),
    /// An invite operation failed.
    #[error(transparent)]
    Invite(#[from] InviteError),
    /// The underlying container failed.
    #[error(transparent)]
    Container(#[from] ContainerError),
    /// A group operation failed.
    #[error(transparent)]
    Group(#[from] GroupError),
    /// The payload could not be (un)marshaled.
    #[error(transparent)]
    Marshal(#[from] MarshalError),
    /// A primitive failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// A member record: the account's public identity plus the org signature
/// binding its key to the org.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgMember {
    /// The member's account id.
    pub id: AccountId,
    /// Display name.
    pub name: String,
    /// Email address.
    pub email: String,
    /// The member's long-term public key.
    pub public_key: PublicKey,
    /// Org signature over `public_key`.
    pub signed_public_key: SignedPublicKey,
}

impl Accessor for OrgMember {
    fn accessor_id(&self) -> AccessorId {
        AccessorId::Account(self.id)
    }

    fn public_key(&self) -> &PublicKey {
        &self.public_key
    }
}

/// Id and name of a vault owned by an org. The vault entity itself is stored
/// independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultSummary {
    /// The vault id.
    pub id: VaultId,
    /// The vault name.
    pub name: String,
}

/// The decrypted org payload.
#[derive(Serialize, Deserialize)]
struct OrgPayload {
    #[serde(with = "crypto::base64_bytes")]
    private_key: Vec<u8>,
    #[serde(with = "crypto::base64_bytes")]
    invites_key: Vec<u8>,
}

/// The org secrets while the org is accessed. Both keys zeroize on drop.
#[derive(Clone)]
struct OrgSecrets {
    private_key: PrivateKey,
    invites_key: HmacKey,
}

/// An organization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Org {
    /// Display name of the org.
    pub name: String,
    /// The org signing public key, present once initialized.
    pub public_key: Option<PublicKey>,
    /// Parameters for signatures issued by this org.
    pub signing_params: SigningParams,
    members: Vec<OrgMember>,
    admin_group: Group,
    everyone_group: Group,
    groups: Vec<Group>,
    vaults: Vec<VaultSummary>,
    container: SharedContainer,
    #[serde(skip)]
    secrets: Option<OrgSecrets>,
}

impl fmt::Debug for OrgSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OrgSecrets(..)")
    }
}

impl Org {
    /// Creates and fully initializes an org with `founder` as sole admin and
    /// first member.
    ///
    /// The whole sequence is one logical transaction: the org value only
    /// exists fully formed. Callers that persist orgs must write the returned
    /// value in a single record so readers never observe a partial org.
    pub fn initialize<R: rand::Rng + rand::CryptoRng>(
        rng: &mut R,
        name: &str,
        founder: &Account,
        founder_keys: &UnlockedAccount,
    ) -> Result<Self, OrgError> {
        debug_assert_eq!(founder.id, founder_keys.id);

        // the admin group is keyed to the founder alone
        let mut admin_group = Group::new("Admins");
        admin_group.update_accessors(rng, &[founder as &dyn Accessor])?;
        admin_group.generate_keys(rng)?;

        // the org container is reachable only through the admin group
        let mut container = SharedContainer::new(Uuid::new_v4());
        container.update_accessors(rng, &[&admin_group as &dyn Accessor])?;

        let signing = KeyPair::generate(rng)?;
        let invites_key = HmacKey::generate(rng);
        let payload = OrgPayload {
            private_key: signing.private.to_pkcs8_der()?.to_vec(),
            invites_key: invites_key.as_bytes().to_vec(),
        };
        container.set_data(rng, &marshal::to_canonical_bytes(&payload)?)?;

        let mut everyone_group = Group::new("Everyone");
        everyone_group.generate_keys(rng)?;

        let mut org = Self {
            name: name.to_owned(),
            public_key: Some(signing.public),
            signing_params: SigningParams::default(),
            members: Vec::new(),
            admin_group,
            everyone_group,
            groups: Vec::new(),
            vaults: Vec::new(),
            container,
            secrets: Some(OrgSecrets {
                private_key: signing.private,
                invites_key,
            }),
        };
        org.add_member(rng, founder)?;
        let admin_signed = org.sign(rng, org.admin_group.public_key())?;
        org.admin_group.signed_public_key = Some(admin_signed);
        let everyone_signed = org.sign(rng, org.everyone_group.public_key())?;
        org.everyone_group.signed_public_key = Some(everyone_signed);
        Ok(org)
    }

    /// The org id.
    pub fn id(&self) -> OrgId {
        OrgId(self.container.id())
    }

    /// The member list.
    pub fn members(&self) -> &[OrgMember] {
        &self.members
    }

    /// Looks up a member by account id.
    pub fn member(&self, id: AccountId) -> Option<&OrgMember> {
        self.members.iter().find(|member| member.id == id)
    }

    /// The admin group.
    pub fn admin_group(&self) -> &Group {
        &self.admin_group
    }

    /// The everyone group. Its accessor set always equals the member set.
    pub fn everyone_group(&self) -> &Group {
        &self.everyone_group
    }

    /// Mutable everyone group, e.g. for a member to unlock it.
    pub fn everyone_group_mut(&mut self) -> &mut Group {
        &mut self.everyone_group
    }

    /// The org's additional (non-distinguished) groups.
    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    /// Looks up a group by id, including the distinguished groups.
    pub fn group(&self, id: GroupId) -> Option<&Group> {
        if self.admin_group.id() == id {
            return Some(&self.admin_group);
        }
        if self.everyone_group.id() == id {
            return Some(&self.everyone_group);
        }
        self.groups.iter().find(|group| group.id() == id)
    }

    /// Mutable group lookup; see [`Org::group`].
    pub fn group_mut(&mut self, id: GroupId) -> Option<&mut Group> {
        if self.admin_group.id() == id {
            return Some(&mut self.admin_group);
        }
        if self.everyone_group.id() == id {
            return Some(&mut self.everyone_group);
        }
        self.groups.iter_mut().find(|group| group.id() == id)
    }

    /// The vault summaries.
    pub fn vaults(&self) -> &[VaultSummary] {
        &self.vaults
    }

    /// Returns `true` iff `account` is an accessor of the admin group.
    pub fn is_admin(&self, account: AccountId) -> bool {
        self.admin_group.has_accessor(AccessorId::Account(account))
    }

    /// Unlocks the org as an admin account.
    ///
    /// Reverses the trust chain: the account unlocks the admin group, the
    /// admin group unlocks the org container, and the payload yields the
    /// signing and invite keys. The account's own membership additionally
    /// unlocks the everyone group so member-set changes can re-wrap its key.
    pub fn access(&mut self, account: &UnlockedAccount) -> Result<(), OrgError> {
        self.admin_group.unlock(account)?;
        self.container.access(&self.admin_group)?;
        let bytes = self.container.data()?;
        let payload: OrgPayload = marshal::from_bytes(&bytes)?;
        self.secrets = Some(OrgSecrets {
            private_key: PrivateKey::from_pkcs8_der(&payload.private_key)?,
            invites_key: HmacKey::from_slice(&payload.invites_key)?,
        });
        if self
            .everyone_group
            .has_accessor(AccessorId::Account(account.id))
        {
            self.everyone_group.unlock(account)?;
        }
        Ok(())
    }

    /// Returns `true` iff the org payload is currently in memory.
    pub fn is_accessed(&self) -> bool {
        self.secrets.is_some()
    }

    /// Drops all in-memory org key material.
    pub fn lock(&mut self) {
        self.secrets = None;
        self.admin_group.lock();
        self.everyone_group.lock();
        for group in &mut self.groups {
            group.lock();
        }
        self.container.lock();
    }

    fn secrets(&self) -> Result<&OrgSecrets, OrgError> {
        self.secrets
            .as_ref()
            .ok_or(OrgError::InsufficientPermissions)
    }

    /// Signs a public key under the org signing key.
    pub fn sign<R: rand::Rng + rand::CryptoRng>(
        &self,
        rng: &mut R,
        public_key: &PublicKey,
    ) -> Result<SignedPublicKey, OrgError> {
        let secrets = self.secrets()?;
        let der = public_key.to_der()?;
        let signature = secrets.private_key.sign(rng, &der, &self.signing_params)?;
        Ok(SignedPublicKey {
            signature,
            params: self.signing_params.clone(),
        })
    }

    /// Checks an org signature over a public key. Usable without org access.
    pub fn verify_key(&self, public_key: &PublicKey, signed: &SignedPublicKey) -> bool {
        let Some(org_key) = &self.public_key else {
            return false;
        };
        let Ok(der) = public_key.to_der() else {
            return false;
        };
        org_key.verify(&der, &signed.signature, &signed.params)
    }

    /// Checks a member's `signedPublicKey` against the org signing key.
    pub fn verify_member(&self, member: &OrgMember) -> bool {
        self.verify_key(&member.public_key, &member.signed_public_key)
    }

    /// Checks a group's `signedPublicKey` against the org signing key.
    pub fn verify_group(&self, group: &Group) -> bool {
        match (&group.public_key, &group.signed_public_key) {
            (Some(public_key), Some(signed)) => self.verify_key(public_key, signed),
            _ => false,
        }
    }

    /// Adds `account` as a member: signs its public key, records it, and
    /// re-wraps the everyone-group key for the grown member set.
    ///
    /// Requires a prior [`Org::access`].
    pub fn add_member<R: rand::Rng + rand::CryptoRng>(
        &mut self,
        rng: &mut R,
        account: &Account,
    ) -> Result<(), OrgError> {
        self.secrets()?;
        if self.member(account.id).is_some() {
            return Err(OrgError::AlreadyMember(account.id));
        }
        let signed_public_key = self.sign(rng, &account.public_key)?;
        self.members.push(OrgMember {
            id: account.id,
            name: account.name.clone(),
            email: account.email.clone(),
            public_key: account.public_key.clone(),
            signed_public_key,
        });
        self.sync_everyone_group(rng)
    }

    /// Removes a member and re-wraps the everyone-group key for the shrunk
    /// member set.
    ///
    /// This does **not** rotate any data key. A removed member that captured
    /// keys keeps whatever it captured; call `rotate_key` on the affected
    /// containers to actually revoke.
    pub fn remove_member<R: rand::Rng + rand::CryptoRng>(
        &mut self,
        rng: &mut R,
        account: AccountId,
    ) -> Result<(), OrgError> {
        self.secrets()?;
        if self.member(account).is_none() {
            return Err(OrgError::NotAMember(account));
        }
        self.members.retain(|member| member.id != account);
        self.sync_everyone_group(rng)
    }

    fn sync_everyone_group<R: rand::Rng + rand::CryptoRng>(
        &mut self,
        rng: &mut R,
    ) -> Result<(), OrgError> {
        let accessors: Vec<&dyn Accessor> =
            self.members.iter().map(|member| member as &dyn Accessor).collect();
        self.everyone_group.update_accessors(rng, &accessors)?;
        Ok(())
    }

    /// Creates a named group whose accessors are the given members, signed by
    /// the org. Requires a prior [`Org::access`].
    pub fn create_group<R: rand::Rng + rand::CryptoRng>(
        &mut self,
        rng: &mut R,
        name: &str,
        member_ids: &[AccountId],
    ) -> Result<GroupId, OrgError> {
        self.secrets()?;
        let mut accessors: Vec<&dyn Accessor> = Vec::with_capacity(member_ids.len());
        for id in member_ids {
            let member = self.member(*id).ok_or(OrgError::NotAMember(*id))?;
            accessors.push(member as &dyn Accessor);
        }
        let mut group = Group::new(name);
        group.update_accessors(rng, &accessors)?;
        group.generate_keys(rng)?;
        group.signed_public_key = Some(self.sign(rng, group.public_key())?);
        let id = group.id();
        self.groups.push(group);
        Ok(id)
    }

    /// Creates a vault owned by this org with the admin group as its sole
    /// accessor. Further grants go through the vault's `update_accessors`.
    ///
    /// Requires a prior [`Org::access`].
    pub fn create_vault<R: rand::Rng + rand::CryptoRng>(
        &mut self,
        rng: &mut R,
        name: &str,
    ) -> Result<Vault, OrgError> {
        self.secrets()?;
        let mut vault = Vault::for_org(name, self.id());
        vault.update_accessors(rng, &[&self.admin_group as &dyn Accessor])?;
        self.vaults.push(VaultSummary {
            id: vault.id(),
            name: name.to_owned(),
        });
        Ok(vault)
    }

    /// Mints an invite for `email`: computes the token under the org invites
    /// key and signs the invite body with the org signing key.
    ///
    /// Requires a prior [`Org::access`].
    pub fn create_invite<R: rand::Rng + rand::CryptoRng>(
        &self,
        rng: &mut R,
        email: &str,
        vault: Option<VaultId>,
        ttl: Duration,
        now: SystemTime,
    ) -> Result<Invite, OrgError> {
        let secrets = self.secrets()?;
        let mut invite = Invite::create(&secrets.invites_key, self.id(), vault, email, ttl, now);
        invite.signature =
            secrets
                .private_key
                .sign(rng, &invite.claims_bytes()?, &self.signing_params)?;
        Ok(invite)
    }

    /// Checks the issuer signature on an invite against the org signing key.
    ///
    /// Works without org access and on token-redacted copies, since the token
    /// is not among the signed fields.
    pub fn verify_invite(&self, invite: &Invite) -> bool {
        let Some(org_key) = &self.public_key else {
            return false;
        };
        let Ok(claims) = invite.claims_bytes() else {
            return false;
        };
        org_key.verify(&claims, &invite.signature, &self.signing_params)
    }

    /// Completes an accepted invite: recomputes the token under the invites
    /// key, checks expiry and one-shot state, verifies the invitee's binding
    /// proof, and adds the invitee as a member.
    ///
    /// Requires a prior [`Org::access`].
    pub fn confirm_invite<R: rand::Rng + rand::CryptoRng>(
        &mut self,
        rng: &mut R,
        invite: &mut Invite,
        account: &Account,
        now: SystemTime,
    ) -> Result<(), OrgError> {
        let secrets = self.secrets()?;
        if invite.org != self.id() {
            return Err(OrgError::ForeignInvite(invite.id));
        }
        if !self.verify_invite(invite) {
            return Err(OrgError::Invite(InviteError::BadSignature));
        }
        let InviteStatus::Accepted { account: accepted_by, ref proof } = invite.status else {
            return Err(OrgError::Invite(InviteError::Expired));
        };
        if accepted_by != account.id {
            return Err(OrgError::Invite(InviteError::InvalidProof));
        }
        invite::verify_acceptance(&secrets.invites_key, invite, account, proof, now)?;
        self.add_member(rng, account)?;
        invite.status = InviteStatus::Completed;
        Ok(())
    }
}
