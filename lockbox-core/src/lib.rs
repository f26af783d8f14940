#![deny(missing_docs)]
//! Cryptographic core of the lockbox credential-vault service.
//!
//! Everything secret-bearing lives in this crate, with no I/O attached:
//!
//! * [`crypto`] — typed primitives: AEAD, password KDF, RSA wrap/sign, HMAC.
//! * [`auth`] — SRP-6a login handshake and deterministic simulated auth
//!   records for unknown emails.
//! * [`account`] — user identity and the password-sealed private-key envelope.
//! * [`container`] — the shared-container primitive: a payload sealed under a
//!   data key that is wrapped once per accessor.
//! * [`group`] — containers whose payload is a keypair, letting a member set
//!   act as one principal.
//! * [`vault`] — containers carrying encrypted record lists.
//! * [`org`] — admin-signed PKI over containers: members, groups, vaults and
//!   the org signing/invite keys.
//! * [`invite`] — HMAC-authenticated org joining without prior key trust.
//! * [`marshal`] — the deterministic codec backing signatures and persisted
//!   records.
//!
//! The crate performs no network or storage access and never touches global
//! entropy; every operation that needs randomness takes an explicit
//! `Rng + CryptoRng`. Servers consume the serializable halves of these types;
//! plaintext and private keys exist only on the client side of the API.

pub mod account;
pub mod auth;
pub mod container;
pub mod crypto;
pub mod group;
pub mod invite;
pub mod marshal;
pub mod org;
pub mod vault;

pub use account::{Account, AccountId, UnlockedAccount};
pub use container::{Accessor, AccessorId, ActingAccessor, SharedContainer};
pub use group::{Group, GroupId};
pub use invite::{Invite, InviteId};
pub use org::{Org, OrgId, OrgMember};
pub use vault::{Vault, VaultId};
