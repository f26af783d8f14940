#![deny(missing_docs)]
//! Shared type definitions for the lockbox service and client.
//!
//! This crate groups the values that cross the HTTP API: session
//! identifiers, versioned request/response payloads, and the stable error
//! codes of the external contract. The cryptographic entities themselves
//! (accounts, containers, orgs, invites) come from `lockbox-core`; this crate
//! only adds the wire-level framing around them.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod api;

/// Unique id of an authenticated session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
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

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.to_string())
    }
}

impl std::str::FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}
