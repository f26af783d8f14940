//! API types shared between the lockbox service and its clients.
//!
//! The error codes defined here are part of the external contract and never
//! change meaning between versions; the request/response payloads live in
//! versioned submodules (see [`v1`]).

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod v1;

/// Stable error codes of the external contract.
///
/// Codes serialize as fixed strings. `AuthenticationFailed` and
/// `InsufficientPermissions` are deliberately indistinguishable in message
/// shape so responses leak nothing about account or entity existence beyond
/// the code itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// The session or login proof did not verify.
    AuthenticationFailed,
    /// The caller is authenticated but not allowed to perform the operation.
    InsufficientPermissions,
    /// The entity does not exist.
    NotFound,
    /// An entity with this identity already exists.
    AlreadyExists,
    /// The request is malformed or inconsistent.
    InvalidRequest,
    /// The operation requires a verified email token.
    VerificationRequired,
    /// The invite expired or was already used.
    InviteExpired,
    /// A stored public-key fingerprint did not match the presented key.
    KeyMismatch,
    /// Authenticated decryption failed; the payload was tampered with.
    DecryptionFailed,
    /// Too many failed attempts; retry later.
    RateLimited,
    /// An internal error occurred.
    ServerError,
}

impl ErrorCode {
    /// The stable string form of the code.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::AuthenticationFailed => "AuthenticationFailed",
            ErrorCode::InsufficientPermissions => "InsufficientPermissions",
            ErrorCode::NotFound => "NotFound",
            ErrorCode::AlreadyExists => "AlreadyExists",
            ErrorCode::InvalidRequest => "InvalidRequest",
            ErrorCode::VerificationRequired => "VerificationRequired",
            ErrorCode::InviteExpired => "InviteExpired",
            ErrorCode::KeyMismatch => "KeyMismatch",
            ErrorCode::DecryptionFailed => "DecryptionFailed",
            ErrorCode::RateLimited => "RateLimited",
            ErrorCode::ServerError => "ServerError",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The error body every failing response carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// The stable error code.
    pub code: ErrorCode,
    /// A human-readable message. Not part of the stable contract.
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_serialize_to_their_stable_strings() {
        for (code, expected) in [
            (ErrorCode::AuthenticationFailed, "\"AuthenticationFailed\""),
            (ErrorCode::InviteExpired, "\"InviteExpired\""),
            (ErrorCode::KeyMismatch, "\"KeyMismatch\""),
        ] {
            assert_eq!(serde_json::to_string(&code).unwrap(), expected);
            assert_eq!(format!("\"{code}\""), expected);
        }
    }
}
