//! API error type and conversions from internal service errors.
//!
//! Every failing response carries a stable [`ErrorCode`] and a message.
//! `AuthenticationFailed` and `InsufficientPermissions` share one generic
//! message, so a response body never reveals whether an entity exists or a
//! password was merely wrong.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use lockbox_core::account::AccountError;
use lockbox_core::auth::AuthError;
use lockbox_core::container::ContainerError;
use lockbox_core::crypto::CryptoError;
use lockbox_core::invite::InviteError;
use lockbox_core::marshal::MarshalError;
use lockbox_core::org::OrgError;
use lockbox_types::api::{ErrorBody, ErrorCode};

/// The message shared by authentication and permission failures.
const DENIED_MESSAGE: &str = "request denied";

/// An API-level error: a stable code plus an HTTP status.
#[derive(Debug)]
pub(crate) struct ApiError {
    code: ErrorCode,
    message: String,
}

impl ApiError {
    /// Creates an error with the canonical message for its code.
    pub(crate) fn code(code: ErrorCode) -> Self {
        let message = match code {
            ErrorCode::AuthenticationFailed | ErrorCode::InsufficientPermissions => {
                DENIED_MESSAGE.to_owned()
            }
            ErrorCode::NotFound => "not found".to_owned(),
            ErrorCode::AlreadyExists => "already exists".to_owned(),
            ErrorCode::InvalidRequest => "invalid request".to_owned(),
            ErrorCode::VerificationRequired => "email verification required".to_owned(),
            ErrorCode::InviteExpired => "invite expired".to_owned(),
            ErrorCode::KeyMismatch => "public key mismatch".to_owned(),
            ErrorCode::DecryptionFailed => "decryption failed".to_owned(),
            ErrorCode::RateLimited => "too many attempts".to_owned(),
            ErrorCode::ServerError => "internal error".to_owned(),
        };
        Self { code, message }
    }

    /// Creates an `InvalidRequest` error with a specific message.
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::InvalidRequest,
            message: message.into(),
        }
    }

    fn status(&self) -> StatusCode {
        match self.code {
            ErrorCode::AuthenticationFailed => StatusCode::UNAUTHORIZED,
            ErrorCode::InsufficientPermissions | ErrorCode::VerificationRequired => {
                StatusCode::FORBIDDEN
            }
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::AlreadyExists | ErrorCode::KeyMismatch => StatusCode::CONFLICT,
            ErrorCode::InvalidRequest | ErrorCode::DecryptionFailed => StatusCode::BAD_REQUEST,
            ErrorCode::InviteExpired => StatusCode::GONE,
            ErrorCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::ServerError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            code: self.code,
            message: self.message,
        };
        (status, Json(body)).into_response()
    }
}

impl From<eyre::Report> for ApiError {
    fn from(err: eyre::Report) -> Self {
        tracing::error!("storage/backend error: {err:?}");
        Self::code(ErrorCode::ServerError)
    }
}

impl From<CryptoError> for ApiError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::DecryptionFailed | CryptoError::UnwrapFailed => {
                Self::code(ErrorCode::DecryptionFailed)
            }
            CryptoError::MalformedKey | CryptoError::UnsupportedParams(_) => {
                Self::code(ErrorCode::InvalidRequest)
            }
            other => {
                tracing::error!("crypto error: {other}");
                Self::code(ErrorCode::ServerError)
            }
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        // every handshake failure maps to the same uniform code
        tracing::debug!("authentication failure: {err}");
        Self::code(ErrorCode::AuthenticationFailed)
    }
}

impl From<ContainerError> for ApiError {
    fn from(err: ContainerError) -> Self {
        match err {
            ContainerError::MissingAccess(_) | ContainerError::Locked => {
                Self::code(ErrorCode::InsufficientPermissions)
            }
            ContainerError::KeyMismatch(_) => Self::code(ErrorCode::KeyMismatch),
            ContainerError::NoData => Self::code(ErrorCode::NotFound),
            ContainerError::Crypto(err) => err.into(),
        }
    }
}

impl From<AccountError> for ApiError {
    fn from(err: AccountError) -> Self {
        match err {
            AccountError::Crypto(err) => err.into(),
            AccountError::ForeignUnlock(_) => Self::code(ErrorCode::InvalidRequest),
        }
    }
}

impl From<InviteError> for ApiError {
    fn from(err: InviteError) -> Self {
        match err {
            InviteError::Expired => Self::code(ErrorCode::InviteExpired),
            InviteError::InvalidProof => Self::code(ErrorCode::AuthenticationFailed),
            InviteError::BadSignature | InviteError::EmailMismatch => {
                Self::code(ErrorCode::InvalidRequest)
            }
        }
    }
}

impl From<OrgError> for ApiError {
    fn from(err: OrgError) -> Self {
        match err {
            OrgError::InsufficientPermissions => Self::code(ErrorCode::InsufficientPermissions),
            OrgError::AlreadyMember(_) => Self::code(ErrorCode::AlreadyExists),
            OrgError::NotAMember(_) | OrgError::UnknownGroup(_) | OrgError::ForeignInvite(_) => {
                Self::code(ErrorCode::NotFound)
            }
            OrgError::Invite(err) => err.into(),
            OrgError::Container(err) => err.into(),
            OrgError::Group(err) => match err {
                lockbox_core::group::GroupError::Container(err) => err.into(),
                lockbox_core::group::GroupError::Crypto(err) => err.into(),
                _ => Self::code(ErrorCode::InvalidRequest),
            },
            OrgError::Marshal(_) => Self::code(ErrorCode::InvalidRequest),
            OrgError::Crypto(err) => err.into(),
        }
    }
}

impl From<MarshalError> for ApiError {
    fn from(_: MarshalError) -> Self {
        Self::code(ErrorCode::InvalidRequest)
    }
}
