//! API module for the lockbox service.
//!
//! This module defines all HTTP endpoints the service serves and organizes
//! them into submodules:
//!
//! - [`errors`] – Defines API error types and conversions from internal
//!   service errors.
//! - [`health`] – Health and version endpoints (`/health`, `/version`).
//! - [`v1`] – The versioned API surface under `/api/v1`.

pub(crate) mod errors;
pub(crate) mod health;
pub(crate) mod v1;
