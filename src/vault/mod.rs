//! Vault / `OpenBao` PKI backend.
//!
//! [`VaultClient`] speaks the HTTP API; [`PkiIssuer`] turns its responses
//! into rotation [`Bundle`](crate::rotation::Bundle)s.

pub mod client;
pub mod issuer;
pub mod types;

pub use client::VaultClient;
pub use issuer::PkiIssuer;
pub use types::{IssueRequest, IssueResponse};

/// Default `AppRole` login path, relative to `/v1/`.
pub const DEFAULT_AUTH_PATH: &str = "auth/approle/login";
