//! spiffe-rotate Library
//!
//! In-process mTLS certificate rotation against a Vault / `OpenBao` PKI
//! backend, with SPIFFE identity authorization of peers.
//!
//! # Features
//!
//! - **Rotation Manager**: lock-free bundle swaps, renewal at two thirds of
//!   the leaf lifetime, fixed error backoff, time-bounded hooks
//! - **PKI Issuer**: token or `AppRole` auth, retry-once on auth failure,
//!   trust pool from `ca_chain` / `issuing_ca`
//! - **SPIFFE Authorizer**: exact, prefix and restricted-glob allow-rules
//! - **rustls wiring**: rotating resolvers and verifiers for both sides

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod identity;
pub mod rotation;
pub mod spiffe;
pub mod tls;
pub mod vault;

pub use error::{Error, Result};
pub use rotation::{Bundle, BundleInfo, Issuer, Manager, Options};
pub use spiffe::Authorizer;
pub use vault::{PkiIssuer, VaultClient};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    };

    installed.map_err(|e| Error::Config(format!("tracing: {e}")))
}
