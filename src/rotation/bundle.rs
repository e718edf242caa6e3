//! The active certificate bundle and its read-only projection.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rustls::RootCertStore;
use rustls::sign::CertifiedKey;
use serde::Serialize;

use crate::identity::CertIdentity;

/// Immutable snapshot of a leaf certificate + key, its trust pool and expiry.
///
/// Fields are private so a stored bundle can never be mutated in place;
/// rotation always swaps in a whole new `Arc<Bundle>`.
#[derive(Clone)]
pub struct Bundle {
    certified_key: Arc<CertifiedKey>,
    trust_pool: Arc<RootCertStore>,
    not_after: DateTime<Utc>,
}

impl Bundle {
    /// Assemble a bundle.
    ///
    /// `not_after` must come from the leaf certificate itself, never from
    /// requested parameters.
    #[must_use]
    pub fn new(
        certified_key: Arc<CertifiedKey>,
        trust_pool: RootCertStore,
        not_after: DateTime<Utc>,
    ) -> Self {
        Self {
            certified_key,
            trust_pool: Arc::new(trust_pool),
            not_after,
        }
    }

    /// Leaf certificate chain and signing key, ready for rustls.
    #[must_use]
    pub fn certified_key(&self) -> Arc<CertifiedKey> {
        Arc::clone(&self.certified_key)
    }

    /// Trust anchors returned alongside the leaf. May be empty.
    #[must_use]
    pub fn trust_pool(&self) -> Arc<RootCertStore> {
        Arc::clone(&self.trust_pool)
    }

    /// Leaf expiry.
    #[must_use]
    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    /// Compute the hook-facing view of this bundle.
    ///
    /// If the leaf cannot be parsed only `not_after` is populated.
    #[must_use]
    pub fn info(&self) -> BundleInfo {
        let mut info = BundleInfo {
            not_after: self.not_after,
            ..BundleInfo::default()
        };
        let Some(leaf) = self.certified_key.cert.first() else {
            return info;
        };
        if let Ok(id) = CertIdentity::from_der(leaf.as_ref()) {
            info.common_name = id.common_name.unwrap_or_default();
            info.serial_number = id.serial_number;
            info.dns_names = id.san_dns_names;
            info.uris = id.san_uris;
        }
        info
    }
}

impl fmt::Debug for Bundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bundle")
            .field("chain_len", &self.certified_key.cert.len())
            .field("trust_anchors", &self.trust_pool.len())
            .field("not_after", &self.not_after)
            .finish_non_exhaustive()
    }
}

/// Read-only view of a bundle handed to rotate hooks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BundleInfo {
    /// Leaf expiry.
    pub not_after: DateTime<Utc>,
    /// Leaf Common Name (empty when absent).
    pub common_name: String,
    /// Leaf serial number in decimal.
    pub serial_number: String,
    /// DNS SANs.
    pub dns_names: Vec<String>,
    /// URI SANs.
    pub uris: Vec<String>,
}
