//! Certificate identity extraction.
//!
//! Parses an X.509 DER-encoded certificate and extracts the fields the rest of
//! the crate cares about: Common Name, serial number, SAN DNS names, SAN URIs
//! and the `notAfter` validity bound.

use chrono::{DateTime, Utc};
use x509_parser::certificate::X509Certificate;
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::FromDer;

use crate::{Error, Result};

/// URI scheme used for workload identities.
pub const SPIFFE_SCHEME: &str = "spiffe";

// ─────────────────────────────────────────────────────────────────────────────
// Certificate identity
// ─────────────────────────────────────────────────────────────────────────────

/// Identity fields extracted from a certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertIdentity {
    /// Certificate Common Name (CN).
    pub common_name: Option<String>,

    /// Serial number in decimal.
    pub serial_number: String,

    /// SAN DNS entries.
    pub san_dns_names: Vec<String>,

    /// SAN URI entries, e.g. SPIFFE IDs.
    pub san_uris: Vec<String>,

    /// End of the validity period.
    pub not_after: DateTime<Utc>,
}

impl CertIdentity {
    /// Parse a DER-encoded certificate and extract its identity fields.
    ///
    /// # Errors
    ///
    /// Returns `Error::MalformedResponse` if the certificate cannot be parsed
    /// or its `notAfter` is outside the representable range.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| Error::MalformedResponse(format!("Failed to parse certificate: {e}")))?;

        let not_after = not_after(&cert)?;
        let (san_uris, san_dns_names) = extract_sans(&cert);

        Ok(Self {
            common_name: extract_cn(&cert),
            serial_number: cert.serial.to_string(),
            san_dns_names,
            san_uris,
            not_after,
        })
    }

    /// URI SANs using the `spiffe` scheme, in certificate order.
    pub fn spiffe_ids(&self) -> impl Iterator<Item = &str> {
        self.san_uris
            .iter()
            .map(String::as_str)
            .filter(|uri| is_spiffe_uri(uri))
    }
}

/// Returns `true` when `uri` parses as a URI with the `spiffe` scheme.
#[must_use]
pub fn is_spiffe_uri(uri: &str) -> bool {
    url::Url::parse(uri).is_ok_and(|u| u.scheme() == SPIFFE_SCHEME)
}

// ─────────────────────────────────────────────────────────────────────────────
// Extraction helpers
// ─────────────────────────────────────────────────────────────────────────────

fn extract_cn(cert: &X509Certificate<'_>) -> Option<String> {
    cert.subject()
        .iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .map(str::to_owned)
}

/// Extract SAN URI and SAN DNS entries from the certificate extensions.
fn extract_sans(cert: &X509Certificate<'_>) -> (Vec<String>, Vec<String>) {
    let mut uris = Vec::new();
    let mut dns_names = Vec::new();

    if let Ok(Some(san_ext)) = cert.subject_alternative_name() {
        for name in &san_ext.value.general_names {
            match name {
                GeneralName::URI(uri) => uris.push((*uri).to_owned()),
                GeneralName::DNSName(dns) => dns_names.push((*dns).to_owned()),
                _ => {}
            }
        }
    }

    (uris, dns_names)
}

fn not_after(cert: &X509Certificate<'_>) -> Result<DateTime<Utc>> {
    let ts = cert.validity().not_after.timestamp();
    DateTime::from_timestamp(ts, 0)
        .ok_or_else(|| Error::MalformedResponse(format!("certificate notAfter out of range: {ts}")))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
