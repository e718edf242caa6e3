//! [`Issuer`] backed by a Vault / `OpenBao` PKI secrets engine.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustls::RootCertStore;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::sign::CertifiedKey;
use tracing::debug;

use super::client::VaultClient;
use super::types::{IssueRequest, IssueResponse};
use crate::config::IssuerConfig;
use crate::identity::CertIdentity;
use crate::rotation::{Bundle, Issuer};
use crate::{Error, Result};

/// Issues leaf certificates from `{pki_path}/issue/{role}`.
#[derive(Debug, Clone)]
pub struct PkiIssuer {
    client: Arc<VaultClient>,
    pki_path: String,
    role: String,
    common_name: String,
    alt_names: Vec<String>,
    uri_sans: Vec<String>,
    ttl: Option<Duration>,
    require_ca: bool,
    provider: Arc<CryptoProvider>,
}

impl PkiIssuer {
    /// Issuer for `role` on the `pki_path` mount.
    pub fn new(client: Arc<VaultClient>, pki_path: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            client,
            pki_path: pki_path.into(),
            role: role.into(),
            common_name: String::new(),
            alt_names: Vec::new(),
            uri_sans: Vec::new(),
            ttl: None,
            require_ca: false,
            provider: Arc::new(rustls::crypto::aws_lc_rs::default_provider()),
        }
    }

    /// Issuer configured from the `issuer` config section.
    pub fn from_config(client: Arc<VaultClient>, config: &IssuerConfig) -> Self {
        let mut issuer = Self::new(client, config.pki_path.clone(), config.role.clone())
            .with_common_name(config.common_name.clone())
            .with_alt_names(config.alt_names.clone())
            .with_uri_sans(config.uri_sans.clone())
            .with_require_ca(config.require_ca);
        issuer.ttl = config.ttl;
        issuer
    }

    /// Subject common name of issued leaves.
    #[must_use]
    pub fn with_common_name(mut self, common_name: impl Into<String>) -> Self {
        self.common_name = common_name.into();
        self
    }

    /// DNS and IP subject alternative names.
    #[must_use]
    pub fn with_alt_names(mut self, alt_names: Vec<String>) -> Self {
        self.alt_names = alt_names;
        self
    }

    /// URI SANs, typically the SPIFFE ID.
    #[must_use]
    pub fn with_uri_sans(mut self, uri_sans: Vec<String>) -> Self {
        self.uri_sans = uri_sans;
        self
    }

    /// Requested lifetime. The backend may enforce a shorter one.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Fail issuance when the response carries neither `ca_chain` nor `issuing_ca`.
    #[must_use]
    pub fn with_require_ca(mut self, require_ca: bool) -> Self {
        self.require_ca = require_ca;
        self
    }

    /// Crypto provider used to load the private key.
    #[must_use]
    pub fn with_crypto_provider(mut self, provider: Arc<CryptoProvider>) -> Self {
        self.provider = provider;
        self
    }

    fn request(&self) -> IssueRequest {
        IssueRequest {
            common_name: self.common_name.clone(),
            alt_names: self.alt_names.clone(),
            uri_sans: self.uri_sans.clone(),
            ttl: self
                .ttl
                .filter(|ttl| !ttl.is_zero())
                .map(|ttl| format!("{}s", ttl.as_secs())),
        }
    }

    /// Turn a raw response into a bundle. Any unparsable PEM fails the whole
    /// attempt.
    fn build_bundle(&self, resp: &IssueResponse) -> Result<Bundle> {
        let chain = parse_certs(&resp.certificate, "certificate")?;
        let key = PrivateKeyDer::from_pem_slice(resp.private_key.as_bytes())
            .map_err(|e| Error::MalformedResponse(format!("vault private_key: {e}")))?;
        let leaf = CertIdentity::from_der(chain[0].as_ref())?;
        let certified_key = CertifiedKey::from_der(chain, key, &self.provider)
            .map_err(|e| Error::MalformedResponse(format!("vault private_key: {e}")))?;

        let trust_pool = self.trust_pool(resp)?;

        Ok(Bundle::new(Arc::new(certified_key), trust_pool, leaf.not_after))
    }

    /// Every `ca_chain` entry, or `issuing_ca` when the chain is empty.
    fn trust_pool(&self, resp: &IssueResponse) -> Result<RootCertStore> {
        let mut pool = RootCertStore::empty();
        if resp.ca_chain.is_empty() {
            if let Some(ca) = &resp.issuing_ca {
                add_pem(&mut pool, ca, "issuing_ca")?;
            } else if self.require_ca {
                return Err(Error::PolicyViolation(
                    "vault issue response missing ca_chain/issuing_ca".to_string(),
                ));
            }
        } else {
            for pem in &resp.ca_chain {
                add_pem(&mut pool, pem, "ca_chain")?;
            }
        }
        Ok(pool)
    }
}

#[async_trait]
impl Issuer for PkiIssuer {
    async fn issue(&self) -> Result<Bundle> {
        let resp = self
            .client
            .issue(&self.pki_path, &self.role, &self.request())
            .await?;
        let bundle = self.build_bundle(&resp)?;
        debug!(
            role = %self.role,
            not_after = %bundle.not_after(),
            trust_anchors = bundle.trust_pool().len(),
            "PKI issuance complete"
        );
        Ok(bundle)
    }
}

fn parse_certs(pem: &str, field: &str) -> Result<Vec<CertificateDer<'static>>> {
    let certs = CertificateDer::pem_slice_iter(pem.as_bytes())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::MalformedResponse(format!("vault {field}: {e}")))?;
    if certs.is_empty() {
        return Err(Error::MalformedResponse(format!(
            "vault {field} contained invalid PEM"
        )));
    }
    Ok(certs)
}

fn add_pem(pool: &mut RootCertStore, pem: &str, field: &str) -> Result<()> {
    for cert in parse_certs(pem, field)? {
        pool.add(cert)
            .map_err(|e| Error::MalformedResponse(format!("vault {field}: {e}")))?;
    }
    Ok(())
}
