//! Shared fixtures: a throwaway CA, leaf minting and canned issuers.

#![allow(dead_code)]

pub mod mock_vault;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use rcgen::{
    BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa,
    Issuer as CaIssuer, KeyPair, KeyUsagePurpose, SanType, string::Ia5String,
};
use rustls::RootCertStore;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::sign::CertifiedKey;
use spiffe_rotate::identity::CertIdentity;
use spiffe_rotate::{Bundle, Error, Issuer, Result};

/// PEM leaf plus key.
pub struct Leaf {
    pub cert_pem: String,
    pub key_pem: String,
}

/// Self-signed test CA.
pub struct TestCa {
    issuer: CaIssuer<'static, KeyPair>,
    pub cert_pem: String,
    pub cert_der: CertificateDer<'static>,
}

impl TestCa {
    pub fn new(cn: &str) -> Self {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params.distinguished_name.push(DnType::CommonName, cn);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let cert = params.self_signed(&key).unwrap();
        Self {
            cert_pem: cert.pem(),
            cert_der: cert.der().clone(),
            issuer: CaIssuer::new(params, key),
        }
    }

    /// Leaf for `localhost` carrying `spiffe_id`, valid for client and server auth.
    pub fn leaf(&self, cn: &str, spiffe_id: &str) -> Leaf {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(vec!["localhost".to_string()]).unwrap();
        params.distinguished_name.push(DnType::CommonName, cn);
        params
            .subject_alt_names
            .push(SanType::URI(Ia5String::try_from(spiffe_id).unwrap()));
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::ClientAuth,
        ];
        let cert = params.signed_by(&key, &self.issuer).unwrap();
        Leaf {
            cert_pem: cert.pem(),
            key_pem: key.serialize_pem(),
        }
    }

    /// Trust store holding only this CA.
    pub fn roots(&self) -> RootCertStore {
        let mut roots = RootCertStore::empty();
        roots.add(self.cert_der.clone()).unwrap();
        roots
    }

    /// Ready-to-serve bundle for a fresh leaf, trusting this CA.
    pub fn bundle(&self, cn: &str, spiffe_id: &str) -> Bundle {
        let leaf = self.leaf(cn, spiffe_id);
        let chain: Vec<CertificateDer<'static>> =
            CertificateDer::pem_slice_iter(leaf.cert_pem.as_bytes())
                .collect::<std::result::Result<_, _>>()
                .unwrap();
        let key = PrivateKeyDer::from_pem_slice(leaf.key_pem.as_bytes()).unwrap();
        let not_after = CertIdentity::from_der(chain[0].as_ref()).unwrap().not_after;
        let provider = rustls::crypto::aws_lc_rs::default_provider();
        let certified = CertifiedKey::from_der(chain, key, &provider).unwrap();
        Bundle::new(Arc::new(certified), self.roots(), not_after)
    }
}

/// Issuer returning scripted outcomes in order; the last one repeats.
pub struct ScriptedIssuer {
    script: Vec<Option<Bundle>>,
    pub calls: AtomicUsize,
}

impl ScriptedIssuer {
    /// `Some` entries succeed, `None` entries fail with a 503.
    pub fn new(script: Vec<Option<Bundle>>) -> Arc<Self> {
        assert!(!script.is_empty());
        Arc::new(Self {
            script,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Issuer for ScriptedIssuer {
    async fn issue(&self) -> Result<Bundle> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let step = &self.script[n.min(self.script.len() - 1)];
        step.clone().ok_or_else(|| Error::backend(503, "Vault is sealed"))
    }
}
