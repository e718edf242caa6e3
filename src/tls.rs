//! rustls wiring for the rotating bundle.
//!
//! [`CertResolver`] presents whatever leaf the [`Manager`] holds at handshake
//! time. The two verifiers check the peer chain against the *current*
//! bundle's trust pool (plus optional extra roots) and then hand the verified
//! leaf to the [`Authorizer`]. Because every handshake reads the live bundle,
//! neither side needs a restart when the CA material rotates.

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::{ResolvesClientCert, WebPkiServerVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::server::{ClientHello, ResolvesServerCert, WebPkiClientVerifier};
use rustls::sign::CertifiedKey;
use rustls::{
    CertificateError, ClientConfig, DigitallySignedStruct, DistinguishedName, RootCertStore,
    ServerConfig, SignatureScheme,
};
use tracing::{debug, warn};

use crate::Result;
use crate::rotation::Manager;
use crate::spiffe::Authorizer;

/// ALPN protocols advertised by both config builders.
pub const ALPN_PROTOCOLS: [&[u8]; 2] = [b"h2", b"http/1.1"];

// ─────────────────────────────────────────────────────────────────────────────
// Certificate resolution
// ─────────────────────────────────────────────────────────────────────────────

/// Serves the manager's current leaf on both sides of a handshake.
///
/// Before the first issuance it resolves to nothing and the handshake fails.
#[derive(Debug, Clone)]
pub struct CertResolver {
    manager: Arc<Manager>,
}

impl CertResolver {
    /// Resolve certificates from `manager`.
    #[must_use]
    pub fn new(manager: Arc<Manager>) -> Self {
        Self { manager }
    }
}

impl ResolvesServerCert for CertResolver {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        self.manager
            .server_certificate()
            .inspect_err(|e| warn!(error = %e, "No server certificate to present"))
            .ok()
    }
}

impl ResolvesClientCert for CertResolver {
    fn resolve(
        &self,
        _root_hint_subjects: &[&[u8]],
        _sigschemes: &[SignatureScheme],
    ) -> Option<Arc<CertifiedKey>> {
        self.manager
            .client_certificate()
            .inspect_err(|e| warn!(error = %e, "No client certificate to present"))
            .ok()
    }

    fn has_certs(&self) -> bool {
        true
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Peer verification
// ─────────────────────────────────────────────────────────────────────────────

/// State shared by both verifiers.
#[derive(Debug)]
struct PeerPolicy {
    manager: Arc<Manager>,
    authorizer: Arc<Authorizer>,
    extra_roots: Arc<RootCertStore>,
    provider: Arc<CryptoProvider>,
}

impl PeerPolicy {
    /// Current bundle's trust pool merged with the extra roots.
    fn roots(&self) -> Arc<RootCertStore> {
        let mut store = RootCertStore::empty();
        if let Ok(bundle) = self.manager.current() {
            store.roots.extend(bundle.trust_pool().roots.iter().cloned());
        }
        store.roots.extend(self.extra_roots.roots.iter().cloned());
        Arc::new(store)
    }

    fn authorize(&self, end_entity: &CertificateDer<'_>) -> std::result::Result<(), rustls::Error> {
        self.authorizer.authorize_leaf(end_entity).map_err(|e| {
            debug!(error = %e, "Rejecting peer");
            rustls::Error::InvalidCertificate(CertificateError::ApplicationVerificationFailure)
        })
    }

    fn tls12(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn tls13(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

fn builder_error(e: impl std::fmt::Display) -> rustls::Error {
    warn!(error = %e, "Cannot build peer verifier from current trust pool");
    rustls::Error::General(format!("peer verifier unavailable: {e}"))
}

/// Server-side verifier for client certificates.
#[derive(Debug)]
pub struct RotatingClientVerifier {
    policy: PeerPolicy,
}

impl RotatingClientVerifier {
    /// Verify clients against the live trust pool plus `extra_roots`.
    #[must_use]
    pub fn new(
        manager: Arc<Manager>,
        authorizer: Arc<Authorizer>,
        extra_roots: RootCertStore,
        provider: Arc<CryptoProvider>,
    ) -> Self {
        Self {
            policy: PeerPolicy {
                manager,
                authorizer,
                extra_roots: Arc::new(extra_roots),
                provider,
            },
        }
    }
}

impl ClientCertVerifier for RotatingClientVerifier {
    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> std::result::Result<ClientCertVerified, rustls::Error> {
        let inner = WebPkiClientVerifier::builder_with_provider(
            self.policy.roots(),
            Arc::clone(&self.policy.provider),
        )
        .build()
        .map_err(builder_error)?;

        let verified = inner.verify_client_cert(end_entity, intermediates, now)?;
        self.policy.authorize(end_entity)?;
        Ok(verified)
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.policy.tls12(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.policy.tls13(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.policy.schemes()
    }
}

/// Client-side verifier for server certificates.
#[derive(Debug)]
pub struct RotatingServerVerifier {
    policy: PeerPolicy,
}

impl RotatingServerVerifier {
    /// Verify servers against the live trust pool plus `extra_roots`.
    #[must_use]
    pub fn new(
        manager: Arc<Manager>,
        authorizer: Arc<Authorizer>,
        extra_roots: RootCertStore,
        provider: Arc<CryptoProvider>,
    ) -> Self {
        Self {
            policy: PeerPolicy {
                manager,
                authorizer,
                extra_roots: Arc::new(extra_roots),
                provider,
            },
        }
    }
}

impl ServerCertVerifier for RotatingServerVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        let inner = WebPkiServerVerifier::builder_with_provider(
            self.policy.roots(),
            Arc::clone(&self.policy.provider),
        )
        .build()
        .map_err(builder_error)?;

        let verified =
            inner.verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)?;
        self.policy.authorize(end_entity)?;
        Ok(verified)
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.policy.tls12(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.policy.tls13(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.policy.schemes()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Config builders
// ─────────────────────────────────────────────────────────────────────────────

fn default_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::aws_lc_rs::default_provider())
}

fn alpn() -> Vec<Vec<u8>> {
    ALPN_PROTOCOLS.iter().map(|p| p.to_vec()).collect()
}

/// mTLS server config: presents the rotating leaf, requires and authorizes
/// client certificates.
///
/// # Errors
///
/// Returns `Error::Tls` if the provider does not support the default
/// protocol versions.
pub fn server_config(
    manager: Arc<Manager>,
    authorizer: Arc<Authorizer>,
    extra_roots: RootCertStore,
) -> Result<ServerConfig> {
    let provider = default_provider();
    let verifier = RotatingClientVerifier::new(
        Arc::clone(&manager),
        authorizer,
        extra_roots,
        Arc::clone(&provider),
    );

    let mut config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_client_cert_verifier(Arc::new(verifier))
        .with_cert_resolver(Arc::new(CertResolver::new(manager)));
    config.alpn_protocols = alpn();
    Ok(config)
}

/// mTLS client config: presents the rotating leaf, verifies and authorizes
/// the server.
///
/// # Errors
///
/// Returns `Error::Tls` if the provider does not support the default
/// protocol versions.
pub fn client_config(
    manager: Arc<Manager>,
    authorizer: Arc<Authorizer>,
    extra_roots: RootCertStore,
) -> Result<ClientConfig> {
    let provider = default_provider();
    let verifier = RotatingServerVerifier::new(
        Arc::clone(&manager),
        authorizer,
        extra_roots,
        Arc::clone(&provider),
    );

    let mut config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_client_cert_resolver(Arc::new(CertResolver::new(manager)));
    config.alpn_protocols = alpn();
    Ok(config)
}
