//! Vault / `OpenBao` HTTP client for PKI issuance.
//!
//! Authenticates with a pre-provisioned token or an `AppRole` exchange and
//! calls `POST /v1/{mount}/issue/{role}`. On an auth-class failure with
//! `AppRole` credentials configured, the cached token is dropped, a fresh
//! login is performed, and the issue call is retried exactly once.

use std::fmt;
use std::time::Duration;

use parking_lot::RwLock;
use reqwest::{Client, Response};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::DEFAULT_AUTH_PATH;
use super::types::{IssueRequest, IssueResponse, LoginRequest, LoginResponse};
use crate::config::VaultConfig;
use crate::{Error, Result};

const TOKEN_HEADER: &str = "X-Vault-Token";
const NAMESPACE_HEADER: &str = "X-Vault-Namespace";

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// `AppRole` credential pair.
#[derive(Clone)]
struct AppRole {
    role_id: String,
    secret_id: String,
}

/// PKI backend client.
///
/// Safe to share across tasks; the cached token sits behind a read/write
/// lock (shared for attaching, exclusive for replacing).
pub struct VaultClient {
    http: Client,
    addr: String,
    namespace: Option<String>,
    auth_path: String,
    approle: Option<AppRole>,
    token: RwLock<Option<String>>,
}

impl VaultClient {
    /// Client for `addr` with the default timeout and no credentials.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(addr: impl Into<String>) -> Result<Self> {
        let http = Client::builder().timeout(DEFAULT_TIMEOUT).build()?;
        Ok(Self::with_http_client(addr, http))
    }

    /// Client reusing a caller-built `reqwest::Client`.
    pub fn with_http_client(addr: impl Into<String>, http: Client) -> Self {
        Self {
            http,
            addr: addr.into(),
            namespace: None,
            auth_path: DEFAULT_AUTH_PATH.to_string(),
            approle: None,
            token: RwLock::new(None),
        }
    }

    /// Build a client from the `vault` config section.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config(config: &VaultConfig) -> Result<Self> {
        let http = Client::builder().timeout(config.timeout).build()?;
        let mut client = Self::with_http_client(config.addr.clone(), http)
            .with_auth_path(config.auth_path.clone());
        if let Some(ns) = config.namespace.as_deref().filter(|ns| !ns.is_empty()) {
            client = client.with_namespace(ns);
        }
        if let Some(token) = config.resolved_token() {
            client = client.with_token(token);
        }
        if let Some((role_id, secret_id)) = config.resolved_approle() {
            client = client.with_approle(role_id, secret_id);
        }
        Ok(client)
    }

    /// Seed the token cache.
    #[must_use]
    pub fn with_token(self, token: impl Into<String>) -> Self {
        *self.token.write() = Some(token.into());
        self
    }

    /// Configure `AppRole` exchange credentials.
    #[must_use]
    pub fn with_approle(mut self, role_id: impl Into<String>, secret_id: impl Into<String>) -> Self {
        self.approle = Some(AppRole {
            role_id: role_id.into(),
            secret_id: secret_id.into(),
        });
        self
    }

    /// Send `X-Vault-Namespace` on every request.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Override the login path (default `auth/approle/login`).
    #[must_use]
    pub fn with_auth_path(mut self, auth_path: impl Into<String>) -> Self {
        let auth_path = auth_path.into();
        if !auth_path.is_empty() {
            self.auth_path = auth_path;
        }
        self
    }

    /// Whether a token is currently cached.
    #[must_use]
    pub fn has_token(&self) -> bool {
        self.token.read().is_some()
    }

    /// Request a certificate from `{pki_path}/issue/{role}`.
    ///
    /// At most two issue attempts are made: the second only after an
    /// auth-class failure and a successful re-login.
    ///
    /// # Errors
    ///
    /// `Config` for missing addr/mount/role, `AuthRequired` without usable
    /// credentials, `Backend` for non-2xx responses, `MalformedResponse` for
    /// undecodable bodies, `Http` for transport failures.
    pub async fn issue(&self, pki_path: &str, role: &str, req: &IssueRequest) -> Result<IssueResponse> {
        if self.addr.is_empty() {
            return Err(Error::Config("vault addr required".to_string()));
        }
        if pki_path.trim_matches('/').is_empty() {
            return Err(Error::Config("pki path required".to_string()));
        }
        if role.is_empty() {
            return Err(Error::Config("pki role required".to_string()));
        }

        self.ensure_token().await?;

        let endpoint = self.url(&format!("{}/issue/{role}", pki_path.trim_matches('/')));
        match self.post_json(&endpoint, req, true).await {
            Ok(resp) => decode_issue(resp).await,
            Err(e) if e.is_auth_failure() && self.approle.is_some() => {
                warn!(error = %e, "Vault rejected token, re-authenticating once");
                self.set_token(None);
                self.ensure_token().await?;
                let resp = self.post_json(&endpoint, req, true).await?;
                decode_issue(resp).await
            }
            Err(e) => Err(e),
        }
    }

    /// Log in via `AppRole` unless a token is already cached.
    async fn ensure_token(&self) -> Result<()> {
        if self.has_token() {
            return Ok(());
        }
        let Some(approle) = self.approle.as_ref() else {
            return Err(Error::AuthRequired);
        };

        let endpoint = self.url(&self.auth_path);
        let body = LoginRequest {
            role_id: &approle.role_id,
            secret_id: &approle.secret_id,
        };
        let resp = self.post_json(&endpoint, &body, false).await?;
        let bytes = resp.bytes().await?;
        let login: LoginResponse = serde_json::from_slice(&bytes)
            .map_err(|e| Error::MalformedResponse(format!("vault login response: {e}")))?;
        let token = login.into_token()?;

        self.set_token(Some(token));
        info!(auth_path = %self.auth_path, "Vault AppRole login succeeded");
        Ok(())
    }

    /// POST `body` as JSON. Non-2xx responses are drained and turned into
    /// [`Error::Backend`].
    async fn post_json<B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &B,
        require_auth: bool,
    ) -> Result<Response> {
        let mut req = self.http.post(endpoint).json(body);
        if let Some(ns) = &self.namespace {
            req = req.header(NAMESPACE_HEADER, ns);
        }
        if require_auth {
            let token = self.token.read().clone().ok_or(Error::AuthRequired)?;
            req = req.header(TOKEN_HEADER, token);
        }

        debug!(endpoint, require_auth, "Vault request");
        let resp = req.send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let body = resp.text().await.unwrap_or_default();
        Err(Error::backend(status.as_u16(), body))
    }

    fn set_token(&self, token: Option<String>) {
        *self.token.write() = token;
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/v1/{}",
            self.addr.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

async fn decode_issue(resp: Response) -> Result<IssueResponse> {
    let bytes = resp.bytes().await?;
    IssueResponse::from_body(&bytes)
}

impl fmt::Debug for VaultClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultClient")
            .field("addr", &self.addr)
            .field("namespace", &self.namespace)
            .field("auth_path", &self.auth_path)
            .field("approle", &self.approle.is_some())
            .field("has_token", &self.has_token())
            .finish_non_exhaustive()
    }
}
