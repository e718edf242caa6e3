//! In-process Vault PKI stand-in served by axum on an ephemeral port.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use parking_lot::Mutex;
use serde_json::{Value, json};

use super::{Leaf, TestCa};

/// Which CA fields the issue endpoint returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaMaterial {
    Chain,
    IssuingCaOnly,
    Neither,
}

/// One recorded issue call.
#[derive(Debug, Clone)]
pub struct IssueCall {
    pub path: String,
    pub token: Option<String>,
    pub namespace: Option<String>,
    pub body: Value,
}

struct Inner {
    ca_pem: String,
    leaf: Leaf,
    material: CaMaterial,
    accepted_tokens: Mutex<Vec<String>>,
    login_token: String,
    fail_issue: Option<(StatusCode, String)>,
    issue_calls: Mutex<Vec<IssueCall>>,
    logins: AtomicUsize,
}

/// Handle to a running mock.
#[derive(Clone)]
pub struct MockVault {
    pub addr: String,
    inner: Arc<Inner>,
}

/// Builder for [`MockVault`].
pub struct MockVaultBuilder {
    material: CaMaterial,
    accepted_tokens: Vec<String>,
    login_token: String,
    fail_issue: Option<(StatusCode, String)>,
}

impl MockVault {
    pub fn builder() -> MockVaultBuilder {
        MockVaultBuilder {
            material: CaMaterial::Chain,
            accepted_tokens: vec!["root-token".to_string()],
            login_token: "approle-token".to_string(),
            fail_issue: None,
        }
    }

    pub fn issue_calls(&self) -> Vec<IssueCall> {
        self.inner.issue_calls.lock().clone()
    }

    pub fn logins(&self) -> usize {
        self.inner.logins.load(Ordering::SeqCst)
    }

    pub fn ca_pem(&self) -> &str {
        &self.inner.ca_pem
    }
}

impl MockVaultBuilder {
    pub fn material(mut self, material: CaMaterial) -> Self {
        self.material = material;
        self
    }

    /// Tokens the issue endpoint accepts; the login token is always accepted.
    pub fn accepted_tokens(mut self, tokens: &[&str]) -> Self {
        self.accepted_tokens = tokens.iter().map(ToString::to_string).collect();
        self
    }

    /// Token returned by the `AppRole` login endpoint.
    pub fn login_token(mut self, token: &str) -> Self {
        self.login_token = token.to_string();
        self
    }

    /// Make every issue call fail with this status and body.
    pub fn fail_issue(mut self, status: StatusCode, body: &str) -> Self {
        self.fail_issue = Some((status, body.to_string()));
        self
    }

    pub async fn start(self) -> MockVault {
        let ca = TestCa::new("mock vault ca");
        let leaf = ca.leaf("service", "spiffe://corp/prod/stack/payments/service/api");
        let mut accepted = self.accepted_tokens;
        accepted.push(self.login_token.clone());

        let inner = Arc::new(Inner {
            ca_pem: ca.cert_pem.clone(),
            leaf,
            material: self.material,
            accepted_tokens: Mutex::new(accepted),
            login_token: self.login_token,
            fail_issue: self.fail_issue,
            issue_calls: Mutex::new(Vec::new()),
            logins: AtomicUsize::new(0),
        });

        let app = Router::new()
            .route("/v1/{*path}", post(handle))
            .with_state(Arc::clone(&inner));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        MockVault {
            addr: format!("http://{addr}"),
            inner,
        }
    }
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

async fn handle(
    State(inner): State<Arc<Inner>>,
    Path(path): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, String) {
    let body: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);

    if path.starts_with("auth/") && path.ends_with("/login") {
        inner.logins.fetch_add(1, Ordering::SeqCst);
        if body["role_id"] != "role" || body["secret_id"] != "secret" {
            return (
                StatusCode::BAD_REQUEST,
                json!({"errors": ["invalid role or secret ID"]}).to_string(),
            );
        }
        let resp = json!({"auth": {"client_token": inner.login_token, "lease_duration": 3600}});
        return (StatusCode::OK, resp.to_string());
    }

    if !path.contains("/issue/") {
        return (StatusCode::NOT_FOUND, json!({"errors": []}).to_string());
    }

    let token = header(&headers, "x-vault-token");
    inner.issue_calls.lock().push(IssueCall {
        path: path.clone(),
        token: token.clone(),
        namespace: header(&headers, "x-vault-namespace"),
        body,
    });

    let authorized = token.is_some_and(|t| inner.accepted_tokens.lock().contains(&t));
    if !authorized {
        return (
            StatusCode::FORBIDDEN,
            json!({"errors": ["1 error occurred:\n\t* permission denied\n\n"]}).to_string(),
        );
    }

    if let Some((status, body)) = &inner.fail_issue {
        return (*status, body.clone());
    }

    let mut data = json!({
        "certificate": inner.leaf.cert_pem,
        "private_key": inner.leaf.key_pem,
        "private_key_type": "ec",
        "serial_number": "1a:2b",
    });
    match inner.material {
        CaMaterial::Chain => data["ca_chain"] = json!([inner.ca_pem]),
        CaMaterial::IssuingCaOnly => data["issuing_ca"] = json!(inner.ca_pem),
        CaMaterial::Neither => {}
    }
    (StatusCode::OK, json!({"data": data}).to_string())
}
