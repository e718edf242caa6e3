//! Wire types for the PKI issue and `AppRole` login endpoints.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Body of `POST /v1/{mount}/issue/{role}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IssueRequest {
    /// Requested Common Name
    #[serde(skip_serializing_if = "String::is_empty")]
    pub common_name: String,
    /// Requested DNS SANs
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub alt_names: Vec<String>,
    /// Requested URI SANs
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub uri_sans: Vec<String>,
    /// Requested TTL as a duration string; absent means backend default
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,
}

/// Decoded issuance result. All PEM material is kept as returned.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct IssueResponse {
    /// PEM leaf certificate
    pub certificate: String,
    /// PEM private key
    pub private_key: String,
    /// PEM CA chain entries, one certificate (or bundle) per entry
    pub ca_chain: Vec<String>,
    /// PEM issuing CA; used only when `ca_chain` is empty
    pub issuing_ca: Option<String>,
}

impl std::fmt::Debug for IssueResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssueResponse")
            .field("certificate_len", &self.certificate.len())
            .field("private_key", &"<redacted>")
            .field("ca_chain_len", &self.ca_chain.len())
            .field("has_issuing_ca", &self.issuing_ca.is_some())
            .finish()
    }
}

impl IssueResponse {
    /// Decode the `{data: {...}}` envelope.
    ///
    /// # Errors
    ///
    /// `MalformedResponse` if the body is not JSON or lacks the certificate
    /// or private key.
    pub fn from_body(body: &[u8]) -> Result<Self> {
        let envelope: IssueEnvelope = serde_json::from_slice(body)
            .map_err(|e| Error::MalformedResponse(format!("vault issue response: {e}")))?;
        let data = envelope.data;
        if data.certificate.is_empty() || data.private_key.is_empty() {
            return Err(Error::MalformedResponse(
                "vault issue response missing certificate/private_key".to_string(),
            ));
        }
        Ok(Self {
            certificate: data.certificate,
            private_key: data.private_key,
            ca_chain: data.ca_chain.unwrap_or_default(),
            issuing_ca: data.issuing_ca.filter(|ca| !ca.is_empty()),
        })
    }
}

#[derive(Debug, Deserialize)]
struct IssueEnvelope {
    data: IssueData,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct IssueData {
    certificate: String,
    private_key: String,
    issuing_ca: Option<String>,
    ca_chain: Option<Vec<String>>,
}

/// Body of `POST /v1/auth/approle/login`.
#[derive(Serialize)]
pub(crate) struct LoginRequest<'a> {
    pub role_id: &'a str,
    pub secret_id: &'a str,
}

/// Response of the login endpoint.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct LoginResponse {
    pub auth: Option<LoginAuth>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct LoginAuth {
    pub client_token: String,
}

impl LoginResponse {
    /// Extract the client token; an empty token is a failure.
    pub(crate) fn into_token(self) -> Result<String> {
        self.auth
            .map(|a| a.client_token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                Error::MalformedResponse("vault approle auth returned empty token".to_string())
            })
    }
}
