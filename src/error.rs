//! Error types for spiffe-rotate

use std::io;

use thiserror::Error;

/// Result type alias for spiffe-rotate
pub type Result<T> = std::result::Result<T, Error>;

/// spiffe-rotate errors
#[derive(Error, Debug)]
pub enum Error {
    /// No bundle has been issued yet
    #[error("cert bundle not ready")]
    NotReady,

    /// Neither a token nor AppRole credentials are available
    #[error("vault auth required")]
    AuthRequired,

    /// Non-2xx response from the PKI backend
    #[error("vault http {status}: {message}")]
    Backend {
        /// HTTP status code
        status: u16,
        /// Trimmed response body
        message: String,
    },

    /// Response was missing fields or carried unparsable PEM/DER
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Issuance succeeded but violates local policy (e.g. `require_ca`)
    #[error("Policy violation: {0}")]
    PolicyViolation(String),

    /// Peer identity is not allowed
    #[error("Authorization denied: {0}")]
    AuthorizationDenied(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// TLS error
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),
}

impl Error {
    /// Create a backend error from a status code and raw response body.
    pub fn backend(status: u16, body: impl AsRef<str>) -> Self {
        Self::Backend {
            status,
            message: body.as_ref().trim().to_string(),
        }
    }

    /// Whether this error means the backend rejected our credentials.
    ///
    /// HTTP 401/403 and a backend-reported "permission denied" both count.
    #[must_use]
    pub fn is_auth_failure(&self) -> bool {
        match self {
            Self::Backend { status, message } => {
                matches!(status, 401 | 403)
                    || message.to_ascii_lowercase().contains("permission denied")
            }
            _ => false,
        }
    }

    /// Whether this is the "never issued" condition.
    #[must_use]
    pub fn is_not_ready(&self) -> bool {
        matches!(self, Self::NotReady)
    }
}
