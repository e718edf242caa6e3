//! SPIFFE identity authorization.
//!
//! Compiles the allow-rules from [`AuthorizerConfig`] once and evaluates the
//! `spiffe://` URI SANs of a verified peer leaf against them. A peer is
//! accepted as soon as any of its identities matches any rule.
//!
//! # Rule kinds
//!
//! | Kind | Semantics |
//! |------|-----------|
//! | exact | whole-string equality |
//! | prefix | plain string prefix |
//! | glob | `/`-segmented; `+` is one non-empty segment, a final `*` accepts any tail |
//!
//! Globs are narrow: no `**`, no wildcard inside a segment, and
//! a `*` anywhere but the last character makes the rule match nothing.

use rustls::pki_types::CertificateDer;
use tracing::{debug, warn};

use crate::config::AuthorizerConfig;
use crate::identity::{CertIdentity, is_spiffe_uri};
use crate::{Error, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Authorizer
// ─────────────────────────────────────────────────────────────────────────────

/// Stateless peer identity matcher.
#[derive(Debug, Clone, Default)]
pub struct Authorizer {
    exact: Vec<String>,
    prefixes: Vec<String>,
    globs: Vec<GlobRule>,
}

impl Authorizer {
    /// Compile the rules from configuration.
    #[must_use]
    pub fn from_config(config: &AuthorizerConfig) -> Self {
        Self::new(
            config.allowed_exact.clone(),
            config.allowed_prefixes.clone(),
            &config.allowed_globs,
        )
    }

    /// Compile explicit rule sets.
    #[must_use]
    pub fn new(exact: Vec<String>, prefixes: Vec<String>, globs: &[String]) -> Self {
        Self {
            exact,
            prefixes,
            globs: globs.iter().map(|g| GlobRule::new(g)).collect(),
        }
    }

    /// Returns `true` when no rule is configured; such an authorizer rejects
    /// every peer.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.prefixes.is_empty() && self.globs.is_empty()
    }

    /// Whether `id` is a SPIFFE URI accepted by some rule.
    #[must_use]
    pub fn is_allowed(&self, id: &str) -> bool {
        is_spiffe_uri(id) && self.matches(id)
    }

    /// Exact, then prefix, then glob rules.
    fn matches(&self, id: &str) -> bool {
        self.exact.iter().any(|exact| exact == id)
            || self.prefixes.iter().any(|prefix| id.starts_with(prefix.as_str()))
            || self.globs.iter().any(|glob| glob.matches(id))
    }

    /// Accept if any SPIFFE URI SAN of `identity` is allowed.
    ///
    /// # Errors
    ///
    /// `AuthorizationDenied` when no identity matches.
    pub fn authorize(&self, identity: &CertIdentity) -> Result<()> {
        if let Some(id) = identity.spiffe_ids().find(|id| self.matches(id)) {
            debug!(spiffe_id = id, "Peer authorized");
            return Ok(());
        }
        let presented: Vec<&str> = identity.spiffe_ids().collect();
        warn!(?presented, "Peer SPIFFE ID not allowed");
        Err(Error::AuthorizationDenied(
            "peer SPIFFE ID not allowed".to_string(),
        ))
    }

    /// Authorize a DER-encoded leaf certificate.
    ///
    /// # Errors
    ///
    /// `AuthorizationDenied` when the leaf cannot be parsed or no identity
    /// matches.
    pub fn authorize_leaf(&self, leaf: &CertificateDer<'_>) -> Result<()> {
        let identity = CertIdentity::from_der(leaf.as_ref())
            .map_err(|e| Error::AuthorizationDenied(format!("unreadable peer certificate: {e}")))?;
        self.authorize(&identity)
    }

    /// Peer-verification callback for a completed handshake.
    ///
    /// `raw_certs` is ignored; the leaf of the first already-verified chain
    /// is authorized. Signatures and validity are not re-checked.
    ///
    /// # Errors
    ///
    /// `AuthorizationDenied` if there is no verified chain or the leaf carries
    /// no allowed identity.
    pub fn verify_peer_certificate(
        &self,
        _raw_certs: &[CertificateDer<'_>],
        verified_chains: &[Vec<CertificateDer<'_>>],
    ) -> Result<()> {
        let leaf = verified_chains
            .first()
            .and_then(|chain| chain.first())
            .ok_or_else(|| Error::AuthorizationDenied("no verified chain".to_string()))?;
        self.authorize_leaf(leaf)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Glob rules
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    /// `+`
    One,
    Literal(String),
}

/// A compiled glob; malformed patterns compile to [`GlobRule::Never`].
#[derive(Debug, Clone, PartialEq, Eq)]
enum GlobRule {
    Never,
    Segments {
        segments: Vec<Segment>,
        /// Trailing `*`: extra value segments are accepted.
        open_tail: bool,
    },
}

impl GlobRule {
    fn new(pattern: &str) -> Self {
        if pattern.is_empty() {
            return Self::Never;
        }
        let stars = pattern.matches('*').count();
        let open_tail = pattern.ends_with('*');
        if stars > 1 || (stars == 1 && !open_tail) {
            return Self::Never;
        }

        let base = pattern.strip_suffix('*').unwrap_or(pattern);
        let mut parts: Vec<&str> = base.split('/').collect();
        if open_tail && parts.last() == Some(&"") {
            parts.pop();
        }

        let segments = parts
            .into_iter()
            .map(|p| match p {
                "+" => Segment::One,
                lit => Segment::Literal(lit.to_string()),
            })
            .collect();
        Self::Segments {
            segments,
            open_tail,
        }
    }

    fn matches(&self, value: &str) -> bool {
        let Self::Segments {
            segments,
            open_tail,
        } = self
        else {
            return false;
        };
        if value.is_empty() {
            return false;
        }

        let values: Vec<&str> = value.split('/').collect();
        let count_ok = if *open_tail {
            segments.len() <= values.len()
        } else {
            segments.len() == values.len()
        };

        count_ok
            && segments.iter().zip(&values).all(|(seg, val)| match seg {
                Segment::One => !val.is_empty(),
                Segment::Literal(lit) => lit == val,
            })
    }
}

/// Match `value` against a restricted glob `pattern`.
#[must_use]
pub fn match_glob(pattern: &str, value: &str) -> bool {
    GlobRule::new(pattern).matches(value)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
