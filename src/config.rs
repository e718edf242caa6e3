//! Configuration management

use std::{env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Conventional Vault variables merged into the `vault` section.
const VAULT_ENV_VARS: [&str; 5] = [
    "VAULT_ADDR",
    "VAULT_TOKEN",
    "VAULT_NAMESPACE",
    "VAULT_ROLE_ID",
    "VAULT_SECRET_ID",
];

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before resolving `env:` credentials.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// Logging
    pub log: LogConfig,
    /// Rotation loop tuning
    pub rotation: RotationConfig,
    /// PKI backend connection and credentials
    pub vault: VaultConfig,
    /// What to request from the PKI backend
    pub issuer: IssuerConfig,
    /// Peer identity allow-rules
    pub authorizer: AuthorizerConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (text, json)
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

/// Rotation loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationConfig {
    /// Floor for the wait between successful refreshes
    #[serde(with = "humantime_serde")]
    pub min_refresh: Duration,
    /// Fixed wait after a failed issuance
    #[serde(with = "humantime_serde")]
    pub error_backoff: Duration,
    /// Time budget per hook invocation
    #[serde(with = "humantime_serde")]
    pub hook_timeout: Duration,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            min_refresh: Duration::from_secs(30),
            error_backoff: Duration::from_secs(15),
            hook_timeout: Duration::from_secs(2),
        }
    }
}

/// Vault / `OpenBao` connection configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Base address, e.g. `https://vault.internal:8200`
    pub addr: String,
    /// Enterprise namespace sent as `X-Vault-Namespace`
    pub namespace: Option<String>,
    /// Pre-provisioned token. Supports `env:VAR_NAME`.
    pub token: Option<String>,
    /// `AppRole` role ID. Supports `env:VAR_NAME`.
    pub role_id: Option<String>,
    /// `AppRole` secret ID. Supports `env:VAR_NAME`.
    pub secret_id: Option<String>,
    /// Login path relative to `/v1/`
    pub auth_path: String,
    /// Per-request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            addr: String::new(),
            namespace: None,
            token: None,
            role_id: None,
            secret_id: None,
            auth_path: crate::vault::DEFAULT_AUTH_PATH.to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

impl std::fmt::Debug for VaultConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultConfig")
            .field("addr", &self.addr)
            .field("namespace", &self.namespace)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("role_id", &self.role_id)
            .field("secret_id", &self.secret_id.as_ref().map(|_| "<redacted>"))
            .field("auth_path", &self.auth_path)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl VaultConfig {
    /// Token with `env:` indirection resolved. Empty values count as unset.
    #[must_use]
    pub fn resolved_token(&self) -> Option<String> {
        resolve_secret(self.token.as_deref())
    }

    /// `AppRole` credentials, if both halves are set.
    #[must_use]
    pub fn resolved_approle(&self) -> Option<(String, String)> {
        let role_id = resolve_secret(self.role_id.as_deref())?;
        let secret_id = resolve_secret(self.secret_id.as_deref())?;
        Some((role_id, secret_id))
    }
}

/// What to request from the PKI backend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IssuerConfig {
    /// PKI secrets engine mount path
    pub pki_path: String,
    /// PKI role name
    pub role: String,
    /// Requested Common Name
    pub common_name: String,
    /// Requested DNS SANs
    pub alt_names: Vec<String>,
    /// Requested URI SANs (SPIFFE IDs)
    pub uri_sans: Vec<String>,
    /// Requested TTL; unset means backend default
    #[serde(with = "humantime_serde::option")]
    pub ttl: Option<Duration>,
    /// Fail issuance when the backend returns no CA material
    pub require_ca: bool,
}

impl Default for IssuerConfig {
    fn default() -> Self {
        Self {
            pki_path: "pki".to_string(),
            role: String::new(),
            common_name: String::new(),
            alt_names: Vec::new(),
            uri_sans: Vec::new(),
            ttl: None,
            require_ca: false,
        }
    }
}

/// Peer identity allow-rules
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AuthorizerConfig {
    /// Whole-string matches
    pub allowed_exact: Vec<String>,
    /// Plain string prefixes
    pub allowed_prefixes: Vec<String>,
    /// `+` / trailing `*` segment globs
    pub allowed_globs: Vec<String>,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // VAULT_ADDR -> vault.addr, VAULT_ROLE_ID -> vault.role_id, ...
        figment = figment.merge(Env::raw().only(&VAULT_ENV_VARS).map(|key| {
            let key = key.as_str().to_ascii_lowercase();
            key.replacen("vault_", "vault.", 1).into()
        }));

        figment = figment.merge(Env::prefixed("SPIFFE_ROTATE_").split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.load_env_files();

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => {
                        tracing::info!("Loaded env file: {expanded}");
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load env file {expanded}: {e}");
                    }
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }
}

/// Resolve `env:VAR_NAME` indirection; empty results count as unset.
fn resolve_secret(value: Option<&str>) -> Option<String> {
    let value = value?;
    let resolved = match value.strip_prefix("env:") {
        Some(var_name) => env::var(var_name).ok()?,
        None => value.to_string(),
    };
    (!resolved.is_empty()).then_some(resolved)
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_duration(*duration))
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "6h", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    /// Render as whole seconds, or milliseconds when sub-second precision matters.
    #[must_use]
    pub fn format_duration(duration: Duration) -> String {
        if duration.subsec_millis() == 0 {
            format!("{}s", duration.as_secs())
        } else {
            format!("{}ms", duration.as_millis())
        }
    }

    /// Parse "100ms", "30s", "5m", "6h" or a bare number of seconds.
    ///
    /// # Errors
    ///
    /// Returns a message for malformed input or a value that overflows.
    pub fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        if let Some(ms) = s.strip_suffix("ms") {
            return ms
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| format!("invalid duration {s:?}: {e}"));
        }
        let (digits, scale) = if let Some(secs) = s.strip_suffix('s') {
            (secs, 1)
        } else if let Some(mins) = s.strip_suffix('m') {
            (mins, 60)
        } else if let Some(hours) = s.strip_suffix('h') {
            (hours, 3600)
        } else {
            (s, 1)
        };
        let value = digits
            .parse::<u64>()
            .map_err(|e| format!("invalid duration {s:?}: {e}"))?;
        value
            .checked_mul(scale)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("duration {s:?} is out of range"))
    }

    /// Same format for `Option<Duration>`; `None` is omitted / null.
    pub mod option {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer};

        /// Serialize an optional duration.
        ///
        /// # Errors
        ///
        /// Returns a serialization error if the serializer fails.
        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match duration {
                Some(d) => serializer.serialize_some(&super::format_duration(*d)),
                None => serializer.serialize_none(),
            }
        }

        /// Deserialize an optional duration.
        ///
        /// # Errors
        ///
        /// Returns a deserialization error if the string cannot be parsed as a duration.
        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Option::<String>::deserialize(deserializer)?
                .map(|s| super::parse_duration(&s).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_rotation_constants() {
        let cfg = Config::default();
        assert_eq!(cfg.rotation.min_refresh, Duration::from_secs(30));
        assert_eq!(cfg.rotation.error_backoff, Duration::from_secs(15));
        assert_eq!(cfg.rotation.hook_timeout, Duration::from_secs(2));
        assert_eq!(cfg.vault.auth_path, "auth/approle/login");
        assert_eq!(cfg.vault.timeout, Duration::from_secs(10));
        assert_eq!(cfg.issuer.pki_path, "pki");
        assert!(cfg.issuer.ttl.is_none());
        assert!(!cfg.issuer.require_ca);
    }

    #[test]
    fn full_config_deserialises_from_yaml() {
        let yaml = r#"
rotation:
  min_refresh: 45s
  error_backoff: 500ms
  hook_timeout: 1s
vault:
  addr: "https://vault.internal:8200"
  namespace: "team-a"
  role_id: "role"
  secret_id: "secret"
issuer:
  pki_path: "pki_int"
  role: "mtls-service"
  common_name: "service"
  uri_sans: ["spiffe://corp/prod/stack/payments/service/api"]
  ttl: 6h
  require_ca: true
authorizer:
  allowed_prefixes: ["spiffe://corp/prod/stack/payments/"]
  allowed_globs: ["spiffe://corp/prod/+/api"]
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.rotation.min_refresh, Duration::from_secs(45));
        assert_eq!(cfg.rotation.error_backoff, Duration::from_millis(500));
        assert_eq!(cfg.vault.namespace.as_deref(), Some("team-a"));
        assert_eq!(cfg.issuer.role, "mtls-service");
        assert_eq!(cfg.issuer.ttl, Some(Duration::from_secs(6 * 3600)));
        assert!(cfg.issuer.require_ca);
        assert_eq!(cfg.authorizer.allowed_globs.len(), 1);
        assert!(cfg.authorizer.allowed_exact.is_empty());
    }

    #[test]
    fn load_reads_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rotate.yaml");
        std::fs::write(&path, "issuer:\n  role: web\n  ttl: 90m\n").unwrap();

        let cfg = Config::load(Some(&path)).unwrap();
        assert_eq!(cfg.issuer.role, "web");
        assert_eq!(cfg.issuer.ttl, Some(Duration::from_secs(90 * 60)));
    }

    #[test]
    fn load_missing_file_is_config_error() {
        let err = Config::load(Some(Path::new("/nonexistent/rotate.yaml"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn env_indirection_resolves_from_env_file() {
        let dir = tempfile::tempdir().unwrap();
        let env_path = dir.path().join("vault.env");
        let mut f = std::fs::File::create(&env_path).unwrap();
        writeln!(f, "SPIFFE_ROTATE_TEST_SECRET_ID=s3cr3t").unwrap();
        writeln!(f, "SPIFFE_ROTATE_TEST_ROLE_ID=r0le").unwrap();
        drop(f);

        let cfg = Config {
            env_files: vec![env_path.to_string_lossy().to_string()],
            vault: VaultConfig {
                role_id: Some("env:SPIFFE_ROTATE_TEST_ROLE_ID".to_string()),
                secret_id: Some("env:SPIFFE_ROTATE_TEST_SECRET_ID".to_string()),
                ..VaultConfig::default()
            },
            ..Config::default()
        };
        cfg.load_env_files();

        assert_eq!(
            cfg.vault.resolved_approle(),
            Some(("r0le".to_string(), "s3cr3t".to_string()))
        );
    }

    #[test]
    fn approle_requires_both_halves() {
        let cfg = VaultConfig {
            role_id: Some("role".to_string()),
            ..VaultConfig::default()
        };
        assert!(cfg.resolved_approle().is_none());
    }

    #[test]
    fn empty_token_counts_as_unset() {
        let cfg = VaultConfig {
            token: Some(String::new()),
            ..VaultConfig::default()
        };
        assert!(cfg.resolved_token().is_none());
    }

    #[test]
    fn unresolvable_env_reference_counts_as_unset() {
        let cfg = VaultConfig {
            token: Some("env:SPIFFE_ROTATE_TEST_DOES_NOT_EXIST".to_string()),
            ..VaultConfig::default()
        };
        assert!(cfg.resolved_token().is_none());
    }

    #[test]
    fn vault_config_debug_redacts_secrets() {
        let cfg = VaultConfig {
            token: Some("hvs.very-secret".to_string()),
            secret_id: Some("also-secret".to_string()),
            ..VaultConfig::default()
        };
        let dbg = format!("{cfg:?}");
        assert!(!dbg.contains("very-secret"));
        assert!(!dbg.contains("also-secret"));
    }

    #[test]
    fn duration_parsing_accepts_all_units() {
        use humantime_serde::parse_duration;
        assert_eq!(parse_duration("100ms").unwrap(), Duration::from_millis(100));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("6h").unwrap(), Duration::from_secs(21_600));
        assert_eq!(parse_duration("12").unwrap(), Duration::from_secs(12));
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn oversized_durations_are_rejected() {
        use humantime_serde::parse_duration;
        let err = parse_duration("999999999999999999h").unwrap_err();
        assert!(err.contains("out of range"), "{err}");
        assert!(parse_duration("999999999999999999m").is_err());
        assert_eq!(
            parse_duration("18446744073709551615s").unwrap(),
            Duration::from_secs(u64::MAX)
        );

        // and a config carrying one fails to load instead of wrapping
        let yaml = "issuer:\n  ttl: 999999999999999999h\n";
        assert!(serde_yaml::from_str::<Config>(yaml).is_err());
    }

    #[test]
    fn format_duration_round_trips_through_ttl_field() {
        let cfg = IssuerConfig {
            ttl: Some(Duration::from_millis(1500)),
            ..IssuerConfig::default()
        };
        let yaml = serde_yaml::to_string(&cfg).unwrap();
        assert!(yaml.contains("ttl: 1500ms"));
    }
}
