//! Configuration management
//!
//! Sources, later ones overriding earlier ones:
//!
//! 1. Built-in defaults
//! 2. YAML file (`--config` / `ARMORIQ_CONFIG`)
//! 3. Environment variables prefixed `ARMORIQ_`, nested with `__`
//!    (e.g. `ARMORIQ_TOKEN__ISSUER`, `ARMORIQ_UPSTREAM__BASE_URL`)
//!
//! ```yaml
//! server:
//!   port: 5001
//! upstream:
//!   base_url: "http://localhost:8080"
//!   timeout: "10s"
//! discovery:
//!   path: "mcp.json"
//! endpoints:
//!   - id: "svc"
//!     name: "Customer service"
//!     api_key_hash: "$argon2id$v=19$..."
//! mtls:
//!   server_cert: "/etc/armoriq/tls/server.crt"
//!   server_key: "/etc/armoriq/tls/server.key"
//!   ca_cert: "/etc/armoriq/tls/ca.crt"
//! token:
//!   public_key_path: "/etc/armoriq/jwt.pub"
//!   algorithm: "RS256"
//!   issuer: "https://issuer.example"
//!   audience: "armoriq-proxy"
//!   clock_tolerance: 60
//! ```

use std::{collections::HashSet, env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::mtls::MtlsConfig;
use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before `${VAR}` expansion.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Downstream defaults
    pub upstream: UpstreamConfig,
    /// Discovery metadata source
    pub discovery: DiscoveryConfig,
    /// Registered endpoints (merged with the discovery document's)
    pub endpoints: Vec<EndpointConfig>,
    /// Transport TLS / mTLS
    pub mtls: MtlsConfig,
    /// Token verification material and expectations
    pub token: TokenConfig,
    /// Audit log settings
    pub audit: AuditConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Maximum request body size (bytes)
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5001,
            max_body_size: 10 * 1024 * 1024, // 10MB
        }
    }
}

/// Downstream service defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL for endpoints that do not declare their own
    pub base_url: Option<String>,
    /// Bound on each forwarded call
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Discovery metadata source
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// JSON or YAML document path (by extension)
    pub path: Option<String>,
}

/// One registered endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EndpointConfig {
    /// Stable identifier used in `/proxy/{id}/...` and in token policies
    pub id: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Base URL; falls back to `upstream.base_url`
    #[serde(default, alias = "baseUrl")]
    pub base_url: Option<String>,
    /// Argon2 PHC hash of the shared secret (`armoriq-proxy hash-secret`)
    #[serde(alias = "apiKeyHash", alias = "hashed_secret")]
    pub api_key_hash: String,
}

/// Token verification configuration.
///
/// Exactly one of the two modes may be configured:
/// - single public key: `public_key` or `public_key_path` + `algorithm`
/// - key set: `jwks_path` or `jwks_url`
///
/// With neither, the verifier is unconfigured and every proxied request
/// fails closed with 503.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Inline PEM public key
    pub public_key: Option<String>,
    /// Path to a PEM public key
    pub public_key_path: Option<String>,
    /// Signature algorithm for the single-key mode (e.g. `RS256`, `ES256`, `EdDSA`)
    pub algorithm: String,
    /// Local JWKS document
    pub jwks_path: Option<String>,
    /// Remote JWKS document, fetched once at startup
    pub jwks_url: Option<String>,
    /// Expected `iss`, checked when set
    pub issuer: Option<String>,
    /// Expected `aud`, checked when set
    pub audience: Option<String>,
    /// Clock skew tolerance for `exp` (seconds)
    pub clock_tolerance: u64,
    /// Timeout for the startup JWKS fetch
    #[serde(with = "humantime_serde")]
    pub fetch_timeout: Duration,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            public_key: None,
            public_key_path: None,
            algorithm: "RS256".to_string(),
            jwks_path: None,
            jwks_url: None,
            issuer: None,
            audience: None,
            clock_tolerance: 60,
            fetch_timeout: Duration::from_secs(10),
        }
    }
}

impl TokenConfig {
    /// Whether single-key material is configured
    #[must_use]
    pub fn has_public_key(&self) -> bool {
        non_blank(self.public_key.as_ref()) || non_blank(self.public_key_path.as_ref())
    }

    /// Whether key-set material is configured
    #[must_use]
    pub fn has_key_set(&self) -> bool {
        non_blank(self.jwks_path.as_ref()) || non_blank(self.jwks_url.as_ref())
    }
}

/// Audit log settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Records exposed through `/api/audit-logs`
    pub recent_window: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self { recent_window: 100 }
    }
}

fn non_blank(value: Option<&String>) -> bool {
    value.is_some_and(|v| !v.trim().is_empty())
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist, cannot be parsed,
    /// or fails [`Config::validate`].
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

        figment = figment.merge(Env::prefixed("ARMORIQ_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.load_env_files();
        config.expand_env_vars()?;
        config.validate()?;

        Ok(config)
    }

    /// Reject contradictory or incomplete setups before anything starts.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.token.has_public_key() && self.token.has_key_set() {
            return Err(Error::Config(
                "token: configure either a public key or a key set, not both".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for endpoint in &self.endpoints {
            if endpoint.id.trim().is_empty() {
                return Err(Error::Config("endpoint with empty id".to_string()));
            }
            if !seen.insert(endpoint.id.as_str()) {
                return Err(Error::Config(format!(
                    "duplicate endpoint id '{}'",
                    endpoint.id
                )));
            }
            if endpoint.base_url.is_none() && self.upstream.base_url.is_none() {
                return Err(Error::Config(format!(
                    "endpoint '{}' has no base_url and upstream.base_url is unset",
                    endpoint.id
                )));
            }
        }

        self.mtls.validate()
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = expand_home(path_str);
            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => tracing::info!("Loaded env file: {expanded}"),
                    Err(e) => tracing::warn!("Failed to load env file {expanded}: {e}"),
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Expand `${VAR}` and `${VAR:-default}` in URL and path values
    fn expand_env_vars(&mut self) -> Result<()> {
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}")
            .map_err(|e| Error::Internal(e.to_string()))?;

        let expand = |value: &mut Option<String>| {
            if let Some(v) = value.as_mut() {
                *v = expand_string(&re, v);
            }
        };

        expand(&mut self.upstream.base_url);
        expand(&mut self.discovery.path);
        expand(&mut self.token.public_key_path);
        expand(&mut self.token.jwks_path);
        expand(&mut self.token.jwks_url);
        expand(&mut self.token.issuer);
        expand(&mut self.token.audience);
        for endpoint in &mut self.endpoints {
            expand(&mut endpoint.base_url);
            endpoint.api_key_hash = expand_string(&re, &endpoint.api_key_hash);
        }
        self.mtls.server_cert = expand_string(&re, &self.mtls.server_cert);
        self.mtls.server_key = expand_string(&re, &self.mtls.server_key);
        self.mtls.ca_cert = expand_string(&re, &self.mtls.ca_cert);

        Ok(())
    }
}

/// Replace a leading `~` with the home directory.
fn expand_home(path: &str) -> String {
    match (path.strip_prefix('~'), env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{home}{rest}"),
        _ => path.to_string(),
    }
}

/// Expand environment variables in a string
fn expand_string(re: &Regex, value: &str) -> String {
    re.replace_all(value, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map_or("", |m| m.as_str());
        env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .into_owned()
}

/// Human-readable `Duration` serde ("30s", "5m", "100ms", bare seconds)
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to a human-readable string (e.g. "30s", "500ms")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize a human-readable duration string
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Secs(u64),
            Text(String),
        }

        let s = match Raw::deserialize(deserializer)? {
            Raw::Secs(secs) => return Ok(Duration::from_secs(secs)),
            Raw::Text(s) => s,
        };
        let s = s.trim();

        // "ms" must be checked before "s"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(serde::de::Error::custom)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(serde::de::Error::custom)
        } else {
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn endpoint(id: &str, base_url: Option<&str>) -> EndpointConfig {
        EndpointConfig {
            id: id.to_string(),
            name: id.to_string(),
            base_url: base_url.map(str::to_string),
            api_key_hash: "hash".to_string(),
        }
    }

    #[test]
    fn defaults_are_fail_closed() {
        let config = Config::default();
        assert!(!config.token.has_public_key());
        assert!(!config.token.has_key_set());
        assert_eq!(config.token.clock_tolerance, 60);
        assert_eq!(config.audit.recent_window, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn load_reads_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("armoriq.yaml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(
            f,
            r#"
server:
  port: 6001
upstream:
  base_url: "http://backend:8080"
  timeout: "500ms"
endpoints:
  - id: svc
    name: Service
    api_key_hash: "$argon2id$v=19$m=19456,t=2,p=1$c2FsdA$aGFzaA"
token:
  issuer: "https://issuer.example"
  clock_tolerance: 5
"#
        )
        .unwrap();
        drop(f);

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.server.port, 6001);
        assert_eq!(config.upstream.timeout, Duration::from_millis(500));
        assert_eq!(config.endpoints.len(), 1);
        assert_eq!(config.endpoints[0].id, "svc");
        assert_eq!(config.token.issuer.as_deref(), Some("https://issuer.example"));
        assert_eq!(config.token.clock_tolerance, 5);
    }

    #[test]
    fn load_rejects_missing_file() {
        let err = Config::load(Some(Path::new("/definitely/not/here.yaml"))).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn validate_rejects_both_token_modes() {
        let mut config = Config::default();
        config.token.public_key_path = Some("key.pem".into());
        config.token.jwks_url = Some("https://issuer.example/jwks".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_duplicate_endpoint_ids() {
        let config = Config {
            endpoints: vec![
                endpoint("svc", Some("http://a")),
                endpoint("svc", Some("http://b")),
            ],
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn validate_requires_some_base_url() {
        let mut config = Config {
            endpoints: vec![endpoint("svc", None)],
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.upstream.base_url = Some("http://backend".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn expand_string_uses_default_when_unset() {
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}").unwrap();
        let out = expand_string(&re, "http://${ARMORIQ_TEST_SURELY_UNSET_VAR:-localhost}:8080");
        assert_eq!(out, "http://localhost:8080");
    }

    #[test]
    fn humantime_parses_units() {
        #[derive(Deserialize)]
        struct Wrapper {
            #[serde(with = "humantime_serde")]
            d: Duration,
        }
        let parse = |s: &str| serde_yaml::from_str::<Wrapper>(s).unwrap().d;
        assert_eq!(parse("d: 30s"), Duration::from_secs(30));
        assert_eq!(parse("d: 2m"), Duration::from_secs(120));
        assert_eq!(parse("d: 250ms"), Duration::from_millis(250));
        assert_eq!(parse("d: 7"), Duration::from_secs(7));
    }

    #[test]
    fn load_env_files_sets_env_vars() {
        let dir = tempfile::tempdir().unwrap();
        let env_path = dir.path().join("test.env");
        let mut f = std::fs::File::create(&env_path).unwrap();
        writeln!(f, "ARMORIQ_TEST_ENV_FILE_KEY=from_env_file").unwrap();
        drop(f);

        let config = Config {
            env_files: vec![env_path.to_string_lossy().to_string()],
            ..Default::default()
        };
        config.load_env_files();

        assert_eq!(env::var("ARMORIQ_TEST_ENV_FILE_KEY").unwrap(), "from_env_file");
    }

    #[test]
    fn endpoint_config_accepts_camel_case_aliases() {
        let yaml = "id: svc\nbaseUrl: http://x\napiKeyHash: h";
        let ep: EndpointConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(ep.base_url.as_deref(), Some("http://x"));
        assert_eq!(ep.api_key_hash, "h");
    }
}
