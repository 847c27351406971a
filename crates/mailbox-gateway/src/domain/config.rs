//! Gateway configuration with validation.
//!
//! Loaded from a JSON document; every section has defaults so a file only
//! needs the endpoints and credentials. Secrets and endpoints can be
//! overridden from `MAILBOX_*` environment variables.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Environment variables consulted by [`GatewayConfig::apply_env_overrides`].
pub mod env_keys {
    pub const BASE_URI: &str = "MAILBOX_BASE_URI";
    pub const ADMIN_URI: &str = "MAILBOX_ADMIN_URI";
    pub const DOMAIN: &str = "MAILBOX_DOMAIN";
    pub const ADMIN_ACCOUNT: &str = "MAILBOX_ADMIN_ACCOUNT";
    pub const ADMIN_PASSWORD: &str = "MAILBOX_ADMIN_PASSWORD";
    pub const PREAUTH_KEY: &str = "MAILBOX_PREAUTH_KEY";
    pub const SLACK_TOKEN: &str = "MAILBOX_SLACK_TOKEN";
}

/// Main gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Mailbox server endpoints
    pub server: ServerConfig,
    /// Privileged service account
    pub admin: AdminConfig,
    /// Pre-authentication settings for end users
    pub preauth: PreauthConfig,
    /// Timeout configuration
    pub timeouts: TimeoutConfig,
    /// Session token handling
    pub tokens: TokenConfig,
    /// HTTP client pool
    pub http: HttpClientConfig,
    /// Circuit breaker configuration for the SOAP endpoints
    pub circuit_breaker: CircuitBreakerConfig,
    /// Circuit transition notifications
    pub alerts: AlertConfig,
}

impl GatewayConfig {
    /// Read a JSON configuration file, apply environment overrides and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let mut config = Self::from_json(&raw)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON document without validating it.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Override endpoints and secrets from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Override endpoints and secrets using `lookup` as the variable source.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(env_keys::BASE_URI) {
            self.server.base_uri = v;
        }
        if let Some(v) = lookup(env_keys::ADMIN_URI) {
            self.server.admin_uri = v;
        }
        if let Some(v) = lookup(env_keys::DOMAIN) {
            self.server.domain = v;
        }
        if let Some(v) = lookup(env_keys::ADMIN_ACCOUNT) {
            self.admin.account = v;
        }
        if let Some(v) = lookup(env_keys::ADMIN_PASSWORD) {
            self.admin.password = Secret::new(v);
        }
        if let Some(v) = lookup(env_keys::PREAUTH_KEY) {
            self.preauth.key = Secret::new(v);
        }
        if let Some(v) = lookup(env_keys::SLACK_TOKEN) {
            if let Some(slack) = self.alerts.slack.as_mut() {
                slack.api_token = Secret::new(v);
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_url("server.base_uri", &self.server.base_uri)?;
        validate_url("server.admin_uri", &self.server.admin_uri)?;

        if self.server.domain.trim().is_empty() {
            return Err(ConfigError::Missing("server.domain"));
        }
        if self.admin.account.trim().is_empty() {
            return Err(ConfigError::Missing("admin.account"));
        }
        if self.admin.password.is_empty() {
            return Err(ConfigError::Missing("admin.password"));
        }
        if self.preauth.key.is_empty() {
            return Err(ConfigError::Missing("preauth.key"));
        }

        if self.timeouts.request.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "request timeout cannot be 0".into(),
            ));
        }
        if self.tokens.purge_interval.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "tokens.purge_interval cannot be 0".into(),
            ));
        }
        if self.timeouts.connect > self.timeouts.request {
            return Err(ConfigError::InvalidTimeout(
                "connect timeout cannot exceed request timeout".into(),
            ));
        }

        if self.http.max_pool_size == 0 {
            return Err(ConfigError::InvalidLimit(
                "http.max_pool_size cannot be 0".into(),
            ));
        }

        if self.circuit_breaker.failure_threshold == 0 {
            return Err(ConfigError::InvalidLimit(
                "circuit_breaker.failure_threshold cannot be 0".into(),
            ));
        }
        if self.circuit_breaker.success_threshold == 0 {
            return Err(ConfigError::InvalidLimit(
                "circuit_breaker.success_threshold cannot be 0".into(),
            ));
        }

        if let Some(slack) = &self.alerts.slack {
            validate_url("alerts.slack.api_uri", &slack.api_uri)?;
            if slack.channel.trim().is_empty() {
                return Err(ConfigError::Missing("alerts.slack.channel"));
            }
        }

        Ok(())
    }
}

fn validate_url(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Missing(field));
    }
    if !(value.starts_with("http://") || value.starts_with("https://")) {
        return Err(ConfigError::InvalidUrl {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// String that never shows up in `Debug` output or logs.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("Secret(<empty>)")
        } else {
            f.write_str("Secret(<redacted>)")
        }
    }
}

/// Mailbox server endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URI of the mailbox server; the user endpoint is `<base_uri>/service/soap`
    pub base_uri: String,
    /// Full URI of the administrative SOAP endpoint
    pub admin_uri: String,
    /// Mail domain appended to user ids to form addresses
    pub domain: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_uri: "http://localhost".to_string(),
            admin_uri: "https://localhost:7071/service/admin/soap".to_string(),
            domain: "localhost".to_string(),
        }
    }
}

impl ServerConfig {
    /// User-level SOAP endpoint
    pub fn soap_endpoint(&self) -> String {
        format!("{}/service/soap", self.base_uri.trim_end_matches('/'))
    }

    /// Direct-login endpoint used for browser redirects
    pub fn preauth_endpoint(&self) -> String {
        format!("{}/service/preauth", self.base_uri.trim_end_matches('/'))
    }
}

/// Privileged service account credentials
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    pub account: String,
    pub password: Secret,
}

/// Pre-authentication key shared with the mailbox server
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PreauthConfig {
    pub key: Secret,
}

/// Timeout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upper bound for one SOAP round-trip
    #[serde(with = "humantime_serde")]
    pub request: Duration,
    /// TCP/TLS connect timeout
    #[serde(with = "humantime_serde")]
    pub connect: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request: Duration::from_secs(10),
            connect: Duration::from_secs(3),
        }
    }
}

/// Session token handling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Subtracted from the server-declared lifetime to get the refresh instant
    #[serde(with = "humantime_serde")]
    pub refresh_margin: Duration,
    /// How often the in-process store drops stale entries
    #[serde(with = "humantime_serde")]
    pub purge_interval: Duration,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            refresh_margin: Duration::from_secs(60 * 60),
            purge_interval: Duration::from_secs(5 * 60),
        }
    }
}

/// HTTP client pool
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpClientConfig {
    /// Idle connections kept per host
    pub max_pool_size: usize,
    /// Optional outbound proxy URL
    pub proxy: Option<String>,
    /// Accept self-signed certificates (admin ports often use one)
    pub accept_invalid_certs: bool,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            max_pool_size: 16,
            proxy: None,
            accept_invalid_certs: false,
        }
    }
}

/// Circuit breaker configuration for the SOAP endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Enable circuit breaker
    pub enabled: bool,
    /// Number of failures within the window before opening the circuit
    pub failure_threshold: u32,
    /// Number of successful trial calls before closing
    pub success_threshold: u32,
    /// Time spent open before a trial call is allowed
    #[serde(with = "humantime_serde")]
    pub open_timeout: Duration,
    /// Failures older than this no longer count
    #[serde(with = "humantime_serde")]
    pub failure_window: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            success_threshold: 1,
            open_timeout: Duration::from_secs(30),
            failure_window: Duration::from_secs(60),
        }
    }
}

/// Circuit transition notifications
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Label prefixed to every alert, usually the host name
    pub host: String,
    /// Post alerts to a Slack channel in addition to the log
    pub slack: Option<SlackConfig>,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            host: "mailbridge".to_string(),
            slack: None,
        }
    }
}

/// Slack Web API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackConfig {
    /// Base URI of the Web API, e.g. `https://slack.com/api/`
    pub api_uri: String,
    pub api_token: Secret,
    pub channel: String,
    #[serde(default = "default_bot_username")]
    pub bot_username: String,
}

fn default_bot_username() -> String {
    "mailbridge".to_string()
}

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("cannot read {path}: {reason}")]
    Io { path: String, reason: String },
    /// Document is not valid JSON for this schema
    #[error("cannot parse configuration: {0}")]
    Parse(String),
    /// Required field left empty
    #[error("missing required setting: {0}")]
    Missing(&'static str),
    /// Endpoint is not an http(s) URL
    #[error("invalid url for {field}: {value}")]
    InvalidUrl { field: &'static str, value: String },
    /// Invalid size or count limit
    #[error("invalid limit: {0}")]
    InvalidLimit(String),
    /// Invalid timeout value
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
}

/// Duration (de)serialization accepting `"30s"`, `"250ms"`, `"5m"`, `"1h"` or bare seconds.
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

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

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub(super) fn parse_duration(s: &str) -> Result<Duration, &'static str> {
        let s = s.trim();
        // "ms" must be checked before "m" and "s"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| "invalid milliseconds")
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid seconds")
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.trim()
                .parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(|_| "invalid minutes")
        } else if let Some(hours) = s.strip_suffix('h') {
            hours
                .trim()
                .parse::<u64>()
                .map(|h| Duration::from_secs(h * 3600))
                .map_err(|_| "invalid hours")
        } else {
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid duration format")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn valid_config() -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.server.base_uri = "https://mail.example.org".into();
        config.server.admin_uri = "https://mail.example.org:7071/service/admin/soap".into();
        config.server.domain = "example.org".into();
        config.admin.account = "admin@example.org".into();
        config.admin.password = Secret::new("s3cret");
        config.preauth.key = Secret::new("0123456789abcdef");
        config
    }

    #[test]
    fn test_default_needs_credentials() {
        let config = GatewayConfig::default();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Missing("admin.account"))
        ));
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_endpoints() {
        let mut config = valid_config();
        config.server.base_uri = "https://mail.example.org/".into();
        assert_eq!(
            config.server.soap_endpoint(),
            "https://mail.example.org/service/soap"
        );
        assert_eq!(
            config.server.preauth_endpoint(),
            "https://mail.example.org/service/preauth"
        );
    }

    #[test]
    fn test_invalid_url() {
        let mut config = valid_config();
        config.server.admin_uri = "mail.example.org:7071".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidUrl { field: "server.admin_uri", .. })
        ));
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let mut config = valid_config();
        config.circuit_breaker.failure_threshold = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidLimit(_))
        ));
    }

    #[test]
    fn test_zero_purge_interval_rejected() {
        let mut config = valid_config();
        config.tokens.purge_interval = Duration::ZERO;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidTimeout(msg)) if msg.contains("purge_interval")
        ));
    }

    #[test]
    fn test_secrets_redacted_in_debug() {
        let config = valid_config();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("s3cret"));
        assert!(!debug.contains("0123456789abcdef"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_parse_durations() {
        use humantime_serde::parse_duration;
        assert_eq!(parse_duration("30s"), Ok(Duration::from_secs(30)));
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration("5m"), Ok(Duration::from_secs(300)));
        assert_eq!(parse_duration("1h"), Ok(Duration::from_secs(3600)));
        assert_eq!(parse_duration("12"), Ok(Duration::from_secs(12)));
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            (env_keys::BASE_URI, "https://other.example.org"),
            (env_keys::ADMIN_PASSWORD, "from-env"),
        ]
        .into_iter()
        .collect();

        let mut config = valid_config();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.server.base_uri, "https://other.example.org");
        assert_eq!(config.admin.password.expose(), "from-env");
        assert_eq!(config.preauth.key.expose(), "0123456789abcdef");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "server": {{
                    "base_uri": "https://mail.example.org",
                    "admin_uri": "https://mail.example.org:7071/service/admin/soap",
                    "domain": "example.org"
                }},
                "admin": {{ "account": "admin@example.org", "password": "pw" }},
                "preauth": {{ "key": "abc123" }},
                "timeouts": {{ "request": "5s", "connect": "500ms" }},
                "circuit_breaker": {{ "failure_threshold": 3, "open_timeout": "1m" }}
            }}"#
        )
        .unwrap();

        let config = GatewayConfig::load(file.path()).unwrap();
        assert_eq!(config.timeouts.request, Duration::from_secs(5));
        assert_eq!(config.timeouts.connect, Duration::from_millis(500));
        assert_eq!(config.circuit_breaker.failure_threshold, 3);
        assert_eq!(config.circuit_breaker.open_timeout, Duration::from_secs(60));
        // untouched sections keep their defaults
        assert_eq!(config.tokens.refresh_margin, Duration::from_secs(3600));
        assert!(config.alerts.slack.is_none());
    }

    #[test]
    fn test_load_missing_file() {
        let err = GatewayConfig::load(Path::new("/nonexistent/mailbridge.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
