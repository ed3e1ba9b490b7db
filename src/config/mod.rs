//! Configuration management.
//!
//! Supports configuration from:
//! - TOML config files
//! - Environment variables
//! - CLI arguments (applied by the binaries on top of the above)
//!
//! Stream security has no default. A config that never states
//! `security.mode` is rejected by [`ClientConfig::validate`].

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::protocol::{MAX_STANZA_BYTES, SESSION_TIMEOUT_SECS};
use crate::transport::TrustAnchors;

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Session client configuration
    #[serde(default)]
    pub client: ClientConfig,

    /// Account administration configuration
    #[serde(default)]
    pub admin: AdminConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(ConfigError::Read)?;
        Ok(toml::from_str(&content)?)
    }

    /// Default config file location (`<config_dir>/courier/config.toml`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("courier").join("config.toml"))
    }

    /// Load `path` (or the default path when it exists), then apply env overrides.
    pub fn load(path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let base = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => {
                    tracing::debug!("Loading config from {}", path.display());
                    Self::from_file(path)?
                },
                None => Self::default(),
            },
        };
        base.apply_env()
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().apply_env()
    }

    fn apply_env(mut self) -> Result<Self, ConfigError> {
        // Client settings
        if let Ok(server) = std::env::var("COURIER_SERVER") {
            self.client.server = server;
        }
        if let Ok(mode) = std::env::var("COURIER_SECURITY") {
            self.client.security.mode = Some(mode.parse()?);
        }
        if let Ok(path) = std::env::var("COURIER_CA_FILE") {
            self.client.security.ca_file = Some(PathBuf::from(path));
        }
        if let Ok(value) = std::env::var("COURIER_CONNECT_TIMEOUT_SECS") {
            self.client.connect_timeout = value
                .parse::<f64>()
                .ok()
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                .ok_or_else(|| {
                    ConfigError::Invalid(format!(
                        "COURIER_CONNECT_TIMEOUT_SECS: '{value}' is not a duration in seconds"
                    ))
                })?;
        }

        // Admin settings
        if let Ok(command) = std::env::var("COURIER_ADMIN_COMMAND") {
            self.admin.command = command.split_whitespace().map(str::to_string).collect();
        }
        if let Ok(dir) = std::env::var("COURIER_ADMIN_DIR") {
            self.admin.working_dir = Some(PathBuf::from(dir));
        }
        if let Ok(domain) = std::env::var("COURIER_DOMAIN") {
            self.admin.domain = domain;
        }

        Ok(self)
    }
}

/// Stream security policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityMode {
    /// Upgrade to TLS before authenticating; fail if the server cannot
    Required,
    /// Never upgrade (local testing only)
    Disabled,
}

impl fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Required => f.write_str("required"),
            Self::Disabled => f.write_str("disabled"),
        }
    }
}

impl FromStr for SecurityMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "required" | "tls" | "starttls" => Ok(Self::Required),
            "disabled" | "none" | "plain" => Ok(Self::Disabled),
            _ => Err(ConfigError::Invalid(format!(
                "Unknown security mode: {s}. Use: required, disabled"
            ))),
        }
    }
}

/// Stream security settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Security policy; must be set explicitly
    #[serde(default)]
    pub mode: Option<SecurityMode>,

    /// PEM bundle of trusted CAs
    #[serde(default)]
    pub ca_file: Option<PathBuf>,

    /// Name the server certificate must match (default: identity domain)
    #[serde(default)]
    pub server_name: Option<String>,

    /// DER CAs supplied programmatically
    #[serde(skip)]
    pub ca_der: Vec<Vec<u8>>,
}

impl SecurityConfig {
    /// Trust anchors for the TLS upgrade
    pub fn trust_anchors(&self) -> Option<TrustAnchors> {
        if !self.ca_der.is_empty() {
            return Some(TrustAnchors::Der(self.ca_der.clone()));
        }
        self.ca_file.clone().map(TrustAnchors::File)
    }
}

/// Session client configuration
///
/// Timeouts are written in seconds in TOML; fractions are allowed
/// (`connect_timeout_secs = 0.5`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server `host:port`
    pub server: String,

    /// Bound on resolve + TCP connect + stream negotiation
    #[serde(rename = "connect_timeout_secs", with = "secs")]
    pub connect_timeout: Duration,

    /// Bound on waiting for a correlated response
    #[serde(rename = "response_timeout_secs", with = "secs")]
    pub response_timeout: Duration,

    /// Wait-for-replies window before a deliberate disconnect
    #[serde(rename = "reply_window_secs", with = "secs")]
    pub reply_window: Duration,

    /// Graceful close bound before the transport is force-closed
    #[serde(rename = "close_timeout_secs", with = "secs")]
    pub close_timeout: Duration,

    /// Idle time after which an active session is torn down
    #[serde(rename = "idle_timeout_secs", with = "secs")]
    pub idle_timeout: Duration,

    /// Maximum encoded stanza size
    pub max_stanza_bytes: usize,

    /// Authenticate on the same stream after a successful registration
    pub login_after_register: bool,

    /// Stream security
    pub security: SecurityConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: "127.0.0.1:5222".to_string(),
            connect_timeout: Duration::from_secs(10),
            response_timeout: Duration::from_secs(10),
            reply_window: Duration::from_secs(2),
            close_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(SESSION_TIMEOUT_SECS),
            max_stanza_bytes: MAX_STANZA_BYTES,
            login_after_register: false,
            security: SecurityConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Create with an explicit security mode
    pub fn new(mode: SecurityMode) -> Self {
        Self::default().with_security(mode)
    }

    /// Set server address
    pub fn with_server(mut self, server: &str) -> Self {
        self.server = server.to_string();
        self
    }

    /// Set security mode
    pub fn with_security(mut self, mode: SecurityMode) -> Self {
        self.security.mode = Some(mode);
        self
    }

    /// Trust a PEM CA bundle
    pub fn with_ca_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.security.ca_file = Some(path.into());
        self
    }

    /// Trust raw DER CA certificates
    pub fn with_ca_der(mut self, ders: Vec<Vec<u8>>) -> Self {
        self.security.ca_der = ders;
        self
    }

    /// Override the TLS server name
    pub fn with_server_name(mut self, name: &str) -> Self {
        self.security.server_name = Some(name.to_string());
        self
    }

    /// Set connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set response timeout
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Set reply window
    pub fn with_reply_window(mut self, window: Duration) -> Self {
        self.reply_window = window;
        self
    }

    /// Set graceful close timeout
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Set idle timeout
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Log in right after in-band registration succeeds
    pub fn with_login_after_register(mut self, enabled: bool) -> Self {
        self.login_after_register = enabled;
        self
    }

    /// Connect timeout
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Response timeout
    pub fn response_timeout(&self) -> Duration {
        self.response_timeout
    }

    /// Reply window
    pub fn reply_window(&self) -> Duration {
        self.reply_window
    }

    /// Close timeout
    pub fn close_timeout(&self) -> Duration {
        self.close_timeout
    }

    /// Idle timeout
    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Check the config is usable and return the security mode.
    pub fn validate(&self) -> Result<SecurityMode, ConfigError> {
        let mode = self.security.mode.ok_or_else(|| {
            ConfigError::Invalid(
                "security.mode must be set explicitly to 'required' or 'disabled'".to_string(),
            )
        })?;

        if mode == SecurityMode::Required && self.security.trust_anchors().is_none() {
            return Err(ConfigError::Invalid(
                "security.mode = required needs security.ca_file".to_string(),
            ));
        }

        for (name, value) in [
            ("connect_timeout_secs", self.connect_timeout),
            ("response_timeout_secs", self.response_timeout),
            ("close_timeout_secs", self.close_timeout),
            ("idle_timeout_secs", self.idle_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::Invalid(format!("{name} must be positive")));
            }
        }

        if self.max_stanza_bytes < 256 {
            return Err(ConfigError::Invalid(
                "max_stanza_bytes must be at least 256".to_string(),
            ));
        }

        Ok(mode)
    }
}

/// Durations as (possibly fractional) seconds
mod secs {
    use std::time::Duration;

    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        if value.subsec_nanos() == 0 {
            serializer.serialize_u64(value.as_secs())
        } else {
            serializer.serialize_f64(value.as_secs_f64())
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs)
            .map_err(|e| de::Error::custom(format!("invalid duration {secs}: {e}")))
    }
}

/// Account administration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Argument vector prefix of the admin tool
    pub command: Vec<String>,

    /// Working directory for the admin tool
    pub working_dir: Option<PathBuf>,

    /// Domain used when none is given
    pub domain: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            command: ["docker-compose", "exec", "-T", "ejabberd", "ejabberdctl"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            working_dir: None,
            domain: "localhost".to_string(),
        }
    }
}

impl AdminConfig {
    /// Set the admin tool argv prefix
    pub fn with_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    /// Set default domain
    pub fn with_domain(mut self, domain: &str) -> Self {
        self.domain = domain.to_string();
        self
    }

    /// Set working directory
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}
