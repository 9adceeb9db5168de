//! Client configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via MCS_CONFIG or --config)
//! 3. Environment variables

use mcs_protocol::{DEFAULT_HOST, DEFAULT_PORT};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default heartbeat interval (10 minutes).
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 10 * 60;

/// Default checkin interval (2 days).
pub const DEFAULT_CHECKIN_INTERVAL_SECS: u64 = 2 * 24 * 60 * 60;

/// Checkins are never scheduled more often than this (12 hours).
pub const MIN_CHECKIN_INTERVAL_SECS: u64 = 12 * 60 * 60;

/// Default read buffer size (8 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Minimum read buffer size (1 KiB).
pub const MIN_READ_BUFFER_SIZE: usize = 1024;

/// Maximum read buffer size (1 MiB).
pub const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

pub const DEFAULT_CHECKIN_URL: &str = "https://android.clients.google.com/checkin";
pub const DEFAULT_REGISTER_URL: &str = "https://android.clients.google.com/c2dm/register3";

/// TLS configuration for the MCS connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsClientConfig {
    /// Wrap the connection in TLS. Only local test servers run without it.
    pub enabled: bool,
    /// PEM-encoded CA certificate(s) replacing the bundled web roots.
    pub ca_cert_path: Option<PathBuf>,
    /// Skip server certificate verification (INSECURE - development only).
    pub insecure: bool,
    /// Server name for SNI (defaults to the configured host).
    pub server_name: Option<String>,
}

impl Default for TlsClientConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ca_cert_path: None,
            insecure: false,
            server_name: None,
        }
    }
}

impl TlsClientConfig {
    /// Plain TCP, for talking to local fakes.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn with_ca_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert_path = Some(path.into());
        self.enabled = true;
        self
    }

    pub fn with_insecure(mut self) -> Self {
        self.insecure = true;
        self.enabled = true;
        self
    }

    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }
}

/// Client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// MCS endpoint host.
    pub host: String,
    /// MCS endpoint port.
    pub port: u16,
    /// TLS settings.
    pub tls: TlsClientConfig,
    /// Interval between heartbeat pings.
    pub heartbeat_interval_secs: u64,
    /// TCP connect plus TLS handshake timeout.
    pub connect_timeout_secs: u64,
    /// Longest silence tolerated mid-connection. Defaults to two heartbeat
    /// intervals.
    pub read_timeout_secs: Option<u64>,
    /// Read buffer size for socket reads.
    pub read_buffer_size: usize,
    /// Location of the JSON store holding credentials and persistent ids.
    pub store_path: PathBuf,
    /// Checkin endpoint.
    pub checkin_url: String,
    /// Interval between credential refreshes, clamped to at least 12 hours.
    pub checkin_interval_secs: u64,
    /// Token registration endpoint.
    pub register_url: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            tls: TlsClientConfig::default(),
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_INTERVAL_SECS,
            connect_timeout_secs: 10,
            read_timeout_secs: None,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            store_path: PathBuf::from("./mcs-store.json"),
            checkin_url: DEFAULT_CHECKIN_URL.to_string(),
            checkin_interval_secs: DEFAULT_CHECKIN_INTERVAL_SECS,
            register_url: DEFAULT_REGISTER_URL.to_string(),
        }
    }
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("MCS_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: ClientConfig = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides from a variable lookup. Unparseable values are ignored.
    pub fn apply_overrides<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = var("MCS_HOST") {
            self.host = host;
        }
        if let Some(port) = var("MCS_PORT").and_then(|p| p.parse().ok()) {
            self.port = port;
        }
        if let Some(tls) = var("MCS_TLS") {
            self.tls.enabled = tls == "1" || tls.to_lowercase() == "true";
        }
        if let Some(path) = var("MCS_TLS_CA") {
            self.tls.ca_cert_path = Some(PathBuf::from(path));
        }
        if let Some(insecure) = var("MCS_TLS_INSECURE") {
            self.tls.insecure = insecure == "1" || insecure.to_lowercase() == "true";
        }
        if let Some(secs) = var("MCS_HEARTBEAT_SECS").and_then(|s| s.parse().ok()) {
            self.heartbeat_interval_secs = secs;
        }
        if let Some(secs) = var("MCS_CONNECT_TIMEOUT_SECS").and_then(|s| s.parse().ok()) {
            self.connect_timeout_secs = secs;
        }
        if let Some(path) = var("MCS_STORE_PATH") {
            self.store_path = PathBuf::from(path);
        }
        if let Some(secs) = var("MCS_CHECKIN_INTERVAL_SECS").and_then(|s| s.parse().ok()) {
            self.checkin_interval_secs = secs;
        }
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::ValidationError("host is empty".to_string()));
        }
        if self.heartbeat_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "heartbeat_interval_secs must be positive".to_string(),
            ));
        }
        if self.read_timeout_secs == Some(0) {
            return Err(ConfigError::ValidationError(
                "read_timeout_secs must be positive".to_string(),
            ));
        }
        if !(MIN_READ_BUFFER_SIZE..=MAX_READ_BUFFER_SIZE).contains(&self.read_buffer_size) {
            return Err(ConfigError::ValidationError(format!(
                "read_buffer_size must be between {} and {}",
                MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE
            )));
        }
        if self.tls.insecure && !self.tls.enabled {
            return Err(ConfigError::ValidationError(
                "tls.insecure set but TLS is disabled".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_tls(mut self, tls: TlsClientConfig) -> Self {
        self.tls = tls;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval_secs = interval.as_secs().max(1);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout_secs = Some(timeout.as_secs().max(1));
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }

    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = path.into();
        self
    }

    pub fn with_checkin_url(mut self, url: impl Into<String>) -> Self {
        self.checkin_url = url.into();
        self
    }

    pub fn with_register_url(mut self, url: impl Into<String>) -> Self {
        self.register_url = url.into();
        self
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        match self.read_timeout_secs {
            Some(secs) => Duration::from_secs(secs),
            None => self.heartbeat_interval() * 2,
        }
    }

    pub fn checkin_interval(&self) -> Duration {
        Duration::from_secs(self.checkin_interval_secs.max(MIN_CHECKIN_INTERVAL_SECS))
    }

    /// Server name used for SNI and certificate verification.
    pub fn server_name(&self) -> &str {
        self.tls.server_name.as_deref().unwrap_or(&self.host)
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
