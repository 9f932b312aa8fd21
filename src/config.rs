//! Configuration for the S3 gateway

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Plain HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Optional HTTPS listen address
    #[serde(default)]
    pub secure_listen_addr: Option<SocketAddr>,

    /// Certificate for the secure endpoint. Without it a self-signed
    /// certificate is generated at startup.
    #[serde(default)]
    pub tls: Option<TlsConfig>,

    /// Storage backend shared by the single-tenant credentials and anonymous
    /// access
    #[serde(default)]
    pub backend: BackendConfig,

    /// Single-tenant access key. When both keys are set, requests must be
    /// signed (V2 or V4) with these credentials.
    #[serde(default)]
    pub access_key_id: Option<String>,

    #[serde(default)]
    pub secret_access_key: Option<String>,

    /// Additional access keys, each with its own backend.
    #[serde(default)]
    pub tenants: Vec<TenantConfig>,

    /// Serve unsigned requests from `backend` even when credentials exist.
    #[serde(default)]
    pub allow_anonymous: bool,

    /// Domain suffix for virtual-host addressing (`bucket.<virtual_host>`).
    #[serde(default)]
    pub virtual_host: Option<String>,

    /// Maximum object size in bytes
    #[serde(default = "default_max_object_size")]
    pub max_object_size: u64,

    /// Largest object read whole and sliced for a range request when the
    /// store has no ranged reads
    #[serde(default = "default_max_range_buffer")]
    pub max_range_buffer: u64,

    /// Allowed difference between request date and server clock
    #[serde(default = "default_clock_skew_secs")]
    pub clock_skew_secs: u64,

    /// Age after which unfinished multipart uploads are dropped
    #[serde(default = "default_multipart_expiry_secs")]
    pub multipart_expiry_secs: u64,

    /// Log level filter string. Overridden by RUST_LOG.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// PEM files for the secure endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    #[serde(default)]
    pub cert_path: Option<String>,
    #[serde(default)]
    pub key_path: Option<String>,
}

/// One access key bound to its own backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub backend: BackendConfig,
}

/// Storage backend configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    /// Transient in-process store
    Memory {
        #[serde(default)]
        min_part_size: Option<u64>,
    },

    /// One directory per bucket under `path`
    Filesystem {
        path: PathBuf,
        #[serde(default)]
        min_part_size: Option<u64>,
    },
}

// Default value functions for serde
fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_max_object_size() -> u64 {
    5 * 1024 * 1024 * 1024 // 5GiB, the S3 single-PUT limit
}

fn default_max_range_buffer() -> u64 {
    64 * 1024 * 1024
}

fn default_clock_skew_secs() -> u64 {
    900
}

fn default_multipart_expiry_secs() -> u64 {
    24 * 60 * 60
}

fn default_log_level() -> String {
    "s3_gateway=info,tower_http=info".to_string()
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Filesystem {
            path: PathBuf::from("./data"),
            min_part_size: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            secure_listen_addr: None,
            tls: None,
            backend: BackendConfig::default(),
            access_key_id: None,
            secret_access_key: None,
            tenants: Vec::new(),
            allow_anonymous: false,
            virtual_host: None,
            max_object_size: default_max_object_size(),
            max_range_buffer: default_max_range_buffer(),
            clock_skew_secs: default_clock_skew_secs(),
            multipart_expiry_secs: default_multipart_expiry_secs(),
            log_level: default_log_level(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|v| v == "true" || v == "1")
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Override fields from `S3GW_*` environment variables.
    pub fn apply_env(&mut self) {
        if let Some(addr) = env_parse("S3GW_LISTEN_ADDR") {
            self.listen_addr = addr;
        }
        if let Some(addr) = env_parse("S3GW_SECURE_LISTEN_ADDR") {
            self.secure_listen_addr = Some(addr);
        }
        let cert = std::env::var("S3GW_TLS_CERT").ok();
        let key = std::env::var("S3GW_TLS_KEY").ok();
        if cert.is_some() || key.is_some() {
            self.tls = Some(TlsConfig {
                cert_path: cert,
                key_path: key,
            });
        }

        let min_part_size = env_parse("S3GW_MIN_PART_SIZE");
        if std::env::var("S3GW_BACKEND").as_deref() == Ok("memory") {
            self.backend = BackendConfig::Memory { min_part_size };
        } else if let Ok(dir) = std::env::var("S3GW_DATA_DIR") {
            self.backend = BackendConfig::Filesystem {
                path: PathBuf::from(dir),
                min_part_size,
            };
        }

        if let Ok(key) = std::env::var("S3GW_ACCESS_KEY_ID") {
            self.access_key_id = Some(key);
        }
        if let Ok(secret) = std::env::var("S3GW_SECRET_ACCESS_KEY") {
            self.secret_access_key = Some(secret);
        }
        if let Some(flag) = env_flag("S3GW_ALLOW_ANONYMOUS") {
            self.allow_anonymous = flag;
        }
        if let Ok(host) = std::env::var("S3GW_VIRTUAL_HOST") {
            self.virtual_host = Some(host);
        }
        if let Some(size) = env_parse("S3GW_MAX_OBJECT_SIZE") {
            self.max_object_size = size;
        }
        if let Some(size) = env_parse("S3GW_MAX_RANGE_BUFFER") {
            self.max_range_buffer = size;
        }
        if let Some(secs) = env_parse("S3GW_CLOCK_SKEW_SECS") {
            self.clock_skew_secs = secs;
        }
        if let Some(secs) = env_parse("S3GW_MULTIPART_EXPIRY_SECS") {
            self.multipart_expiry_secs = secs;
        }
        if let Ok(level) = std::env::var("S3GW_LOG_LEVEL") {
            self.log_level = level;
        }
    }

    /// Resolve configuration: an explicit file, then `S3GW_CONFIG`, then the
    /// default locations, with environment overrides applied last.
    pub fn load(explicit: Option<&str>) -> Result<Self, ConfigError> {
        let path = explicit
            .map(str::to_string)
            .or_else(|| std::env::var("S3GW_CONFIG").ok())
            .or_else(|| {
                ["s3_gateway.toml", "/etc/s3_gateway/config.toml"]
                    .iter()
                    .find(|p| std::path::Path::new(p).exists())
                    .map(|p| p.to_string())
            });

        let mut config = match path {
            Some(ref p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Returns true if signed requests are required for the shared backend.
    pub fn auth_enabled(&self) -> bool {
        self.access_key_id.is_some() && self.secret_access_key.is_some()
    }

    /// Reject contradictory settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.access_key_id.is_some() != self.secret_access_key.is_some() {
            return Err(ConfigError::Invalid(
                "access_key_id and secret_access_key must be set together".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        if let Some(ref key) = self.access_key_id {
            seen.insert(key.as_str());
        }
        for tenant in &self.tenants {
            if !seen.insert(tenant.access_key_id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "access key {} is configured more than once",
                    tenant.access_key_id
                )));
            }
        }

        if let Some(ref tls) = self.tls {
            if tls.cert_path.is_some() != tls.key_path.is_some() {
                return Err(ConfigError::Invalid(
                    "tls.cert_path and tls.key_path must be set together".to_string(),
                ));
            }
        }
        if self.max_object_size == 0 {
            return Err(ConfigError::Invalid(
                "max_object_size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
