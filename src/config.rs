//! Configuration management for Tollgate.
//!
//! Configuration is layered: an optional YAML file, then environment variables
//! prefixed with `TOLLGATE` using `__` between nested keys, e.g.
//! `TOLLGATE__LIMITS__DEFAULT_LIMIT=10` or `TOLLGATE__STORAGE__BACKEND=shared`.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{GateError, Result};
use crate::ratelimit::Policy;

/// Main configuration for the Tollgate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Default policy and seeded token overrides
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Counter store backend
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Deadline for one admission check, in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl ServerConfig {
    /// Deadline for one admission check.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_request_timeout_ms() -> u64 {
    2000
}

/// Rate limit configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Requests allowed per window for identities without an override
    #[serde(default = "default_limit")]
    pub default_limit: u64,

    /// Counting window in milliseconds, shared by all policies
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Block duration in milliseconds for identities without an override
    #[serde(default = "default_block_duration_ms")]
    pub block_duration_ms: u64,

    /// Token overrides installed at start-up
    #[serde(default)]
    pub token_overrides: Vec<TokenOverride>,

    /// How often the local store drops idle counters, in milliseconds
    #[serde(default = "default_purge_interval_ms")]
    pub purge_interval_ms: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            window_ms: default_window_ms(),
            block_duration_ms: default_block_duration_ms(),
            token_overrides: Vec::new(),
            purge_interval_ms: default_purge_interval_ms(),
        }
    }
}

impl LimitsConfig {
    /// Build the default policy.
    pub fn default_policy(&self) -> Result<Policy> {
        Policy::new(
            self.default_limit,
            Duration::from_millis(self.window_ms),
            Duration::from_millis(self.block_duration_ms),
        )
    }

    /// Get the local store purge interval as a Duration.
    pub fn purge_interval(&self) -> Duration {
        Duration::from_millis(self.purge_interval_ms)
    }
}

fn default_limit() -> u64 {
    5
}

fn default_window_ms() -> u64 {
    1000
}

fn default_block_duration_ms() -> u64 {
    30_000
}

fn default_purge_interval_ms() -> u64 {
    60_000
}

/// A per-token policy override.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenOverride {
    /// The API token
    pub token: String,
    /// Requests allowed per window
    pub limit: u64,
    /// Block duration in milliseconds
    #[serde(default)]
    pub block_duration_ms: u64,
}

impl TokenOverride {
    /// Block duration as a `Duration`.
    pub fn block_duration(&self) -> Duration {
        Duration::from_millis(self.block_duration_ms)
    }
}

/// Counter store backend selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-process counters; no external dependency
    #[default]
    Local,
    /// Counters held in Redis
    Shared(SharedStoreConfig),
}

/// Connection settings for the shared counter store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedStoreConfig {
    /// `host:port` of the Redis server
    #[serde(default = "default_redis_address")]
    pub address: String,

    /// ACL username
    #[serde(default)]
    pub username: Option<String>,

    /// Password
    #[serde(default)]
    pub password: Option<String>,

    /// Logical database index
    #[serde(default)]
    pub database: i64,

    /// Prefix for every key this service writes
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Per-command timeout in milliseconds
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
}

impl Default for SharedStoreConfig {
    fn default() -> Self {
        Self {
            address: default_redis_address(),
            username: None,
            password: None,
            database: 0,
            namespace: default_namespace(),
            command_timeout_ms: default_command_timeout_ms(),
        }
    }
}

impl SharedStoreConfig {
    /// Per-command timeout.
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

fn default_redis_address() -> String {
    "127.0.0.1:6379".to_string()
}

fn default_namespace() -> String {
    "tollgate".to_string()
}

fn default_command_timeout_ms() -> u64 {
    1000
}

impl GateConfig {
    /// Load configuration from an optional YAML file overlaid with
    /// `TOLLGATE__*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(
                config::File::from(path).format(config::FileFormat::Yaml),
            );
        }

        let config: GateConfig = builder
            .add_source(
                config::Environment::with_prefix("TOLLGATE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| GateError::Config(e.to_string()))
    }

    /// Reject policies that could never be installed.
    pub fn validate(&self) -> Result<()> {
        self.limits.default_policy()?;
        for token_override in &self.limits.token_overrides {
            if token_override.token.trim().is_empty() {
                return Err(GateError::InvalidPolicy("token must not be empty".to_string()));
            }
            Policy::new(
                token_override.limit,
                Duration::from_millis(self.limits.window_ms),
                token_override.block_duration(),
            )?;
        }
        if self.limits.purge_interval_ms == 0 {
            return Err(GateError::Config("purge_interval_ms must be greater than zero".to_string()));
        }
        if self.server.request_timeout_ms == 0 {
            return Err(GateError::Config("request_timeout_ms must be greater than zero".to_string()));
        }
        if let StorageConfig::Shared(shared) = &self.storage {
            if shared.command_timeout_ms == 0 {
                return Err(GateError::Config("command_timeout_ms must be greater than zero".to_string()));
            }
        }
        Ok(())
    }
}
