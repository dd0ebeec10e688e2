use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::models::{ChatId, ConnectionFailurePolicy, RegionId};
use crate::resilience::timeout;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub region: RegionConfig,
    pub redis: RedisConfig,
    pub registry: RegistryConfig,
    pub push: PushConfig,
    pub dispatcher: DispatcherConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub http_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 8080,
        }
    }
}

/// This deployment's region and its static replication targets
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionConfig {
    pub name: String,
    /// Chat used when a gateway hook does not name one
    pub default_chat: String,
    pub peers: Vec<PeerRegionConfig>,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            name: "local".to_string(),
            default_chat: ChatId::default_chat().0,
            peers: Vec::new(),
        }
    }
}

/// A peer region: events received here are replicated to its channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerRegionConfig {
    pub name: String,
    pub redis_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Empty selects single-node mode (in-process registry and channel)
    pub url: String,
    pub key_prefix: String,
    pub operation_timeout_seconds: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            key_prefix: "chatrelay:".to_string(),
            operation_timeout_seconds: timeout::REDIS_OPERATION_TIMEOUT.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub lease_seconds: u64,
    pub reap_interval_seconds: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            lease_seconds: 3600, // 1 hour
            reap_interval_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    /// Base address of the gateway's connection-management endpoint
    pub endpoint: String,
    pub timeout_seconds: u64,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:3001".to_string(),
            timeout_seconds: timeout::PUSH_REQUEST_TIMEOUT.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub failure_policy: ConnectionFailurePolicy,
    /// Pushes in flight for one message event
    pub push_concurrency: usize,
    /// Message events dispatched at the same time
    pub max_in_flight: usize,
    pub queue_capacity: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            failure_policy: ConnectionFailurePolicy::Ignore,
            push_concurrency: 32,
            max_in_flight: 64,
            queue_capacity: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided, it must exist)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        // A named file is required; a missing one is an error, not a fallback
        if let Some(path) = config_file {
            builder = builder.add_source(File::from(Path::new(path)).required(true));
        }

        // CHATRELAY_REGION__NAME, CHATRELAY_SERVER__HTTP_PORT, ...
        builder = builder.add_source(
            Environment::with_prefix("CHATRELAY")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only (for Docker/K8s)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Check the configuration, collecting every problem found
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.region.name.trim().is_empty() {
            errors.push("region.name must not be empty".to_string());
        }
        if self.region.default_chat.trim().is_empty() {
            errors.push("region.default_chat must not be empty".to_string());
        }

        let mut seen = HashSet::new();
        for peer in &self.region.peers {
            if peer.name.trim().is_empty() {
                errors.push("region.peers[].name must not be empty".to_string());
                continue;
            }
            if peer.name == self.region.name {
                errors.push(format!(
                    "region.peers must not contain this region ({})",
                    peer.name
                ));
            }
            if !seen.insert(peer.name.as_str()) {
                errors.push(format!("region.peers contains {} more than once", peer.name));
            }
            if peer.redis_url.trim().is_empty() {
                errors.push(format!("region.peers.{}.redis_url must not be empty", peer.name));
            }
        }
        if !self.region.peers.is_empty() && self.redis.url.is_empty() {
            errors.push("region.peers requires redis.url (single-node mode cannot replicate)".to_string());
        }

        if self.registry.lease_seconds == 0 {
            errors.push("registry.lease_seconds must be greater than 0".to_string());
        }
        if self.registry.reap_interval_seconds == 0 {
            errors.push("registry.reap_interval_seconds must be greater than 0".to_string());
        }
        if self.redis.operation_timeout_seconds == 0 {
            errors.push("redis.operation_timeout_seconds must be greater than 0".to_string());
        }

        if !(self.push.endpoint.starts_with("http://") || self.push.endpoint.starts_with("https://")) {
            errors.push(format!(
                "push.endpoint must be an http(s) URL, got {:?}",
                self.push.endpoint
            ));
        }
        if self.push.timeout_seconds == 0 {
            errors.push("push.timeout_seconds must be greater than 0".to_string());
        }

        if self.dispatcher.push_concurrency == 0 {
            errors.push("dispatcher.push_concurrency must be greater than 0".to_string());
        }
        if self.dispatcher.max_in_flight == 0 {
            errors.push("dispatcher.max_in_flight must be greater than 0".to_string());
        }
        if self.dispatcher.queue_capacity == 0 {
            errors.push("dispatcher.queue_capacity must be greater than 0".to_string());
        }

        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!(
                "logging.format must be \"json\" or \"pretty\", got {:?}",
                self.logging.format
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Get HTTP address
    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.http_port)
    }

    /// Whether Redis backs the registry and channels
    #[must_use]
    pub fn redis_enabled(&self) -> bool {
        !self.redis.url.is_empty()
    }

    #[must_use]
    pub fn region_id(&self) -> RegionId {
        RegionId::from_string(self.region.name.clone())
    }

    #[must_use]
    pub fn default_chat_id(&self) -> ChatId {
        ChatId::from_string(self.region.default_chat.clone())
    }

    #[must_use]
    pub fn peer_region_ids(&self) -> Vec<RegionId> {
        self.region
            .peers
            .iter()
            .map(|p| RegionId::from_string(p.name.clone()))
            .collect()
    }

    #[must_use]
    pub const fn lease(&self) -> Duration {
        Duration::from_secs(self.registry.lease_seconds)
    }

    #[must_use]
    pub const fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.registry.reap_interval_seconds)
    }

    #[must_use]
    pub const fn redis_timeout(&self) -> Duration {
        Duration::from_secs(self.redis.operation_timeout_seconds)
    }

    #[must_use]
    pub const fn push_timeout(&self) -> Duration {
        Duration::from_secs(self.push.timeout_seconds)
    }
}
