//! Configuration loading, validation, and management for Shelfwise.
//!
//! Loads configuration from `~/.shelfwise/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use shelfwise_core::Shelf;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix shared by every environment override.
pub const ENV_PREFIX: &str = "SHELFWISE_";

/// The root configuration structure.
///
/// Maps directly to `~/.shelfwise/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Query parsing limits
    #[serde(default)]
    pub query: QueryConfig,

    /// Result cache
    #[serde(default)]
    pub cache: CacheConfig,

    /// Per-agent / per-shelf admission control
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Fan-out behavior
    #[serde(default)]
    pub aggregator: AggregatorConfig,

    /// Registered connectors, in registration order
    #[serde(default)]
    pub connectors: Vec<ConnectorConfig>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    #[serde(default = "default_limit")]
    pub default_limit: usize,

    #[serde(default = "default_max_limit")]
    pub max_limit: usize,
}

fn default_limit() -> usize {
    50
}
fn default_max_limit() -> usize {
    500
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            max_limit: default_max_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Entry lifetime in seconds
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_ttl_secs() -> u64 {
    300
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: default_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Sustained rate per (agent, shelf)
    #[serde(default = "default_rpm")]
    pub requests_per_minute: u32,

    /// Bucket capacity per (agent, shelf)
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Sustained rate across all shelves for one agent
    #[serde(default = "default_agent_rpm")]
    pub agent_requests_per_minute: u32,

    #[serde(default = "default_agent_burst")]
    pub agent_burst: u32,

    /// Attempts before a denial becomes terminal
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// Buckets untouched for this long are evicted
    #[serde(default = "default_idle_evict_secs")]
    pub idle_evict_secs: u64,
}

fn default_rpm() -> u32 {
    60
}
fn default_burst() -> u32 {
    10
}
fn default_agent_rpm() -> u32 {
    240
}
fn default_agent_burst() -> u32 {
    40
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    100
}
fn default_backoff_max_ms() -> u64 {
    2_000
}
fn default_idle_evict_secs() -> u64 {
    600
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: default_rpm(),
            burst: default_burst(),
            agent_requests_per_minute: default_agent_rpm(),
            agent_burst: default_agent_burst(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            idle_evict_secs: default_idle_evict_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Per-connector fetch timeout
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,

    /// Concurrent fetches allowed against one shelf
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency_per_shelf: usize,
}

fn default_fetch_timeout_ms() -> u64 {
    5_000
}
fn default_max_concurrency() -> usize {
    4
}

impl AggregatorConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_ms: default_fetch_timeout_ms(),
            max_concurrency_per_shelf: default_max_concurrency(),
        }
    }
}

/// One `[[connectors]]` entry.
#[derive(Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    pub name: String,

    /// Connector implementation; only `fixture` ships in-tree
    #[serde(default = "default_kind")]
    pub kind: String,

    /// Provenance system name; defaults to the connector name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    /// JSON file backing a fixture connector
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Shelves served (`identity`, `comms`, ...)
    #[serde(default)]
    pub shelves: Vec<String>,

    /// Filter fields applied by the source itself
    #[serde(default)]
    pub native_filters: Vec<String>,

    /// Simulated latency per fetch
    #[serde(default)]
    pub latency_ms: u64,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Free-form settings; also fed by `SHELFWISE_<CONNECTOR>_<KEY>`
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
}

fn default_kind() -> String {
    "fixture".into()
}

/// Setting keys whose values never appear in Debug output.
fn is_secret_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    ["token", "secret", "password", "key", "credential"]
        .iter()
        .any(|marker| key.contains(marker))
}

impl std::fmt::Debug for ConnectorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let settings: BTreeMap<&str, &str> = self
            .settings
            .iter()
            .map(|(k, v)| {
                let shown = if is_secret_key(k) { "[REDACTED]" } else { v.as_str() };
                (k.as_str(), shown)
            })
            .collect();

        f.debug_struct("ConnectorConfig")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("system", &self.system)
            .field("path", &self.path)
            .field("shelves", &self.shelves)
            .field("native_filters", &self.native_filters)
            .field("latency_ms", &self.latency_ms)
            .field("enabled", &self.enabled)
            .field("settings", &settings)
            .finish()
    }
}

impl ConnectorConfig {
    /// Parsed shelf list. Validation guarantees every entry parses.
    pub fn parsed_shelves(&self) -> Vec<Shelf> {
        self.shelves.iter().filter_map(|s| s.parse().ok()).collect()
    }

    /// Name as it appears in environment variables.
    fn env_name(&self) -> String {
        self.name.to_ascii_uppercase().replace(['-', '.', ' '], "_")
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.shelfwise/config.toml),
    /// then apply environment overrides:
    /// - `SHELFWISE_CONNECTORS`: comma list of enabled connectors
    /// - `SHELFWISE_CACHE_TTL`: cache TTL in seconds
    /// - `SHELFWISE_<CONNECTOR>_<KEY>`: connector settings
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::config_path())?;
        config.apply_env(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply `SHELFWISE_*` overrides from an iterator of environment pairs.
    pub fn apply_env<I>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(rest) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };

            match rest {
                "CONNECTORS" => {
                    let enabled: Vec<&str> = value
                        .split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .collect();
                    for name in &enabled {
                        if !self.connectors.iter().any(|c| c.name == *name) {
                            tracing::warn!(connector = %name, "SHELFWISE_CONNECTORS names an unconfigured connector");
                        }
                    }
                    for connector in &mut self.connectors {
                        connector.enabled = enabled.contains(&connector.name.as_str());
                    }
                }
                "CACHE_TTL" => {
                    self.cache.ttl_secs = value.trim().parse().map_err(|_| {
                        ConfigError::ValidationError(format!(
                            "SHELFWISE_CACHE_TTL must be a whole number of seconds, got '{value}'"
                        ))
                    })?;
                }
                _ => {
                    // Longest connector name first so `GMAIL_WORK_TOKEN` prefers
                    // a connector named `gmail-work` over `gmail`.
                    let mut candidates: Vec<&mut ConnectorConfig> = self.connectors.iter_mut().collect();
                    candidates.sort_by_key(|c| std::cmp::Reverse(c.name.len()));
                    for connector in candidates {
                        let prefix = format!("{}_", connector.env_name());
                        if let Some(setting) = rest.strip_prefix(&prefix)
                            && !setting.is_empty()
                        {
                            connector
                                .settings
                                .insert(setting.to_ascii_lowercase(), value.clone());
                            break;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".shelfwise")
    }

    /// Get the default configuration file path.
    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.query.default_limit == 0 {
            return Err(ConfigError::ValidationError(
                "query.default_limit must be > 0".into(),
            ));
        }
        if self.query.default_limit > self.query.max_limit {
            return Err(ConfigError::ValidationError(
                "query.default_limit must not exceed query.max_limit".into(),
            ));
        }

        let rl = &self.rate_limit;
        if rl.requests_per_minute == 0 || rl.agent_requests_per_minute == 0 {
            return Err(ConfigError::ValidationError(
                "rate_limit requests_per_minute values must be > 0".into(),
            ));
        }
        if rl.burst == 0 || rl.agent_burst == 0 {
            return Err(ConfigError::ValidationError(
                "rate_limit burst values must be >= 1".into(),
            ));
        }
        if rl.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "rate_limit.max_attempts must be >= 1".into(),
            ));
        }

        if self.aggregator.fetch_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "aggregator.fetch_timeout_ms must be > 0".into(),
            ));
        }
        if self.aggregator.max_concurrency_per_shelf == 0 {
            return Err(ConfigError::ValidationError(
                "aggregator.max_concurrency_per_shelf must be >= 1".into(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for connector in &self.connectors {
            if connector.name.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "connector name must not be empty".into(),
                ));
            }
            if !seen.insert(connector.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate connector name '{}'",
                    connector.name
                )));
            }
            if connector.kind != "fixture" {
                return Err(ConfigError::ValidationError(format!(
                    "connector '{}' has unknown kind '{}'",
                    connector.name, connector.kind
                )));
            }
            for shelf in &connector.shelves {
                if shelf.parse::<Shelf>().is_err() {
                    return Err(ConfigError::ValidationError(format!(
                        "connector '{}' lists unknown shelf '{shelf}'",
                        connector.name
                    )));
                }
            }
        }

        Ok(())
    }

    /// Connectors that are switched on, in registration order.
    pub fn enabled_connectors(&self) -> impl Iterator<Item = &ConnectorConfig> {
        self.connectors.iter().filter(|c| c.enabled)
    }

    /// A copy with secret connector settings masked, for display.
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        for connector in &mut config.connectors {
            for (key, value) in connector.settings.iter_mut() {
                if is_secret_key(key) {
                    *value = "[REDACTED]".into();
                }
            }
        }
        config
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            query: QueryConfig::default(),
            cache: CacheConfig::default(),
            rate_limit: RateLimitConfig::default(),
            aggregator: AggregatorConfig::default(),
            connectors: vec![],
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for shelfwise_core::Error {
    fn from(err: ConfigError) -> Self {
        shelfwise_core::Error::Config {
            message: err.to_string(),
        }
    }
}
