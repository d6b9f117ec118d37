use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration loaded from `~/.faultline/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub throttle: ThrottleConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub partitioning: PartitioningConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            throttle: ThrottleConfig::default(),
            batch: BatchConfig::default(),
            alerts: AlertsConfig::default(),
            partitioning: PartitioningConfig::default(),
        }
    }
}

impl Config {
    /// Load config from `~/.faultline/config.toml`, falling back to defaults
    /// when the file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::Io(e.to_string()))?;
            let cfg: Config =
                toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
            Ok(cfg)
        } else {
            Ok(Config::default())
        }
    }

    /// Load from a specific path.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text =
            std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let cfg: Config =
            toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(cfg)
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".faultline")
            .join("config.toml")
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

/// Network-tier bind address and request-body limits (spec §5 "Network tier",
/// §4.1 "hard cap, 413").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_request_bytes")]
    pub max_request_bytes: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_request_bytes: default_max_request_bytes(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    9000
}
fn default_max_request_bytes() -> u64 {
    20 * 1024 * 1024
}

/// SQLite store location (spec §3.1 storage-engine decision).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

fn default_storage_path() -> String {
    "~/.faultline/events.db".into()
}

/// Block cache TTL and periodic-audit probability (spec §4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    #[serde(default = "default_block_cache_ttl_secs")]
    pub block_cache_ttl_secs: u64,
    #[serde(default = "default_audit_probability_denominator")]
    pub audit_probability_denominator: u32,
    #[serde(default = "default_min_retry_after_secs")]
    pub min_retry_after_at_full_throttle_secs: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            block_cache_ttl_secs: default_block_cache_ttl_secs(),
            audit_probability_denominator: default_audit_probability_denominator(),
            min_retry_after_at_full_throttle_secs: default_min_retry_after_secs(),
        }
    }
}

fn default_block_cache_ttl_secs() -> u64 {
    30
}
fn default_audit_probability_denominator() -> u32 {
    5000
}
fn default_min_retry_after_secs() -> u64 {
    600
}

/// Batch-tier flush thresholds (spec §5 "Batch tier").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_flush_every")]
    pub flush_every: usize,
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            flush_every: default_flush_every(),
            flush_interval_secs: default_flush_interval_secs(),
            queue_capacity: default_queue_capacity(),
            worker_count: default_worker_count(),
        }
    }
}

fn default_flush_every() -> usize {
    100
}
fn default_flush_interval_secs() -> u64 {
    2
}
fn default_queue_capacity() -> usize {
    10_000
}
fn default_worker_count() -> usize {
    4
}

/// Alert evaluator tick interval and per-dispatch caps (spec §4.7, §4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertsConfig {
    #[serde(default = "default_eval_interval_secs")]
    pub eval_interval_secs: u64,
    #[serde(default = "default_max_issues_per_alert")]
    pub max_issues_per_alert: usize,
    #[serde(default = "default_dispatch_timeout_secs")]
    pub dispatch_timeout_secs: u64,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            eval_interval_secs: default_eval_interval_secs(),
            max_issues_per_alert: default_max_issues_per_alert(),
            dispatch_timeout_secs: default_dispatch_timeout_secs(),
        }
    }
}

fn default_eval_interval_secs() -> u64 {
    60
}
fn default_max_issues_per_alert() -> usize {
    3
}
fn default_dispatch_timeout_secs() -> u64 {
    10
}

/// Logical partitioning / retention (spec §6.6, §3.1 storage-engine
/// decision, §9.1 Open Question #1: 24h soft-delete grace window).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitioningConfig {
    #[serde(default = "default_soft_delete_grace_hours")]
    pub soft_delete_grace_hours: i64,
    #[serde(default = "default_maintenance_interval_secs")]
    pub maintenance_interval_secs: u64,
}

impl Default for PartitioningConfig {
    fn default() -> Self {
        Self {
            soft_delete_grace_hours: default_soft_delete_grace_hours(),
            maintenance_interval_secs: default_maintenance_interval_secs(),
        }
    }
}

fn default_soft_delete_grace_hours() -> i64 {
    24
}
fn default_maintenance_interval_secs() -> u64 {
    3600
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_toml() {
        let cfg = Config::default();
        let text = cfg.to_toml().unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.server.port, cfg.server.port);
        assert_eq!(parsed.batch.flush_every, cfg.batch.flush_every);
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let parsed: Config = toml::from_str("[server]\nport = 9999\n").unwrap();
        assert_eq!(parsed.server.port, 9999);
        assert_eq!(parsed.throttle.block_cache_ttl_secs, 30);
        assert_eq!(parsed.alerts.max_issues_per_alert, 3);
    }
}
