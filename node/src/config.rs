//! Node configuration with TOML file support.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use liquid_store::keys;

use crate::NodeError;

/// Configuration for a liquid voting node.
///
/// Can be loaded from a TOML file via [`NodeConfig::from_toml_file`] or
/// built programmatically (e.g. for tests).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Directory for the LMDB audit / snapshot / proposal environment.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Ephemeral voting store.
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// How often the scheduler sweeps for upcoming and expired proposals.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Deadlines within this window of a sweep get an in-process timer.
    #[serde(default = "default_lookahead_secs")]
    pub lookahead_secs: u64,

    #[serde(default = "default_snapshot_interval_secs")]
    pub snapshot_interval_secs: u64,

    /// Hourly snapshots kept per proposal. Other kinds are never pruned.
    #[serde(default = "default_hourly_snapshots_retained")]
    pub hourly_snapshots_retained: usize,

    #[serde(default = "default_max_delegation_hops")]
    pub max_delegation_hops: usize,

    #[serde(default = "default_vote_cooldown_secs")]
    pub vote_cooldown_secs: u64,

    /// Expiry put on a proposal's ephemeral keys once it is fully processed.
    #[serde(default = "default_key_retention_secs")]
    pub key_retention_secs: u64,

    /// Hold the proposal's `lock` key while resolving and tallying.
    #[serde(default = "default_true")]
    pub enforce_resolution_lock: bool,

    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,

    /// Take a `pre_calculation` snapshot before resolving.
    #[serde(default = "default_true")]
    pub pre_calculation_snapshots: bool,

    /// Log format: "human" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Log level filter: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Whether to serve Prometheus metrics.
    #[serde(default)]
    pub enable_metrics: bool,

    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

// ── Serde default helpers ──────────────────────────────────────────────

fn default_data_dir() -> PathBuf {
    PathBuf::from("./liquid_data")
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379/0".to_string()
}

fn default_sweep_interval_secs() -> u64 {
    24 * 3600
}

fn default_lookahead_secs() -> u64 {
    36 * 3600
}

fn default_snapshot_interval_secs() -> u64 {
    3600
}

fn default_hourly_snapshots_retained() -> usize {
    10
}

fn default_max_delegation_hops() -> usize {
    liquid_governance::MAX_DELEGATION_HOPS
}

fn default_vote_cooldown_secs() -> u64 {
    keys::COOLDOWN_SECS
}

fn default_key_retention_secs() -> u64 {
    keys::KEY_RETENTION_SECS
}

fn default_true() -> bool {
    true
}

fn default_lock_ttl_secs() -> u64 {
    300
}

fn default_log_format() -> String {
    "human".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9187
}

// ── Impl ───────────────────────────────────────────────────────────────

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: &str) -> Result<Self, NodeError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| NodeError::Config(e.to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, NodeError> {
        let config: Self = toml::from_str(s).map_err(|e| NodeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml_string(&self) -> Result<String, NodeError> {
        toml::to_string_pretty(self).map_err(|e| NodeError::Config(e.to_string()))
    }

    /// Reject values that would stall or spin the background tasks.
    pub fn validate(&self) -> Result<(), NodeError> {
        if self.sweep_interval_secs == 0 {
            return Err(NodeError::Config("sweep_interval_secs must be positive".into()));
        }
        if self.snapshot_interval_secs == 0 {
            return Err(NodeError::Config("snapshot_interval_secs must be positive".into()));
        }
        if self.lookahead_secs < self.sweep_interval_secs {
            return Err(NodeError::Config(format!(
                "lookahead_secs ({}) must cover sweep_interval_secs ({}) or deadlines fall between sweeps",
                self.lookahead_secs, self.sweep_interval_secs
            )));
        }
        if self.max_delegation_hops == 0 {
            return Err(NodeError::Config("max_delegation_hops must be positive".into()));
        }
        if self.enforce_resolution_lock && self.lock_ttl_secs == 0 {
            return Err(NodeError::Config("lock_ttl_secs must be positive".into()));
        }
        Ok(())
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            redis_url: default_redis_url(),
            sweep_interval_secs: default_sweep_interval_secs(),
            lookahead_secs: default_lookahead_secs(),
            snapshot_interval_secs: default_snapshot_interval_secs(),
            hourly_snapshots_retained: default_hourly_snapshots_retained(),
            max_delegation_hops: default_max_delegation_hops(),
            vote_cooldown_secs: default_vote_cooldown_secs(),
            key_retention_secs: default_key_retention_secs(),
            enforce_resolution_lock: true,
            lock_ttl_secs: default_lock_ttl_secs(),
            pre_calculation_snapshots: true,
            log_format: default_log_format(),
            log_level: default_log_level(),
            enable_metrics: false,
            metrics_port: default_metrics_port(),
        }
    }
}
