//! TOML-based planner configuration.
//!
//! Tunables for the scheduling engine: work-chunk bounds, schedule rounding,
//! the slot-search recursion horizon, lock timing, and maintenance-sweep
//! paging. Deployments load a `[planner]`-style TOML table; everything has a
//! default so an empty document is a valid configuration.

use std::path::Path;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

fn default_min_chunk_minutes() -> i64 {
    120
}

fn default_max_chunk_minutes() -> i64 {
    360
}

fn default_rounding_minutes() -> i64 {
    15
}

fn default_direct_fill_horizon_days() -> i64 {
    7
}

fn default_recursion_floor_minutes() -> i64 {
    120
}

fn default_lock_ttl_secs() -> u64 {
    30
}

fn default_lock_backoff_ms() -> u64 {
    250
}

fn default_lock_attempts() -> u32 {
    20
}

fn default_sweep_lock_ttl_secs() -> u64 {
    60
}

fn default_sweep_page_size() -> usize {
    20
}

/// Scheduling engine configuration.
///
/// Serialized to/from TOML; every field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Smallest work block the search will place, in minutes.
    #[serde(default = "default_min_chunk_minutes")]
    pub min_chunk_minutes: i64,
    /// Largest work block the search will place, in minutes.
    #[serde(default = "default_max_chunk_minutes")]
    pub max_chunk_minutes: i64,
    /// Scheduling windows start at "now" rounded up to this granularity.
    #[serde(default = "default_rounding_minutes")]
    pub rounding_minutes: i64,
    /// Windows at most this many days long are filled directly; longer ones
    /// are only partitioned and recursed into.
    #[serde(default = "default_direct_fill_horizon_days")]
    pub direct_fill_horizon_days: i64,
    /// Recursion stops once a partition falls under this length, in minutes.
    #[serde(default = "default_recursion_floor_minutes")]
    pub recursion_floor_minutes: i64,
    /// Time-to-live of a per-task advisory lock, in seconds.
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,
    /// Pause between lock acquisition retries, in milliseconds.
    #[serde(default = "default_lock_backoff_ms")]
    pub lock_backoff_ms: u64,
    /// Acquisition attempts before a lock wait gives up.
    #[serde(default = "default_lock_attempts")]
    pub lock_attempts: u32,
    /// Time-to-live of the per-user unscheduled-sweep lock, in seconds.
    #[serde(default = "default_sweep_lock_ttl_secs")]
    pub sweep_lock_ttl_secs: u64,
    /// Tasks fetched per page by the unscheduled sweep.
    #[serde(default = "default_sweep_page_size")]
    pub sweep_page_size: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            min_chunk_minutes: default_min_chunk_minutes(),
            max_chunk_minutes: default_max_chunk_minutes(),
            rounding_minutes: default_rounding_minutes(),
            direct_fill_horizon_days: default_direct_fill_horizon_days(),
            recursion_floor_minutes: default_recursion_floor_minutes(),
            lock_ttl_secs: default_lock_ttl_secs(),
            lock_backoff_ms: default_lock_backoff_ms(),
            lock_attempts: default_lock_attempts(),
            sweep_lock_ttl_secs: default_sweep_lock_ttl_secs(),
            sweep_page_size: default_sweep_page_size(),
        }
    }
}

impl PlannerConfig {
    /// Parse a configuration from a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::InvalidValue {
            key: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&raw)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.min_chunk_minutes < 0 || self.max_chunk_minutes < 0 {
            return Err(ConfigError::InvalidValue {
                key: "min_chunk_minutes".into(),
                message: "chunk bounds must not be negative".into(),
            });
        }
        if self.max_chunk_minutes > 0 && self.min_chunk_minutes > self.max_chunk_minutes {
            return Err(ConfigError::InvalidValue {
                key: "min_chunk_minutes".into(),
                message: format!(
                    "minimum chunk ({} min) exceeds maximum chunk ({} min)",
                    self.min_chunk_minutes, self.max_chunk_minutes
                ),
            });
        }
        if self.rounding_minutes < 0 {
            return Err(ConfigError::InvalidValue {
                key: "rounding_minutes".into(),
                message: "rounding must not be negative".into(),
            });
        }
        if self.direct_fill_horizon_days <= 0 {
            return Err(ConfigError::InvalidValue {
                key: "direct_fill_horizon_days".into(),
                message: "the direct-fill horizon must be positive".into(),
            });
        }
        if self.sweep_page_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "sweep_page_size".into(),
                message: "page size must be positive".into(),
            });
        }
        Ok(())
    }

    pub fn with_chunk_bounds(mut self, min: Duration, max: Duration) -> Self {
        self.min_chunk_minutes = min.num_minutes();
        self.max_chunk_minutes = max.num_minutes();
        self
    }

    pub fn with_rounding(mut self, rounding: Duration) -> Self {
        self.rounding_minutes = rounding.num_minutes();
        self
    }

    pub fn with_lock_timing(mut self, ttl_secs: u64, backoff_ms: u64, attempts: u32) -> Self {
        self.lock_ttl_secs = ttl_secs;
        self.lock_backoff_ms = backoff_ms;
        self.lock_attempts = attempts;
        self
    }

    pub fn min_chunk(&self) -> Duration {
        Duration::minutes(self.min_chunk_minutes)
    }

    pub fn max_chunk(&self) -> Duration {
        Duration::minutes(self.max_chunk_minutes)
    }

    pub fn rounding(&self) -> Duration {
        Duration::minutes(self.rounding_minutes)
    }

    pub fn direct_fill_horizon(&self) -> Duration {
        Duration::days(self.direct_fill_horizon_days)
    }

    pub fn recursion_floor(&self) -> Duration {
        Duration::minutes(self.recursion_floor_minutes)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::seconds(self.lock_ttl_secs as i64)
    }

    pub fn lock_backoff(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.lock_backoff_ms)
    }

    pub fn sweep_lock_ttl(&self) -> Duration {
        Duration::seconds(self.sweep_lock_ttl_secs as i64)
    }
}
