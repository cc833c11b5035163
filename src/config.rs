//! Engine configuration
//!
//! All knobs for the transfer engine, with defaults matching the desktop
//! tool this engine was built for.

use crate::error::{Result, TransferError};
use serde::{Deserialize, Serialize};

/// Hard ceiling on `max_parallel_transfers`, regardless of configuration
pub const MAX_PARALLEL_CEILING: usize = 16;

/// Main configuration for the transfer engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum transfers driven concurrently
    pub max_parallel_transfers: usize,

    /// Connection establishment timeout in milliseconds
    pub connect_timeout_ms: u64,

    /// Overall per-transfer timeout in milliseconds
    pub transfer_timeout_ms: u64,

    /// DNS cache lifetime in seconds, forwarded to the transport
    pub dns_cache_timeout_secs: u64,

    /// Default retry budget for tasks that don't override it
    pub default_max_retries: u32,

    /// Tick interval of the drive loop in milliseconds
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Idle seconds after which a pooled connection is lazily evicted
    #[serde(default = "default_pool_idle_timeout_secs")]
    pub pool_idle_timeout_secs: u64,

    /// Hard cap on total pooled connections (in use + idle)
    #[serde(default = "default_pool_max_connections")]
    pub pool_max_connections: usize,

    /// Initial retry backoff in milliseconds
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Retry backoff cap in milliseconds
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
}

fn default_tick_interval_ms() -> u64 {
    50
}

fn default_pool_idle_timeout_secs() -> u64 {
    60
}

fn default_pool_max_connections() -> usize {
    32
}

fn default_retry_base_delay_ms() -> u64 {
    100
}

fn default_retry_max_delay_ms() -> u64 {
    5000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_parallel_transfers: 4,
            connect_timeout_ms: 5000,
            transfer_timeout_ms: 30_000,
            dns_cache_timeout_secs: 300,
            default_max_retries: 3,
            tick_interval_ms: default_tick_interval_ms(),
            pool_idle_timeout_secs: default_pool_idle_timeout_secs(),
            pool_max_connections: default_pool_max_connections(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
        }
    }
}

impl EngineConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum parallel transfers
    pub fn max_parallel_transfers(mut self, max: usize) -> Self {
        self.max_parallel_transfers = max;
        self
    }

    /// Set connect timeout in milliseconds
    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.connect_timeout_ms = ms;
        self
    }

    /// Set overall transfer timeout in milliseconds
    pub fn transfer_timeout_ms(mut self, ms: u64) -> Self {
        self.transfer_timeout_ms = ms;
        self
    }

    /// Set the default retry budget
    pub fn default_max_retries(mut self, retries: u32) -> Self {
        self.default_max_retries = retries;
        self
    }

    /// Set the drive loop tick interval in milliseconds
    pub fn tick_interval_ms(mut self, ms: u64) -> Self {
        self.tick_interval_ms = ms;
        self
    }

    /// Set the pool idle eviction timeout in seconds
    pub fn pool_idle_timeout_secs(mut self, secs: u64) -> Self {
        self.pool_idle_timeout_secs = secs;
        self
    }

    /// Set the hard cap on pooled connections
    pub fn pool_max_connections(mut self, cap: usize) -> Self {
        self.pool_max_connections = cap;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_parallel_transfers == 0 {
            return Err(TransferError::invalid_config(
                "max_parallel_transfers",
                "must be at least 1",
            ));
        }

        if self.max_parallel_transfers > MAX_PARALLEL_CEILING {
            return Err(TransferError::invalid_config(
                "max_parallel_transfers",
                format!("exceeds hard ceiling of {}", MAX_PARALLEL_CEILING),
            ));
        }

        if self.tick_interval_ms == 0 {
            return Err(TransferError::invalid_config(
                "tick_interval_ms",
                "must be at least 1",
            ));
        }

        if self.pool_max_connections < self.max_parallel_transfers {
            return Err(TransferError::invalid_config(
                "pool_max_connections",
                "must be >= max_parallel_transfers or active tasks would starve",
            ));
        }

        if self.retry_base_delay_ms == 0 || self.retry_max_delay_ms < self.retry_base_delay_ms {
            return Err(TransferError::invalid_config(
                "retry_max_delay_ms",
                "backoff cap must be >= base delay and base must be non-zero",
            ));
        }

        Ok(())
    }
}
