//! Indexer configuration with startup validation
// src/config.rs
use crate::constants;
use crate::error::DirectoryError;
use serde::{Deserialize, Serialize};

/// Tunables for the ingestion pipeline. All fields have working defaults;
/// a config that validates is the only way to start the indexer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// Worker threads serving the live queue.
    pub worker_count: usize,
    /// Delay before a failed item is retried.
    pub retry_interval_minutes: i64,
    /// Total time budget from the item's creation until it is written off.
    pub max_retry_hours: i64,
    /// How often the scheduler sweeps the retry list.
    pub tick_interval_secs: u64,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            worker_count: constants::DEFAULT_WORKER_COUNT,
            retry_interval_minutes: constants::DEFAULT_RETRY_INTERVAL_MINUTES,
            max_retry_hours: constants::DEFAULT_MAX_RETRY_HOURS,
            tick_interval_secs: constants::DEFAULT_TICK_INTERVAL_SECS,
        }
    }
}

impl IndexerConfig {
    pub fn validate(&self) -> Result<(), DirectoryError> {
        if self.worker_count < 1 {
            return Err(DirectoryError::invalid_config("worker_count must be at least 1"));
        }
        if self.retry_interval_minutes <= 0 {
            return Err(DirectoryError::invalid_config(
                "retry_interval_minutes must be positive",
            ));
        }
        if self.max_retry_hours < 0 {
            return Err(DirectoryError::invalid_config(
                "max_retry_hours must not be negative",
            ));
        }
        if self.tick_interval_secs == 0 {
            return Err(DirectoryError::invalid_config(
                "tick_interval_secs must be positive",
            ));
        }
        Ok(())
    }
}
