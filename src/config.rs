//! Configuration
//!
//! Runtime configuration for the queue and worker pool. Supports layered
//! TOML files (base plus environment overlay) with serde defaults and
//! startup validation.

use crate::error::QueueError;
use crate::logging::LoggingConfig;
use config::{Config, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatonConfig {
    /// Number of background workers draining the queue.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Maximum number of queued envelopes before enqueues are refused.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// How long an idle worker waits before re-checking the queue.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Delay before a failed invocation is re-enqueued for retry.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_workers() -> usize {
    2
}

fn default_queue_capacity() -> usize {
    10_000
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_retry_delay_ms() -> u64 {
    1_000
}

impl Default for BatonConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            poll_interval_ms: default_poll_interval_ms(),
            retry_delay_ms: default_retry_delay_ms(),
            logging: LoggingConfig::default(),
        }
    }
}

impl BatonConfig {
    /// Load configuration from a config directory.
    ///
    /// Precedence: `config.toml` (base) then `{BATON_ENV}.toml` (environment
    /// overlay, default environment `development`). Missing files fall back
    /// to defaults.
    pub fn load(config_dir: &Path) -> Result<Self, QueueError> {
        let env_name = std::env::var("BATON_ENV").unwrap_or_else(|_| "development".to_string());

        let mut builder = Config::builder();

        let base_path = config_dir.join("config.toml");
        if base_path.exists() {
            builder = builder
                .add_source(File::with_name(&base_path.to_string_lossy()).required(false));
        }

        let env_path = config_dir.join(format!("{}.toml", env_name));
        if env_path.exists() {
            builder =
                builder.add_source(File::with_name(&env_path.to_string_lossy()).required(false));
        }

        let config: BatonConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a single TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self, QueueError> {
        let config: BatonConfig = Config::builder()
            .add_source(File::with_name(&path.to_string_lossy()))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), QueueError> {
        if self.workers == 0 {
            return Err(QueueError::ConfigError(
                "workers must be at least 1".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(QueueError::ConfigError(
                "queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(QueueError::ConfigError(
                "poll_interval_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
