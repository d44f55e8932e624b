//! Transport configuration for the Photo Album pipeline.
//!
//! This module provides configuration structures for connecting to the queue
//! service and for tuning how consumers receive and acknowledge batches.

use crate::transport::memory::RedrivePolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Largest batch a single receive call may return
pub const MAX_BATCH_SIZE: u32 = 10;

/// Longest long-poll wait supported by the queue service
pub const MAX_WAIT_TIME_SECS: u64 = 20;

/// Errors that can occur during configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// AWS client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsConfig {
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for LocalStack, ElasticMQ, etc.)
    pub endpoint_url: Option<String>,
}

fn default_region() -> String {
    "eu-west-1".to_string()
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            endpoint_url: None,
        }
    }
}

/// Queue URLs for every stage of the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueUrls {
    /// Queue fed by the object store and metadata publishers
    pub ingress: String,
    /// Upload events awaiting validation
    pub uploads: String,
    /// Filtered metadata update messages
    pub metadata: String,
    /// Object removal events
    pub deletions: String,
    /// Dead-letter queue for rejected or repeatedly failing uploads
    pub dead_letter: String,
}

/// Consumer-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Maximum messages per receive call
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    /// Long-poll wait window in seconds
    #[serde(default = "default_wait_time_secs")]
    pub wait_time_secs: u64,
    /// Upper bound on handling a single message, in seconds
    #[serde(default = "default_handler_timeout_secs")]
    pub handler_timeout_secs: u64,
    /// Receive count after which the queue redrives a message to its dead-letter queue
    #[serde(default = "default_max_receive_count")]
    pub max_receive_count: u32,
    /// Pause after a failed receive call, in milliseconds
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,
    /// How long a received, unacknowledged message stays hidden, in seconds
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,
}

fn default_batch_size() -> u32 {
    5
}

fn default_wait_time_secs() -> u64 {
    10
}

fn default_handler_timeout_secs() -> u64 {
    15
}

fn default_max_receive_count() -> u32 {
    5
}

fn default_error_backoff_ms() -> u64 {
    1000
}

fn default_visibility_timeout_secs() -> u64 {
    90
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            wait_time_secs: default_wait_time_secs(),
            handler_timeout_secs: default_handler_timeout_secs(),
            max_receive_count: default_max_receive_count(),
            error_backoff_ms: default_error_backoff_ms(),
            visibility_timeout_secs: default_visibility_timeout_secs(),
        }
    }
}

impl ConsumerConfig {
    /// Get the long-poll wait window as Duration
    pub fn wait_time(&self) -> Duration {
        Duration::from_secs(self.wait_time_secs)
    }

    /// Get the per-message handler timeout as Duration
    pub fn handler_timeout(&self) -> Duration {
        Duration::from_secs(self.handler_timeout_secs)
    }

    /// Get the receive error backoff as Duration
    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    /// Get the visibility timeout as Duration
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    /// Redrive policy matching the configured receive limit
    pub fn redrive_policy(&self, dead_letter_queue: impl Into<String>) -> RedrivePolicy {
        RedrivePolicy {
            dead_letter_queue: dead_letter_queue.into(),
            max_receive_count: self.max_receive_count,
        }
    }
}

/// Main transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// AWS client settings
    #[serde(default)]
    pub aws: AwsConfig,
    /// Queue URLs
    pub urls: QueueUrls,
    /// Consumer settings
    #[serde(default)]
    pub consumer: ConsumerConfig,
}

impl QueueConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let urls = [
            ("urls.ingress", &self.urls.ingress),
            ("urls.uploads", &self.urls.uploads),
            ("urls.metadata", &self.urls.metadata),
            ("urls.deletions", &self.urls.deletions),
            ("urls.dead_letter", &self.urls.dead_letter),
        ];
        for (key, url) in urls {
            if url.is_empty() {
                return Err(ConfigError::MissingRequired(key.to_string()));
            }
        }

        if self.urls.dead_letter == self.urls.uploads {
            return Err(ConfigError::InvalidValue {
                key: "urls.dead_letter".to_string(),
                message: "must differ from the uploads queue".to_string(),
            });
        }

        let consumer = &self.consumer;
        if consumer.batch_size == 0 || consumer.batch_size > MAX_BATCH_SIZE {
            return Err(ConfigError::InvalidValue {
                key: "consumer.batch_size".to_string(),
                message: format!("must be between 1 and {}", MAX_BATCH_SIZE),
            });
        }

        if consumer.wait_time_secs > MAX_WAIT_TIME_SECS {
            return Err(ConfigError::InvalidValue {
                key: "consumer.wait_time_secs".to_string(),
                message: format!("must not exceed {}", MAX_WAIT_TIME_SECS),
            });
        }

        if consumer.handler_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "consumer.handler_timeout_secs".to_string(),
                message: "must be positive".to_string(),
            });
        }

        // Entries of a batch are handled one after another
        let batch_budget = u64::from(consumer.batch_size) * consumer.handler_timeout_secs;
        if consumer.visibility_timeout_secs < batch_budget {
            return Err(ConfigError::InvalidValue {
                key: "consumer.visibility_timeout_secs".to_string(),
                message: format!(
                    "must be at least batch_size * handler_timeout_secs ({})",
                    batch_budget
                ),
            });
        }

        if consumer.max_receive_count == 0 {
            return Err(ConfigError::InvalidValue {
                key: "consumer.max_receive_count".to_string(),
                message: "must be positive".to_string(),
            });
        }

        Ok(())
    }
}
