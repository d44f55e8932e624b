use album_pipeline::{AwsConfig, ConsumerConfig, QueueConfig, QueueUrls};
use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the catalog service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// AWS client configuration
    #[serde(default)]
    pub aws: AwsConfig,
    /// Queue URLs
    pub queues: QueueUrls,
    /// Consumer batching and redelivery settings
    #[serde(default)]
    pub consumer: ConsumerConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Object store configuration
    #[serde(default)]
    pub objects: ObjectsConfig,
    /// Mail configuration
    pub mail: MailConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    /// Name of the fan-out channel that upload events are published on
    #[serde(default = "default_channel_name")]
    pub channel_name: String,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Run migrations on startup
    #[serde(default = "default_run_migrations")]
    pub run_migrations: bool,
    /// Delay before the change listener reconnects, in seconds
    #[serde(default = "default_listener_reconnect_secs")]
    pub listener_reconnect_secs: u64,
}

impl DatabaseConfig {
    /// Get connection acquire timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Get idle connection timeout as Duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

/// Object store configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ObjectsConfig {
    /// Delete the backing object when its removal event is handled
    #[serde(default)]
    pub delete_on_remove: bool,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
}

/// SMTP configuration for upload notifications
#[derive(Debug, Clone, Deserialize)]
pub struct MailConfig {
    /// SMTP relay host
    pub smtp_host: String,
    /// SMTP port
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    /// Use STARTTLS
    #[serde(default = "default_true")]
    pub smtp_tls: bool,
    /// SMTP username
    pub smtp_username: Option<String>,
    /// SMTP password
    pub smtp_password: Option<String>,
    /// Sender address
    pub sender: String,
    /// Recipient address
    pub recipient: String,
}

// Default value functions
fn default_service_name() -> String {
    "album-catalog".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_channel_name() -> String {
    "new-images".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_run_migrations() -> bool {
    true
}

fn default_listener_reconnect_secs() -> u64 {
    5
}

fn default_smtp_port() -> u16 {
    587
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Start with default values
            .set_default("service.name", "album-catalog")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            // Add config file if present
            .add_source(config::File::with_name("config/catalog").required(false))
            .add_source(config::File::with_name("/etc/photo-album/catalog").required(false))
            // Override with environment variables
            // CATALOG__QUEUES__UPLOADS -> queues.uploads
            .add_source(
                config::Environment::with_prefix("CATALOG")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Transport settings in the form the pipeline crate validates
    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            aws: self.aws.clone(),
            urls: self.queues.clone(),
            consumer: self.consumer.clone(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        self.queue_config().validate()?;

        if self.database.url.is_empty() {
            anyhow::bail!("Missing required configuration: database.url");
        }
        if self.mail.sender.is_empty() || self.mail.recipient.is_empty() {
            anyhow::bail!("Missing required configuration: mail.sender and mail.recipient");
        }

        Ok(())
    }

    /// Get the change listener reconnect delay as Duration
    pub fn listener_reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.database.listener_reconnect_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
            channel_name: default_channel_name(),
        }
    }
}
