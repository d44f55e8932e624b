use album_pipeline::{ChannelError, ConsumerError, EnvelopeError, PublishError};
use thiserror::Error;

/// Errors raised by the catalog store
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Catalog record not found: {0}")]
    NotFound(String),

    #[error("Catalog store unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised by the object store
#[derive(Error, Debug)]
pub enum ObjectStoreError {
    #[error("Object store request for {bucket}/{key} failed: {message}")]
    Request {
        bucket: String,
        key: String,
        message: String,
    },
}

/// Errors raised while sending a notification mail
#[derive(Error, Debug)]
pub enum MailError {
    #[error("Invalid mail address {address}: {message}")]
    Address { address: String, message: String },

    #[error("Failed to build mail: {0}")]
    Build(String),

    #[error("Failed to send mail: {0}")]
    Transport(String),
}

/// Failure of a pipeline handler, classified for the queue consumer
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The upload can never be accepted
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The message body cannot be decoded
    #[error("Malformed message: {0}")]
    Parse(String),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    ObjectStore(#[from] ObjectStoreError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

impl PipelineError {
    /// Permanent failures are acknowledged and skipped; everything else is
    /// left on the queue for redelivery and, eventually, redrive.
    pub fn is_permanent(&self) -> bool {
        matches!(self, PipelineError::Validation(_) | PipelineError::Parse(_))
    }
}

impl From<EnvelopeError> for PipelineError {
    fn from(e: EnvelopeError) -> Self {
        PipelineError::Parse(e.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(e: serde_json::Error) -> Self {
        PipelineError::Parse(e.to_string())
    }
}

impl From<PipelineError> for ConsumerError {
    fn from(e: PipelineError) -> Self {
        if e.is_permanent() {
            ConsumerError::Permanent(e.to_string())
        } else {
            ConsumerError::Transient(e.to_string())
        }
    }
}
