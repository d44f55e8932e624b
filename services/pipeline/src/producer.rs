//! Queue publishing for the Photo Album pipeline.
//!
//! This module provides outgoing message construction and the dead-letter
//! publisher used to forward permanently rejected uploads.

use crate::transport::{QueueClient, TransportError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument};

/// Errors that can occur during message publishing
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Failed to serialize message: {0}")]
    SerializationError(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Message to be sent to a queue
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    /// Serialized message body
    pub body: String,
    /// Message attributes
    pub attributes: HashMap<String, String>,
}

impl OutgoingMessage {
    /// Create a new outgoing message with a raw body
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            attributes: HashMap::new(),
        }
    }

    /// Create a new outgoing message with a JSON body
    pub fn new_json<T: Serialize>(message: &T) -> Result<Self, PublishError> {
        let body = serde_json::to_string(message)
            .map_err(|e| PublishError::SerializationError(e.to_string()))?;
        Ok(Self::new(body))
    }

    /// Add an attribute to the message
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Add a message type attribute
    pub fn with_message_type(self, msg_type: impl Into<String>) -> Self {
        self.with_attribute("message-type", msg_type)
    }
}

/// Entry forwarded to the dead-letter queue for a rejected upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    /// Object key of the rejected upload, decoded unless decoding failed
    pub file_name: String,
    /// Why the upload was rejected
    #[serde(default)]
    pub reason: String,
    /// Bucket the object was uploaded to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    /// When the upload was rejected
    #[serde(default = "chrono::Utc::now")]
    pub rejected_at: DateTime<Utc>,
}

impl DeadLetterEntry {
    pub fn new(file_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            reason: reason.into(),
            bucket: None,
            rejected_at: Utc::now(),
        }
    }

    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }
}

/// Publishes messages onto queues through a shared [`QueueClient`]
#[derive(Clone)]
pub struct QueuePublisher {
    client: Arc<dyn QueueClient>,
}

impl QueuePublisher {
    pub fn new(client: Arc<dyn QueueClient>) -> Self {
        Self { client }
    }

    /// Send a message, returning its transport-assigned ID
    #[instrument(skip(self, message), fields(queue = %queue_url))]
    pub async fn send(
        &self,
        queue_url: &str,
        message: OutgoingMessage,
    ) -> Result<String, PublishError> {
        debug!(size = message.body.len(), "Sending message");
        let message_id = self
            .client
            .send(queue_url, &message.body, &message.attributes)
            .await?;
        Ok(message_id)
    }

    /// Forward a rejected upload to the dead-letter queue
    pub async fn send_to_dead_letter(
        &self,
        queue_url: &str,
        entry: &DeadLetterEntry,
    ) -> Result<String, PublishError> {
        let message = OutgoingMessage::new_json(entry)?
            .with_message_type("dead_letter")
            .with_attribute("error-reason", entry.reason.clone());

        let message_id = self.send(queue_url, message).await?;

        info!(
            file_name = %entry.file_name,
            reason = %entry.reason,
            message_id = %message_id,
            "Forwarded upload to dead-letter queue"
        );
        metrics::counter!("queue.dead_letter.forwarded").increment(1);

        Ok(message_id)
    }
}
