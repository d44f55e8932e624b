//! Queue transport abstraction.
//!
//! [`QueueClient`] is the seam between the pipeline and the queue service. The
//! SQS implementation is used in production; [`memory::MemoryBroker`] provides
//! the same at-least-once semantics in process, including redrive, for tests
//! and local runs.

pub mod memory;
pub mod sqs;

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by a queue transport
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to send message to queue {queue}: {message}")]
    Send { queue: String, message: String },

    #[error("Failed to receive messages from queue {queue}: {message}")]
    Receive { queue: String, message: String },

    #[error("Failed to acknowledge message on queue {queue}: {message}")]
    Acknowledge { queue: String, message: String },

    #[error("Unknown queue: {0}")]
    UnknownQueue(String),
}

/// A message received from a queue, not yet acknowledged
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    /// Transport-assigned message ID
    pub message_id: String,
    /// Handle used to acknowledge this particular receipt
    pub receipt_handle: String,
    /// Raw message body
    pub body: String,
    /// Message attributes
    pub attributes: HashMap<String, String>,
    /// How many times the message has been received, this receipt included
    pub receive_count: u32,
}

/// Queue operations the pipeline depends on
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Send a message, returning its transport-assigned ID
    async fn send(
        &self,
        queue_url: &str,
        body: &str,
        attributes: &HashMap<String, String>,
    ) -> Result<String, TransportError>;

    /// Receive up to `max_messages`, waiting at most `wait` for the first one
    async fn receive(
        &self,
        queue_url: &str,
        max_messages: u32,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, TransportError>;

    /// Acknowledge a receipt so the message is not delivered again
    async fn acknowledge(&self, queue_url: &str, receipt_handle: &str)
        -> Result<(), TransportError>;
}
