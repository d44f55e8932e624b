//! Queue consumer for the Photo Album pipeline.
//!
//! [`QueueConsumer`] receives bounded batches, hands each entry to a
//! [`MessageHandler`] in turn and settles every entry on its own: handled and
//! permanently failed entries are acknowledged, transient failures are left on
//! the queue so the transport redelivers them and, once the receive limit is
//! reached, redrives them to the dead-letter queue.

use crate::config::ConsumerConfig;
use crate::transport::{QueueClient, ReceivedMessage, TransportError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

/// Errors a message handler can report
#[derive(Error, Debug)]
pub enum ConsumerError {
    /// The entry can never succeed; it is acknowledged and skipped
    #[error("Permanent failure: {0}")]
    Permanent(String),

    /// The entry may succeed later; it is left for redelivery
    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Handler timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ConsumerError {
    /// Whether the entry should be redelivered
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ConsumerError::Permanent(_))
    }
}

/// Metadata about a received message
#[derive(Debug, Clone)]
pub struct MessageMetadata {
    /// Queue the message was received from
    pub queue: String,
    /// Transport-assigned message ID
    pub message_id: String,
    /// Delivery attempt, starting at 1
    pub receive_count: u32,
    /// Message attributes
    pub attributes: HashMap<String, String>,
}

/// A received message with body and metadata
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    /// Raw message body
    pub body: String,
    /// Message metadata
    pub metadata: MessageMetadata,
}

impl IncomingMessage {
    pub fn new(queue: impl Into<String>, received: &ReceivedMessage) -> Self {
        Self {
            body: received.body.clone(),
            metadata: MessageMetadata {
                queue: queue.into(),
                message_id: received.message_id.clone(),
                receive_count: received.receive_count,
                attributes: received.attributes.clone(),
            },
        }
    }

    /// Deserialize the body as JSON
    pub fn decode_json<T: serde::de::DeserializeOwned>(&self) -> Result<T, ConsumerError> {
        serde_json::from_str(&self.body).map_err(|e| ConsumerError::Permanent(e.to_string()))
    }

    /// Get an attribute value
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.metadata.attributes.get(name).map(|s| s.as_str())
    }

    pub fn message_id(&self) -> &str {
        &self.metadata.message_id
    }
}

/// Handler trait for processing messages
#[async_trait::async_trait]
pub trait MessageHandler: Send + Sync {
    /// Process a single message
    async fn handle(&self, message: &IncomingMessage) -> Result<(), ConsumerError>;

    /// Called when message processing fails
    async fn on_error(&self, message: &IncomingMessage, error: &ConsumerError) {
        warn!(
            queue = %message.metadata.queue,
            message_id = %message.metadata.message_id,
            receive_count = message.metadata.receive_count,
            retryable = error.is_retryable(),
            error = %error,
            "Message processing failed"
        );
    }
}

/// Settings that bound a consumer's batches and invocations
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub batch_size: u32,
    pub wait_time: Duration,
    pub handler_timeout: Duration,
    pub error_backoff: Duration,
}

impl From<&ConsumerConfig> for ConsumerSettings {
    fn from(config: &ConsumerConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            wait_time: config.wait_time(),
            handler_timeout: config.handler_timeout(),
            error_backoff: config.error_backoff(),
        }
    }
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self::from(&ConsumerConfig::default())
    }
}

/// Outcome of a single received batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Entries received
    pub received: usize,
    /// Entries handled and acknowledged
    pub acknowledged: usize,
    /// Entries that failed permanently and were acknowledged
    pub skipped: usize,
    /// Entries left on the queue for redelivery
    pub retried: usize,
    /// Entries whose acknowledgement failed
    pub ack_failures: usize,
}

/// Batched queue consumer
pub struct QueueConsumer {
    client: Arc<dyn QueueClient>,
    queue_url: String,
    settings: ConsumerSettings,
    shutdown_tx: broadcast::Sender<()>,
}

impl QueueConsumer {
    /// Create a new consumer for the given queue
    pub fn new(
        client: Arc<dyn QueueClient>,
        queue_url: impl Into<String>,
        settings: ConsumerSettings,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            client,
            queue_url: queue_url.into(),
            settings,
            shutdown_tx,
        }
    }

    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }

    /// Get a shutdown receiver
    pub fn shutdown_receiver(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Signal shutdown to stop consuming
    pub fn shutdown(&self) {
        info!(queue = %self.queue_url, "Signaling consumer shutdown");
        let _ = self.shutdown_tx.send(());
    }

    /// Receive one batch and settle every entry in it
    #[instrument(skip(self, handler), fields(queue = %self.queue_url))]
    pub async fn poll_once<H: MessageHandler + ?Sized>(
        &self,
        handler: &H,
    ) -> Result<BatchReport, ConsumerError> {
        let batch = self
            .client
            .receive(&self.queue_url, self.settings.batch_size, self.settings.wait_time)
            .await?;

        let mut report = BatchReport {
            received: batch.len(),
            ..Default::default()
        };

        for received in &batch {
            let incoming = IncomingMessage::new(&self.queue_url, received);

            debug!(
                message_id = %incoming.metadata.message_id,
                receive_count = incoming.metadata.receive_count,
                "Received message"
            );

            let outcome =
                match tokio::time::timeout(self.settings.handler_timeout, handler.handle(&incoming))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(ConsumerError::Timeout(self.settings.handler_timeout)),
                };

            let acknowledge = match outcome {
                Ok(()) => {
                    report.acknowledged += 1;
                    true
                }
                Err(e) => {
                    handler.on_error(&incoming, &e).await;
                    if e.is_retryable() {
                        report.retried += 1;
                        false
                    } else {
                        report.skipped += 1;
                        true
                    }
                }
            };

            if acknowledge {
                if let Err(e) = self
                    .client
                    .acknowledge(&self.queue_url, &received.receipt_handle)
                    .await
                {
                    warn!(
                        message_id = %incoming.metadata.message_id,
                        error = %e,
                        "Failed to acknowledge message"
                    );
                    report.ack_failures += 1;
                }
            }
        }

        metrics::counter!("queue.messages.acknowledged", "queue" => self.queue_url.clone())
            .increment(report.acknowledged as u64);
        metrics::counter!("queue.messages.skipped", "queue" => self.queue_url.clone())
            .increment(report.skipped as u64);
        metrics::counter!("queue.messages.retried", "queue" => self.queue_url.clone())
            .increment(report.retried as u64);

        Ok(report)
    }

    /// Start consuming messages and process them with the given handler
    #[instrument(skip(self, handler), fields(queue = %self.queue_url))]
    pub async fn run<H: MessageHandler + ?Sized>(
        &self,
        handler: Arc<H>,
    ) -> Result<(), ConsumerError> {
        let mut shutdown_rx = self.shutdown_receiver();

        info!("Starting message consumption loop");

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Received shutdown signal");
                    break;
                }
                result = self.poll_once(handler.as_ref()) => {
                    match result {
                        Ok(report) if report.received > 0 => {
                            debug!(?report, "Batch settled");
                        }
                        Ok(_) => {}
                        Err(e) => {
                            error!(error = %e, "Failed to receive batch");
                            tokio::time::sleep(self.settings.error_backoff).await;
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

/// Async trait for message handlers (re-export for convenience)
pub use async_trait::async_trait;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::{MemoryBroker, RedrivePolicy};

    /// Handler whose outcome is chosen by the message body
    struct ScriptedHandler;

    #[async_trait]
    impl MessageHandler for ScriptedHandler {
        async fn handle(&self, message: &IncomingMessage) -> Result<(), ConsumerError> {
            match message.body.as_str() {
                "ok" => Ok(()),
                "bad" => Err(ConsumerError::Permanent("unparseable".to_string())),
                "flaky" => Err(ConsumerError::Transient("store unavailable".to_string())),
                "slow" => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(())
                }
                other => panic!("unexpected body {}", other),
            }
        }
    }

    fn settings() -> ConsumerSettings {
        ConsumerSettings {
            batch_size: 5,
            wait_time: Duration::ZERO,
            handler_timeout: Duration::from_millis(50),
            error_backoff: Duration::from_millis(10),
        }
    }

    async fn broker_with(bodies: &[&str]) -> Arc<MemoryBroker> {
        let broker = Arc::new(MemoryBroker::new());
        broker.create_queue("uploads").await;
        for body in bodies {
            broker.send("uploads", body, &HashMap::new()).await.unwrap();
        }
        broker
    }

    #[tokio::test]
    async fn test_entries_settle_independently() {
        let broker = broker_with(&["ok", "flaky", "bad", "ok"]).await;
        let consumer = QueueConsumer::new(broker.clone(), "uploads", settings());

        let report = consumer.poll_once(&ScriptedHandler).await.unwrap();

        assert_eq!(
            report,
            BatchReport {
                received: 4,
                acknowledged: 2,
                skipped: 1,
                retried: 1,
                ack_failures: 0,
            }
        );
        assert_eq!(broker.peek_bodies("uploads").await, vec!["flaky".to_string()]);
    }

    #[tokio::test]
    async fn test_timeout_is_retryable() {
        let broker = broker_with(&["slow"]).await;
        let consumer = QueueConsumer::new(broker.clone(), "uploads", settings());

        let report = consumer.poll_once(&ScriptedHandler).await.unwrap();

        assert_eq!(report.retried, 1);
        assert_eq!(broker.pending("uploads").await, 1);
    }

    #[tokio::test]
    async fn test_transient_failure_redrives_after_limit() {
        let broker = Arc::new(MemoryBroker::new());
        broker.create_queue("bad-images").await;
        broker
            .create_queue_with_redrive(
                "uploads",
                RedrivePolicy {
                    dead_letter_queue: "bad-images".to_string(),
                    max_receive_count: 5,
                },
            )
            .await;
        broker.send("uploads", "flaky", &HashMap::new()).await.unwrap();

        let consumer = QueueConsumer::new(broker.clone(), "uploads", settings());
        for _ in 0..6 {
            consumer.poll_once(&ScriptedHandler).await.unwrap();
        }

        assert_eq!(broker.pending("uploads").await, 0);
        assert_eq!(broker.peek_bodies("bad-images").await, vec!["flaky".to_string()]);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let broker = broker_with(&["ok"]).await;
        let settings = ConsumerSettings {
            wait_time: Duration::from_millis(20),
            ..settings()
        };
        let consumer = Arc::new(QueueConsumer::new(broker.clone(), "uploads", settings));

        let runner = consumer.clone();
        let handle = tokio::spawn(async move { runner.run(Arc::new(ScriptedHandler)).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        consumer.shutdown();

        handle.await.unwrap().unwrap();
        assert_eq!(broker.pending("uploads").await, 0);
    }

    #[test]
    fn test_error_classification() {
        assert!(!ConsumerError::Permanent("x".into()).is_retryable());
        assert!(ConsumerError::Transient("x".into()).is_retryable());
        assert!(ConsumerError::Timeout(Duration::from_secs(1)).is_retryable());
    }
}
