use super::{QueueClient, ReceivedMessage, TransportError};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// Interval between checks while a receive call long-polls an empty queue
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Moves a message to another queue once it has been received too often
#[derive(Debug, Clone)]
pub struct RedrivePolicy {
    /// Queue that receives exhausted messages
    pub dead_letter_queue: String,
    /// Deliveries allowed before the message is moved
    pub max_receive_count: u32,
}

/// Per-queue options
#[derive(Debug, Clone, Default)]
pub struct QueueOptions {
    pub redrive: Option<RedrivePolicy>,
    /// How long a received message stays hidden before it is delivered again
    pub visibility_timeout: Duration,
}

#[derive(Debug, Clone)]
struct StoredMessage {
    message_id: String,
    body: String,
    attributes: HashMap<String, String>,
    receive_count: u32,
}

#[derive(Debug)]
struct InFlight {
    message: StoredMessage,
    visible_at: Instant,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<StoredMessage>,
    in_flight: HashMap<String, InFlight>,
    options: QueueOptions,
}

impl QueueState {
    fn requeue_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, entry)| entry.visible_at <= now)
            .map(|(receipt, _)| receipt.clone())
            .collect();

        for receipt in expired {
            if let Some(entry) = self.in_flight.remove(&receipt) {
                self.ready.push_back(entry.message);
            }
        }
    }
}

/// In-process queue broker with at-least-once delivery and redrive
#[derive(Debug, Default)]
pub struct MemoryBroker {
    queues: Mutex<HashMap<String, QueueState>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a queue with immediate redelivery and no redrive
    pub async fn create_queue(&self, queue_url: &str) {
        self.create_queue_with(queue_url, QueueOptions::default())
            .await;
    }

    /// Create a queue that redrives exhausted messages to `policy.dead_letter_queue`
    pub async fn create_queue_with_redrive(&self, queue_url: &str, policy: RedrivePolicy) {
        self.create_queue_with(
            queue_url,
            QueueOptions {
                redrive: Some(policy),
                ..Default::default()
            },
        )
        .await;
    }

    pub async fn create_queue_with(&self, queue_url: &str, options: QueueOptions) {
        let mut queues = self.queues.lock().await;
        queues.insert(
            queue_url.to_string(),
            QueueState {
                options,
                ..Default::default()
            },
        );
    }

    /// Approximate number of messages in the queue, in flight included
    pub async fn pending(&self, queue_url: &str) -> usize {
        let queues = self.queues.lock().await;
        queues
            .get(queue_url)
            .map(|state| state.ready.len() + state.in_flight.len())
            .unwrap_or(0)
    }

    /// Bodies of every message in the queue, in flight included
    pub async fn peek_bodies(&self, queue_url: &str) -> Vec<String> {
        let queues = self.queues.lock().await;
        queues
            .get(queue_url)
            .map(|state| {
                state
                    .ready
                    .iter()
                    .map(|m| m.body.clone())
                    .chain(state.in_flight.values().map(|e| e.message.body.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn take_batch(
        &self,
        queue_url: &str,
        max_messages: u32,
    ) -> Result<Vec<ReceivedMessage>, TransportError> {
        let now = Instant::now();
        let mut queues = self.queues.lock().await;

        let mut batch = Vec::new();
        let mut redriven = Vec::new();
        {
            let state = queues
                .get_mut(queue_url)
                .ok_or_else(|| TransportError::UnknownQueue(queue_url.to_string()))?;
            state.requeue_expired(now);

            while batch.len() < max_messages as usize {
                let Some(mut message) = state.ready.pop_front() else {
                    break;
                };

                if let Some(ref policy) = state.options.redrive {
                    if message.receive_count >= policy.max_receive_count {
                        redriven.push((policy.dead_letter_queue.clone(), message));
                        continue;
                    }
                }

                message.receive_count += 1;
                let receipt_handle = Uuid::new_v4().to_string();

                batch.push(ReceivedMessage {
                    message_id: message.message_id.clone(),
                    receipt_handle: receipt_handle.clone(),
                    body: message.body.clone(),
                    attributes: message.attributes.clone(),
                    receive_count: message.receive_count,
                });

                state.in_flight.insert(
                    receipt_handle,
                    InFlight {
                        message,
                        visible_at: now + state.options.visibility_timeout,
                    },
                );
            }
        }

        for (target, mut message) in redriven {
            match queues.get_mut(&target) {
                Some(dead_letter) => {
                    debug!(
                        message_id = %message.message_id,
                        from = %queue_url,
                        to = %target,
                        "Redriving message after exhausting receives"
                    );
                    message.receive_count = 0;
                    dead_letter.ready.push_back(message);
                }
                None => warn!(
                    message_id = %message.message_id,
                    target = %target,
                    "Redrive target does not exist, dropping message"
                ),
            }
        }

        Ok(batch)
    }
}

#[async_trait]
impl QueueClient for MemoryBroker {
    async fn send(
        &self,
        queue_url: &str,
        body: &str,
        attributes: &HashMap<String, String>,
    ) -> Result<String, TransportError> {
        let mut queues = self.queues.lock().await;
        let state = queues
            .get_mut(queue_url)
            .ok_or_else(|| TransportError::UnknownQueue(queue_url.to_string()))?;

        let message_id = Uuid::new_v4().to_string();
        state.ready.push_back(StoredMessage {
            message_id: message_id.clone(),
            body: body.to_string(),
            attributes: attributes.clone(),
            receive_count: 0,
        });

        Ok(message_id)
    }

    async fn receive(
        &self,
        queue_url: &str,
        max_messages: u32,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, TransportError> {
        let deadline = Instant::now() + wait;

        loop {
            let batch = self.take_batch(queue_url, max_messages).await?;
            let now = Instant::now();
            if !batch.is_empty() || now >= deadline {
                return Ok(batch);
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn acknowledge(
        &self,
        queue_url: &str,
        receipt_handle: &str,
    ) -> Result<(), TransportError> {
        let mut queues = self.queues.lock().await;
        let state = queues
            .get_mut(queue_url)
            .ok_or_else(|| TransportError::UnknownQueue(queue_url.to_string()))?;

        state
            .in_flight
            .remove(receipt_handle)
            .map(|_| ())
            .ok_or_else(|| TransportError::Acknowledge {
                queue: queue_url.to_string(),
                message: "receipt handle is no longer valid".to_string(),
            })
    }
}
