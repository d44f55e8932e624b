//! Fan-out notification channel.
//!
//! A [`FanoutChannel`] broadcasts each published [`Notification`] to every
//! subscription whose [`FilterPolicy`] accepts the notification's attributes.
//! Filters are declared when the subscription is registered; subscribers never
//! see messages outside their policy. The subscription list is fixed once the
//! channel is built.

use crate::envelope::FanoutEnvelope;
use crate::transport::{QueueClient, TransportError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

/// Errors that can occur while publishing to the channel
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Failed to encode notification: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Delivery to subscription {subscription} failed: {source}")]
    Delivery {
        subscription: String,
        #[source]
        source: TransportError,
    },
}

/// Attribute-based subscription filter.
///
/// Every attribute named in the policy must be present on the notification
/// with one of the allowed values. An empty policy accepts everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterPolicy {
    rules: BTreeMap<String, Vec<String>>,
}

impl FilterPolicy {
    /// A policy that accepts every notification
    pub fn accept_all() -> Self {
        Self::default()
    }

    /// A policy that accepts notifications whose `attribute` is one of `values`
    pub fn allowlist<I, S>(attribute: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::default().and_allowlist(attribute, values)
    }

    /// Add another attribute rule; all rules must match
    pub fn and_allowlist<I, S>(mut self, attribute: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rules
            .insert(attribute.into(), values.into_iter().map(Into::into).collect());
        self
    }

    pub fn matches(&self, attributes: &HashMap<String, String>) -> bool {
        self.rules.iter().all(|(attribute, allowed)| {
            attributes
                .get(attribute)
                .map(|value| allowed.iter().any(|a| a == value))
                .unwrap_or(false)
        })
    }
}

/// A message published on the channel
#[derive(Debug, Clone)]
pub struct Notification {
    pub message_id: String,
    pub message: String,
    pub attributes: HashMap<String, String>,
    pub published_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            message: message.into(),
            attributes: HashMap::new(),
            published_at: Utc::now(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_attributes(mut self, attributes: HashMap<String, String>) -> Self {
        self.attributes.extend(attributes);
        self
    }
}

/// Where a subscription delivers matching notifications
#[async_trait]
pub trait SubscriptionEndpoint: Send + Sync {
    async fn deliver(&self, topic: &str, notification: &Notification)
        -> Result<(), ChannelError>;

    /// Human-readable endpoint description for logs
    fn describe(&self) -> String;
}

/// Endpoint that enqueues the notification, wrapped in a fan-out envelope
pub struct QueueEndpoint {
    client: Arc<dyn QueueClient>,
    queue_url: String,
}

impl QueueEndpoint {
    pub fn new(client: Arc<dyn QueueClient>, queue_url: impl Into<String>) -> Self {
        Self {
            client,
            queue_url: queue_url.into(),
        }
    }
}

#[async_trait]
impl SubscriptionEndpoint for QueueEndpoint {
    async fn deliver(
        &self,
        topic: &str,
        notification: &Notification,
    ) -> Result<(), ChannelError> {
        let envelope = FanoutEnvelope::new(
            &notification.message_id,
            topic,
            &notification.message,
            &notification.attributes,
        );
        let body = serde_json::to_string(&envelope)?;

        self.client
            .send(&self.queue_url, &body, &notification.attributes)
            .await
            .map_err(|source| ChannelError::Delivery {
                subscription: self.queue_url.clone(),
                source,
            })?;

        Ok(())
    }

    fn describe(&self) -> String {
        format!("queue:{}", self.queue_url)
    }
}

struct Subscription {
    name: String,
    filter: FilterPolicy,
    endpoint: Arc<dyn SubscriptionEndpoint>,
}

/// Which subscriptions a publish reached
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: Vec<String>,
    pub filtered: Vec<String>,
}

/// Fan-out channel with filtered subscriptions
pub struct FanoutChannel {
    topic: String,
    subscriptions: Vec<Subscription>,
}

impl FanoutChannel {
    pub fn builder(topic: impl Into<String>) -> FanoutChannelBuilder {
        FanoutChannelBuilder {
            topic: topic.into(),
            subscriptions: Vec::new(),
        }
    }

    /// Names of the registered subscriptions
    pub fn subscription_names(&self) -> Vec<&str> {
        self.subscriptions.iter().map(|s| s.name.as_str()).collect()
    }

    /// Deliver a notification to every matching subscription.
    ///
    /// Matching subscriptions are delivered to concurrently; the first delivery
    /// failure is returned after the rest have been tried. Subscribers that already
    /// received the notification may see it again when the caller retries.
    #[instrument(skip(self, notification), fields(topic = %self.topic, message_id = %notification.message_id))]
    pub async fn publish(&self, notification: Notification) -> Result<PublishReport, ChannelError> {
        let mut report = PublishReport::default();
        let mut matching = Vec::new();

        for subscription in &self.subscriptions {
            if subscription.filter.matches(&notification.attributes) {
                matching.push(subscription);
            } else {
                debug!(subscription = %subscription.name, "Filtered out by subscription policy");
                report.filtered.push(subscription.name.clone());
            }
        }

        let deliveries = matching
            .iter()
            .map(|subscription| subscription.endpoint.deliver(&self.topic, &notification));
        let results = futures::future::join_all(deliveries).await;

        let mut first_failure = None;
        for (subscription, result) in matching.into_iter().zip(results) {
            match result {
                Ok(()) => {
                    debug!(
                        subscription = %subscription.name,
                        endpoint = %subscription.endpoint.describe(),
                        "Notification delivered"
                    );
                    report.delivered.push(subscription.name.clone());
                }
                Err(e) => {
                    error!(subscription = %subscription.name, error = %e, "Delivery failed");
                    metrics::counter!("channel.deliveries.failed").increment(1);
                    first_failure.get_or_insert(e);
                }
            }
        }

        if let Some(e) = first_failure {
            return Err(e);
        }

        metrics::counter!("channel.notifications.published").increment(1);
        Ok(report)
    }
}

/// Builder for [`FanoutChannel`]
pub struct FanoutChannelBuilder {
    topic: String,
    subscriptions: Vec<Subscription>,
}

impl FanoutChannelBuilder {
    /// Register a subscription with its filter policy
    pub fn subscribe(
        mut self,
        name: impl Into<String>,
        filter: FilterPolicy,
        endpoint: Arc<dyn SubscriptionEndpoint>,
    ) -> Self {
        let name = name.into();
        info!(
            topic = %self.topic,
            subscription = %name,
            endpoint = %endpoint.describe(),
            filter = ?filter,
            "Registering subscription"
        );
        self.subscriptions.push(Subscription {
            name,
            filter,
            endpoint,
        });
        self
    }

    pub fn build(self) -> FanoutChannel {
        FanoutChannel {
            topic: self.topic,
            subscriptions: self.subscriptions,
        }
    }
}
