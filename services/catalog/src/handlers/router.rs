//! Ingress routing onto the image channel.
//!
//! The ingress queue receives raw object-store notifications and metadata
//! messages. Object notifications are split into one notification per record and
//! tagged with their event family so that channel subscriptions can filter on
//! it; other messages are forwarded with their attributes unchanged.

use crate::error::PipelineError;
use crate::model::MetadataType;
use album_pipeline::envelope::MAX_ENVELOPE_DEPTH;
use album_pipeline::{
    async_trait, ConsumerError, Envelope, FanoutChannel, FilterPolicy, IncomingMessage,
    MessageHandler, Notification, ObjectEvent, ObjectEventKind, QueueClient, QueueEndpoint,
    QueueUrls, METADATA_TYPE_ATTRIBUTE, OBJECT_EVENT_ATTRIBUTE,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Build the image channel with its three filtered subscriptions
pub fn image_channel(
    client: Arc<dyn QueueClient>,
    topic: &str,
    urls: &QueueUrls,
) -> FanoutChannel {
    FanoutChannel::builder(topic)
        .subscribe(
            "uploads",
            FilterPolicy::allowlist(OBJECT_EVENT_ATTRIBUTE, [ObjectEventKind::Created.as_str()]),
            Arc::new(QueueEndpoint::new(client.clone(), urls.uploads.clone())),
        )
        .subscribe(
            "deletions",
            FilterPolicy::allowlist(OBJECT_EVENT_ATTRIBUTE, [ObjectEventKind::Removed.as_str()]),
            Arc::new(QueueEndpoint::new(client.clone(), urls.deletions.clone())),
        )
        .subscribe(
            "metadata",
            FilterPolicy::allowlist(
                METADATA_TYPE_ATTRIBUTE,
                MetadataType::ALL.iter().map(|kind| kind.as_str()),
            ),
            Arc::new(QueueEndpoint::new(client, urls.metadata.clone())),
        )
        .build()
}

/// Publishes ingress messages on the image channel
pub struct IngressRouter {
    channel: Arc<FanoutChannel>,
}

impl IngressRouter {
    pub fn new(channel: Arc<FanoutChannel>) -> Self {
        Self { channel }
    }

    /// Split a message body into the notifications it should be published as
    pub fn notifications(
        body: &str,
        attributes: &HashMap<String, String>,
    ) -> Result<Vec<Notification>, PipelineError> {
        let mut out = Vec::new();
        collect(body, attributes.clone(), 0, &mut out)?;
        Ok(out)
    }

    /// Publish every notification carried by the message
    #[instrument(skip(self, message), fields(message_id = %message.message_id()))]
    pub async fn route(&self, message: &IncomingMessage) -> Result<usize, PipelineError> {
        let notifications = Self::notifications(&message.body, &message.metadata.attributes)?;
        let count = notifications.len();

        for notification in notifications {
            let report = self.channel.publish(notification).await?;
            if report.delivered.is_empty() {
                debug!(filtered = ?report.filtered, "No subscription matched");
                metrics::counter!("router.notifications.unmatched").increment(1);
            }
        }

        info!(count, "Ingress message routed");
        Ok(count)
    }
}

fn collect(
    body: &str,
    attributes: HashMap<String, String>,
    depth: usize,
    out: &mut Vec<Notification>,
) -> Result<(), PipelineError> {
    if depth > MAX_ENVELOPE_DEPTH {
        return Err(PipelineError::Parse(format!(
            "envelope nesting exceeds {} levels",
            MAX_ENVELOPE_DEPTH
        )));
    }

    match Envelope::parse(body)? {
        Envelope::Delivery(bodies) => {
            for inner in &bodies {
                collect(inner, attributes.clone(), depth + 1, out)?;
            }
        }
        Envelope::Fanout(envelope) => {
            let mut merged = attributes;
            merged.extend(envelope.attributes());
            collect(&envelope.message, merged, depth + 1, out)?;
        }
        Envelope::Objects(event) => {
            for record in event.records {
                let kind = record.kind();
                if kind == ObjectEventKind::Other {
                    debug!(event_name = %record.event_name, "Skipping unsupported object event");
                    continue;
                }
                let message = serde_json::to_string(&ObjectEvent::single(record))?;
                out.push(
                    Notification::new(message)
                        .with_attributes(attributes.clone())
                        .with_attribute(OBJECT_EVENT_ATTRIBUTE, kind.as_str()),
                );
            }
        }
        Envelope::TestEvent => debug!("Ignoring object store test event"),
        Envelope::Other(_) => {
            out.push(Notification::new(body).with_attributes(attributes));
        }
    }

    Ok(())
}

#[async_trait]
impl MessageHandler for IngressRouter {
    async fn handle(&self, message: &IncomingMessage) -> Result<(), ConsumerError> {
        self.route(message).await?;
        Ok(())
    }
}
