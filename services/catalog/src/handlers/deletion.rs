use crate::catalog_store::CatalogStore;
use crate::error::PipelineError;
use crate::object_store::ObjectStore;
use album_pipeline::{
    async_trait, ConsumerError, Envelope, IncomingMessage, MessageHandler, ObjectEventKind,
};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Removes catalog records whose backing object was deleted.
///
/// Accepts a bare removal notification as well as one wrapped in delivery and
/// fan-out envelopes.
pub struct DeletionHandler {
    catalog: Arc<dyn CatalogStore>,
    /// Set when the backing object should be deleted as well
    objects: Option<Arc<dyn ObjectStore>>,
}

impl DeletionHandler {
    pub fn new(catalog: Arc<dyn CatalogStore>) -> Self {
        Self {
            catalog,
            objects: None,
        }
    }

    /// Also delete the backing object for each removal
    pub fn with_object_store(mut self, objects: Arc<dyn ObjectStore>) -> Self {
        self.objects = Some(objects);
        self
    }

    /// Handle every removal record in a message body, returning the keys whose
    /// catalog record was removed
    #[instrument(skip(self, message), fields(message_id = %message.message_id()))]
    pub async fn process(
        &self,
        message: &IncomingMessage,
    ) -> Result<Vec<String>, PipelineError> {
        let envelope = Envelope::parse(&message.body)?;
        let shape = if envelope.is_wrapper() { "wrapped" } else { "direct" };
        let records = envelope.into_object_records()?;
        debug!(shape, records = records.len(), "Decoded removal notification");

        let mut removed = Vec::new();
        for record in &records {
            if record.kind() != ObjectEventKind::Removed {
                debug!(event_name = %record.event_name, "Skipping non-removal record");
                continue;
            }

            let key = match record.key() {
                Ok(key) => key,
                Err(e) => {
                    warn!(error = %e, "Skipping removal with undecodable key");
                    metrics::counter!("catalog.removals.undecodable").increment(1);
                    continue;
                }
            };
            if let Some(ref objects) = self.objects {
                objects.delete_object(record.bucket(), &key).await?;
            }

            if self.catalog.delete(&key).await? {
                info!(id = %key, bucket = %record.bucket(), "Catalog record deleted");
                metrics::counter!("catalog.images.deleted").increment(1);
                removed.push(key);
            } else {
                info!(id = %key, "No catalog record for removed object");
            }
        }

        Ok(removed)
    }
}

#[async_trait]
impl MessageHandler for DeletionHandler {
    async fn handle(&self, message: &IncomingMessage) -> Result<(), ConsumerError> {
        self.process(message).await?;
        Ok(())
    }
}
