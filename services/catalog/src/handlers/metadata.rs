use crate::catalog_store::CatalogStore;
use crate::error::PipelineError;
use crate::model::{MetadataType, MetadataUpdateEvent, IMAGES_TABLE};
use crate::update_builder::{UpdateBuilder, UpdateStatement};
use album_pipeline::{
    async_trait, ConsumerError, Envelope, IncomingMessage, MessageHandler,
    METADATA_TYPE_ATTRIBUTE,
};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Outcome of a metadata message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataOutcome {
    Updated { fields: usize },
    /// No metadata field was present; nothing was written
    Skipped,
}

/// Applies partial metadata updates to existing catalog records.
///
/// Messages reach this handler only through the metadata subscription, whose
/// filter admits the accepted metadata types.
pub struct MetadataUpdater {
    catalog: Arc<dyn CatalogStore>,
}

impl MetadataUpdater {
    pub fn new(catalog: Arc<dyn CatalogStore>) -> Self {
        Self { catalog }
    }

    /// Build the update for an event, or `None` when it carries no fields
    pub fn statement_for(event: &MetadataUpdateEvent) -> Option<UpdateStatement> {
        MetadataType::ALL
            .iter()
            .fold(UpdateBuilder::new(IMAGES_TABLE, &event.id), |builder, kind| {
                builder.set(kind.column(), event.field(*kind))
            })
            .build()
    }

    #[instrument(
        skip(self, message),
        fields(message_id = %message.message_id(), metadata_type = tracing::field::Empty)
    )]
    pub async fn process(
        &self,
        message: &IncomingMessage,
    ) -> Result<MetadataOutcome, PipelineError> {
        let (payload, metadata_type) = match Envelope::parse(&message.body)? {
            Envelope::Fanout(envelope) => {
                let metadata_type = envelope.attribute(METADATA_TYPE_ATTRIBUTE).map(String::from);
                (envelope.message, metadata_type)
            }
            _ => (
                message.body.clone(),
                message.attribute(METADATA_TYPE_ATTRIBUTE).map(String::from),
            ),
        };
        if let Some(ref metadata_type) = metadata_type {
            tracing::Span::current().record("metadata_type", metadata_type.as_str());
        }

        let event: MetadataUpdateEvent = serde_json::from_str(&payload)?;
        if event.id.is_empty() {
            return Err(PipelineError::Validation("metadata update has no id".to_string()));
        }

        let Some(statement) = Self::statement_for(&event) else {
            info!(id = %event.id, "Metadata update carries no fields, skipping");
            metrics::counter!("catalog.metadata.skipped").increment(1);
            return Ok(MetadataOutcome::Skipped);
        };

        debug!(id = %event.id, sql = %statement.sql(), "Applying metadata update");
        self.catalog.apply_update(&statement).await?;

        let fields = statement.assignments().len();
        info!(id = %event.id, fields, "Metadata updated");
        metrics::counter!("catalog.metadata.updated").increment(1);

        Ok(MetadataOutcome::Updated { fields })
    }
}

#[async_trait]
impl MessageHandler for MetadataUpdater {
    async fn handle(&self, message: &IncomingMessage) -> Result<(), ConsumerError> {
        self.process(message).await?;
        Ok(())
    }
}
