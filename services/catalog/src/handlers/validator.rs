use crate::catalog_store::{CatalogStore, PutOutcome};
use crate::error::PipelineError;
use crate::model::has_accepted_extension;
use album_pipeline::{
    async_trait, unwrap_object_events, ConsumerError, DeadLetterEntry, IncomingMessage,
    MessageHandler, ObjectEventKind, ObjectEventRecord, QueuePublisher,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Whether an upload may be cataloged
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadDecision {
    Accept,
    Reject { reason: String },
}

impl UploadDecision {
    /// Decide on a decoded object key
    pub fn for_key(key: &str) -> Self {
        if has_accepted_extension(key) {
            return UploadDecision::Accept;
        }

        let reason = match Path::new(key).extension().and_then(|ext| ext.to_str()) {
            Some(ext) => format!("unsupported file type .{}", ext),
            None => "missing file extension".to_string(),
        };
        UploadDecision::Reject { reason }
    }
}

/// What happened to a single upload record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Cataloged,
    /// Already cataloged by an earlier delivery
    Duplicate,
    /// Forwarded to the dead-letter queue
    Rejected,
}

/// Validates uploads and catalogs accepted images
pub struct Validator {
    catalog: Arc<dyn CatalogStore>,
    publisher: QueuePublisher,
    dead_letter_url: String,
}

impl Validator {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        publisher: QueuePublisher,
        dead_letter_url: impl Into<String>,
    ) -> Self {
        Self {
            catalog,
            publisher,
            dead_letter_url: dead_letter_url.into(),
        }
    }

    /// Process every upload record in a message body
    #[instrument(skip(self, message), fields(message_id = %message.message_id()))]
    pub async fn process(
        &self,
        message: &IncomingMessage,
    ) -> Result<Vec<UploadOutcome>, PipelineError> {
        let records = unwrap_object_events(&message.body)?;
        if records.is_empty() {
            debug!("Message carries no object records");
            return Ok(Vec::new());
        }

        let mut outcomes = Vec::with_capacity(records.len());
        for record in &records {
            if record.kind() != ObjectEventKind::Created {
                debug!(event_name = %record.event_name, "Skipping non-upload record");
                continue;
            }
            outcomes.push(self.process_record(record).await?);
        }

        Ok(outcomes)
    }

    async fn process_record(
        &self,
        record: &ObjectEventRecord,
    ) -> Result<UploadOutcome, PipelineError> {
        let key = match record.key() {
            Ok(key) => key,
            Err(e) => {
                metrics::counter!("catalog.uploads.undecodable").increment(1);
                return self
                    .reject_upload(record.raw_key(), record.bucket(), e.to_string())
                    .await;
            }
        };

        match UploadDecision::for_key(&key) {
            UploadDecision::Accept => self.catalog_upload(&key).await,
            UploadDecision::Reject { reason } => {
                self.reject_upload(&key, record.bucket(), reason).await
            }
        }
    }

    async fn catalog_upload(&self, key: &str) -> Result<UploadOutcome, PipelineError> {
        match self.catalog.put_if_absent(key).await? {
            PutOutcome::Created => {
                info!(id = %key, "Image cataloged");
                metrics::counter!("catalog.images.created").increment(1);
                Ok(UploadOutcome::Cataloged)
            }
            PutOutcome::AlreadyCataloged => {
                info!(id = %key, "Image already cataloged");
                metrics::counter!("catalog.images.duplicate").increment(1);
                Ok(UploadOutcome::Duplicate)
            }
        }
    }

    async fn reject_upload(
        &self,
        key: &str,
        bucket: &str,
        reason: String,
    ) -> Result<UploadOutcome, PipelineError> {
        warn!(file_name = %key, reason = %reason, "Upload rejected");

        let entry = DeadLetterEntry::new(key, reason).with_bucket(bucket);
        self.publisher
            .send_to_dead_letter(&self.dead_letter_url, &entry)
            .await?;

        metrics::counter!("catalog.uploads.rejected").increment(1);
        Ok(UploadOutcome::Rejected)
    }
}

#[async_trait]
impl MessageHandler for Validator {
    async fn handle(&self, message: &IncomingMessage) -> Result<(), ConsumerError> {
        self.process(message).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryCatalogStore;
    use album_pipeline::{FanoutEnvelope, MemoryBroker, ReceivedMessage};
    use std::collections::HashMap;

    struct Fixture {
        catalog: Arc<MemoryCatalogStore>,
        broker: Arc<MemoryBroker>,
        validator: Validator,
    }

    async fn fixture() -> Fixture {
        let catalog = Arc::new(MemoryCatalogStore::new());
        let broker = Arc::new(MemoryBroker::new());
        broker.create_queue("bad-images").await;
        let validator = Validator::new(
            catalog.clone(),
            QueuePublisher::new(broker.clone()),
            "bad-images",
        );
        Fixture {
            catalog,
            broker,
            validator,
        }
    }

    fn incoming(body: String) -> IncomingMessage {
        IncomingMessage::new(
            "uploads",
            &ReceivedMessage {
                message_id: "m-1".to_string(),
                receipt_handle: "r-1".to_string(),
                body,
                attributes: HashMap::new(),
                receive_count: 1,
            },
        )
    }

    fn upload(key: &str) -> String {
        let event = serde_json::json!({
            "Records": [{
                "eventName": "ObjectCreated:Put",
                "s3": {
                    "bucket": { "name": "images" },
                    "object": { "key": key }
                }
            }]
        });
        let envelope =
            FanoutEnvelope::new("n-1", "new-images", event.to_string(), &HashMap::new());
        serde_json::to_string(&envelope).unwrap()
    }

    #[test]
    fn test_upload_decision() {
        assert_eq!(UploadDecision::for_key("cat.png"), UploadDecision::Accept);
        assert_eq!(UploadDecision::for_key("a.jpg"), UploadDecision::Accept);
        assert_eq!(UploadDecision::for_key("a.jpeg"), UploadDecision::Accept);
        assert_eq!(
            UploadDecision::for_key("malware.exe"),
            UploadDecision::Reject {
                reason: "unsupported file type .exe".to_string()
            }
        );
        assert!(matches!(
            UploadDecision::for_key("CAT.PNG"),
            UploadDecision::Reject { .. }
        ));
        assert_eq!(
            UploadDecision::for_key("README"),
            UploadDecision::Reject {
                reason: "missing file extension".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_accepted_upload_is_cataloged() {
        let f = fixture().await;

        let outcomes = f.validator.process(&incoming(upload("cat.png"))).await.unwrap();

        assert_eq!(outcomes, vec![UploadOutcome::Cataloged]);
        let record = f.catalog.get("cat.png").await.unwrap().unwrap();
        assert_eq!(record.id, "cat.png");
        assert_eq!(record.caption, None);
        assert_eq!(f.broker.pending("bad-images").await, 0);
    }

    #[tokio::test]
    async fn test_key_is_decoded_before_cataloging() {
        let f = fixture().await;

        f.validator
            .process(&incoming(upload("summer+holiday%281%29.jpeg")))
            .await
            .unwrap();

        assert_eq!(f.catalog.ids().await, vec!["summer holiday(1).jpeg".to_string()]);
    }

    #[tokio::test]
    async fn test_reprocessing_is_idempotent() {
        let f = fixture().await;
        let message = incoming(upload("cat.png"));

        f.validator.process(&message).await.unwrap();
        let outcomes = f.validator.process(&message).await.unwrap();

        assert_eq!(outcomes, vec![UploadOutcome::Duplicate]);
        assert_eq!(f.catalog.len().await, 1);
    }

    #[tokio::test]
    async fn test_rejected_upload_is_dead_lettered() {
        let f = fixture().await;

        let outcomes = f.validator.process(&incoming(upload("malware.exe"))).await.unwrap();

        assert_eq!(outcomes, vec![UploadOutcome::Rejected]);
        assert!(f.catalog.is_empty().await);

        let bodies = f.broker.peek_bodies("bad-images").await;
        assert_eq!(bodies.len(), 1);
        let entry: DeadLetterEntry = serde_json::from_str(&bodies[0]).unwrap();
        assert_eq!(entry.file_name, "malware.exe");
        assert_eq!(entry.bucket.as_deref(), Some("images"));
    }

    #[tokio::test]
    async fn test_undecodable_key_does_not_drop_siblings() {
        let f = fixture().await;
        let body = serde_json::json!({
            "Records": [
                {
                    "eventName": "ObjectCreated:Put",
                    "s3": { "bucket": { "name": "images" }, "object": { "key": "bad%FF.jpg" } }
                },
                {
                    "eventName": "ObjectCreated:Put",
                    "s3": { "bucket": { "name": "images" }, "object": { "key": "cat.png" } }
                }
            ]
        })
        .to_string();

        let outcomes = f.validator.process(&incoming(body)).await.unwrap();

        assert_eq!(outcomes, vec![UploadOutcome::Rejected, UploadOutcome::Cataloged]);
        assert_eq!(f.catalog.ids().await, vec!["cat.png".to_string()]);

        let bodies = f.broker.peek_bodies("bad-images").await;
        assert_eq!(bodies.len(), 1);
        let entry: DeadLetterEntry = serde_json::from_str(&bodies[0]).unwrap();
        assert_eq!(entry.file_name, "bad%FF.jpg");
        assert!(entry.reason.contains("not valid UTF-8"));
    }

    #[tokio::test]
    async fn test_store_failure_is_transient() {
        let f = fixture().await;
        f.catalog.fail_next(1);

        let err = f
            .validator
            .handle(&incoming(upload("cat.png")))
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        assert!(f.catalog.is_empty().await);
    }

    #[tokio::test]
    async fn test_dead_letter_failure_is_transient() {
        let catalog = Arc::new(MemoryCatalogStore::new());
        let broker = Arc::new(MemoryBroker::new());
        let validator = Validator::new(catalog, QueuePublisher::new(broker), "missing-queue");

        let err = validator
            .handle(&incoming(upload("malware.exe")))
            .await
            .unwrap_err();

        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_malformed_body_is_permanent() {
        let f = fixture().await;

        let err = f
            .validator
            .handle(&incoming("{not json".to_string()))
            .await
            .unwrap_err();

        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_test_event_is_ignored() {
        let f = fixture().await;
        let body = r#"{"Service":"Amazon S3","Event":"s3:TestEvent"}"#.to_string();

        let outcomes = f.validator.process(&incoming(body)).await.unwrap();

        assert!(outcomes.is_empty());
    }
}
