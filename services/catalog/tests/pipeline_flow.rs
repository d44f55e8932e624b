//! End-to-end flows through the in-process broker, catalog and mailer.

use album_catalog::handlers::router::image_channel;
use album_catalog::memory::{MemoryCatalogStore, RecordingMailer};
use album_catalog::{
    CatalogStore, ChangeEvent, ChangeNotifier, DeletionHandler, IngressRouter, ImageRecord,
    MetadataUpdater, RejectionNotifier, Validator,
};
use album_pipeline::{
    ConsumerConfig, ConsumerSettings, FanoutEnvelope, MemoryBroker, MessageHandler, QueueClient,
    QueueConsumer, QueuePublisher, QueueUrls, METADATA_TYPE_ATTRIBUTE,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Default receive limit before the uploads queue redrives
const MAX_RECEIVE_COUNT: u32 = 5;

fn urls() -> QueueUrls {
    QueueUrls {
        ingress: "ingress".to_string(),
        uploads: "uploads".to_string(),
        metadata: "metadata".to_string(),
        deletions: "deletions".to_string(),
        dead_letter: "bad-images".to_string(),
    }
}

struct Pipeline {
    broker: Arc<MemoryBroker>,
    catalog: Arc<MemoryCatalogStore>,
    mailer: Arc<RecordingMailer>,
    stages: Vec<(QueueConsumer, Arc<dyn MessageHandler>)>,
    notifier: ChangeNotifier,
    changes: broadcast::Receiver<ChangeEvent>,
}

impl Pipeline {
    async fn new() -> Self {
        let urls = urls();
        let broker = Arc::new(MemoryBroker::new());
        for queue in [&urls.ingress, &urls.metadata, &urls.deletions, &urls.dead_letter] {
            broker.create_queue(queue).await;
        }
        broker
            .create_queue_with_redrive(
                &urls.uploads,
                ConsumerConfig::default().redrive_policy(urls.dead_letter.clone()),
            )
            .await;

        let catalog = Arc::new(MemoryCatalogStore::new());
        let mailer = Arc::new(RecordingMailer::new());
        let client: Arc<dyn QueueClient> = broker.clone();
        let channel = Arc::new(image_channel(client.clone(), "new-images", &urls));

        let settings = ConsumerSettings {
            batch_size: 10,
            wait_time: Duration::ZERO,
            handler_timeout: Duration::from_secs(5),
            error_backoff: Duration::from_millis(10),
        };
        let stage = |queue: &str, handler: Arc<dyn MessageHandler>| {
            (
                QueueConsumer::new(client.clone(), queue, settings.clone()),
                handler,
            )
        };
        let stages = vec![
            stage(&urls.ingress, Arc::new(IngressRouter::new(channel))),
            stage(
                &urls.uploads,
                Arc::new(Validator::new(
                    catalog.clone(),
                    QueuePublisher::new(client.clone()),
                    urls.dead_letter.clone(),
                )),
            ),
            stage(&urls.metadata, Arc::new(MetadataUpdater::new(catalog.clone()))),
            stage(&urls.deletions, Arc::new(DeletionHandler::new(catalog.clone()))),
            stage(&urls.dead_letter, Arc::new(RejectionNotifier::new(mailer.clone()))),
        ];

        let changes = catalog.subscribe();
        let notifier = ChangeNotifier::new(mailer.clone());

        Self {
            broker,
            catalog,
            mailer,
            stages,
            notifier,
            changes,
        }
    }

    async fn ingest(&self, body: &str, attributes: &[(&str, &str)]) {
        let attributes: HashMap<String, String> = attributes
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.broker.send("ingress", body, &attributes).await.unwrap();
    }

    /// Poll every stage until a full round receives nothing, then deliver
    /// committed changes to the confirmation notifier
    async fn settle(&mut self) {
        for _ in 0..50 {
            let mut received = 0;
            for (consumer, handler) in &self.stages {
                received += consumer.poll_once(handler.as_ref()).await.unwrap().received;
            }
            if received == 0 {
                break;
            }
        }

        while let Ok(change) = self.changes.try_recv() {
            self.notifier.handle_change(&change).await;
        }
    }

    async fn subjects(&self) -> Vec<String> {
        self.mailer
            .sent()
            .await
            .into_iter()
            .map(|notice| notice.subject)
            .collect()
    }
}

fn object_event(event_name: &str, key: &str) -> String {
    serde_json::json!({
        "Records": [{
            "eventName": event_name,
            "s3": {
                "bucket": { "name": "images" },
                "object": { "key": key }
            }
        }]
    })
    .to_string()
}

#[tokio::test]
async fn test_accepted_upload_is_cataloged_and_confirmed() {
    let mut pipeline = Pipeline::new().await;

    pipeline.ingest(&object_event("ObjectCreated:Put", "cat.png"), &[]).await;
    pipeline.settle().await;

    let record = pipeline.catalog.get("cat.png").await.unwrap().unwrap();
    assert_eq!(record, ImageRecord::new("cat.png"));

    let sent = pipeline.mailer.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, "New Image Upload");
    assert!(sent[0].body.contains("cat.png"));
}

#[tokio::test]
async fn test_rejected_upload_is_reported() {
    let mut pipeline = Pipeline::new().await;

    pipeline
        .ingest(&object_event("ObjectCreated:Put", "malware.exe"), &[])
        .await;
    pipeline.settle().await;

    assert!(pipeline.catalog.is_empty().await);
    assert_eq!(pipeline.broker.pending("bad-images").await, 0);

    let sent = pipeline.mailer.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, "Image Upload Rejected");
    assert!(sent[0].body.contains("malware.exe"));
    assert!(sent[0].body.contains("unsupported file type .exe"));
}

#[tokio::test]
async fn test_duplicate_upload_is_confirmed_once() {
    let mut pipeline = Pipeline::new().await;
    let upload = object_event("ObjectCreated:Put", "cat.png");

    pipeline.ingest(&upload, &[]).await;
    pipeline.ingest(&upload, &[]).await;
    pipeline.settle().await;

    assert_eq!(pipeline.catalog.len().await, 1);
    assert_eq!(pipeline.subjects().await, vec!["New Image Upload".to_string()]);
}

#[tokio::test]
async fn test_persistent_store_failure_is_redriven() {
    let mut pipeline = Pipeline::new().await;
    pipeline.catalog.fail_next(MAX_RECEIVE_COUNT as usize);

    pipeline.ingest(&object_event("ObjectCreated:Put", "cat.png"), &[]).await;
    pipeline.settle().await;

    assert!(pipeline.catalog.is_empty().await);
    assert_eq!(pipeline.broker.pending("uploads").await, 0);

    let sent = pipeline.mailer.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, "Image Upload Rejected");
    assert!(sent[0].body.contains("cat.png"));
}

#[tokio::test]
async fn test_transient_failure_recovers_on_redelivery() {
    let mut pipeline = Pipeline::new().await;
    pipeline.catalog.fail_next(2);

    pipeline.ingest(&object_event("ObjectCreated:Put", "cat.png"), &[]).await;
    pipeline.settle().await;

    assert_eq!(pipeline.catalog.ids().await, vec!["cat.png".to_string()]);
    assert_eq!(pipeline.subjects().await, vec!["New Image Upload".to_string()]);
}

#[tokio::test]
async fn test_removal_deletes_record() {
    let mut pipeline = Pipeline::new().await;
    pipeline.catalog.seed(ImageRecord::new("photo1.jpg")).await;

    pipeline
        .ingest(&object_event("ObjectRemoved:Delete", "photo1.jpg"), &[])
        .await;
    pipeline.settle().await;

    assert!(pipeline.catalog.is_empty().await);
    assert!(pipeline.mailer.sent().await.is_empty());
}

#[tokio::test]
async fn test_wrapped_removal_on_deletion_queue() {
    let mut pipeline = Pipeline::new().await;
    pipeline.catalog.seed(ImageRecord::new("photo1.jpg")).await;

    let fanout = FanoutEnvelope::new(
        "n-1",
        "new-images",
        object_event("ObjectRemoved:Delete", "photo1.jpg"),
        &HashMap::new(),
    );
    let body = serde_json::json!({
        "Records": [{ "messageId": "m-0", "body": serde_json::to_string(&fanout).unwrap() }]
    })
    .to_string();
    pipeline
        .broker
        .send("deletions", &body, &HashMap::new())
        .await
        .unwrap();
    pipeline.settle().await;

    assert!(pipeline.catalog.is_empty().await);
}

#[tokio::test]
async fn test_caption_update_leaves_other_fields() {
    let mut pipeline = Pipeline::new().await;
    pipeline
        .catalog
        .seed(ImageRecord {
            id: "cat.png".to_string(),
            caption: None,
            captured_date: Some("2023-01-01".to_string()),
            photographer: Some("Ann".to_string()),
        })
        .await;

    pipeline
        .ingest(
            r#"{"id":"cat.png","Caption":"A cat"}"#,
            &[(METADATA_TYPE_ATTRIBUTE, "Caption")],
        )
        .await;
    pipeline.settle().await;

    let record = pipeline.catalog.get("cat.png").await.unwrap().unwrap();
    assert_eq!(record.caption.as_deref(), Some("A cat"));
    assert_eq!(record.captured_date.as_deref(), Some("2023-01-01"));
    assert_eq!(record.photographer.as_deref(), Some("Ann"));
    assert!(pipeline.mailer.sent().await.is_empty());
}

#[tokio::test]
async fn test_date_update_targets_date_column() {
    let mut pipeline = Pipeline::new().await;
    pipeline.catalog.seed(ImageRecord::new("cat.png")).await;

    pipeline
        .ingest(
            r#"{"id":"cat.png","Date":"2024-05-01"}"#,
            &[(METADATA_TYPE_ATTRIBUTE, "Date")],
        )
        .await;
    pipeline.settle().await;

    let record = pipeline.catalog.get("cat.png").await.unwrap().unwrap();
    assert_eq!(record.captured_date.as_deref(), Some("2024-05-01"));
}

#[tokio::test]
async fn test_unsubscribed_metadata_type_is_dropped() {
    let mut pipeline = Pipeline::new().await;
    pipeline.catalog.seed(ImageRecord::new("cat.png")).await;

    pipeline
        .ingest(
            r#"{"id":"cat.png","Caption":"ignored"}"#,
            &[(METADATA_TYPE_ATTRIBUTE, "Rating")],
        )
        .await;
    pipeline.settle().await;

    let record = pipeline.catalog.get("cat.png").await.unwrap().unwrap();
    assert_eq!(record.caption, None);
    assert_eq!(pipeline.broker.pending("metadata").await, 0);
}
