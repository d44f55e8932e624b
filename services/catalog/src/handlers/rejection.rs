use crate::error::PipelineError;
use crate::handlers::NotifyOutcome;
use crate::mailer::{Mailer, Notice};
use album_pipeline::{
    async_trait, unwrap_object_events, ConsumerError, DeadLetterEntry, IncomingMessage,
    MessageHandler,
};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Reason reported for uploads redriven after repeated processing failures
const REDRIVE_REASON: &str = "processing failed repeatedly";

/// Name reported when a dead-lettered message does not identify its upload
const UNKNOWN_UPLOAD: &str = "unknown upload";

/// Reason reported for dead-letter entries that name the upload but not the cause
const UNSTATED_REASON: &str = "rejected by the validator";

/// Mails the uploader about every dead-lettered upload.
///
/// The dead-letter queue holds explicit rejections written by the validator and
/// upload events redriven by the transport; both yield one notice per entry.
pub struct RejectionNotifier {
    mailer: Arc<dyn Mailer>,
}

impl RejectionNotifier {
    pub fn new(mailer: Arc<dyn Mailer>) -> Self {
        Self { mailer }
    }

    /// Identify the rejected upload and why it was rejected
    pub fn describe(body: &str) -> Result<(String, String), PipelineError> {
        let value: serde_json::Value = serde_json::from_str(body)?;

        if let Ok(entry) = serde_json::from_value::<DeadLetterEntry>(value) {
            let reason = if entry.reason.is_empty() {
                UNSTATED_REASON.to_string()
            } else {
                entry.reason
            };
            return Ok((entry.file_name, reason));
        }

        let file_name = unwrap_object_events(body)
            .ok()
            .and_then(|records| records.into_iter().next())
            .and_then(|record| record.key().ok())
            .unwrap_or_else(|| UNKNOWN_UPLOAD.to_string());

        Ok((file_name, REDRIVE_REASON.to_string()))
    }

    #[instrument(skip(self, message), fields(message_id = %message.message_id()))]
    pub async fn process(
        &self,
        message: &IncomingMessage,
    ) -> Result<NotifyOutcome, PipelineError> {
        let (file_name, reason) = match Self::describe(&message.body) {
            Ok(described) => described,
            Err(e) => {
                warn!(error = %e, "Skipping unparseable dead-letter entry");
                metrics::counter!("notifications.rejection.malformed").increment(1);
                return Err(e);
            }
        };

        match self.mailer.send(&Notice::rejection(&file_name, &reason)).await {
            Ok(()) => {
                info!(file_name = %file_name, reason = %reason, "Rejection notice sent");
                metrics::counter!("notifications.sent", "kind" => "rejection").increment(1);
                Ok(NotifyOutcome::Sent)
            }
            Err(e) => {
                error!(file_name = %file_name, error = %e, "Failed to send rejection notice");
                metrics::counter!("notifications.failed", "kind" => "rejection").increment(1);
                Ok(NotifyOutcome::Failed)
            }
        }
    }
}

#[async_trait]
impl MessageHandler for RejectionNotifier {
    async fn handle(&self, message: &IncomingMessage) -> Result<(), ConsumerError> {
        self.process(message).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MailError;
    use crate::mailer::MockMailer;
    use album_pipeline::{FanoutEnvelope, ReceivedMessage};
    use std::collections::HashMap;

    fn incoming(body: &str) -> IncomingMessage {
        IncomingMessage::new(
            "bad-images",
            &ReceivedMessage {
                message_id: "m-1".to_string(),
                receipt_handle: "r-1".to_string(),
                body: body.to_string(),
                attributes: HashMap::new(),
                receive_count: 1,
            },
        )
    }

    #[test]
    fn test_describe_dead_letter_entry() {
        let body = serde_json::to_string(&DeadLetterEntry::new(
            "malware.exe",
            "unsupported file type .exe",
        ))
        .unwrap();

        let (file_name, reason) = RejectionNotifier::describe(&body).unwrap();

        assert_eq!(file_name, "malware.exe");
        assert_eq!(reason, "unsupported file type .exe");
    }

    #[test]
    fn test_describe_redriven_upload() {
        let event = serde_json::json!({
            "Records": [{
                "eventName": "ObjectCreated:Put",
                "s3": { "bucket": { "name": "images" }, "object": { "key": "cat+2.png" } }
            }]
        });
        let body = serde_json::to_string(&FanoutEnvelope::new(
            "n-1",
            "new-images",
            event.to_string(),
            &HashMap::new(),
        ))
        .unwrap();

        let (file_name, reason) = RejectionNotifier::describe(&body).unwrap();

        assert_eq!(file_name, "cat 2.png");
        assert_eq!(reason, REDRIVE_REASON);
    }

    #[test]
    fn test_describe_entry_without_reason() {
        let (file_name, reason) =
            RejectionNotifier::describe(r#"{"file_name":"photo.gif"}"#).unwrap();

        assert_eq!(file_name, "photo.gif");
        assert_eq!(reason, UNSTATED_REASON);
    }

    #[test]
    fn test_describe_unknown_entry() {
        let (file_name, _) = RejectionNotifier::describe(r#"{"id":"cat.png"}"#).unwrap();
        assert_eq!(file_name, UNKNOWN_UPLOAD);
    }

    #[tokio::test]
    async fn test_one_notice_per_entry() {
        let mut mailer = MockMailer::new();
        mailer
            .expect_send()
            .withf(|notice| {
                notice.subject == "Image Upload Rejected" && notice.body.contains("malware.exe")
            })
            .times(1)
            .returning(|_| Ok(()));
        let notifier = RejectionNotifier::new(Arc::new(mailer));

        let body = r#"{"file_name":"malware.exe","reason":"unsupported file type .exe"}"#;
        let outcome = notifier.process(&incoming(body)).await.unwrap();

        assert_eq!(outcome, NotifyOutcome::Sent);
    }

    #[tokio::test]
    async fn test_unparseable_entry_is_skipped() {
        let mut mailer = MockMailer::new();
        mailer.expect_send().times(0);
        let notifier = RejectionNotifier::new(Arc::new(mailer));

        let err = notifier.handle(&incoming("not json")).await.unwrap_err();

        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_mail_failure_is_absorbed() {
        let mut mailer = MockMailer::new();
        mailer
            .expect_send()
            .times(1)
            .returning(|_| Err(MailError::Transport("relay down".to_string())));
        let notifier = RejectionNotifier::new(Arc::new(mailer));

        let body = r#"{"file_name":"malware.exe","reason":"bad type"}"#;
        let outcome = notifier.process(&incoming(body)).await.unwrap();

        assert_eq!(outcome, NotifyOutcome::Failed);
    }
}
