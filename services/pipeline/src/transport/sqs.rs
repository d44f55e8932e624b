use super::{QueueClient, ReceivedMessage, TransportError};
use crate::config::AwsConfig;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sqs::config::Builder as SqsConfigBuilder;
use aws_sdk_sqs::error::DisplayErrorContext;
use aws_sdk_sqs::types::{MessageAttributeValue, MessageSystemAttributeName};
use aws_sdk_sqs::Client as SqsClient;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Queue client backed by Amazon SQS
#[derive(Clone)]
pub struct SqsQueueClient {
    client: SqsClient,
    visibility_timeout: Option<Duration>,
}

impl SqsQueueClient {
    /// Create a new SQS client
    pub async fn new(config: &AwsConfig) -> Self {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut sqs_config_builder = SqsConfigBuilder::from(&aws_config);

        // Configure custom endpoint for LocalStack/ElasticMQ
        if let Some(ref endpoint_url) = config.endpoint_url {
            sqs_config_builder = sqs_config_builder.endpoint_url(endpoint_url);
        }

        let client = SqsClient::from_conf(sqs_config_builder.build());

        info!(region = %config.region, "SQS client initialized");

        Self {
            client,
            visibility_timeout: None,
        }
    }

    /// Hide received messages for `timeout` instead of the queue default
    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl QueueClient for SqsQueueClient {
    #[instrument(skip(self, body, attributes), fields(queue = %queue_url))]
    async fn send(
        &self,
        queue_url: &str,
        body: &str,
        attributes: &HashMap<String, String>,
    ) -> Result<String, TransportError> {
        let mut request = self
            .client
            .send_message()
            .queue_url(queue_url)
            .message_body(body);

        for (name, value) in attributes {
            let attribute = MessageAttributeValue::builder()
                .data_type("String")
                .string_value(value)
                .build()
                .map_err(|e| TransportError::Send {
                    queue: queue_url.to_string(),
                    message: e.to_string(),
                })?;
            request = request.message_attributes(name, attribute);
        }

        let output = request.send().await.map_err(|e| TransportError::Send {
            queue: queue_url.to_string(),
            message: DisplayErrorContext(&e).to_string(),
        })?;

        let message_id = output.message_id().unwrap_or_default().to_string();
        debug!(message_id = %message_id, "Message sent");

        Ok(message_id)
    }

    async fn receive(
        &self,
        queue_url: &str,
        max_messages: u32,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, TransportError> {
        let mut request = self
            .client
            .receive_message()
            .queue_url(queue_url)
            .max_number_of_messages(max_messages as i32)
            .wait_time_seconds(wait.as_secs() as i32)
            .message_attribute_names("All")
            .message_system_attribute_names(MessageSystemAttributeName::ApproximateReceiveCount);

        if let Some(timeout) = self.visibility_timeout {
            request = request.visibility_timeout(timeout.as_secs() as i32);
        }

        let output = request
            .send()
            .await
            .map_err(|e| TransportError::Receive {
                queue: queue_url.to_string(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        let messages = output
            .messages()
            .iter()
            .filter_map(|message| {
                let receipt_handle = message.receipt_handle()?.to_string();

                let attributes = message
                    .message_attributes()
                    .map(|attrs| {
                        attrs
                            .iter()
                            .filter_map(|(name, value)| {
                                value.string_value().map(|v| (name.clone(), v.to_string()))
                            })
                            .collect()
                    })
                    .unwrap_or_default();

                let receive_count = message
                    .attributes()
                    .and_then(|attrs| {
                        attrs.get(&MessageSystemAttributeName::ApproximateReceiveCount)
                    })
                    .and_then(|count| count.parse().ok())
                    .unwrap_or(1);

                Some(ReceivedMessage {
                    message_id: message.message_id().unwrap_or_default().to_string(),
                    receipt_handle,
                    body: message.body().unwrap_or_default().to_string(),
                    attributes,
                    receive_count,
                })
            })
            .collect();

        Ok(messages)
    }

    async fn acknowledge(
        &self,
        queue_url: &str,
        receipt_handle: &str,
    ) -> Result<(), TransportError> {
        self.client
            .delete_message()
            .queue_url(queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| TransportError::Acknowledge {
                queue: queue_url.to_string(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        Ok(())
    }
}
