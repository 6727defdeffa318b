//! AWS SQS transport implementation.
//!
//! Bodies are envelope JSON. String attributes travel as SQS message
//! attributes with `DataType = String`.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sqs::types::MessageAttributeValue;
use aws_sdk_sqs::Client as SqsClient;
use tracing::{debug, info};

use super::{OutboundQueueMessage, QueueClient, QueueMessage};
use crate::config::SqsSettings;
use crate::error::{TransportError, TransportResult};

/// SQS client wrapper.
#[derive(Clone, Debug)]
pub struct SqsQueueClient {
    sqs: SqsClient,
}

impl SqsQueueClient {
    /// Create a new SQS client.
    pub async fn new(settings: &SqsSettings, endpoint_override: Option<&str>) -> TransportResult<Self> {
        let mut aws_config_builder = aws_config::defaults(BehaviorVersion::latest());

        if let Some(ref region) = settings.region {
            aws_config_builder = aws_config_builder.region(aws_config::Region::new(region.clone()));
        }

        if let Some(endpoint) = endpoint_override {
            aws_config_builder = aws_config_builder.endpoint_url(endpoint);
        }

        let aws_config = aws_config_builder.load().await;
        let sqs = SqsClient::new(&aws_config);

        info!(
            region = ?settings.region,
            endpoint = ?endpoint_override,
            "SQS client initialized"
        );

        Ok(Self { sqs })
    }
}

fn string_attribute(value: &str) -> TransportResult<MessageAttributeValue> {
    MessageAttributeValue::builder()
        .data_type("String")
        .string_value(value)
        .build()
        .map_err(|e| TransportError::Publish(format!("Failed to build attribute: {}", e)))
}

#[async_trait]
impl QueueClient for SqsQueueClient {
    async fn send_message(
        &self,
        queue_url: &str,
        message: OutboundQueueMessage,
    ) -> TransportResult<String> {
        let mut attrs = HashMap::new();
        for (name, value) in &message.attributes {
            attrs.insert(name.clone(), string_attribute(value)?);
        }

        let output = self
            .sqs
            .send_message()
            .queue_url(queue_url)
            .message_body(message.body)
            .set_message_attributes(Some(attrs))
            .send()
            .await
            .map_err(|e| TransportError::Publish(format!("Failed to send to SQS: {}", e)))?;

        Ok(output.message_id().unwrap_or_default().to_string())
    }

    async fn receive_messages(
        &self,
        queue_url: &str,
        max_messages: i32,
        wait_time_secs: i32,
    ) -> TransportResult<Vec<QueueMessage>> {
        let output = self
            .sqs
            .receive_message()
            .queue_url(queue_url)
            .max_number_of_messages(max_messages)
            .wait_time_seconds(wait_time_secs)
            .message_attribute_names("All")
            .send()
            .await
            .map_err(|e| TransportError::Receive(format!("Failed to receive from SQS: {}", e)))?;

        let messages: Vec<QueueMessage> = output
            .messages()
            .iter()
            .map(|message| QueueMessage {
                message_id: message.message_id().map(str::to_string),
                receipt_handle: message.receipt_handle().map(str::to_string),
                body: message.body().map(str::to_string),
                attributes: message
                    .message_attributes()
                    .map(|attrs| {
                        attrs
                            .iter()
                            .filter_map(|(name, value)| {
                                value
                                    .string_value()
                                    .map(|v| (name.clone(), v.to_string()))
                            })
                            .collect()
                    })
                    .unwrap_or_default(),
            })
            .collect();

        debug!(queue_url = %queue_url, count = messages.len(), "Received SQS messages");
        Ok(messages)
    }

    async fn delete_message(&self, queue_url: &str, receipt_handle: &str) -> TransportResult<()> {
        self.sqs
            .delete_message()
            .queue_url(queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| TransportError::Acknowledge(format!("Failed to delete SQS message: {}", e)))?;
        Ok(())
    }
}
