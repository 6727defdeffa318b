//! Transport client wrappers for the two broker backends.
//!
//! This module contains:
//! - `StreamingProducer` / `StreamingConsumer` traits: the streaming log backend (Kafka)
//! - `QueueClient` trait: the managed queue backend (SQS)
//! - `TransportFactory` trait: builds wrappers from configuration
//! - Implementations: Kafka, SQS, Mock

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{KafkaSettings, SqsSettings};
use crate::error::{TransportError, TransportResult};

// Implementation modules
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod mock;
#[cfg(feature = "sqs")]
pub mod sqs;

// Re-exports
#[cfg(feature = "kafka")]
pub use kafka::{KafkaStreamingConsumer, KafkaStreamingProducer};
pub use mock::{MockQueueClient, MockStreamingConsumer, MockStreamingProducer, MockTransportFactory};
#[cfg(feature = "sqs")]
pub use sqs::SqsQueueClient;

// ============================================================================
// Records
// ============================================================================

/// A record handed to the streaming backend.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRecord {
    pub topic: String,
    pub key: Option<String>,
    pub partition: Option<i32>,
    pub value: Vec<u8>,
}

/// A record received from the streaming backend.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
}

/// A message handed to the queue backend.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundQueueMessage {
    pub body: String,
    /// String message attributes.
    pub attributes: HashMap<String, String>,
}

/// A message received from the queue backend.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueMessage {
    pub message_id: Option<String>,
    /// Handle used to delete (acknowledge) the message.
    pub receipt_handle: Option<String>,
    pub body: Option<String>,
    pub attributes: HashMap<String, String>,
}

// ============================================================================
// Traits
// ============================================================================

/// Producer half of the streaming backend.
///
/// Must be safe for concurrent sends from many tasks.
#[async_trait]
pub trait StreamingProducer: Send + Sync {
    /// Send one record and wait for the broker's acknowledgement.
    async fn send(&self, record: OutboundRecord) -> TransportResult<()>;

    /// Flush pending records and stop the client.
    async fn stop(&self);
}

/// Consumer half of the streaming backend, already subscribed to its topics.
#[async_trait]
pub trait StreamingConsumer: Send + Sync {
    /// Pull the next record.
    ///
    /// `None` means the subscription ended (consumer stopped).
    /// An `Err` is a transport-level failure (broker disconnect).
    async fn next_record(&self) -> Option<TransportResult<StreamRecord>>;

    /// Stop the consumer. A pull already in flight is not interrupted.
    async fn stop(&self);
}

/// Client for the queue backend.
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Send a message, returning the broker-assigned message ID.
    async fn send_message(
        &self,
        queue_url: &str,
        message: OutboundQueueMessage,
    ) -> TransportResult<String>;

    /// Long-poll a queue for up to `wait_time_secs`.
    async fn receive_messages(
        &self,
        queue_url: &str,
        max_messages: i32,
        wait_time_secs: i32,
    ) -> TransportResult<Vec<QueueMessage>>;

    /// Delete (acknowledge) a received message.
    async fn delete_message(&self, queue_url: &str, receipt_handle: &str) -> TransportResult<()>;
}

/// Builds transport wrappers from configuration.
///
/// Producers and consumers call this only for backends that are both
/// compiled in and enabled for the deployment profile.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Construct and start a streaming producer.
    async fn streaming_producer(
        &self,
        kafka: &KafkaSettings,
    ) -> TransportResult<Arc<dyn StreamingProducer>>;

    /// Construct a streaming consumer subscribed to `topics` in `group_id`.
    async fn streaming_consumer(
        &self,
        kafka: &KafkaSettings,
        topics: &[String],
        group_id: &str,
    ) -> TransportResult<Arc<dyn StreamingConsumer>>;

    /// Construct a queue client. `endpoint_override` is set only for local deployments.
    async fn queue_client(
        &self,
        sqs: &SqsSettings,
        endpoint_override: Option<&str>,
    ) -> TransportResult<Arc<dyn QueueClient>>;
}

// ============================================================================
// Factory
// ============================================================================

/// Factory for the real broker clients.
///
/// Requires the corresponding feature to be enabled:
/// - Kafka: `--features kafka`
/// - SQS: `--features sqs` (included in default)
#[derive(Debug, Clone, Copy, Default)]
pub struct BrokerTransportFactory;

#[async_trait]
impl TransportFactory for BrokerTransportFactory {
    async fn streaming_producer(
        &self,
        kafka: &KafkaSettings,
    ) -> TransportResult<Arc<dyn StreamingProducer>> {
        #[cfg(feature = "kafka")]
        {
            let producer = KafkaStreamingProducer::start(kafka).await?;
            Ok(Arc::new(producer))
        }

        #[cfg(not(feature = "kafka"))]
        {
            let _ = kafka;
            Err(not_compiled("kafka"))
        }
    }

    async fn streaming_consumer(
        &self,
        kafka: &KafkaSettings,
        topics: &[String],
        group_id: &str,
    ) -> TransportResult<Arc<dyn StreamingConsumer>> {
        #[cfg(feature = "kafka")]
        {
            let consumer = KafkaStreamingConsumer::start(kafka, topics, group_id).await?;
            Ok(Arc::new(consumer))
        }

        #[cfg(not(feature = "kafka"))]
        {
            let _ = (kafka, topics, group_id);
            Err(not_compiled("kafka"))
        }
    }

    async fn queue_client(
        &self,
        sqs: &SqsSettings,
        endpoint_override: Option<&str>,
    ) -> TransportResult<Arc<dyn QueueClient>> {
        #[cfg(feature = "sqs")]
        {
            let client = SqsQueueClient::new(sqs, endpoint_override).await?;
            Ok(Arc::new(client))
        }

        #[cfg(not(feature = "sqs"))]
        {
            let _ = (sqs, endpoint_override);
            Err(not_compiled("sqs"))
        }
    }
}

#[allow(dead_code)]
fn not_compiled(feature: &str) -> TransportError {
    TransportError::Connection(format!(
        "{} support requires the '{}' feature. Rebuild with --features {}",
        feature, feature, feature
    ))
}
