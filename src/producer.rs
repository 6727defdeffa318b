//! Message producer: Kafka first, SQS fallback.
//!
//! `send` never raises for a delivery failure. A message that neither
//! backend accepted is reported as `Ok(false)`; only initialization
//! (configuration) failures surface as `MessagingError`.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::capability::{self, CapabilityFlags};
use crate::config::{ConfigSource, FileConfigSource, Settings};
use crate::envelope::{Envelope, Payload};
use crate::error::{MessagingError, Result, TransportResult};
use crate::transport::{
    BrokerTransportFactory, OutboundQueueMessage, OutboundRecord, QueueClient, StreamingProducer,
    TransportFactory,
};

/// SQS message attribute carrying the logical topic.
pub const TOPIC_ATTR: &str = "topic";
/// SQS message attribute carrying the sending service.
pub const PRODUCER_SERVICE_ATTR: &str = "producer_service";

/// Producer lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerState {
    Uninitialized,
    Initializing,
    Ready,
    Closed,
}

struct ProducerInner {
    state: ProducerState,
    settings: Option<Arc<Settings>>,
    streaming: Option<Arc<dyn StreamingProducer>>,
    queue: Option<Arc<dyn QueueClient>>,
}

/// Snapshot of the handles a single send works with.
struct SendHandles {
    settings: Arc<Settings>,
    streaming: Option<Arc<dyn StreamingProducer>>,
    queue: Option<Arc<dyn QueueClient>>,
}

/// Message producer owning zero or one handle per backend.
///
/// Safe to share across tasks; sends only clone handles under a brief
/// read lock and never hold it across broker I/O.
pub struct MessageProducer {
    config_source: Arc<dyn ConfigSource>,
    factory: Arc<dyn TransportFactory>,
    capabilities: CapabilityFlags,
    inner: RwLock<ProducerInner>,
}

impl MessageProducer {
    /// Create an uninitialized producer.
    pub fn new(
        config_source: Arc<dyn ConfigSource>,
        factory: Arc<dyn TransportFactory>,
        capabilities: CapabilityFlags,
    ) -> Self {
        Self {
            config_source,
            factory,
            capabilities,
            inner: RwLock::new(ProducerInner {
                state: ProducerState::Uninitialized,
                settings: None,
                streaming: None,
                queue: None,
            }),
        }
    }

    /// Producer wired to file/env configuration and the real broker clients.
    pub fn from_env() -> Self {
        Self::new(
            Arc::new(FileConfigSource::new()),
            Arc::new(BrokerTransportFactory),
            capability::detect(),
        )
    }

    pub async fn state(&self) -> ProducerState {
        self.inner.read().await.state
    }

    /// Whether a Kafka producer handle is live.
    pub async fn has_streaming(&self) -> bool {
        self.inner.read().await.streaming.is_some()
    }

    /// Whether an SQS client handle is live.
    pub async fn has_queue(&self) -> bool {
        self.inner.read().await.queue.is_some()
    }

    /// Read configuration once and bring up whichever backends are usable.
    ///
    /// Idempotent once `Ready`. A backend that fails to start is logged and
    /// left absent. A configuration failure leaves the producer
    /// `Uninitialized` so a later call can retry.
    pub async fn initialize(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        match inner.state {
            ProducerState::Ready => return Ok(()),
            ProducerState::Closed => return Err(MessagingError::ProducerClosed),
            ProducerState::Uninitialized | ProducerState::Initializing => {}
        }
        inner.state = ProducerState::Initializing;

        let settings = match self.config_source.load() {
            Ok(settings) => settings,
            Err(e) => {
                error!(error = %e, "Failed to initialize message producer");
                inner.state = ProducerState::Uninitialized;
                return Err(MessagingError::ProducerInit { source: e });
            }
        };

        let profile = settings.service.profile;
        let use_streaming = self.capabilities.streaming_available && !profile.is_local();

        if use_streaming {
            info!(profile = %profile, "Kafka is enabled for this profile");
            if settings.messaging.kafka.is_configured() {
                inner.streaming = self.start_streaming(&settings).await;
            } else {
                warn!("Kafka enabled but no bootstrap servers configured");
            }
        } else {
            info!(
                profile = %profile,
                kafka_compiled = self.capabilities.streaming_available,
                "Kafka is disabled. SQS will be used as a fallback if available"
            );
        }

        // SQS stays usable locally through the endpoint override (LocalStack).
        if self.capabilities.queue_available {
            inner.queue = self.start_queue(&settings).await;
        }

        inner.settings = Some(Arc::new(settings));
        inner.state = ProducerState::Ready;
        info!(
            kafka = inner.streaming.is_some(),
            sqs = inner.queue.is_some(),
            "Message producer initialized successfully"
        );
        Ok(())
    }

    async fn start_streaming(&self, settings: &Settings) -> Option<Arc<dyn StreamingProducer>> {
        let kafka = &settings.messaging.kafka;
        match self.factory.streaming_producer(kafka).await {
            Ok(producer) => {
                info!(servers = %kafka.bootstrap_servers, "Kafka producer initialized");
                Some(producer)
            }
            Err(e) => {
                warn!(error = %e, "Failed to initialize Kafka producer. It will be disabled");
                None
            }
        }
    }

    async fn start_queue(&self, settings: &Settings) -> Option<Arc<dyn QueueClient>> {
        let endpoint = settings.queue_endpoint_override();
        match self
            .factory
            .queue_client(&settings.messaging.sqs, endpoint)
            .await
        {
            Ok(client) => {
                info!(region = ?settings.messaging.sqs.region, endpoint = ?endpoint, "SQS client initialized");
                Some(client)
            }
            Err(e) => {
                warn!(error = %e, "Failed to initialize SQS client. It will be disabled");
                None
            }
        }
    }

    async fn handles(&self) -> Result<SendHandles> {
        if let Some(handles) = self.ready_handles().await? {
            return Ok(handles);
        }
        self.initialize().await?;
        // A concurrent close may have won the race.
        self.ready_handles()
            .await?
            .ok_or(MessagingError::ProducerClosed)
    }

    async fn ready_handles(&self) -> Result<Option<SendHandles>> {
        let inner = self.inner.read().await;
        match (inner.state, &inner.settings) {
            (ProducerState::Ready, Some(settings)) => Ok(Some(SendHandles {
                settings: settings.clone(),
                streaming: inner.streaming.clone(),
                queue: inner.queue.clone(),
            })),
            (ProducerState::Closed, _) => Err(MessagingError::ProducerClosed),
            _ => Ok(None),
        }
    }

    /// Publish `message` on `topic`.
    ///
    /// Tries Kafka first (with `key` / `partition`); on failure or absence,
    /// falls back to the topic's SQS queue if one is mapped. Returns
    /// `Ok(true)` once a backend accepted the envelope, `Ok(false)` if none
    /// did. Initializes the producer on first use; `Err` only for
    /// initialization failures or a closed producer.
    ///
    /// After [`close`](Self::close) every call returns
    /// [`MessagingError::ProducerClosed`]: a closed producer is never
    /// re-initialized. Build a new one (or go through the registry) instead.
    pub async fn send(
        &self,
        topic: &str,
        message: &Payload,
        key: Option<&str>,
        partition: Option<i32>,
    ) -> Result<bool> {
        let handles = self.handles().await?;
        let settings = &handles.settings;
        let envelope = Envelope::build(message, &settings.service.name, key);

        if let Some(ref streaming) = handles.streaming {
            match send_streaming(streaming.as_ref(), settings, topic, &envelope, partition).await {
                Ok(()) => {
                    debug!(
                        topic = %topic,
                        key = ?key,
                        message_id = %envelope.message_id(),
                        "Message sent to Kafka"
                    );
                    return Ok(true);
                }
                Err(e) => {
                    warn!(
                        topic = %topic,
                        key = ?key,
                        message_id = %envelope.message_id(),
                        error = %e,
                        "Kafka send failed, trying SQS fallback"
                    );
                }
            }
        }

        let queue_url = settings.messaging.queue_url_for(topic);
        if let (Some(ref queue), Some(queue_url)) = (&handles.queue, queue_url) {
            match send_queue(queue.as_ref(), queue_url, topic, &envelope).await {
                Ok(sqs_message_id) => {
                    debug!(
                        topic = %topic,
                        queue_url = %queue_url,
                        message_id = %envelope.message_id(),
                        sqs_message_id = %sqs_message_id,
                        "Message sent to SQS"
                    );
                    return Ok(true);
                }
                Err(e) => {
                    error!(
                        topic = %topic,
                        queue_url = %queue_url,
                        message_id = %envelope.message_id(),
                        error = %e,
                        "SQS send also failed"
                    );
                }
            }
        }

        error!(
            topic = %topic,
            key = ?key,
            message_id = %envelope.message_id(),
            "All messaging systems failed to send the message"
        );
        Ok(false)
    }

    /// Stop the Kafka client and close the producer. Idempotent.
    pub async fn close(&self) {
        let mut inner = self.inner.write().await;
        if inner.state == ProducerState::Closed {
            return;
        }

        if let Some(streaming) = inner.streaming.take() {
            streaming.stop().await;
            info!("Kafka producer stopped");
        }
        inner.queue = None;
        inner.state = ProducerState::Closed;
    }
}

async fn send_streaming(
    streaming: &dyn StreamingProducer,
    settings: &Settings,
    topic: &str,
    envelope: &Envelope,
    partition: Option<i32>,
) -> TransportResult<()> {
    let record = OutboundRecord {
        topic: settings.messaging.stream_topic(topic).to_string(),
        key: envelope.partition_key().map(str::to_string),
        partition,
        value: envelope.to_bytes()?,
    };
    streaming.send(record).await
}

async fn send_queue(
    queue: &dyn QueueClient,
    queue_url: &str,
    topic: &str,
    envelope: &Envelope,
) -> TransportResult<String> {
    let attributes = HashMap::from([
        (TOPIC_ATTR.to_string(), topic.to_string()),
        (
            PRODUCER_SERVICE_ATTR.to_string(),
            envelope.producer_service().to_string(),
        ),
    ]);
    let message = OutboundQueueMessage {
        body: envelope.to_body()?,
        attributes,
    };
    queue.send_message(queue_url, message).await
}
