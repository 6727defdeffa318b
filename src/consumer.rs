//! Message consumer: one streaming loop or one queue-polling loop.
//!
//! The backend is picked once when consumption starts. Kafka handler
//! failures are logged and skipped (offsets still advance); SQS handler
//! failures leave the message undeleted so it is redelivered after the
//! visibility timeout.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::capability::{self, CapabilityFlags};
use crate::config::{ConfigSource, FileConfigSource, Settings};
use crate::envelope::decode_payload;
use crate::error::{MessagingError, Result};
use crate::handler::MessageHandler;
use crate::transport::{
    BrokerTransportFactory, QueueClient, QueueMessage, StreamRecord, StreamingConsumer,
    TransportFactory,
};

/// Consumer lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Uninitialized,
    Initializing,
    Ready,
    Running,
    Stopped,
}

struct ConsumerInner {
    state: ConsumerState,
    settings: Option<Arc<Settings>>,
    streaming: Option<Arc<dyn StreamingConsumer>>,
    queue: Option<Arc<dyn QueueClient>>,
}

enum Backend {
    Streaming(Arc<dyn StreamingConsumer>),
    Queue(Arc<dyn QueueClient>, Arc<Settings>),
}

/// Consumer bound to a topic set and consumer group. Not shared; each
/// caller owns its instance.
pub struct MessageConsumer {
    topics: Vec<String>,
    group_id: String,
    config_source: Arc<dyn ConfigSource>,
    factory: Arc<dyn TransportFactory>,
    capabilities: CapabilityFlags,
    running: AtomicBool,
    inner: RwLock<ConsumerInner>,
}

impl MessageConsumer {
    /// Create an uninitialized consumer. Duplicate topics are dropped.
    pub fn new<I, S>(
        topics: I,
        group_id: impl Into<String>,
        config_source: Arc<dyn ConfigSource>,
        factory: Arc<dyn TransportFactory>,
        capabilities: CapabilityFlags,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut unique: Vec<String> = Vec::new();
        for topic in topics {
            let topic = topic.into();
            if !unique.contains(&topic) {
                unique.push(topic);
            }
        }

        Self {
            topics: unique,
            group_id: group_id.into(),
            config_source,
            factory,
            capabilities,
            running: AtomicBool::new(false),
            inner: RwLock::new(ConsumerInner {
                state: ConsumerState::Uninitialized,
                settings: None,
                streaming: None,
                queue: None,
            }),
        }
    }

    /// Consumer wired to file/env configuration and the real broker clients.
    pub fn from_env<I, S>(topics: I, group_id: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            topics,
            group_id,
            Arc::new(FileConfigSource::new()),
            Arc::new(BrokerTransportFactory),
            capability::detect(),
        )
    }

    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub async fn state(&self) -> ConsumerState {
        self.inner.read().await.state
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn has_streaming(&self) -> bool {
        self.inner.read().await.streaming.is_some()
    }

    pub async fn has_queue(&self) -> bool {
        self.inner.read().await.queue.is_some()
    }

    /// Read configuration once and bring up whichever backends are usable.
    ///
    /// Kafka is attempted whenever it is compiled in and has bootstrap
    /// servers. SQS is attempted only outside the `local` profile.
    pub async fn initialize(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        match inner.state {
            ConsumerState::Ready | ConsumerState::Running => return Ok(()),
            ConsumerState::Stopped => return Err(MessagingError::ConsumerStopped),
            ConsumerState::Uninitialized | ConsumerState::Initializing => {}
        }
        inner.state = ConsumerState::Initializing;

        let settings = match self.config_source.load() {
            Ok(settings) => settings,
            Err(e) => {
                error!(error = %e, "Failed to initialize message consumer");
                inner.state = ConsumerState::Uninitialized;
                return Err(MessagingError::ConsumerInit { source: e });
            }
        };

        if self.capabilities.streaming_available && settings.messaging.kafka.is_configured() {
            inner.streaming = self.start_streaming(&settings).await;
        }

        if self.capabilities.queue_available && !settings.service.profile.is_local() {
            inner.queue = self.start_queue(&settings).await;
        }

        inner.settings = Some(Arc::new(settings));
        inner.state = ConsumerState::Ready;
        info!(
            group_id = %self.group_id,
            kafka = inner.streaming.is_some(),
            sqs = inner.queue.is_some(),
            "Message consumer initialized successfully"
        );
        Ok(())
    }

    async fn start_streaming(&self, settings: &Settings) -> Option<Arc<dyn StreamingConsumer>> {
        let topics: Vec<String> = self
            .topics
            .iter()
            .map(|t| settings.messaging.stream_topic(t).to_string())
            .collect();

        match self
            .factory
            .streaming_consumer(&settings.messaging.kafka, &topics, &self.group_id)
            .await
        {
            Ok(consumer) => {
                info!(topics = ?topics, group_id = %self.group_id, "Kafka consumer initialized");
                Some(consumer)
            }
            Err(e) => {
                warn!(error = %e, "Failed to initialize Kafka consumer. It will be disabled");
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
                info!(region = ?settings.messaging.sqs.region, "SQS consumer client initialized");
                Some(client)
            }
            Err(e) => {
                warn!(error = %e, "Failed to initialize SQS consumer client. It will be disabled");
                None
            }
        }
    }

    /// Consume until stopped or a fatal transport error.
    ///
    /// Prefers Kafka, falls back to polling SQS, and fails with
    /// [`MessagingError::NoTransport`] before invoking the handler if
    /// neither backend is available. Initializes the consumer if needed.
    pub async fn start_consuming<H: MessageHandler>(&self, handler: H) -> Result<()> {
        self.initialize().await?;

        let backend = {
            let mut inner = self.inner.write().await;
            match inner.state {
                ConsumerState::Running => return Err(MessagingError::AlreadyStarted),
                ConsumerState::Stopped => return Err(MessagingError::ConsumerStopped),
                _ => {}
            }

            let backend = match (&inner.streaming, &inner.queue, &inner.settings) {
                (Some(streaming), _, _) => Backend::Streaming(streaming.clone()),
                (None, Some(queue), Some(settings)) => Backend::Queue(queue.clone(), settings.clone()),
                _ => {
                    error!(topics = ?self.topics, "No messaging system available for consumption");
                    return Err(MessagingError::NoTransport);
                }
            };

            inner.state = ConsumerState::Running;
            self.running.store(true, Ordering::SeqCst);
            backend
        };

        let result = match backend {
            Backend::Streaming(streaming) => self.consume_stream(streaming.as_ref(), &handler).await,
            Backend::Queue(queue, settings) => {
                self.consume_queue(queue.as_ref(), &settings, &handler).await
            }
        };

        self.running.store(false, Ordering::SeqCst);
        self.inner.write().await.state = ConsumerState::Stopped;
        result
    }

    async fn consume_stream<H: MessageHandler>(
        &self,
        streaming: &dyn StreamingConsumer,
        handler: &H,
    ) -> Result<()> {
        info!(topics = ?self.topics, group_id = %self.group_id, "Starting Kafka consumption");

        while self.is_running() {
            let Some(next) = streaming.next_record().await else {
                break;
            };
            // A stop that landed during the pull wins over the pulled record.
            if !self.is_running() {
                break;
            }

            match next {
                Ok(record) => dispatch_record(handler, record).await,
                Err(e) => {
                    error!(error = %e, "Kafka consumption error");
                    return Err(MessagingError::StreamConsumption { source: e });
                }
            }
        }

        info!(group_id = %self.group_id, "Kafka consumption stopped");
        Ok(())
    }

    async fn consume_queue<H: MessageHandler>(
        &self,
        queue: &dyn QueueClient,
        settings: &Settings,
        handler: &H,
    ) -> Result<()> {
        let sqs = &settings.messaging.sqs;
        let Some(queue_url) = sqs.queue_url.as_deref().filter(|u| !u.trim().is_empty()) else {
            error!("SQS queue URL not configured");
            return Err(MessagingError::QueueUrlMissing);
        };
        let idle_backoff = Duration::from_millis(sqs.idle_backoff_ms);

        info!(queue_url = %queue_url, "Starting SQS consumption");

        while self.is_running() {
            let messages = queue
                .receive_messages(queue_url, sqs.max_messages, sqs.wait_time_secs)
                .await
                .map_err(|e| {
                    error!(queue_url = %queue_url, error = %e, "SQS consumption error");
                    MessagingError::QueueConsumption { source: e }
                })?;

            if messages.is_empty() {
                tokio::time::sleep(idle_backoff).await;
                continue;
            }

            for message in messages {
                if !self.is_running() {
                    break;
                }
                process_queue_message(queue, queue_url, handler, message).await;
            }
        }

        info!(queue_url = %queue_url, "SQS consumption stopped");
        Ok(())
    }

    /// Request the consumption loop to end after its current iteration.
    ///
    /// A pending Kafka pull is woken and ends the loop. An SQS long poll
    /// or a running handler already in flight is not cancelled; nothing
    /// pulled after this returns reaches the handler.
    pub async fn stop(&self) {
        let streaming = {
            let mut inner = self.inner.write().await;
            // Cleared under the lock `start_consuming` sets it under.
            self.running.store(false, Ordering::SeqCst);
            inner.state = ConsumerState::Stopped;
            inner.streaming.clone()
        };

        if let Some(streaming) = streaming {
            streaming.stop().await;
            info!(group_id = %self.group_id, "Kafka consumer stopped");
        }
    }
}

async fn dispatch_record<H: MessageHandler>(handler: &H, record: StreamRecord) {
    let value = record.value.as_deref().unwrap_or_default();
    let payload = match decode_payload(value) {
        Ok(payload) => payload,
        Err(e) => {
            error!(
                topic = %record.topic,
                partition = record.partition,
                offset = record.offset,
                value = %String::from_utf8_lossy(value),
                error = %e,
                "Failed to decode Kafka message"
            );
            return;
        }
    };

    match handler.handle(payload).await {
        Ok(()) => debug!(
            topic = %record.topic,
            partition = record.partition,
            offset = record.offset,
            "Kafka message processed"
        ),
        Err(e) => error!(
            topic = %record.topic,
            partition = record.partition,
            offset = record.offset,
            value = %String::from_utf8_lossy(value),
            error = %e,
            "Error processing Kafka message"
        ),
    }
}

async fn process_queue_message<H: MessageHandler>(
    queue: &dyn QueueClient,
    queue_url: &str,
    handler: &H,
    message: QueueMessage,
) {
    let message_id = message.message_id.as_deref().unwrap_or_default();
    let body = message.body.as_deref().unwrap_or_default();

    let payload = match decode_payload(body.as_bytes()) {
        Ok(payload) => payload,
        Err(e) => {
            error!(message_id = %message_id, error = %e, "Failed to decode SQS message");
            return;
        }
    };

    if let Err(e) = handler.handle(payload).await {
        // Left undeleted: redelivered once the visibility timeout expires.
        error!(message_id = %message_id, error = %e, "Error processing SQS message");
        return;
    }

    let Some(receipt_handle) = message.receipt_handle.as_deref() else {
        warn!(message_id = %message_id, "SQS message has no receipt handle, cannot delete");
        return;
    };

    match queue.delete_message(queue_url, receipt_handle).await {
        Ok(()) => debug!(message_id = %message_id, "SQS message processed"),
        Err(e) => error!(message_id = %message_id, error = %e, "Failed to delete SQS message"),
    }
}
