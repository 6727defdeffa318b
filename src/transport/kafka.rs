//! Kafka transport implementation.
//!
//! Record values are envelope JSON; keys are UTF-8 partition keys.
//! Consumers auto-commit offsets, so a failed handler does not cause redelivery.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message as KafkaMessage;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::ClientConfig;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use super::{OutboundRecord, StreamRecord, StreamingConsumer, StreamingProducer};
use crate::config::KafkaSettings;
use crate::error::{TransportError, TransportResult};

/// How long `start` waits for cluster metadata before declaring the broker unreachable.
const METADATA_TIMEOUT: Duration = Duration::from_secs(10);

/// How long `stop` waits for in-flight records to be delivered.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Build a ClientConfig for producers.
fn build_producer_config(settings: &KafkaSettings) -> ClientConfig {
    let mut config = ClientConfig::new();
    config.set("bootstrap.servers", &settings.bootstrap_servers);
    config.set("request.timeout.ms", settings.request_timeout_ms.to_string());
    config.set("retry.backoff.ms", settings.retry_backoff_ms.to_string());
    config.set("message.timeout.ms", settings.send_timeout_ms.to_string());

    apply_security_config(settings, &mut config);
    config
}

/// Build a ClientConfig for consumers.
fn build_consumer_config(settings: &KafkaSettings, group_id: &str) -> ClientConfig {
    let mut config = ClientConfig::new();
    config.set("bootstrap.servers", &settings.bootstrap_servers);
    config.set("group.id", group_id);
    config.set("enable.auto.commit", "true");
    config.set("auto.offset.reset", &settings.auto_offset_reset);

    apply_security_config(settings, &mut config);
    config
}

/// Apply security settings to a ClientConfig.
fn apply_security_config(settings: &KafkaSettings, config: &mut ClientConfig) {
    if !settings.security_protocol.is_empty() {
        config.set("security.protocol", &settings.security_protocol);
    }

    if let Some(ref mechanism) = settings.sasl_mechanism {
        config.set("sasl.mechanism", mechanism);
    }

    if let Some(ref username) = settings.sasl_username {
        config.set("sasl.username", username);
    }

    if let Some(ref password) = settings.sasl_password {
        config.set("sasl.password", password);
    }

    if let Some(ref ca_location) = settings.ssl_ca_location {
        config.set("ssl.ca.location", ca_location);
    }
}

/// Kafka producer wrapper.
pub struct KafkaStreamingProducer {
    producer: FutureProducer,
    send_timeout: Duration,
}

impl KafkaStreamingProducer {
    /// Create the producer and confirm the cluster is reachable.
    pub async fn start(settings: &KafkaSettings) -> TransportResult<Self> {
        let producer: FutureProducer = build_producer_config(settings).create().map_err(|e| {
            TransportError::Connection(format!("Failed to create Kafka producer: {}", e))
        })?;

        let probe = producer.clone();
        tokio::task::spawn_blocking(move || {
            probe
                .client()
                .fetch_metadata(None, METADATA_TIMEOUT)
                .map(|_| ())
        })
        .await
        .map_err(|e| TransportError::Connection(format!("Metadata probe aborted: {}", e)))?
        .map_err(|e| TransportError::Connection(format!("Kafka cluster unreachable: {}", e)))?;

        info!(
            bootstrap_servers = %settings.bootstrap_servers,
            security_protocol = %settings.security_protocol,
            "Connected to Kafka"
        );

        Ok(Self {
            producer,
            send_timeout: Duration::from_millis(settings.send_timeout_ms),
        })
    }
}

#[async_trait]
impl StreamingProducer for KafkaStreamingProducer {
    async fn send(&self, record: OutboundRecord) -> TransportResult<()> {
        let mut kafka_record = FutureRecord::to(&record.topic).payload(&record.value);

        if let Some(ref key) = record.key {
            kafka_record = kafka_record.key(key);
        }

        if let Some(partition) = record.partition {
            kafka_record = kafka_record.partition(partition);
        }

        self.producer
            .send(kafka_record, self.send_timeout)
            .await
            .map_err(|(e, _)| TransportError::Publish(format!("Failed to publish: {}", e)))?;

        debug!(
            topic = %record.topic,
            key = ?record.key,
            partition = ?record.partition,
            "Record acknowledged by Kafka"
        );

        Ok(())
    }

    async fn stop(&self) {
        let producer = self.producer.clone();
        match tokio::task::spawn_blocking(move || producer.flush(FLUSH_TIMEOUT)).await {
            Ok(Ok(())) => info!("Kafka producer stopped"),
            Ok(Err(e)) => warn!(error = %e, "Kafka producer flush failed on stop"),
            Err(e) => warn!(error = %e, "Kafka producer flush aborted on stop"),
        }
    }
}

/// Kafka consumer wrapper, subscribed at construction.
pub struct KafkaStreamingConsumer {
    consumer: Arc<StreamConsumer>,
    stopped: AtomicBool,
    stop_notify: Notify,
}

impl KafkaStreamingConsumer {
    /// Create the consumer, confirm the cluster is reachable, and subscribe to `topics`.
    pub async fn start(
        settings: &KafkaSettings,
        topics: &[String],
        group_id: &str,
    ) -> TransportResult<Self> {
        let consumer: StreamConsumer = build_consumer_config(settings, group_id)
            .create()
            .map_err(|e| {
                TransportError::Connection(format!("Failed to create Kafka consumer: {}", e))
            })?;
        let consumer = Arc::new(consumer);

        let probe = consumer.clone();
        tokio::task::spawn_blocking(move || {
            probe
                .fetch_metadata(None, METADATA_TIMEOUT)
                .map(|_| ())
        })
        .await
        .map_err(|e| TransportError::Connection(format!("Metadata probe aborted: {}", e)))?
        .map_err(|e| TransportError::Connection(format!("Kafka cluster unreachable: {}", e)))?;

        let topic_refs: Vec<&str> = topics.iter().map(|s| s.as_str()).collect();
        consumer
            .subscribe(&topic_refs)
            .map_err(|e| TransportError::Connection(format!("Failed to subscribe to topics: {}", e)))?;

        info!(topics = ?topics, group_id = %group_id, "Subscribed to Kafka topics");

        Ok(Self {
            consumer,
            stopped: AtomicBool::new(false),
            stop_notify: Notify::new(),
        })
    }
}

#[async_trait]
impl StreamingConsumer for KafkaStreamingConsumer {
    async fn next_record(&self) -> Option<TransportResult<StreamRecord>> {
        // Registered before the flag check so a concurrent stop is never missed.
        let stop_signal = self.stop_notify.notified();
        if self.stopped.load(Ordering::SeqCst) {
            return None;
        }

        let received = tokio::select! {
            received = self.consumer.recv() => received,
            _ = stop_signal => return None,
        };

        let result = match received {
            Ok(message) => Ok(StreamRecord {
                topic: message.topic().to_string(),
                partition: message.partition(),
                offset: message.offset(),
                key: message.key().map(<[u8]>::to_vec),
                value: message.payload().map(<[u8]>::to_vec),
            }),
            Err(e) => Err(TransportError::Receive(format!("Kafka consumer error: {}", e))),
        };

        Some(result)
    }

    async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.stop_notify.notify_waiters();
        self.consumer.unsubscribe();
        info!("Kafka consumer stopped");
    }
}
