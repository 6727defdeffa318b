//! Messaging backend configuration types.

use std::collections::HashMap;

use serde::Deserialize;

/// Messaging configuration for both transports.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MessagingSettings {
    /// Kafka (streaming backend) configuration.
    pub kafka: KafkaSettings,
    /// SQS (queue backend) configuration.
    pub sqs: SqsSettings,
    /// Logical topic name -> Kafka topic name. Unmapped topics use their logical name.
    pub topics: HashMap<String, String>,
}

impl MessagingSettings {
    /// Kafka topic for a logical topic name.
    pub fn stream_topic<'a>(&'a self, topic: &'a str) -> &'a str {
        self.topics.get(topic).map(String::as_str).unwrap_or(topic)
    }

    /// Fallback queue URL for a logical topic, if one is mapped.
    pub fn queue_url_for(&self, topic: &str) -> Option<&str> {
        self.sqs
            .queue_urls
            .get(topic)
            .map(String::as_str)
            .filter(|url| !url.is_empty())
    }
}

/// Kafka-specific configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KafkaSettings {
    /// Kafka bootstrap servers (comma-separated). Empty disables Kafka.
    pub bootstrap_servers: String,
    /// Security protocol (PLAINTEXT, SSL, SASL_PLAINTEXT, SASL_SSL).
    pub security_protocol: String,
    /// SASL mechanism (PLAIN, SCRAM-SHA-256, SCRAM-SHA-512).
    pub sasl_mechanism: Option<String>,
    /// SASL username (optional, for authenticated clusters).
    pub sasl_username: Option<String>,
    /// SASL password (optional, for authenticated clusters).
    pub sasl_password: Option<String>,
    /// SSL CA certificate path (for SSL connections).
    pub ssl_ca_location: Option<String>,
    /// Broker request timeout.
    pub request_timeout_ms: u64,
    /// Backoff between internal client retries.
    pub retry_backoff_ms: u64,
    /// Upper bound on a single send, including queueing in the client.
    pub send_timeout_ms: u64,
    /// Offset reset policy for new consumer groups.
    pub auto_offset_reset: String,
}

impl KafkaSettings {
    pub fn is_configured(&self) -> bool {
        !self.bootstrap_servers.trim().is_empty()
    }
}

impl Default for KafkaSettings {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:9092".to_string(),
            security_protocol: "PLAINTEXT".to_string(),
            sasl_mechanism: None,
            sasl_username: None,
            sasl_password: None,
            ssl_ca_location: None,
            request_timeout_ms: 30_000,
            retry_backoff_ms: 1_000,
            send_timeout_ms: 30_000,
            auto_offset_reset: "latest".to_string(),
        }
    }
}

/// SQS-specific configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SqsSettings {
    /// AWS region. Uses the default provider chain if not set.
    pub region: Option<String>,
    /// Endpoint override (LocalStack). Only honored in the `local` profile.
    pub endpoint_override: Option<String>,
    /// Logical topic -> queue URL used as the producer's fallback destination.
    pub queue_urls: HashMap<String, String>,
    /// Queue polled by consumers.
    pub queue_url: Option<String>,
    /// Max number of messages to receive in one poll.
    pub max_messages: i32,
    /// Wait time seconds for long polling.
    pub wait_time_secs: i32,
    /// Sleep after an empty poll.
    pub idle_backoff_ms: u64,
}

impl Default for SqsSettings {
    fn default() -> Self {
        Self {
            region: None,
            endpoint_override: None,
            queue_urls: HashMap::new(),
            queue_url: None,
            max_messages: 10,
            wait_time_secs: 20,
            idle_backoff_ms: 1_000,
        }
    }
}
