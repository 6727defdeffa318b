//! Error types for the message bus client.
//!
//! Two styles coexist on purpose:
//! - `MessagingError` is raised at setup and consume boundaries (fail fast).
//! - `TransportError` stays inside the producer; `send` folds it into a `false` return.

/// Result type for messaging lifecycle operations.
pub type Result<T> = std::result::Result<T, MessagingError>;

/// Result type for transport wrapper operations.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Errors raised by producer/consumer lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    #[error("Producer initialization failed: {source}")]
    ProducerInit {
        #[source]
        source: ConfigError,
    },

    #[error("Consumer initialization failed: {source}")]
    ConsumerInit {
        #[source]
        source: ConfigError,
    },

    #[error("No messaging system available for consumption")]
    NoTransport,

    #[error("Kafka consumption failed: {source}")]
    StreamConsumption {
        #[source]
        source: TransportError,
    },

    #[error("SQS consumption failed: {source}")]
    QueueConsumption {
        #[source]
        source: TransportError,
    },

    #[error("SQS queue URL not configured")]
    QueueUrlMissing,

    #[error("Producer is closed")]
    ProducerClosed,

    #[error("Consumer already started")]
    AlreadyStarted,

    #[error("Consumer is stopped")]
    ConsumerStopped,
}

impl MessagingError {
    /// Messaging system the error originated from.
    pub fn system(&self) -> &'static str {
        match self {
            MessagingError::ProducerInit { .. }
            | MessagingError::ConsumerInit { .. }
            | MessagingError::NoTransport
            | MessagingError::ProducerClosed
            | MessagingError::AlreadyStarted
            | MessagingError::ConsumerStopped => "kafka_sqs",
            MessagingError::StreamConsumption { .. } => "kafka",
            MessagingError::QueueConsumption { .. } | MessagingError::QueueUrlMissing => "sqs",
        }
    }
}

/// Errors produced by transport wrappers (broker clients).
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Receive failed: {0}")]
    Receive(String),

    #[error("Acknowledge failed: {0}")]
    Acknowledge(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors reading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Error returned by a message handler.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(e: serde_json::Error) -> Self {
        Self::new(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messaging_error_system() {
        assert_eq!(MessagingError::NoTransport.system(), "kafka_sqs");
        assert_eq!(MessagingError::QueueUrlMissing.system(), "sqs");
        let err = MessagingError::StreamConsumption {
            source: TransportError::Receive("broker down".to_string()),
        };
        assert_eq!(err.system(), "kafka");
    }

    #[test]
    fn test_messaging_error_display() {
        let err = MessagingError::ProducerInit {
            source: ConfigError::Invalid("service name is empty".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "Producer initialization failed: Invalid configuration: service name is empty"
        );
    }

    #[test]
    fn test_handler_error_from_str() {
        let err: HandlerError = "boom".into();
        assert_eq!(err.message(), "boom");
        assert_eq!(err.to_string(), "boom");
    }
}
