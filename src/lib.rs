//! Duobus - dual-transport message bus client
//!
//! Publishes JSON envelopes to Kafka with an SQS fallback, and consumes
//! from whichever of the two is available to the deployment.

pub mod capability;
pub mod config;
pub mod consumer;
pub mod envelope;
pub mod error;
pub mod events;
pub mod handler;
pub mod producer;
pub mod registry;
pub mod transport;
pub mod utils;

pub use capability::CapabilityFlags;
pub use config::{ConfigSource, FileConfigSource, Profile, Settings, StaticConfigSource};
pub use consumer::{ConsumerState, MessageConsumer};
pub use envelope::{Envelope, Payload};
pub use error::{HandlerError, MessagingError, Result};
pub use events::EventPublisher;
pub use handler::{handler_fn, MessageHandler};
pub use producer::{MessageProducer, ProducerState};
pub use registry::{send_message, shared_producer, shutdown_shared_producer, ProducerRegistry};
