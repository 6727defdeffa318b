//! Shared utilities for integration tests.
//!
//! Fixtures wiring producers and consumers to the mock transports, plus a
//! tracing layer that captures log events for assertions.

#![allow(dead_code)]

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tracing::field::{Field, Visit};
use tracing::subscriber::DefaultGuard;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

use duobus::config::{Profile, Settings, StaticConfigSource};
use duobus::transport::MockTransportFactory;
use duobus::{CapabilityFlags, MessageConsumer, MessageProducer, Payload};

pub const RATES_QUEUE_URL: &str =
    "https://sqs.ap-northeast-2.amazonaws.com/123456789012/exchange-rates";
pub const CONSUMER_QUEUE_URL: &str =
    "https://sqs.ap-northeast-2.amazonaws.com/123456789012/ranking-worker";

/// Settings for a deployed service with a fallback queue for `exchange-rates`.
pub fn prod_settings() -> Settings {
    let mut settings = Settings::for_test("rates-collector", Profile::Prod);
    settings
        .messaging
        .sqs
        .queue_urls
        .insert("exchange-rates".to_string(), RATES_QUEUE_URL.to_string());
    settings.messaging.sqs.queue_url = Some(CONSUMER_QUEUE_URL.to_string());
    settings.messaging.sqs.idle_backoff_ms = 5;
    settings.messaging.sqs.wait_time_secs = 0;
    settings
}

pub fn producer(
    settings: Settings,
    factory: &Arc<MockTransportFactory>,
    capabilities: CapabilityFlags,
) -> MessageProducer {
    MessageProducer::new(
        Arc::new(StaticConfigSource::new(settings)),
        factory.clone(),
        capabilities,
    )
}

pub fn consumer(
    topics: &[&str],
    settings: Settings,
    factory: &Arc<MockTransportFactory>,
    capabilities: CapabilityFlags,
) -> MessageConsumer {
    MessageConsumer::new(
        topics.iter().copied(),
        "ranking-workers",
        Arc::new(StaticConfigSource::new(settings)),
        factory.clone(),
        capabilities,
    )
}

/// JSON object literal as a payload.
pub fn payload(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {}", other),
    }
}

/// Poll `condition` every few milliseconds until it holds or a second passes.
pub async fn wait_until<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(1), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached within 1s");
}

// ============================================================================
// Log capture
// ============================================================================

/// A captured log event.
#[derive(Debug, Clone)]
pub struct CapturedEvent {
    pub level: Level,
    pub message: String,
    pub fields: HashMap<String, String>,
}

/// Tracing layer recording every event it sees.
#[derive(Clone, Default)]
pub struct LogCapture {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl LogCapture {
    /// Capture events on the current thread until the guard drops.
    ///
    /// Use with the default current-thread `#[tokio::test]` runtime.
    pub fn install(&self) -> DefaultGuard {
        tracing::subscriber::set_default(tracing_subscriber::registry().with(self.clone()))
    }

    pub fn events(&self) -> Vec<CapturedEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn at_level(&self, level: Level) -> Vec<CapturedEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.level == level)
            .collect()
    }

    pub fn count(&self, level: Level) -> usize {
        self.at_level(level).len()
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: String,
    fields: HashMap<String, String>,
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields
                .insert(field.name().to_string(), value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.fields
                .insert(field.name().to_string(), format!("{:?}", value));
        }
    }
}

impl<S: Subscriber> Layer<S> for LogCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(CapturedEvent {
                level: *event.metadata().level(),
                message: visitor.message,
                fields: visitor.fields,
            });
    }
}
