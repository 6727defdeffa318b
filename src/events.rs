//! Domain topics and typed publishers.
//!
//! Each publisher is available on any [`MessageProducer`] through
//! [`EventPublisher`] and as a free function using the shared producer.

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};

use crate::envelope::Payload;
use crate::error::Result;
use crate::producer::MessageProducer;
use crate::registry;

pub const EXCHANGE_RATES: &str = "exchange-rates";
pub const USER_EVENTS: &str = "user-events";
pub const RANKING_EVENTS: &str = "ranking-events";
pub const DLQ: &str = "dlq";

pub const EXCHANGE_RATE_UPDATE: &str = "exchange_rate_update";
pub const USER_SELECTION: &str = "user_selection";
pub const CALCULATE_RANKING: &str = "calculate_ranking";

/// Topic, body and partition key for one domain event.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainEvent {
    pub topic: &'static str,
    pub body: Payload,
    pub key: Option<String>,
}

impl DomainEvent {
    /// `{type: "exchange_rate_update", data}`, keyed by `data.currency_code`.
    pub fn exchange_rate_update(rate_data: &Payload) -> Self {
        Self {
            topic: EXCHANGE_RATES,
            body: typed(EXCHANGE_RATE_UPDATE, rate_data),
            key: key_field(rate_data, "currency_code"),
        }
    }

    /// `{type: "user_selection", data}`, keyed by `data.user_id`.
    pub fn user_selection(selection_data: &Payload) -> Self {
        Self {
            topic: USER_EVENTS,
            body: typed(USER_SELECTION, selection_data),
            key: key_field(selection_data, "user_id"),
        }
    }

    /// `{type: "calculate_ranking", period, triggered_at}`, unkeyed.
    pub fn ranking_calculation_trigger(period: &str) -> Self {
        let mut body = Payload::new();
        body.insert("type".to_string(), json!(CALCULATE_RANKING));
        body.insert("period".to_string(), json!(period));
        let triggered_at = Utc::now().to_rfc3339_opts(SecondsFormat::AutoSi, true);
        body.insert("triggered_at".to_string(), json!(triggered_at));
        Self {
            topic: RANKING_EVENTS,
            body,
            key: None,
        }
    }
}

fn typed(event_type: &str, data: &Payload) -> Payload {
    let mut body = Payload::new();
    body.insert("type".to_string(), json!(event_type));
    body.insert("data".to_string(), Value::Object(data.clone()));
    body
}

fn key_field(data: &Payload, field: &str) -> Option<String> {
    match data.get(field)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Typed domain publishers.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: DomainEvent) -> Result<bool>;

    async fn send_exchange_rate_update(&self, rate_data: &Payload) -> Result<bool> {
        self.publish(DomainEvent::exchange_rate_update(rate_data)).await
    }

    async fn send_user_selection_event(&self, selection_data: &Payload) -> Result<bool> {
        self.publish(DomainEvent::user_selection(selection_data)).await
    }

    async fn send_ranking_calculation_trigger(&self, period: &str) -> Result<bool> {
        self.publish(DomainEvent::ranking_calculation_trigger(period))
            .await
    }
}

#[async_trait]
impl EventPublisher for MessageProducer {
    async fn publish(&self, event: DomainEvent) -> Result<bool> {
        self.send(event.topic, &event.body, event.key.as_deref(), None)
            .await
    }
}

/// Publish an exchange rate update through the shared producer.
pub async fn send_exchange_rate_update(rate_data: &Payload) -> Result<bool> {
    registry::shared_producer()
        .await?
        .send_exchange_rate_update(rate_data)
        .await
}

/// Publish a user selection through the shared producer.
pub async fn send_user_selection_event(selection_data: &Payload) -> Result<bool> {
    registry::shared_producer()
        .await?
        .send_user_selection_event(selection_data)
        .await
}

/// Trigger a ranking calculation through the shared producer.
pub async fn send_ranking_calculation_trigger(period: &str) -> Result<bool> {
    registry::shared_producer()
        .await?
        .send_ranking_calculation_trigger(period)
        .await
}
