//! duobus-tail: log every message arriving on a set of topics.
//!
//! Consumes from Kafka (or the configured SQS queue when Kafka is not
//! available) and logs each payload. Useful for debugging event flow.
//!
//! ## Configuration
//! - DUOBUS_TAIL_TOPICS: Comma-separated topics (default: exchange-rates,user-events,ranking-events)
//! - DUOBUS_TAIL_GROUP: Consumer group (default: duobus-tail)
//! - DUOBUS_CONFIG / DUOBUS__*: Messaging settings, see `duobus::config`

use std::sync::Arc;

use tracing::{info, Instrument};

use duobus::config::Settings;
use duobus::events::{EXCHANGE_RATES, RANKING_EVENTS, USER_EVENTS};
use duobus::utils::bootstrap::{init_tracing, service_span};
use duobus::{handler_fn, MessageConsumer};

const DEFAULT_GROUP: &str = "duobus-tail";

fn topics_from_env() -> Vec<String> {
    match std::env::var("DUOBUS_TAIL_TOPICS") {
        Ok(raw) => raw
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect(),
        Err(_) => [EXCHANGE_RATES, USER_EVENTS, RANKING_EVENTS]
            .iter()
            .map(|t| t.to_string())
            .collect(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::load(None)?;
    init_tracing(&settings.service);
    let span = service_span(&settings.service);

    let topics = topics_from_env();
    let group =
        std::env::var("DUOBUS_TAIL_GROUP").unwrap_or_else(|_| DEFAULT_GROUP.to_string());

    let consumer = Arc::new(MessageConsumer::from_env(topics.clone(), group.clone()));

    let stopper = consumer.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping");
            stopper.stop().await;
        }
    });

    info!(topics = ?topics, group = %group, "duobus-tail started");

    consumer
        .start_consuming(handler_fn(|payload| async move {
            info!(payload = %serde_json::Value::Object(payload), "message");
            Ok(())
        }))
        .instrument(span)
        .await?;

    Ok(())
}
