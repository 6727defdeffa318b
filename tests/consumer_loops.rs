//! Consumer backend selection and loop behavior against mock transports.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;

use duobus::config::Profile;
use duobus::transport::{MockQueueClient, MockTransportFactory};
use duobus::{handler_fn, CapabilityFlags, ConsumerState, HandlerError, MessagingError, Payload};

use common::{consumer, prod_settings, wait_until};

const TOPICS: &[&str] = &["user-events", "ranking-events"];

/// Handler forwarding every payload to a channel, failing when `type == "poison"`.
fn forwarding_handler(
    tx: mpsc::UnboundedSender<Payload>,
) -> impl duobus::MessageHandler + 'static {
    handler_fn(move |payload: Payload| {
        let tx = tx.clone();
        async move {
            let poison = payload.get("type") == Some(&json!("poison"));
            let _ = tx.send(payload);
            if poison {
                Err(HandlerError::new("poisoned message"))
            } else {
                Ok(())
            }
        }
    })
}

fn queue_only() -> CapabilityFlags {
    CapabilityFlags::new(false, true)
}

// ============================================================================
// Backend selection
// ============================================================================

#[tokio::test]
async fn test_no_transport_fails_before_any_handler_call() {
    let factory = Arc::new(MockTransportFactory::new());
    let consumer = consumer(TOPICS, prod_settings(), &factory, CapabilityFlags::NONE);
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    let result = consumer
        .start_consuming(handler_fn(move |_payload| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        }))
        .await;

    assert!(matches!(result, Err(MessagingError::NoTransport)));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(!consumer.is_running());
}

#[tokio::test]
async fn test_local_profile_never_polls_queue() {
    let factory = Arc::new(MockTransportFactory::new());
    let mut settings = prod_settings();
    settings.service.profile = Profile::Local;
    let consumer = consumer(TOPICS, settings, &factory, queue_only());

    let (tx, _rx) = mpsc::unbounded_channel();
    let result = consumer.start_consuming(forwarding_handler(tx)).await;

    assert!(matches!(result, Err(MessagingError::NoTransport)));
    assert_eq!(factory.queue_builds(), 0);
    assert_eq!(factory.queue_mock().polls(), 0);
}

#[tokio::test]
async fn test_streaming_preferred_over_queue() {
    let factory = Arc::new(MockTransportFactory::new());
    factory.queue_mock().push_message(r#"{"type":"from-queue"}"#);
    let stream = factory.consumer_mock();
    stream.push_value("user-events", &json!({"type": "from-stream"}));
    stream.close();
    let consumer = consumer(TOPICS, prod_settings(), &factory, CapabilityFlags::ALL);

    let (tx, mut rx) = mpsc::unbounded_channel();
    consumer.start_consuming(forwarding_handler(tx)).await.unwrap();

    assert_eq!(rx.recv().await.unwrap()["type"], "from-stream");
    assert!(rx.try_recv().is_err());
    assert_eq!(factory.queue_mock().polls(), 0);
}

#[tokio::test]
async fn test_streaming_startup_failure_falls_back_to_queue_loop() {
    let factory = Arc::new(MockTransportFactory::new());
    factory.set_fail_streaming(true);
    let queue = factory.queue_mock();
    let message_id = queue.push_message(r#"{"type":"from-queue"}"#);
    let consumer = Arc::new(consumer(TOPICS, prod_settings(), &factory, CapabilityFlags::ALL));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let running = {
        let consumer = consumer.clone();
        let handler = forwarding_handler(tx);
        tokio::spawn(async move { consumer.start_consuming(handler).await })
    };

    assert_eq!(rx.recv().await.unwrap()["type"], "from-queue");
    assert!(!consumer.has_streaming().await);
    let watched = queue.clone();
    wait_until(move || !watched.deleted().is_empty()).await;
    consumer.stop().await;
    running.await.unwrap().unwrap();

    assert_eq!(queue.deleted(), vec![message_id]);
    assert_eq!(factory.consumer_mock().pulls(), 0);
}

#[tokio::test]
async fn test_second_start_is_rejected() {
    let factory = Arc::new(MockTransportFactory::new());
    let consumer = Arc::new(consumer(TOPICS, prod_settings(), &factory, CapabilityFlags::ALL));

    let (tx, _rx) = mpsc::unbounded_channel();
    let running = {
        let consumer = consumer.clone();
        let handler = forwarding_handler(tx.clone());
        tokio::spawn(async move { consumer.start_consuming(handler).await })
    };
    let watched = consumer.clone();
    wait_until(move || watched.is_running()).await;

    let second = consumer.start_consuming(forwarding_handler(tx)).await;
    assert!(matches!(second, Err(MessagingError::AlreadyStarted)));

    consumer.stop().await;
    running.await.unwrap().unwrap();
}

// ============================================================================
// Streaming loop
// ============================================================================

#[tokio::test]
async fn test_handler_failure_does_not_block_next_record() {
    let factory = Arc::new(MockTransportFactory::new());
    let stream = factory.consumer_mock();
    stream.push_value("user-events", &json!({"type": "user_selection", "n": 1}));
    stream.push_value("user-events", &json!({"type": "poison", "n": 2}));
    stream.push_value("user-events", &json!({"type": "user_selection", "n": 3}));
    stream.close();
    let consumer = consumer(TOPICS, prod_settings(), &factory, CapabilityFlags::ALL);

    let (tx, mut rx) = mpsc::unbounded_channel();
    consumer.start_consuming(forwarding_handler(tx)).await.unwrap();

    let mut seen = Vec::new();
    while let Ok(payload) = rx.try_recv() {
        seen.push(payload["n"].as_i64().unwrap());
    }
    assert_eq!(seen, vec![1, 2, 3]);
    assert_eq!(consumer.state().await, ConsumerState::Stopped);
}

#[tokio::test]
async fn test_undecodable_record_is_skipped() {
    let factory = Arc::new(MockTransportFactory::new());
    let stream = factory.consumer_mock();
    stream.push_raw("user-events", b"not json".to_vec());
    stream.push_value("user-events", &json!([1, 2, 3]));
    stream.push_value("user-events", &json!({"type": "user_selection"}));
    stream.close();
    let consumer = consumer(TOPICS, prod_settings(), &factory, CapabilityFlags::ALL);

    let (tx, mut rx) = mpsc::unbounded_channel();
    consumer.start_consuming(forwarding_handler(tx)).await.unwrap();

    assert_eq!(rx.recv().await.unwrap()["type"], "user_selection");
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_stream_transport_error_is_fatal() {
    let factory = Arc::new(MockTransportFactory::new());
    let stream = factory.consumer_mock();
    stream.push_value("user-events", &json!({"type": "user_selection"}));
    stream.push_error("broker connection lost");
    stream.push_value("user-events", &json!({"type": "never-delivered"}));
    let consumer = consumer(TOPICS, prod_settings(), &factory, CapabilityFlags::ALL);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let err = consumer
        .start_consuming(forwarding_handler(tx))
        .await
        .unwrap_err();

    assert!(matches!(err, MessagingError::StreamConsumption { .. }));
    assert_eq!(err.system(), "kafka");
    assert_eq!(rx.recv().await.unwrap()["type"], "user_selection");
    assert!(rx.try_recv().is_err());
    assert_eq!(consumer.state().await, ConsumerState::Stopped);
}

#[tokio::test]
async fn test_no_handler_calls_after_stop() {
    let factory = Arc::new(MockTransportFactory::new());
    let stream = factory.consumer_mock();
    let consumer = Arc::new(consumer(TOPICS, prod_settings(), &factory, CapabilityFlags::ALL));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let running = {
        let consumer = consumer.clone();
        let handler = forwarding_handler(tx);
        tokio::spawn(async move { consumer.start_consuming(handler).await })
    };

    stream.push_value("user-events", &json!({"n": 1}));
    assert_eq!(rx.recv().await.unwrap()["n"], 1);

    consumer.stop().await;
    stream.push_value("user-events", &json!({"n": 2}));
    running.await.unwrap().unwrap();

    assert!(rx.try_recv().is_err());
    assert!(stream.is_stopped());
    assert_eq!(consumer.state().await, ConsumerState::Stopped);
}

// ============================================================================
// Queue-polling loop
// ============================================================================

#[tokio::test]
async fn test_failed_queue_message_is_redelivered_not_deleted() {
    let factory = Arc::new(MockTransportFactory::new());
    let queue = factory.queue_mock();
    let message_id = queue.push_message(r#"{"type":"poison"}"#);
    let consumer = Arc::new(consumer(TOPICS, prod_settings(), &factory, queue_only()));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let running = {
        let consumer = consumer.clone();
        let handler = forwarding_handler(tx);
        tokio::spawn(async move { consumer.start_consuming(handler).await })
    };

    rx.recv().await.unwrap();
    rx.recv().await.unwrap();
    consumer.stop().await;
    running.await.unwrap().unwrap();

    assert!(queue.deliveries(&message_id) >= 2);
    assert!(queue.deleted().is_empty());
}

#[tokio::test]
async fn test_handled_queue_message_is_deleted() {
    let factory = Arc::new(MockTransportFactory::new());
    let queue = factory.queue_mock();
    let message_id = queue.push_message(r#"{"type":"calculate_ranking","period":"daily"}"#);
    let consumer = Arc::new(consumer(TOPICS, prod_settings(), &factory, queue_only()));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let running = {
        let consumer = consumer.clone();
        let handler = forwarding_handler(tx);
        tokio::spawn(async move { consumer.start_consuming(handler).await })
    };

    assert_eq!(rx.recv().await.unwrap()["period"], "daily");
    let watched = queue.clone();
    wait_until(move || !watched.deleted().is_empty()).await;
    consumer.stop().await;
    running.await.unwrap().unwrap();

    assert_eq!(queue.deleted(), vec![message_id.clone()]);
    assert_eq!(queue.deliveries(&message_id), 1);
}

#[tokio::test]
async fn test_undecodable_queue_body_is_left_on_queue() {
    let factory = Arc::new(
        MockTransportFactory::new().with_queue(MockQueueClient::new().with_visibility_timeout_polls(1_000)),
    );
    let queue = factory.queue_mock();
    let bad = queue.push_message("{truncated");
    queue.push_message(r#"{"type":"user_selection"}"#);
    let consumer = Arc::new(consumer(TOPICS, prod_settings(), &factory, queue_only()));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let running = {
        let consumer = consumer.clone();
        let handler = forwarding_handler(tx);
        tokio::spawn(async move { consumer.start_consuming(handler).await })
    };

    assert_eq!(rx.recv().await.unwrap()["type"], "user_selection");
    let watched = queue.clone();
    wait_until(move || watched.deleted().len() == 1).await;
    consumer.stop().await;
    running.await.unwrap().unwrap();

    assert!(!queue.deleted().contains(&bad));
    assert_eq!(queue.in_flight_count(), 1);
}

#[tokio::test]
async fn test_missing_queue_url_is_fatal() {
    let factory = Arc::new(MockTransportFactory::new());
    let mut settings = prod_settings();
    settings.messaging.sqs.queue_url = None;
    let consumer = consumer(TOPICS, settings, &factory, queue_only());

    let (tx, _rx) = mpsc::unbounded_channel();
    let err = consumer
        .start_consuming(forwarding_handler(tx))
        .await
        .unwrap_err();

    assert!(matches!(err, MessagingError::QueueUrlMissing));
    assert_eq!(err.system(), "sqs");
    assert_eq!(factory.queue_mock().polls(), 0);
}

#[tokio::test]
async fn test_queue_receive_error_is_fatal() {
    let factory = Arc::new(MockTransportFactory::new());
    factory.queue_mock().set_fail_on_receive(true);
    let consumer = consumer(TOPICS, prod_settings(), &factory, queue_only());

    let (tx, _rx) = mpsc::unbounded_channel();
    let err = consumer
        .start_consuming(forwarding_handler(tx))
        .await
        .unwrap_err();

    assert!(matches!(err, MessagingError::QueueConsumption { .. }));
    assert_eq!(consumer.state().await, ConsumerState::Stopped);
}

#[tokio::test]
async fn test_idle_queue_keeps_polling_until_stopped() {
    let factory = Arc::new(MockTransportFactory::new());
    let queue = factory.queue_mock();
    let consumer = Arc::new(consumer(TOPICS, prod_settings(), &factory, queue_only()));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let running = {
        let consumer = consumer.clone();
        let handler = forwarding_handler(tx);
        tokio::spawn(async move { consumer.start_consuming(handler).await })
    };

    let watched = queue.clone();
    wait_until(move || watched.polls() >= 3).await;
    consumer.stop().await;
    running.await.unwrap().unwrap();

    assert!(rx.try_recv().is_err());
}
