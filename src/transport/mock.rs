//! Mock transports for testing.
//!
//! In-memory stand-ins for both brokers. The queue mock models SQS
//! visibility: a received message that is not deleted becomes visible
//! again after a configurable number of polls.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify, RwLock};

use super::{
    OutboundQueueMessage, OutboundRecord, QueueClient, QueueMessage, StreamRecord,
    StreamingConsumer, StreamingProducer, TransportFactory,
};
use crate::config::{KafkaSettings, SqsSettings};
use crate::error::{TransportError, TransportResult};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Streaming producer
// ============================================================================

/// Mock streaming producer that records sent records.
#[derive(Default)]
pub struct MockStreamingProducer {
    sent: RwLock<Vec<OutboundRecord>>,
    fail_on_send: RwLock<bool>,
    send_attempts: AtomicUsize,
    stopped: AtomicBool,
}

impl MockStreamingProducer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_send(&self, fail: bool) {
        *self.fail_on_send.write().await = fail;
    }

    pub async fn sent_count(&self) -> usize {
        self.sent.read().await.len()
    }

    pub async fn sent(&self) -> Vec<OutboundRecord> {
        self.sent.read().await.clone()
    }

    /// Every send call, including failed ones.
    pub fn send_attempts(&self) -> usize {
        self.send_attempts.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StreamingProducer for MockStreamingProducer {
    async fn send(&self, record: OutboundRecord) -> TransportResult<()> {
        self.send_attempts.fetch_add(1, Ordering::SeqCst);
        if *self.fail_on_send.read().await {
            return Err(TransportError::Timeout(
                "Mock send timed out waiting for acknowledgement".to_string(),
            ));
        }
        self.sent.write().await.push(record);
        Ok(())
    }

    async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

// ============================================================================
// Streaming consumer
// ============================================================================

type RecordResult = TransportResult<StreamRecord>;

/// Mock streaming consumer fed through [`push_value`](Self::push_value).
///
/// `next_record` waits for a pushed record, a stop, or [`close`](Self::close).
pub struct MockStreamingConsumer {
    sender: Mutex<Option<mpsc::UnboundedSender<RecordResult>>>,
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<RecordResult>>,
    stopped: AtomicBool,
    stop_notify: Notify,
    next_offset: AtomicI64,
    pulls: AtomicUsize,
}

impl Default for MockStreamingConsumer {
    fn default() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender: Mutex::new(Some(sender)),
            receiver: tokio::sync::Mutex::new(receiver),
            stopped: AtomicBool::new(false),
            stop_notify: Notify::new(),
            next_offset: AtomicI64::new(0),
            pulls: AtomicUsize::new(0),
        }
    }
}

impl MockStreamingConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a JSON record on partition 0; returns its offset.
    pub fn push_value(&self, topic: &str, value: &serde_json::Value) -> i64 {
        let bytes = serde_json::to_vec(value).unwrap_or_default();
        self.push_raw(topic, bytes)
    }

    /// Queue a record with arbitrary value bytes; returns its offset.
    pub fn push_raw(&self, topic: &str, value: Vec<u8>) -> i64 {
        let offset = self.next_offset.fetch_add(1, Ordering::SeqCst);
        self.push(Ok(StreamRecord {
            topic: topic.to_string(),
            partition: 0,
            offset,
            key: None,
            value: Some(value),
        }));
        offset
    }

    /// Queue a transport-level failure.
    pub fn push_error(&self, message: &str) {
        self.push(Err(TransportError::Receive(message.to_string())));
    }

    /// End the subscription once queued records drain.
    pub fn close(&self) {
        lock(&self.sender).take();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Number of `next_record` calls so far.
    pub fn pulls(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
    }

    fn push(&self, item: RecordResult) {
        if let Some(sender) = lock(&self.sender).as_ref() {
            let _ = sender.send(item);
        }
    }
}

#[async_trait]
impl StreamingConsumer for MockStreamingConsumer {
    async fn next_record(&self) -> Option<TransportResult<StreamRecord>> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        // Registered before the flag check so a concurrent stop is never missed.
        let stop_signal = self.stop_notify.notified();
        if self.is_stopped() {
            return None;
        }

        let mut receiver = self.receiver.lock().await;
        tokio::select! {
            item = receiver.recv() => item,
            _ = stop_signal => None,
        }
    }

    async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.stop_notify.notify_waiters();
    }
}

// ============================================================================
// Queue client
// ============================================================================

#[derive(Default)]
struct QueueState {
    visible: VecDeque<QueueMessage>,
    /// (poll number at which the message becomes visible again, message)
    in_flight: Vec<(u64, QueueMessage)>,
    polls: u64,
    next_id: u64,
    sent: Vec<(String, OutboundQueueMessage)>,
    deleted: Vec<String>,
    deliveries: HashMap<String, usize>,
}

/// Mock SQS-like queue.
pub struct MockQueueClient {
    state: Mutex<QueueState>,
    fail_on_send: AtomicBool,
    fail_on_receive: AtomicBool,
    visibility_timeout_polls: u64,
}

impl Default for MockQueueClient {
    fn default() -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            fail_on_send: AtomicBool::new(false),
            fail_on_receive: AtomicBool::new(false),
            visibility_timeout_polls: 1,
        }
    }
}

impl MockQueueClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Undeleted messages reappear this many polls after being received.
    pub fn with_visibility_timeout_polls(mut self, polls: u64) -> Self {
        self.visibility_timeout_polls = polls.max(1);
        self
    }

    pub fn set_fail_on_send(&self, fail: bool) {
        self.fail_on_send.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_on_receive(&self, fail: bool) {
        self.fail_on_receive.store(fail, Ordering::SeqCst);
    }

    /// Make a message available to consumers; returns its message ID.
    pub fn push_message(&self, body: impl Into<String>) -> String {
        let mut state = lock(&self.state);
        state.next_id += 1;
        let message_id = format!("mock-msg-{}", state.next_id);
        state.visible.push_back(QueueMessage {
            message_id: Some(message_id.clone()),
            receipt_handle: None,
            body: Some(body.into()),
            attributes: HashMap::new(),
        });
        message_id
    }

    /// Messages passed to `send_message`, with their queue URLs.
    pub fn sent(&self) -> Vec<(String, OutboundQueueMessage)> {
        lock(&self.state).sent.clone()
    }

    pub fn sent_count(&self) -> usize {
        lock(&self.state).sent.len()
    }

    /// Message IDs deleted (acknowledged) so far.
    pub fn deleted(&self) -> Vec<String> {
        lock(&self.state).deleted.clone()
    }

    /// Times a message has been handed out by `receive_messages`.
    pub fn deliveries(&self, message_id: &str) -> usize {
        lock(&self.state)
            .deliveries
            .get(message_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn polls(&self) -> u64 {
        lock(&self.state).polls
    }

    /// Messages neither visible nor deleted.
    pub fn in_flight_count(&self) -> usize {
        lock(&self.state).in_flight.len()
    }
}

#[async_trait]
impl QueueClient for MockQueueClient {
    async fn send_message(
        &self,
        queue_url: &str,
        message: OutboundQueueMessage,
    ) -> TransportResult<String> {
        if self.fail_on_send.load(Ordering::SeqCst) {
            return Err(TransportError::Publish("Mock SQS send failure".to_string()));
        }
        let mut state = lock(&self.state);
        state.next_id += 1;
        let message_id = format!("mock-msg-{}", state.next_id);
        state.sent.push((queue_url.to_string(), message));
        Ok(message_id)
    }

    async fn receive_messages(
        &self,
        _queue_url: &str,
        max_messages: i32,
        _wait_time_secs: i32,
    ) -> TransportResult<Vec<QueueMessage>> {
        if self.fail_on_receive.load(Ordering::SeqCst) {
            return Err(TransportError::Receive("Mock SQS receive failure".to_string()));
        }

        let mut state = lock(&self.state);
        state.polls += 1;
        let poll = state.polls;

        // Visibility timeout expiry: undeleted messages return to the front.
        let (expired, still_hidden): (Vec<_>, Vec<_>) = std::mem::take(&mut state.in_flight)
            .into_iter()
            .partition(|(visible_at, _)| *visible_at <= poll);
        state.in_flight = still_hidden;
        for (_, message) in expired.into_iter().rev() {
            state.visible.push_front(message);
        }

        let take = usize::try_from(max_messages).unwrap_or(0).min(state.visible.len());
        let mut batch = Vec::with_capacity(take);
        for _ in 0..take {
            let Some(mut message) = state.visible.pop_front() else {
                break;
            };
            let message_id = message.message_id.clone().unwrap_or_default();
            let delivery = {
                let count = state.deliveries.entry(message_id.clone()).or_insert(0);
                *count += 1;
                *count
            };
            message.receipt_handle = Some(format!("receipt-{}-{}", message_id, delivery));
            state
                .in_flight
                .push((poll + self.visibility_timeout_polls, message.clone()));
            batch.push(message);
        }

        Ok(batch)
    }

    async fn delete_message(&self, _queue_url: &str, receipt_handle: &str) -> TransportResult<()> {
        let mut state = lock(&self.state);
        let position = state
            .in_flight
            .iter()
            .position(|(_, m)| m.receipt_handle.as_deref() == Some(receipt_handle))
            .ok_or_else(|| {
                TransportError::Acknowledge(format!("Unknown receipt handle: {}", receipt_handle))
            })?;
        let (_, message) = state.in_flight.remove(position);
        state.deleted.push(message.message_id.unwrap_or_default());
        Ok(())
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Factory handing out shared mock transports and counting builds.
#[derive(Default)]
pub struct MockTransportFactory {
    streaming_producer: Arc<MockStreamingProducer>,
    streaming_consumer: Arc<MockStreamingConsumer>,
    queue: Arc<MockQueueClient>,
    fail_streaming: AtomicBool,
    fail_queue: AtomicBool,
    streaming_producer_builds: AtomicUsize,
    streaming_consumer_builds: AtomicUsize,
    queue_builds: AtomicUsize,
    last_endpoint_override: Mutex<Option<String>>,
    last_subscription: Mutex<Option<(Vec<String>, String)>>,
}

impl MockTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific queue mock (e.g. with a custom visibility timeout).
    pub fn with_queue(mut self, queue: MockQueueClient) -> Self {
        self.queue = Arc::new(queue);
        self
    }

    /// Make streaming construction fail (broker unreachable).
    pub fn set_fail_streaming(&self, fail: bool) {
        self.fail_streaming.store(fail, Ordering::SeqCst);
    }

    /// Make queue client construction fail.
    pub fn set_fail_queue(&self, fail: bool) {
        self.fail_queue.store(fail, Ordering::SeqCst);
    }

    pub fn producer_mock(&self) -> Arc<MockStreamingProducer> {
        self.streaming_producer.clone()
    }

    pub fn consumer_mock(&self) -> Arc<MockStreamingConsumer> {
        self.streaming_consumer.clone()
    }

    pub fn queue_mock(&self) -> Arc<MockQueueClient> {
        self.queue.clone()
    }

    pub fn streaming_producer_builds(&self) -> usize {
        self.streaming_producer_builds.load(Ordering::SeqCst)
    }

    pub fn streaming_consumer_builds(&self) -> usize {
        self.streaming_consumer_builds.load(Ordering::SeqCst)
    }

    pub fn queue_builds(&self) -> usize {
        self.queue_builds.load(Ordering::SeqCst)
    }

    /// Endpoint override passed to the most recent queue build.
    pub fn last_endpoint_override(&self) -> Option<String> {
        lock(&self.last_endpoint_override).clone()
    }

    /// Topics and group ID passed to the most recent consumer build.
    pub fn last_subscription(&self) -> Option<(Vec<String>, String)> {
        lock(&self.last_subscription).clone()
    }
}

#[async_trait]
impl TransportFactory for MockTransportFactory {
    async fn streaming_producer(
        &self,
        _kafka: &KafkaSettings,
    ) -> TransportResult<Arc<dyn StreamingProducer>> {
        self.streaming_producer_builds.fetch_add(1, Ordering::SeqCst);
        if self.fail_streaming.load(Ordering::SeqCst) {
            return Err(TransportError::Connection("Mock Kafka unreachable".to_string()));
        }
        Ok(self.streaming_producer.clone())
    }

    async fn streaming_consumer(
        &self,
        _kafka: &KafkaSettings,
        topics: &[String],
        group_id: &str,
    ) -> TransportResult<Arc<dyn StreamingConsumer>> {
        self.streaming_consumer_builds.fetch_add(1, Ordering::SeqCst);
        if self.fail_streaming.load(Ordering::SeqCst) {
            return Err(TransportError::Connection("Mock Kafka unreachable".to_string()));
        }
        *lock(&self.last_subscription) = Some((topics.to_vec(), group_id.to_string()));
        Ok(self.streaming_consumer.clone())
    }

    async fn queue_client(
        &self,
        _sqs: &SqsSettings,
        endpoint_override: Option<&str>,
    ) -> TransportResult<Arc<dyn QueueClient>> {
        self.queue_builds.fetch_add(1, Ordering::SeqCst);
        if self.fail_queue.load(Ordering::SeqCst) {
            return Err(TransportError::Connection("Mock SQS unavailable".to_string()));
        }
        *lock(&self.last_endpoint_override) = endpoint_override.map(str::to_string);
        Ok(self.queue.clone())
    }
}
