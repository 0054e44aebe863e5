//! An in-process broker implementing the transport traits, for unit tests.
//!
//! It models the subset of RabbitMq behaviour the crate relies on: durable queues declared with
//! arguments (406 on incompatible redeclaration), the default exchange, manual acknowledgements
//! with a prefetch window, dead-lettering on `nack(requeue: false)` and closure of channels and
//! connections on demand.
use crate::connection::{
    BrokerChannel, BrokerConnection, Confirmation, DeliveryStream, HealthStatus, Transport,
    TransportError,
};
use crate::consumers::{Acknowledger, Delivery};
use amq_protocol_types::{AMQPValue, FieldTable};
use futures_util::StreamExt;
use lapin::BasicProperties;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

#[derive(Clone, Default)]
pub(crate) struct FakeBroker {
    state: Arc<Mutex<BrokerState>>,
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<String, FakeQueue>,
    connections: Vec<Arc<AtomicBool>>,
    channels: Vec<Arc<AtomicBool>>,
    cancelled_consumers: HashSet<String>,
    connection_attempts: usize,
    refused_connections: usize,
    failing_channel_opens: usize,
    failing_publishes: usize,
    rejected_publishes: usize,
    failing_closes: usize,
    next_delivery_tag: u64,
}

struct FakeQueue {
    arguments: FieldTable,
    ready: VecDeque<StoredMessage>,
    unacked: usize,
    notify: Arc<Notify>,
}

#[derive(Clone)]
struct StoredMessage {
    data: Vec<u8>,
    properties: BasicProperties,
    redelivered: bool,
}

impl FakeBroker {
    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn connections_opened(&self) -> usize {
        self.state().connections.len()
    }

    pub(crate) fn channels_opened(&self) -> usize {
        self.state().channels.len()
    }

    pub(crate) fn connection_attempts(&self) -> usize {
        self.state().connection_attempts
    }

    pub(crate) fn has_open_connections(&self) -> bool {
        self.state()
            .connections
            .iter()
            .any(|open| open.load(Ordering::SeqCst))
    }

    /// Close every open channel, leaving the connections untouched.
    pub(crate) fn close_channels(&self) {
        let state = self.state();
        for channel in &state.channels {
            channel.store(false, Ordering::SeqCst);
        }
        state.wake_all();
    }

    /// Close every open connection (and, as a consequence, every channel).
    pub(crate) fn close_connections(&self) {
        let state = self.state();
        for connection in &state.connections {
            connection.store(false, Ordering::SeqCst);
        }
        for channel in &state.channels {
            channel.store(false, Ordering::SeqCst);
        }
        state.wake_all();
    }

    /// The next `n` connection attempts are refused.
    pub(crate) fn refuse_connections(&self, n: usize) {
        self.state().refused_connections = n;
    }

    /// The next `n` attempts at opening a channel fail.
    pub(crate) fn fail_channel_opens(&self, n: usize) {
        self.state().failing_channel_opens = n;
    }

    /// The next `n` publishes find the channel closed under their feet.
    pub(crate) fn fail_next_publishes(&self, n: usize) {
        self.state().failing_publishes = n;
    }

    /// The next `n` publishes are negatively confirmed.
    pub(crate) fn reject_next_publishes(&self, n: usize) {
        self.state().rejected_publishes = n;
    }

    /// The next `n` attempts at closing a connection fail.
    pub(crate) fn fail_next_closes(&self, n: usize) {
        self.state().failing_closes = n;
    }

    /// How many consumers were cancelled through a channel.
    pub(crate) fn cancelled_consumers(&self) -> usize {
        self.state().cancelled_consumers.len()
    }

    pub(crate) fn queue_exists(&self, queue_name: &str) -> bool {
        self.state().queues.contains_key(queue_name)
    }

    pub(crate) fn queue_count(&self) -> usize {
        self.state().queues.len()
    }

    pub(crate) fn queue_arguments(&self, queue_name: &str) -> Option<FieldTable> {
        self.state()
            .queues
            .get(queue_name)
            .map(|queue| queue.arguments.clone())
    }

    /// Ready messages in a queue. Unknown queues are empty.
    pub(crate) fn depth(&self, queue_name: &str) -> usize {
        self.state()
            .queues
            .get(queue_name)
            .map_or(0, |queue| queue.ready.len())
    }

    /// Delivered but not yet settled messages of a queue.
    pub(crate) fn unacked(&self, queue_name: &str) -> usize {
        self.state()
            .queues
            .get(queue_name)
            .map_or(0, |queue| queue.unacked)
    }

    /// Bodies of the ready messages in a queue, head first.
    pub(crate) fn bodies(&self, queue_name: &str) -> Vec<Vec<u8>> {
        self.state()
            .queues
            .get(queue_name)
            .map(|queue| queue.ready.iter().map(|m| m.data.clone()).collect())
            .unwrap_or_default()
    }

    /// Properties of the ready messages in a queue, head first.
    pub(crate) fn properties(&self, queue_name: &str) -> Vec<BasicProperties> {
        self.state()
            .queues
            .get(queue_name)
            .map(|queue| queue.ready.iter().map(|m| m.properties.clone()).collect())
            .unwrap_or_default()
    }

    /// Enqueue a raw message, bypassing any channel.
    pub(crate) fn enqueue(&self, queue_name: &str, data: impl Into<Vec<u8>>) {
        let mut state = self.state();
        let queue = state
            .queues
            .entry(queue_name.to_owned())
            .or_insert_with(|| FakeQueue::new(FieldTable::default()));
        queue.push(StoredMessage {
            data: data.into(),
            properties: BasicProperties::default(),
            redelivered: false,
        });
    }

    /// Settle an in-flight delivery of `queue_name`.
    fn settle(&self, queue_name: &str, message: StoredMessage, outcome: Settlement) {
        let mut state = self.state();
        let Some(queue) = state.queues.get_mut(queue_name) else {
            return;
        };
        queue.unacked = queue.unacked.saturating_sub(1);
        queue.notify.notify_one();

        match outcome {
            Settlement::Ack => {}
            Settlement::Requeue => {
                queue.ready.push_front(StoredMessage {
                    redelivered: true,
                    ..message
                });
            }
            Settlement::DeadLetter => {
                let Some(target) = dead_letter_routing_key(&queue.arguments) else {
                    // No dead-letter routing configured: the broker drops the message.
                    return;
                };
                if let Some(dlq) = state.queues.get_mut(&target) {
                    dlq.push(StoredMessage {
                        redelivered: false,
                        ..message
                    });
                }
            }
        }
    }

    fn next_delivery(
        &self,
        queue_name: &str,
        channel: &FakeChannel,
        prefetch_count: Option<u16>,
    ) -> Result<Option<Delivery>, TransportError> {
        let mut state = self.state();
        let delivery_tag = state.next_delivery_tag + 1;
        let queue = state
            .queues
            .get_mut(queue_name)
            .ok_or_else(|| TransportError::NotFound(format!("no queue '{queue_name}'")))?;
        if let Some(prefetch_count) = prefetch_count {
            if prefetch_count > 0 && queue.unacked >= usize::from(prefetch_count) {
                return Ok(None);
            }
        }
        let Some(message) = queue.ready.pop_front() else {
            return Ok(None);
        };
        queue.unacked += 1;
        state.next_delivery_tag = delivery_tag;

        Ok(Some(Delivery {
            delivery_tag,
            routing_key: queue_name.to_owned(),
            redelivered: message.redelivered,
            properties: message.properties.clone(),
            data: message.data.clone(),
            acker: Box::new(FakeAcker {
                broker: self.clone(),
                channel: channel.clone(),
                queue_name: queue_name.to_owned(),
                message,
                settled: AtomicBool::new(false),
            }),
        }))
    }
}

impl BrokerState {
    fn wake_all(&self) {
        for queue in self.queues.values() {
            queue.notify.notify_one();
        }
    }
}

impl FakeQueue {
    fn new(arguments: FieldTable) -> Self {
        Self {
            arguments,
            ready: VecDeque::new(),
            unacked: 0,
            notify: Arc::new(Notify::new()),
        }
    }

    fn push(&mut self, message: StoredMessage) {
        self.ready.push_back(message);
        self.notify.notify_one();
    }
}

fn dead_letter_routing_key(arguments: &FieldTable) -> Option<String> {
    arguments
        .inner()
        .iter()
        .find(|(key, _)| key.as_str() == "x-dead-letter-routing-key")
        .and_then(|(_, value)| match value {
            AMQPValue::LongString(key) => Some(String::from_utf8_lossy(key.as_bytes()).into_owned()),
            _ => None,
        })
}

fn closed(what: &str) -> TransportError {
    TransportError::Closed(anyhow::anyhow!("{what} is closed"))
}

#[async_trait::async_trait]
impl Transport for FakeBroker {
    type Connection = FakeConnection;

    async fn connect(&self) -> Result<FakeConnection, TransportError> {
        let mut state = self.state();
        state.connection_attempts += 1;
        if state.refused_connections > 0 {
            state.refused_connections -= 1;
            return Err(TransportError::Connect {
                attempts: 1,
                source: anyhow::anyhow!("Connection refused"),
            });
        }
        let open = Arc::new(AtomicBool::new(true));
        state.connections.push(open.clone());
        Ok(FakeConnection {
            broker: self.clone(),
            open,
        })
    }
}

pub(crate) struct FakeConnection {
    broker: FakeBroker,
    open: Arc<AtomicBool>,
}

#[async_trait::async_trait]
impl BrokerConnection for FakeConnection {
    type Channel = FakeChannel;

    fn status(&self) -> HealthStatus {
        if self.open.load(Ordering::SeqCst) {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        }
    }

    async fn open_channel(&self) -> Result<FakeChannel, TransportError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(closed("connection"));
        }
        let mut state = self.broker.state();
        if state.failing_channel_opens > 0 {
            state.failing_channel_opens -= 1;
            return Err(TransportError::Broker(anyhow::anyhow!(
                "Failed to open a channel"
            )));
        }
        let open = Arc::new(AtomicBool::new(true));
        state.channels.push(open.clone());
        Ok(FakeChannel {
            broker: self.broker.clone(),
            connection: self.open.clone(),
            open,
        })
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut state = self.broker.state();
        if state.failing_closes > 0 {
            state.failing_closes -= 1;
            return Err(closed("socket"));
        }
        self.open.store(false, Ordering::SeqCst);
        for channel in &state.channels {
            channel.store(false, Ordering::SeqCst);
        }
        state.wake_all();
        Ok(())
    }
}

#[derive(Clone)]
pub(crate) struct FakeChannel {
    broker: FakeBroker,
    connection: Arc<AtomicBool>,
    open: Arc<AtomicBool>,
}

impl FakeChannel {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && self.connection.load(Ordering::SeqCst)
    }

    fn check_open(&self) -> Result<(), TransportError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(closed("channel"))
        }
    }

    /// Soft errors close the channel, like RabbitMq does.
    fn fail(&self, error: TransportError) -> TransportError {
        self.open.store(false, Ordering::SeqCst);
        error
    }
}

#[async_trait::async_trait]
impl BrokerChannel for FakeChannel {
    fn status(&self) -> HealthStatus {
        if self.is_open() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        }
    }

    async fn declare_queue(
        &self,
        queue_name: &str,
        arguments: FieldTable,
    ) -> Result<(), TransportError> {
        self.check_open()?;
        let mut state = self.broker.state();
        match state.queues.get(queue_name) {
            Some(queue) if queue.arguments != arguments => {
                Err(self.fail(TransportError::PreconditionFailed(format!(
                    "PRECONDITION_FAILED - inequivalent arg for queue '{queue_name}'"
                ))))
            }
            Some(_) => Ok(()),
            None => {
                state
                    .queues
                    .insert(queue_name.to_owned(), FakeQueue::new(arguments));
                Ok(())
            }
        }
    }

    async fn queue_depth(&self, queue_name: &str) -> Result<u32, TransportError> {
        self.check_open()?;
        match self.broker.state().queues.get(queue_name) {
            Some(queue) => Ok(queue.ready.len() as u32),
            None => Err(self.fail(TransportError::NotFound(format!(
                "NOT_FOUND - no queue '{queue_name}'"
            )))),
        }
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<Confirmation, TransportError> {
        self.check_open()?;
        let mut state = self.broker.state();
        if state.failing_publishes > 0 {
            state.failing_publishes -= 1;
            self.open.store(false, Ordering::SeqCst);
            return Err(closed("channel"));
        }
        if !exchange.is_empty() {
            return Err(self.fail(TransportError::NotFound(format!(
                "NOT_FOUND - no exchange '{exchange}'"
            ))));
        }
        if state.rejected_publishes > 0 {
            state.rejected_publishes -= 1;
            return Ok(Confirmation::Nack);
        }
        match state.queues.get_mut(routing_key) {
            Some(queue) => {
                queue.push(StoredMessage {
                    data: payload.to_vec(),
                    properties,
                    redelivered: false,
                });
                Ok(Confirmation::Ack)
            }
            None => Ok(Confirmation::Returned {
                reply_code: 312,
                reply_text: "NO_ROUTE".to_owned(),
            }),
        }
    }

    async fn consume(
        &self,
        queue_name: &str,
        consumer_tag: &str,
        prefetch_count: u16,
    ) -> Result<DeliveryStream, TransportError> {
        self.check_open()?;
        let notify = match self.broker.state().queues.get(queue_name) {
            Some(queue) => queue.notify.clone(),
            None => {
                return Err(self.fail(TransportError::NotFound(format!(
                    "NOT_FOUND - no queue '{queue_name}'"
                ))))
            }
        };

        let subscription = Subscription {
            channel: self.clone(),
            queue_name: queue_name.to_owned(),
            consumer_tag: consumer_tag.to_owned(),
            prefetch_count,
            notify,
            done: false,
        };
        let stream = futures_util::stream::unfold(subscription, |mut subscription| async move {
            let next = subscription.next().await?;
            Some((next, subscription))
        });
        Ok(stream.boxed())
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<(), TransportError> {
        self.check_open()?;
        let mut state = self.broker.state();
        state.cancelled_consumers.insert(consumer_tag.to_owned());
        state.wake_all();
        Ok(())
    }

    async fn fetch(&self, queue_name: &str) -> Result<Option<Delivery>, TransportError> {
        self.check_open()?;
        self.broker
            .next_delivery(queue_name, self, None)
            .map_err(|e| self.fail(e))
    }
}

struct Subscription {
    channel: FakeChannel,
    queue_name: String,
    consumer_tag: String,
    prefetch_count: u16,
    notify: Arc<Notify>,
    done: bool,
}

impl Subscription {
    async fn next(&mut self) -> Option<Result<Delivery, TransportError>> {
        if self.done {
            return None;
        }
        loop {
            if self
                .channel
                .broker
                .state()
                .cancelled_consumers
                .contains(&self.consumer_tag)
            {
                return None;
            }
            if !self.channel.is_open() {
                self.done = true;
                return Some(Err(closed("channel")));
            }
            match self.channel.broker.next_delivery(
                &self.queue_name,
                &self.channel,
                Some(self.prefetch_count),
            ) {
                Ok(Some(delivery)) => return Some(Ok(delivery)),
                Ok(None) => self.notify.notified().await,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

enum Settlement {
    Ack,
    Requeue,
    DeadLetter,
}

struct FakeAcker {
    broker: FakeBroker,
    channel: FakeChannel,
    queue_name: String,
    message: StoredMessage,
    settled: AtomicBool,
}

impl FakeAcker {
    fn settle(&self, outcome: Settlement) -> Result<(), TransportError> {
        self.channel.check_open()?;
        if self.settled.swap(true, Ordering::SeqCst) {
            return Err(self.channel.fail(TransportError::PreconditionFailed(
                "PRECONDITION_FAILED - unknown delivery tag".to_owned(),
            )));
        }
        self.broker
            .settle(&self.queue_name, self.message.clone(), outcome);
        Ok(())
    }
}

#[async_trait::async_trait]
impl Acknowledger for FakeAcker {
    async fn ack(&self) -> Result<(), TransportError> {
        self.settle(Settlement::Ack)
    }

    async fn nack(&self, requeue: bool) -> Result<(), TransportError> {
        self.settle(if requeue {
            Settlement::Requeue
        } else {
            Settlement::DeadLetter
        })
    }
}

/// A standalone acknowledger recording what the consumer asked for.
#[derive(Clone, Default)]
pub(crate) struct RecordingAcker {
    calls: Arc<Mutex<Vec<&'static str>>>,
    fail: Arc<AtomicBool>,
}

impl RecordingAcker {
    pub(crate) fn failing() -> Self {
        let acker = Self::default();
        acker.fail.store(true, Ordering::SeqCst);
        acker
    }

    pub(crate) fn calls(&self) -> Vec<&'static str> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub(crate) fn delivery(&self, data: impl Into<Vec<u8>>) -> Delivery {
        Delivery {
            delivery_tag: 1,
            routing_key: "test_queue".to_owned(),
            redelivered: false,
            properties: BasicProperties::default(),
            data: data.into(),
            acker: Box::new(self.clone()),
        }
    }

    fn record(&self, call: &'static str) -> Result<(), TransportError> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(call);
        if self.fail.load(Ordering::SeqCst) {
            Err(closed("channel"))
        } else {
            Ok(())
        }
    }
}

#[async_trait::async_trait]
impl Acknowledger for RecordingAcker {
    async fn ack(&self) -> Result<(), TransportError> {
        self.record("ack")
    }

    async fn nack(&self, requeue: bool) -> Result<(), TransportError> {
        self.record(if requeue { "nack_requeue" } else { "nack" })
    }
}
