//! In-memory broker for tests and local development.
//!
//! Implements the whole queue seam with PeekLock semantics: delivered messages
//! are locked for the lock duration and return to the queue, with a higher
//! delivery count, when the lock expires unsettled. Failures can be scripted
//! with [`InMemoryBroker::inject_error`], and [`InMemoryBroker::stats`] counts
//! lifecycle events so tests can check that handles are closed exactly once.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::errors::QueueError;
use crate::message::{LockToken, MessageId, ReceivedMessage};
use crate::queue::{Connector, QueueClient, QueueConnection, ReceiveMode, Receiver};
use crate::receiver::config::ReceiverConfig;

const DEFAULT_LOCK_DURATION: Duration = Duration::from_secs(30);

/// Lifecycle and settlement counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrokerStats {
    pub connects: u32,
    pub connections_closed: u32,
    pub queue_clients_opened: u32,
    pub queue_clients_closed: u32,
    pub receivers_created: u32,
    pub receivers_closed: u32,
    /// Highest number of receivers open at the same time.
    pub max_live_receivers: u32,
    pub deliveries: u32,
    /// Ids of completed messages, in completion order.
    pub completed: Vec<MessageId>,
    pub abandoned: u32,
    pub dead_lettered: u32,
}

#[derive(Debug, Clone)]
struct StoredMessage {
    message_id: MessageId,
    body: String,
    attributes: HashMap<String, String>,
    delivery_count: u32,
}

struct InFlight {
    message: StoredMessage,
    lock_expires_at: Instant,
}

#[derive(Default)]
struct InMemoryQueue {
    ready: VecDeque<StoredMessage>,
    in_flight: HashMap<String, InFlight>,
    dead_letter: Vec<(StoredMessage, String)>,
    injected: VecDeque<QueueError>,
}

impl InMemoryQueue {
    /// Returns messages whose lock expired to the front of the queue.
    fn reclaim_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, f)| f.lock_expires_at <= now)
            .map(|(token, _)| token.clone())
            .collect();
        for token in expired {
            if let Some(f) = self.in_flight.remove(&token) {
                self.ready.push_front(f.message);
            }
        }
    }
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<String, InMemoryQueue>,
    stats: BrokerStats,
    live_receivers: u32,
    next_id: u64,
    unreachable: bool,
}

impl BrokerState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

struct Shared {
    state: Mutex<BrokerState>,
    arrivals: Notify,
    lock_duration: Duration,
}

/// A broker that lives in process memory. Clones share the same queues.
#[derive(Clone)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        InMemoryBroker::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        InMemoryBroker::with_lock_duration(DEFAULT_LOCK_DURATION)
    }

    pub fn with_lock_duration(lock_duration: Duration) -> Self {
        InMemoryBroker {
            shared: Arc::new(Shared {
                state: Mutex::new(BrokerState::default()),
                arrivals: Notify::new(),
                lock_duration,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        // A panic while holding the lock leaves counters intact, keep going.
        self.shared
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn create_queue(&self, name: &str) {
        self.state().queues.entry(name.to_string()).or_default();
    }

    /// Enqueues a message, creating the queue if needed.
    pub fn send(&self, queue_name: &str, body: impl Into<String>) -> MessageId {
        self.send_with_attributes(queue_name, body, HashMap::new())
    }

    pub fn send_with_attributes(
        &self,
        queue_name: &str,
        body: impl Into<String>,
        attributes: HashMap<String, String>,
    ) -> MessageId {
        let message_id = {
            let mut state = self.state();
            let message_id = MessageId::new(format!("msg-{}", state.next_id()));
            state
                .queues
                .entry(queue_name.to_string())
                .or_default()
                .ready
                .push_back(StoredMessage {
                    message_id: message_id.clone(),
                    body: body.into(),
                    attributes,
                    delivery_count: 0,
                });
            message_id
        };
        self.shared.arrivals.notify_waiters();
        message_id
    }

    /// Makes the next receive call on `queue_name` fail with `error`.
    ///
    /// Injected errors are returned before any message, in injection order.
    pub fn inject_error(&self, queue_name: &str, error: QueueError) {
        self.state()
            .queues
            .entry(queue_name.to_string())
            .or_default()
            .injected
            .push_back(error);
        self.shared.arrivals.notify_waiters();
    }

    /// When set, `connect` fails with [`QueueError::ConnectionFailed`].
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state().unreachable = unreachable;
    }

    pub fn stats(&self) -> BrokerStats {
        self.state().stats.clone()
    }

    /// Messages waiting for delivery, excluding locked ones.
    pub fn ready_count(&self, queue_name: &str) -> usize {
        self.state().queues.get(queue_name).map_or(0, |q| q.ready.len())
    }

    pub fn in_flight_count(&self, queue_name: &str) -> usize {
        self.state().queues.get(queue_name).map_or(0, |q| q.in_flight.len())
    }

    /// Dead-lettered messages with the reason they were moved.
    pub fn dead_letters(&self, queue_name: &str) -> Vec<(MessageId, String)> {
        self.state()
            .queues
            .get(queue_name)
            .map(|q| {
                q.dead_letter
                    .iter()
                    .map(|(m, reason)| (m.message_id.clone(), reason.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// One receive attempt; `None` means nothing was available yet.
    fn try_receive(
        &self,
        queue_name: &str,
        mode: ReceiveMode,
        max: usize,
        lock_duration: Duration,
    ) -> Option<Result<Vec<ReceivedMessage>, QueueError>> {
        let mut state = self.state();
        let now = Instant::now();

        let queue = match state.queues.get_mut(queue_name) {
            Some(queue) => queue,
            None => {
                return Some(Err(QueueError::QueueNotFound {
                    queue_name: queue_name.to_string(),
                }));
            }
        };

        if let Some(error) = queue.injected.pop_front() {
            return Some(Err(error));
        }

        queue.reclaim_expired(now);
        if queue.ready.is_empty() {
            return None;
        }

        let mut taken = Vec::new();
        while taken.len() < max {
            let Some(mut message) = queue.ready.pop_front() else {
                break;
            };
            message.delivery_count += 1;
            taken.push(message);
        }

        let mut delivered = Vec::with_capacity(taken.len());
        for message in taken {
            let lock_token = format!("lock-{}", state.next_id());
            let mut received = ReceivedMessage::new(
                message.message_id.clone(),
                message.body.clone(),
                LockToken::new(lock_token.clone()),
            )
            .with_delivery_count(message.delivery_count);
            received.attributes = message.attributes.clone();

            if mode == ReceiveMode::PeekLock {
                if let Some(queue) = state.queues.get_mut(queue_name) {
                    queue.in_flight.insert(
                        lock_token,
                        InFlight {
                            message,
                            lock_expires_at: now + lock_duration,
                        },
                    );
                }
            }
            state.stats.deliveries += 1;
            delivered.push(received);
        }

        Some(Ok(delivered))
    }

    fn settle(
        &self,
        queue_name: &str,
        message: &ReceivedMessage,
        settlement: Settlement<'_>,
    ) -> Result<(), QueueError> {
        let mut state = self.state();
        let lost = || QueueError::LockLost {
            lock_token: message.lock_token.to_string(),
        };

        let queue = state.queues.get_mut(queue_name).ok_or_else(lost)?;
        let in_flight = queue
            .in_flight
            .remove(message.lock_token.as_str())
            .ok_or_else(lost)?;
        if in_flight.lock_expires_at <= Instant::now() {
            queue.ready.push_front(in_flight.message);
            return Err(lost());
        }

        match settlement {
            Settlement::Complete => {
                state.stats.completed.push(in_flight.message.message_id);
            }
            Settlement::Abandon => {
                queue.ready.push_front(in_flight.message);
                state.stats.abandoned += 1;
            }
            Settlement::DeadLetter(reason) => {
                queue.dead_letter.push((in_flight.message, reason.to_string()));
                state.stats.dead_lettered += 1;
            }
        }
        Ok(())
    }
}

enum Settlement<'a> {
    Complete,
    Abandon,
    DeadLetter(&'a str),
}

#[async_trait]
impl Connector for InMemoryBroker {
    async fn connect(&self, _connection_string: &str) -> Result<Box<dyn QueueConnection>, QueueError> {
        let mut state = self.state();
        state.stats.connects += 1;
        if state.unreachable {
            return Err(QueueError::ConnectionFailed {
                message: "in-memory broker is unreachable".to_string(),
            });
        }
        Ok(Box::new(InMemoryConnection {
            broker: self.clone(),
        }))
    }
}

pub struct InMemoryConnection {
    broker: InMemoryBroker,
}

#[async_trait]
impl QueueConnection for InMemoryConnection {
    async fn open_queue(&self, queue_name: &str) -> Result<Box<dyn QueueClient>, QueueError> {
        let mut state = self.broker.state();
        if !state.queues.contains_key(queue_name) {
            return Err(QueueError::QueueNotFound {
                queue_name: queue_name.to_string(),
            });
        }
        state.stats.queue_clients_opened += 1;
        Ok(Box::new(InMemoryQueueClient {
            broker: self.broker.clone(),
            queue_name: queue_name.to_string(),
        }))
    }

    async fn close(&self) -> Result<(), QueueError> {
        self.broker.state().stats.connections_closed += 1;
        Ok(())
    }
}

pub struct InMemoryQueueClient {
    broker: InMemoryBroker,
    queue_name: String,
}

#[async_trait]
impl QueueClient for InMemoryQueueClient {
    fn queue_name(&self) -> &str {
        &self.queue_name
    }

    async fn create_receiver(
        &self,
        mode: ReceiveMode,
        config: &ReceiverConfig,
    ) -> Result<Box<dyn Receiver>, QueueError> {
        let mut state = self.broker.state();
        state.stats.receivers_created += 1;
        state.live_receivers += 1;
        state.stats.max_live_receivers = state.stats.max_live_receivers.max(state.live_receivers);

        Ok(Box::new(InMemoryReceiver {
            broker: self.broker.clone(),
            queue_name: self.queue_name.clone(),
            mode,
            max_messages: config.max_number_of_messages.max(1) as usize,
            wait_time: config.wait_time,
            lock_duration: config.lock_duration.unwrap_or(self.broker.shared.lock_duration),
            closed: AtomicBool::new(false),
        }))
    }

    async fn close(&self) -> Result<(), QueueError> {
        self.broker.state().stats.queue_clients_closed += 1;
        Ok(())
    }
}

pub struct InMemoryReceiver {
    broker: InMemoryBroker,
    queue_name: String,
    mode: ReceiveMode,
    max_messages: usize,
    wait_time: Duration,
    lock_duration: Duration,
    closed: AtomicBool,
}

impl InMemoryReceiver {
    fn ensure_open(&self) -> Result<(), QueueError> {
        if self.closed.load(Ordering::Acquire) {
            Err(QueueError::ReceiverClosed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Receiver for InMemoryReceiver {
    fn mode(&self) -> ReceiveMode {
        self.mode
    }

    async fn receive(&self) -> Result<Vec<ReceivedMessage>, QueueError> {
        let deadline = Instant::now() + self.wait_time;
        loop {
            self.ensure_open()?;
            // Registered before checking so a send in between is not missed.
            let arrival = self.broker.shared.arrivals.notified();
            if let Some(result) =
                self.broker
                    .try_receive(&self.queue_name, self.mode, self.max_messages, self.lock_duration)
            {
                return result;
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            // Wake up for lock expiry too, so redeliveries are not held back a full wait.
            let nap = (deadline - now).min(self.lock_duration);
            let _ = tokio::time::timeout(nap, arrival).await;
        }
    }

    async fn complete(&self, message: &ReceivedMessage) -> Result<(), QueueError> {
        self.ensure_open()?;
        self.broker.settle(&self.queue_name, message, Settlement::Complete)
    }

    async fn abandon(&self, message: &ReceivedMessage) -> Result<(), QueueError> {
        self.ensure_open()?;
        self.broker.settle(&self.queue_name, message, Settlement::Abandon)?;
        self.broker.shared.arrivals.notify_waiters();
        Ok(())
    }

    async fn dead_letter(&self, message: &ReceivedMessage, reason: &str) -> Result<(), QueueError> {
        self.ensure_open()?;
        self.broker
            .settle(&self.queue_name, message, Settlement::DeadLetter(reason))
    }

    async fn close(&self) -> Result<(), QueueError> {
        let mut state = self.broker.state();
        state.stats.receivers_closed += 1;
        if !self.closed.swap(true, Ordering::AcqRel) {
            state.live_receivers = state.live_receivers.saturating_sub(1);
        }
        Ok(())
    }
}
