//! In-memory broker for tests and single-process use.
//!
//! Models the parts of an AMQP broker the pub/sub core relies on:
//! - direct, topic and fanout exchanges (plus the nameless default exchange)
//! - durable and transient queues; exclusive queues die with their connection,
//!   auto-delete queues with their last consumer
//! - competing consumers with round-robin dispatch and per-consumer prefetch
//! - manual ack / nack, requeue with the `redelivered` flag, dead-lettering
//! - unacknowledged messages return to their queue when the channel closes
//!
//! Nothing is persisted. [`InMemoryBroker::restart`] simulates a broker restart
//! by dropping connections and everything that is not durable.
//!
//! ## Example
//!
//! ```
//! use peril::bus::{
//!     publish_json, subscribe_json, AckDecision, Binding, Connection, ExchangeKind,
//!     InMemoryBroker, QueueDurability, SubscribeOptions,
//! };
//! use std::sync::mpsc;
//! use std::time::Duration;
//!
//! let broker = InMemoryBroker::new();
//! broker.declare_exchange("events", ExchangeKind::Direct).unwrap();
//! let conn = broker.connect();
//!
//! let (tx, rx) = mpsc::channel();
//! let binding = Binding::new("events", "greetings", "hello", QueueDurability::Durable);
//! let _sub = subscribe_json(&conn, binding, SubscribeOptions::default(), move |msg: String| {
//!     tx.send(msg).unwrap();
//!     AckDecision::Ack
//! })
//! .unwrap();
//!
//! let channel = conn.open_channel().unwrap();
//! publish_json(channel.as_ref(), "events", "hello", &"world".to_string()).unwrap();
//! assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), "world");
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::broker::{
    Acker, Channel, Connection, Consumer, Delivery, ExchangeKind, QueueSpec,
};
use super::codec::Envelope;
use super::error::BrokerError;

/// Shared handle to an in-memory broker. Clones refer to the same broker.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    changed: Condvar,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Clone, Debug)]
struct Message {
    envelope: Envelope,
    exchange: String,
    routing_key: String,
    redelivered: bool,
}

struct ExchangeState {
    kind: ExchangeKind,
    durable: bool,
    /// (queue, binding key)
    bindings: Vec<(String, String)>,
}

struct QueueState {
    durable: bool,
    auto_delete: bool,
    exclusive_owner: Option<u64>,
    dead_letter_exchange: Option<String>,
    ready: VecDeque<Message>,
    consumers: Vec<u64>,
    next_consumer: usize,
}

impl QueueState {
    fn matches(&self, spec: &QueueSpec) -> bool {
        self.durable == spec.durability.durable()
            && self.auto_delete == spec.durability.auto_delete()
            && self.exclusive_owner.is_some() == spec.durability.exclusive()
            && self.dead_letter_exchange == spec.dead_letter_exchange
    }
}

struct ConsumerState {
    queue: String,
    channel: u64,
    /// Delivery tags dispatched to this consumer but not yet handed out.
    inbox: VecDeque<u64>,
    in_flight: usize,
}

struct Unacked {
    queue: String,
    consumer: u64,
    channel: u64,
    message: Message,
}

struct ChannelState {
    connection: u64,
    prefetch: u16,
}

struct State {
    exchanges: HashMap<String, ExchangeState>,
    queues: HashMap<String, QueueState>,
    connections: HashSet<u64>,
    channels: HashMap<u64, ChannelState>,
    consumers: HashMap<u64, ConsumerState>,
    unacked: HashMap<u64, Unacked>,
    next_id: u64,
}

impl Default for State {
    fn default() -> Self {
        let mut exchanges = HashMap::new();
        for (name, kind) in [
            ("amq.direct", ExchangeKind::Direct),
            ("amq.topic", ExchangeKind::Topic),
            ("amq.fanout", ExchangeKind::Fanout),
        ] {
            exchanges.insert(
                name.to_string(),
                ExchangeState {
                    kind,
                    durable: true,
                    bindings: Vec::new(),
                },
            );
        }
        Self {
            exchanges,
            queues: HashMap::new(),
            connections: HashSet::new(),
            channels: HashMap::new(),
            consumers: HashMap::new(),
            unacked: HashMap::new(),
            next_id: 1,
        }
    }
}

impl State {
    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn channel_open(&self, channel: u64) -> Result<(), BrokerError> {
        match self.channels.get(&channel) {
            Some(ch) if self.connections.contains(&ch.connection) => Ok(()),
            _ => Err(BrokerError::ChannelClosed),
        }
    }

    fn check_exclusive(&self, queue: &QueueState, name: &str, connection: u64) -> Result<(), BrokerError> {
        match queue.exclusive_owner {
            Some(owner) if owner != connection => Err(BrokerError::ResourceLocked(name.to_string())),
            _ => Ok(()),
        }
    }

    fn declare_exchange(&mut self, name: &str, kind: ExchangeKind, durable: bool) -> Result<(), BrokerError> {
        if name.is_empty() {
            return Err(BrokerError::PreconditionFailed(
                "the default exchange cannot be redeclared".into(),
            ));
        }
        match self.exchanges.get(name) {
            Some(existing) if existing.kind == kind && existing.durable == durable => Ok(()),
            Some(existing) => Err(BrokerError::PreconditionFailed(format!(
                "exchange {} already declared as {} (durable: {})",
                name, existing.kind, existing.durable
            ))),
            None => {
                self.exchanges.insert(
                    name.to_string(),
                    ExchangeState {
                        kind,
                        durable,
                        bindings: Vec::new(),
                    },
                );
                Ok(())
            }
        }
    }

    /// Queues an exchange routes `routing_key` to, without duplicates.
    fn matching_queues(&self, exchange: &str, routing_key: &str) -> Result<Vec<String>, BrokerError> {
        if exchange.is_empty() {
            return Ok(self
                .queues
                .contains_key(routing_key)
                .then(|| routing_key.to_string())
                .into_iter()
                .collect());
        }
        let ex = self
            .exchanges
            .get(exchange)
            .ok_or_else(|| BrokerError::NotFound(format!("exchange {}", exchange)))?;
        let mut matched: Vec<String> = Vec::new();
        for (queue, key) in &ex.bindings {
            let hit = match ex.kind {
                ExchangeKind::Direct => key == routing_key,
                ExchangeKind::Topic => topic_matches(key, routing_key),
                ExchangeKind::Fanout => true,
            };
            if hit && !matched.contains(queue) {
                matched.push(queue.clone());
            }
        }
        Ok(matched)
    }

    fn route(&mut self, exchange: &str, routing_key: &str, envelope: Envelope) -> Result<usize, BrokerError> {
        let targets = self.matching_queues(exchange, routing_key)?;
        for name in &targets {
            if let Some(queue) = self.queues.get_mut(name) {
                queue.ready.push_back(Message {
                    envelope: envelope.clone(),
                    exchange: exchange.to_string(),
                    routing_key: routing_key.to_string(),
                    redelivered: false,
                });
            }
            self.dispatch(name);
        }
        Ok(targets.len())
    }

    /// Hand ready messages to consumers with prefetch room, round-robin.
    fn dispatch(&mut self, queue_name: &str) {
        loop {
            let Some(queue) = self.queues.get(queue_name) else {
                return;
            };
            if queue.ready.is_empty() || queue.consumers.is_empty() {
                return;
            }

            let count = queue.consumers.len();
            let start = queue.next_consumer % count;
            let chosen = (0..count)
                .map(|offset| (start + offset) % count)
                .find(|&idx| self.has_room(queue.consumers[idx]));
            let Some(idx) = chosen else {
                return;
            };
            let consumer_id = queue.consumers[idx];

            let tag = self.next_id();
            let Some(queue) = self.queues.get_mut(queue_name) else {
                return;
            };
            queue.next_consumer = (idx + 1) % count;
            let Some(message) = queue.ready.pop_front() else {
                return;
            };
            let Some(consumer) = self.consumers.get_mut(&consumer_id) else {
                return;
            };
            consumer.inbox.push_back(tag);
            consumer.in_flight += 1;
            let channel = consumer.channel;
            self.unacked.insert(
                tag,
                Unacked {
                    queue: queue_name.to_string(),
                    consumer: consumer_id,
                    channel,
                    message,
                },
            );
        }
    }

    fn has_room(&self, consumer_id: u64) -> bool {
        let Some(consumer) = self.consumers.get(&consumer_id) else {
            return false;
        };
        let prefetch = self
            .channels
            .get(&consumer.channel)
            .map(|ch| ch.prefetch)
            .unwrap_or(0);
        prefetch == 0 || consumer.in_flight < usize::from(prefetch)
    }

    /// Remove an outstanding delivery, returning it with its queue.
    fn settle(&mut self, tag: u64, channel: u64) -> Result<Unacked, BrokerError> {
        self.channel_open(channel)?;
        match self.unacked.get(&tag) {
            Some(entry) if entry.channel == channel => {}
            _ => return Err(BrokerError::UnknownDeliveryTag(tag)),
        }
        let entry = self
            .unacked
            .remove(&tag)
            .ok_or(BrokerError::UnknownDeliveryTag(tag))?;
        if let Some(consumer) = self.consumers.get_mut(&entry.consumer) {
            consumer.in_flight = consumer.in_flight.saturating_sub(1);
        }
        Ok(entry)
    }

    fn requeue(&mut self, entry: Unacked) {
        let Unacked {
            queue, mut message, ..
        } = entry;
        if let Some(q) = self.queues.get_mut(&queue) {
            message.redelivered = true;
            q.ready.push_front(message);
        }
        self.dispatch(&queue);
    }

    fn dead_letter(&mut self, entry: Unacked) {
        let dlx = self
            .queues
            .get(&entry.queue)
            .and_then(|q| q.dead_letter_exchange.clone());
        if let Some(dlx) = dlx {
            let routing_key = entry.message.routing_key.clone();
            if let Err(e) = self.route(&dlx, &routing_key, entry.message.envelope) {
                tracing::warn!(queue = %entry.queue, error = %e, "dead-lettering failed, dropping");
            }
        }
        self.dispatch(&entry.queue);
    }

    fn cancel_consumer(&mut self, consumer_id: u64) {
        let Some(consumer) = self.consumers.remove(&consumer_id) else {
            return;
        };
        // Dispatched but never handed out: straight back to the queue.
        for tag in consumer.inbox {
            if let Some(entry) = self.unacked.remove(&tag) {
                self.requeue(entry);
            }
        }

        let delete = match self.queues.get_mut(&consumer.queue) {
            Some(queue) => {
                queue.consumers.retain(|&id| id != consumer_id);
                queue.auto_delete && queue.consumers.is_empty()
            }
            None => false,
        };
        if delete {
            self.delete_queue(&consumer.queue);
        } else {
            self.dispatch(&consumer.queue);
        }
    }

    fn close_channel(&mut self, channel: u64) {
        if self.channels.remove(&channel).is_none() {
            return;
        }
        // Cancel first so requeued messages cannot land on this channel again.
        let consumers: Vec<u64> = self
            .consumers
            .iter()
            .filter(|(_, c)| c.channel == channel)
            .map(|(&id, _)| id)
            .collect();
        for id in consumers {
            self.cancel_consumer(id);
        }

        let mut tags: Vec<u64> = self
            .unacked
            .iter()
            .filter(|(_, entry)| entry.channel == channel)
            .map(|(&tag, _)| tag)
            .collect();
        // Newest first, so the oldest ends up at the head of its queue.
        tags.sort_unstable_by(|a, b| b.cmp(a));
        for tag in tags {
            if let Some(entry) = self.unacked.remove(&tag) {
                self.requeue(entry);
            }
        }
    }

    fn close_connection(&mut self, connection: u64) {
        if !self.connections.remove(&connection) {
            return;
        }
        let channels: Vec<u64> = self
            .channels
            .iter()
            .filter(|(_, ch)| ch.connection == connection)
            .map(|(&id, _)| id)
            .collect();
        for id in channels {
            self.close_channel(id);
        }
        let exclusive: Vec<String> = self
            .queues
            .iter()
            .filter(|(_, q)| q.exclusive_owner == Some(connection))
            .map(|(name, _)| name.clone())
            .collect();
        for name in exclusive {
            self.delete_queue(&name);
        }
    }

    fn delete_queue(&mut self, name: &str) {
        if self.queues.remove(name).is_none() {
            return;
        }
        for exchange in self.exchanges.values_mut() {
            exchange.bindings.retain(|(queue, _)| queue != name);
        }
        tracing::debug!(queue = name, "queue deleted");
    }
}

/// Topic match: `*` is exactly one word, `#` zero or more words.
pub(crate) fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    fn matches(pattern: &[&str], key: &[&str]) -> bool {
        match (pattern.first(), key.first()) {
            (None, None) => true,
            (Some(&"#"), _) => {
                matches(&pattern[1..], key) || (!key.is_empty() && matches(pattern, &key[1..]))
            }
            (Some(&"*"), Some(_)) => matches(&pattern[1..], &key[1..]),
            (Some(p), Some(k)) if p == k => matches(&pattern[1..], &key[1..]),
            _ => false,
        }
    }
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    matches(&pattern, &key)
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new connection.
    pub fn connect(&self) -> InMemoryConnection {
        let mut state = self.inner.lock();
        let id = state.next_id();
        state.connections.insert(id);
        InMemoryConnection {
            inner: Arc::clone(&self.inner),
            id,
        }
    }

    /// Declare a durable exchange without holding a connection.
    pub fn declare_exchange(&self, name: &str, kind: ExchangeKind) -> Result<(), BrokerError> {
        self.inner.lock().declare_exchange(name, kind, true)
    }

    pub fn exchange_exists(&self, name: &str) -> bool {
        self.inner.lock().exchanges.contains_key(name)
    }

    pub fn queue_exists(&self, name: &str) -> bool {
        self.inner.lock().queues.contains_key(name)
    }

    /// Messages waiting in a queue, not yet dispatched to a consumer.
    pub fn ready_count(&self, queue: &str) -> Option<usize> {
        self.inner.lock().queues.get(queue).map(|q| q.ready.len())
    }

    /// Messages dispatched from a queue and not yet settled.
    pub fn unacked_count(&self, queue: &str) -> usize {
        self.inner
            .lock()
            .unacked
            .values()
            .filter(|entry| entry.queue == queue)
            .count()
    }

    pub fn consumer_count(&self, queue: &str) -> usize {
        self.inner
            .lock()
            .queues
            .get(queue)
            .map(|q| q.consumers.len())
            .unwrap_or(0)
    }

    /// Block until `queue` holds no ready or unsettled messages.
    ///
    /// Returns `false` on timeout. A missing queue counts as drained.
    pub fn wait_until_drained(&self, queue: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.lock();
        loop {
            let ready = state.queues.get(queue).map(|q| q.ready.len()).unwrap_or(0);
            let unacked = state.unacked.values().filter(|e| e.queue == queue).count();
            if ready == 0 && unacked == 0 {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = match self.inner.changed.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// Simulate a broker restart: every connection is dropped, and only
    /// durable exchanges and durable queues (with their contents) survive.
    pub fn restart(&self) {
        let mut state = self.inner.lock();
        let connections: Vec<u64> = state.connections.iter().copied().collect();
        for id in connections {
            state.close_connection(id);
        }
        let transient: Vec<String> = state
            .queues
            .iter()
            .filter(|(_, q)| !q.durable)
            .map(|(name, _)| name.clone())
            .collect();
        for name in transient {
            state.delete_queue(&name);
        }
        state.exchanges.retain(|_, ex| ex.durable);
        drop(state);
        self.inner.changed.notify_all();
    }
}

/// A connection to an [`InMemoryBroker`]. Dropping it closes it.
pub struct InMemoryConnection {
    inner: Arc<Inner>,
    id: u64,
}

impl InMemoryConnection {
    pub fn is_open(&self) -> bool {
        self.inner.lock().connections.contains(&self.id)
    }
}

impl Connection for InMemoryConnection {
    fn open_channel(&self) -> Result<Box<dyn Channel>, BrokerError> {
        let mut state = self.inner.lock();
        if !state.connections.contains(&self.id) {
            return Err(BrokerError::ConnectionClosed);
        }
        let id = state.next_id();
        state.channels.insert(
            id,
            ChannelState {
                connection: self.id,
                prefetch: 0,
            },
        );
        Ok(Box::new(InMemoryChannel {
            inner: Arc::clone(&self.inner),
            id,
            connection: self.id,
        }))
    }

    fn close(&self) -> Result<(), BrokerError> {
        self.inner.lock().close_connection(self.id);
        self.inner.changed.notify_all();
        Ok(())
    }
}

impl Drop for InMemoryConnection {
    fn drop(&mut self) {
        let _ = Connection::close(self);
    }
}

struct InMemoryChannel {
    inner: Arc<Inner>,
    id: u64,
    connection: u64,
}

impl InMemoryChannel {
    /// Run `f` on the locked state if the channel is open, then wake waiters.
    fn with_state<R>(
        &self,
        f: impl FnOnce(&mut State) -> Result<R, BrokerError>,
    ) -> Result<R, BrokerError> {
        let mut state = self.inner.lock();
        state.channel_open(self.id)?;
        let result = f(&mut state);
        drop(state);
        self.inner.changed.notify_all();
        result
    }
}

impl Channel for InMemoryChannel {
    fn declare_exchange(&self, name: &str, kind: ExchangeKind, durable: bool) -> Result<(), BrokerError> {
        self.with_state(|state| state.declare_exchange(name, kind, durable))
    }

    fn declare_queue(&self, spec: &QueueSpec) -> Result<String, BrokerError> {
        let connection = self.connection;
        self.with_state(|state| {
            let name = if spec.name.is_empty() {
                format!("amq.gen-{}", state.next_id())
            } else {
                spec.name.clone()
            };
            if let Some(existing) = state.queues.get(&name) {
                state.check_exclusive(existing, &name, connection)?;
                if !existing.matches(spec) {
                    return Err(BrokerError::PreconditionFailed(format!(
                        "queue {} already declared with different arguments",
                        name
                    )));
                }
                return Ok(name);
            }
            state.queues.insert(
                name.clone(),
                QueueState {
                    durable: spec.durability.durable(),
                    auto_delete: spec.durability.auto_delete(),
                    exclusive_owner: spec.durability.exclusive().then_some(connection),
                    dead_letter_exchange: spec.dead_letter_exchange.clone(),
                    ready: VecDeque::new(),
                    consumers: Vec::new(),
                    next_consumer: 0,
                },
            );
            Ok(name)
        })
    }

    fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<(), BrokerError> {
        let connection = self.connection;
        self.with_state(|state| {
            let q = state
                .queues
                .get(queue)
                .ok_or_else(|| BrokerError::NotFound(format!("queue {}", queue)))?;
            state.check_exclusive(q, queue, connection)?;
            let ex = state
                .exchanges
                .get_mut(exchange)
                .ok_or_else(|| BrokerError::NotFound(format!("exchange {}", exchange)))?;
            let binding = (queue.to_string(), routing_key.to_string());
            if !ex.bindings.contains(&binding) {
                ex.bindings.push(binding);
            }
            Ok(())
        })
    }

    fn set_prefetch(&self, count: u16) -> Result<(), BrokerError> {
        let id = self.id;
        self.with_state(|state| {
            if let Some(ch) = state.channels.get_mut(&id) {
                ch.prefetch = count;
            }
            Ok(())
        })
    }

    fn publish(&self, exchange: &str, routing_key: &str, envelope: Envelope) -> Result<(), BrokerError> {
        self.with_state(|state| state.route(exchange, routing_key, envelope).map(|_| ()))
    }

    fn consume(&self, queue: &str, consumer_tag: &str) -> Result<Box<dyn Consumer>, BrokerError> {
        let (channel, connection) = (self.id, self.connection);
        let consumer_id = self.with_state(|state| {
            let q = state
                .queues
                .get(queue)
                .ok_or_else(|| BrokerError::NotFound(format!("queue {}", queue)))?;
            state.check_exclusive(q, queue, connection)?;
            let id = state.next_id();
            state.consumers.insert(
                id,
                ConsumerState {
                    queue: queue.to_string(),
                    channel,
                    inbox: VecDeque::new(),
                    in_flight: 0,
                },
            );
            if let Some(q) = state.queues.get_mut(queue) {
                q.consumers.push(id);
            }
            state.dispatch(queue);
            Ok(id)
        })?;
        let tag = if consumer_tag.is_empty() {
            format!("ctag-{}", consumer_id)
        } else {
            consumer_tag.to_string()
        };
        tracing::trace!(queue, consumer_tag = %tag, "consumer registered");
        Ok(Box::new(InMemoryConsumer {
            inner: Arc::clone(&self.inner),
            id: consumer_id,
            channel,
        }))
    }

    fn close(&self) -> Result<(), BrokerError> {
        let mut state = self.inner.lock();
        let open = state.channels.contains_key(&self.id);
        state.close_channel(self.id);
        drop(state);
        self.inner.changed.notify_all();
        if open {
            Ok(())
        } else {
            Err(BrokerError::ChannelClosed)
        }
    }
}

impl Drop for InMemoryChannel {
    fn drop(&mut self) {
        let _ = Channel::close(self);
    }
}

struct InMemoryConsumer {
    inner: Arc<Inner>,
    id: u64,
    channel: u64,
}

impl Consumer for InMemoryConsumer {
    fn next_delivery(&mut self) -> Option<Result<Delivery, BrokerError>> {
        let mut state = self.inner.lock();
        loop {
            let consumer = state.consumers.get_mut(&self.id)?;
            if let Some(tag) = consumer.inbox.pop_front() {
                let Some(entry) = state.unacked.get(&tag) else {
                    continue;
                };
                let message = entry.message.clone();
                return Some(Ok(Delivery::new(
                    message.envelope,
                    message.exchange,
                    message.routing_key,
                    tag,
                    message.redelivered,
                    Box::new(InMemoryAcker {
                        inner: Arc::clone(&self.inner),
                        tag,
                        channel: self.channel,
                    }),
                )));
            }
            state = match self.inner.changed.wait(state) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }
}

impl Drop for InMemoryConsumer {
    fn drop(&mut self) {
        self.inner.lock().cancel_consumer(self.id);
        self.inner.changed.notify_all();
    }
}

struct InMemoryAcker {
    inner: Arc<Inner>,
    tag: u64,
    channel: u64,
}

impl InMemoryAcker {
    fn settle_with(&self, f: impl FnOnce(&mut State, Unacked)) -> Result<(), BrokerError> {
        let mut state = self.inner.lock();
        let entry = state.settle(self.tag, self.channel)?;
        f(&mut state, entry);
        drop(state);
        self.inner.changed.notify_all();
        Ok(())
    }
}

impl Acker for InMemoryAcker {
    fn ack(self: Box<Self>) -> Result<(), BrokerError> {
        self.settle_with(|state, entry| state.dispatch(&entry.queue))
    }

    fn nack(self: Box<Self>, requeue: bool) -> Result<(), BrokerError> {
        self.settle_with(|state, entry| {
            if requeue {
                state.requeue(entry);
            } else {
                state.dead_letter(entry);
            }
        })
    }
}
