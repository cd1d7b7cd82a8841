//! Typed subscriptions: one consumer thread per subscription.
//!
//! ```text
//!  subscribe()                       consumer thread
//!  ───────────                       ───────────────
//!  declare_and_bind ──► channel ───► next_delivery() ─► decode T ─► handler(T)
//!  consume          ──► consumer        ▲                  │            │
//!  spawn thread                         │                  ▼            ▼
//!                                       │             NackDiscard   AckDecision
//!                                       └──────────── settle delivery ◄─┘
//! ```

use std::any::Any;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;

use super::broker::{Channel, Connection, Consumer, Delivery};
use super::codec::{Binary, Codec, Json};
use super::error::{BrokerError, SetupError, SetupStage};
use super::topology::{declare_and_bind, Binding};

/// How a handled message is settled with the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AckDecision {
    /// Processed; remove it from the queue.
    Ack,
    /// Not actionable here (yet); give it back for redelivery.
    NackRequeue,
    /// Can never succeed; drop it (or dead-letter it).
    NackDiscard,
}

impl AckDecision {
    /// Settle `delivery` accordingly. Consumes it, so this runs once.
    pub fn resolve(self, delivery: Delivery) -> Result<(), BrokerError> {
        match self {
            AckDecision::Ack => delivery.ack(),
            AckDecision::NackRequeue => delivery.nack(true),
            AckDecision::NackDiscard => delivery.nack(false),
        }
    }
}

/// Lifecycle of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    SettingUp,
    Running,
    Closed,
}

/// Counters kept by a subscription's consumer thread.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SubscriptionStats {
    /// Deliveries received from the broker.
    pub delivered: usize,
    /// Settled with [`AckDecision::Ack`].
    pub acked: usize,
    /// Returned to the queue for another attempt.
    pub requeued: usize,
    /// Nacked without requeue, including decode failures and panics.
    pub discarded: usize,
    /// Payloads that could not be decoded as the subscribed type.
    pub decode_failures: usize,
    /// Handler calls that panicked.
    pub handler_panics: usize,
}

impl SubscriptionStats {
    fn record(&mut self, decision: AckDecision) {
        match decision {
            AckDecision::Ack => self.acked += 1,
            AckDecision::NackRequeue => self.requeued += 1,
            AckDecision::NackDiscard => self.discarded += 1,
        }
    }
}

/// Per-subscription consumer settings.
#[derive(Debug, Clone)]
pub struct SubscribeOptions {
    /// Empty lets the broker pick one.
    pub consumer_tag: String,
    /// Unacknowledged deliveries the broker may push ahead; 0 means unlimited.
    pub prefetch: u16,
    /// Log a warning when one handler call takes longer than this.
    pub handler_budget: Option<Duration>,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            consumer_tag: String::new(),
            prefetch: 10,
            handler_budget: None,
        }
    }
}

impl SubscribeOptions {
    pub fn with_consumer_tag(mut self, tag: impl Into<String>) -> Self {
        self.consumer_tag = tag.into();
        self
    }

    pub fn with_prefetch(mut self, prefetch: u16) -> Self {
        self.prefetch = prefetch;
        self
    }

    pub fn with_handler_budget(mut self, budget: Duration) -> Self {
        self.handler_budget = Some(budget);
        self
    }
}

#[derive(Debug)]
struct Shared {
    state: SubscriptionState,
    stats: SubscriptionStats,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle to a running subscription.
///
/// There is no stop method: the consumer thread ends when the broker
/// connection (or the subscription's channel) closes. Dropping the handle
/// detaches the thread.
pub struct Subscription {
    binding: Binding,
    queue: String,
    shared: Arc<Mutex<Shared>>,
    handle: Option<JoinHandle<()>>,
}

impl Subscription {
    /// The binding this subscription was set up with.
    pub fn binding(&self) -> &Binding {
        &self.binding
    }

    /// Name of the queue as declared by the broker.
    pub fn queue_name(&self) -> &str {
        &self.queue
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SubscriptionState {
        lock(&self.shared).state
    }

    /// Snapshot of the counters so far.
    pub fn stats(&self) -> SubscriptionStats {
        lock(&self.shared).stats.clone()
    }

    /// True once the consumer thread has stopped.
    pub fn is_closed(&self) -> bool {
        self.state() == SubscriptionState::Closed
    }

    /// Wait for the consumer thread to finish and return the final stats.
    ///
    /// A consumer thread that died from a panic is logged and reported as
    /// closed.
    pub fn join(mut self) -> SubscriptionStats {
        if let Some(handle) = self.handle.take() {
            if let Err(payload) = handle.join() {
                tracing::error!(
                    queue = %self.queue,
                    panic = %panic_message(payload.as_ref()),
                    "consumer thread panicked"
                );
                lock(&self.shared).state = SubscriptionState::Closed;
            }
        }
        self.stats()
    }
}

/// Bind a queue and consume it on a dedicated thread, decoding every message
/// as `T` with codec `C` and settling it with the handler's decision.
///
/// Setup failures are returned before any thread starts. After that, errors
/// are per message: a payload that does not decode is logged and discarded,
/// a panicking handler is logged and its message discarded, and the loop
/// carries on with the next delivery.
pub fn subscribe<C, T, F>(
    connection: &dyn Connection,
    binding: Binding,
    options: SubscribeOptions,
    handler: F,
) -> Result<Subscription, SetupError>
where
    C: Codec + 'static,
    T: DeserializeOwned + Send + 'static,
    F: FnMut(T) -> AckDecision + Send + 'static,
{
    let (channel, queue) = declare_and_bind(connection, &binding)?;

    let consumer = match open_consumer(channel.as_ref(), &queue, &options) {
        Ok(consumer) => consumer,
        Err(e) => {
            let _ = channel.close();
            return Err(e);
        }
    };

    let shared = Arc::new(Mutex::new(Shared {
        state: SubscriptionState::SettingUp,
        stats: SubscriptionStats::default(),
    }));

    let mut worker = Worker::<C, T, F> {
        queue: queue.clone(),
        channel,
        consumer,
        handler,
        handler_budget: options.handler_budget,
        shared: Arc::clone(&shared),
        _codec: PhantomData,
    };

    let handle = thread::Builder::new()
        .name(format!("subscriber-{}", queue))
        .spawn(move || worker.run())
        .map_err(|e| SetupError::new(SetupStage::SpawnConsumer, BrokerError::Other(Box::new(e))))?;

    // Running from the caller's point of view once the consumer exists; the
    // thread may already have closed if the connection dropped meanwhile.
    {
        let mut guard = lock(&shared);
        if guard.state == SubscriptionState::SettingUp {
            guard.state = SubscriptionState::Running;
        }
    }

    tracing::info!(
        exchange = %binding.exchange,
        queue = %queue,
        routing_key = %binding.routing_key,
        content_type = C::CONTENT_TYPE,
        "subscription started"
    );

    Ok(Subscription {
        binding,
        queue,
        shared,
        handle: Some(handle),
    })
}

/// [`subscribe`] with the JSON codec.
pub fn subscribe_json<T, F>(
    connection: &dyn Connection,
    binding: Binding,
    options: SubscribeOptions,
    handler: F,
) -> Result<Subscription, SetupError>
where
    T: DeserializeOwned + Send + 'static,
    F: FnMut(T) -> AckDecision + Send + 'static,
{
    subscribe::<Json, T, F>(connection, binding, options, handler)
}

/// [`subscribe`] with the binary codec.
pub fn subscribe_binary<T, F>(
    connection: &dyn Connection,
    binding: Binding,
    options: SubscribeOptions,
    handler: F,
) -> Result<Subscription, SetupError>
where
    T: DeserializeOwned + Send + 'static,
    F: FnMut(T) -> AckDecision + Send + 'static,
{
    subscribe::<Binary, T, F>(connection, binding, options, handler)
}

fn open_consumer(
    channel: &dyn Channel,
    queue: &str,
    options: &SubscribeOptions,
) -> Result<Box<dyn Consumer>, SetupError> {
    if options.prefetch > 0 {
        channel
            .set_prefetch(options.prefetch)
            .map_err(SetupError::at(SetupStage::Consume))?;
    }
    channel
        .consume(queue, &options.consumer_tag)
        .map_err(SetupError::at(SetupStage::Consume))
}

struct Worker<C, T, F> {
    queue: String,
    channel: Box<dyn Channel>,
    consumer: Box<dyn Consumer>,
    handler: F,
    handler_budget: Option<Duration>,
    shared: Arc<Mutex<Shared>>,
    _codec: PhantomData<fn() -> (C, T)>,
}

impl<C, T, F> Worker<C, T, F>
where
    C: Codec,
    T: DeserializeOwned,
    F: FnMut(T) -> AckDecision,
{
    fn run(&mut self) {
        while let Some(next) = self.consumer.next_delivery() {
            match next {
                Ok(delivery) => self.process(delivery),
                Err(e) => {
                    tracing::error!(queue = %self.queue, error = %e, "consumer failed");
                    break;
                }
            }
        }

        if let Err(e) = self.channel.close() {
            tracing::debug!(queue = %self.queue, error = %e, "channel already closed");
        }
        lock(&self.shared).state = SubscriptionState::Closed;
        tracing::info!(queue = %self.queue, "subscription closed");
    }

    fn process(&mut self, delivery: Delivery) {
        lock(&self.shared).stats.delivered += 1;
        tracing::debug!(
            queue = %self.queue,
            routing_key = %delivery.routing_key,
            tag = delivery.delivery_tag,
            redelivered = delivery.redelivered,
            "delivery received"
        );

        let decision = match C::decode_envelope::<T>(&delivery.envelope) {
            Ok(value) => self.invoke(value),
            Err(e) => {
                tracing::warn!(
                    queue = %self.queue,
                    routing_key = %delivery.routing_key,
                    error = %e,
                    "could not decode message, discarding"
                );
                lock(&self.shared).stats.decode_failures += 1;
                AckDecision::NackDiscard
            }
        };

        let tag = delivery.delivery_tag;
        match decision.resolve(delivery) {
            Ok(()) => lock(&self.shared).stats.record(decision),
            Err(e) => tracing::error!(
                queue = %self.queue,
                tag,
                decision = ?decision,
                error = %e,
                "could not settle delivery"
            ),
        }
    }

    fn invoke(&mut self, value: T) -> AckDecision {
        let started = Instant::now();
        let handler = &mut self.handler;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(value)));
        let elapsed = started.elapsed();

        if let Some(budget) = self.handler_budget {
            if elapsed > budget {
                tracing::warn!(
                    queue = %self.queue,
                    elapsed_ms = elapsed.as_millis() as u64,
                    budget_ms = budget.as_millis() as u64,
                    "handler exceeded its budget"
                );
            }
        }

        match outcome {
            Ok(decision) => decision,
            Err(payload) => {
                tracing::error!(
                    queue = %self.queue,
                    panic = %panic_message(payload.as_ref()),
                    "handler panicked, discarding message"
                );
                lock(&self.shared).stats.handler_panics += 1;
                AckDecision::NackDiscard
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
