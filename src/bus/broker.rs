//! Broker port.
//!
//! The core only talks to a broker through these traits. Two implementations
//! ship with the crate: [`InMemoryBroker`](super::InMemoryBroker) and, with the
//! `amqp` feature, an AMQP 0-9-1 client built on `lapin`.

use std::fmt;

use super::codec::Envelope;
use super::error::BrokerError;

/// How an exchange matches routing keys to bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeKind {
    /// Exact routing-key match.
    Direct,
    /// Dot-separated words; `*` matches one word, `#` zero or more.
    Topic,
    /// Every bound queue, routing key ignored.
    Fanout,
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            ExchangeKind::Direct => "direct",
            ExchangeKind::Topic => "topic",
            ExchangeKind::Fanout => "fanout",
        };
        f.write_str(kind)
    }
}

/// Lifetime policy of a queue.
///
/// Each mode fixes the durable, auto-delete and exclusive flags together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueDurability {
    /// Survives broker restarts, shared, never auto-deleted.
    Durable,
    /// Exclusive to the declaring connection, deleted when its consumer goes.
    Transient,
}

impl QueueDurability {
    /// Whether the queue survives a broker restart.
    pub fn durable(self) -> bool {
        matches!(self, QueueDurability::Durable)
    }

    pub fn auto_delete(self) -> bool {
        matches!(self, QueueDurability::Transient)
    }

    pub fn exclusive(self) -> bool {
        matches!(self, QueueDurability::Transient)
    }
}

/// Everything the broker needs to declare a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSpec {
    /// Empty asks the broker to generate a name.
    pub name: String,
    pub durability: QueueDurability,
    pub dead_letter_exchange: Option<String>,
}

impl QueueSpec {
    pub fn new(name: impl Into<String>, durability: QueueDurability) -> Self {
        Self {
            name: name.into(),
            durability,
            dead_letter_exchange: None,
        }
    }

    pub fn with_dead_letter_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.dead_letter_exchange = Some(exchange.into());
        self
    }
}

/// A connection to a broker. Channels opened from it share its lifetime.
pub trait Connection: Send + Sync {
    /// Open a new channel dedicated to the caller.
    fn open_channel(&self) -> Result<Box<dyn Channel>, BrokerError>;

    /// Close the connection and every channel opened from it.
    fn close(&self) -> Result<(), BrokerError>;
}

/// A channel on a broker connection.
///
/// Publishing on one channel from several threads must be serialized by the
/// caller; see [`Publisher`](super::Publisher).
pub trait Channel: Send + Sync {
    /// Declare an exchange. Identical redeclarations succeed.
    fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> Result<(), BrokerError>;

    /// Declare a queue and return its (possibly generated) name.
    fn declare_queue(&self, spec: &QueueSpec) -> Result<String, BrokerError>;

    /// Route messages matching `routing_key` on `exchange` to `queue`.
    fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str)
        -> Result<(), BrokerError>;

    /// Limit unacknowledged deliveries per consumer on this channel.
    fn set_prefetch(&self, count: u16) -> Result<(), BrokerError>;

    /// Send an envelope to an exchange; unroutable messages are dropped.
    fn publish(&self, exchange: &str, routing_key: &str, envelope: Envelope)
        -> Result<(), BrokerError>;

    /// Start consuming with manual acknowledgment.
    fn consume(&self, queue: &str, consumer_tag: &str) -> Result<Box<dyn Consumer>, BrokerError>;

    /// Close the channel. Unacknowledged deliveries go back to their queues.
    fn close(&self) -> Result<(), BrokerError>;
}

/// A stream of deliveries for one consumer.
pub trait Consumer: Send {
    /// Block until the next delivery arrives.
    ///
    /// Returns `None` once the consumer is cancelled or its channel closes.
    fn next_delivery(&mut self) -> Option<Result<Delivery, BrokerError>>;
}

/// Broker-side handle used to settle one delivery.
pub trait Acker: Send {
    fn ack(self: Box<Self>) -> Result<(), BrokerError>;

    fn nack(self: Box<Self>, requeue: bool) -> Result<(), BrokerError>;
}

/// An inbound message plus the handle that settles it.
///
/// Settling consumes the delivery, so it can be settled at most once.
/// Dropping it unsettled leaves the message unacknowledged until its channel
/// closes, at which point the broker requeues it.
pub struct Delivery {
    /// Content type and payload as published.
    pub envelope: Envelope,
    /// Exchange the message was published to.
    pub exchange: String,
    /// Routing key it was published with.
    pub routing_key: String,
    /// Broker-assigned tag, unique per channel.
    pub delivery_tag: u64,
    /// Set when the message was delivered before and requeued.
    pub redelivered: bool,
    acker: Box<dyn Acker>,
}

impl Delivery {
    pub fn new(
        envelope: Envelope,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        delivery_tag: u64,
        redelivered: bool,
        acker: Box<dyn Acker>,
    ) -> Self {
        Self {
            envelope,
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            delivery_tag,
            redelivered,
            acker,
        }
    }

    /// Remove the message from its queue for good.
    pub fn ack(self) -> Result<(), BrokerError> {
        self.acker.ack()
    }

    /// Reject the message, optionally returning it to the queue.
    pub fn nack(self, requeue: bool) -> Result<(), BrokerError> {
        self.acker.nack(requeue)
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("content_type", &self.envelope.content_type)
            .field("bytes", &self.envelope.payload.len())
            .field("exchange", &self.exchange)
            .field("routing_key", &self.routing_key)
            .field("delivery_tag", &self.delivery_tag)
            .field("redelivered", &self.redelivered)
            .finish()
    }
}
