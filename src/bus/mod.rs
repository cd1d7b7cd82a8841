//! Typed pub/sub over a message broker
//!
//! This module provides the codecs, topology helpers, publishers and the
//! subscriber loop that sit between application values and a broker.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │             publish() / subscribe() (typed)                  │
//! │  - encode with a Codec, tag the envelope                     │
//! │  - decode, run the handler, settle with an AckDecision       │
//! └─────────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │          Connection / Channel / Consumer traits              │
//! │  declare_exchange / declare_queue / bind_queue / publish     │
//! │  consume → next_delivery → Delivery::ack / nack              │
//! └─────────────────────────────────────────────────────────────┘
//!          │                                     │
//!          ▼                                     ▼
//! ┌──────────────────┐               ┌──────────────────────────┐
//! │ InMemoryBroker   │               │ AmqpConnection (lapin)   │
//! │ (included)       │               │ feature = "amqp"         │
//! └──────────────────┘               └──────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! let binding = Binding::new("peril_direct", "pause.alice", "pause", QueueDurability::Transient);
//! let subscription = subscribe_json(&connection, binding, SubscribeOptions::default(), |state: PlayingState| {
//!     println!("paused: {}", state.is_paused);
//!     AckDecision::Ack
//! })?;
//!
//! publish_json(channel.as_ref(), "peril_direct", "pause", &PlayingState { is_paused: true })?;
//! ```

#[cfg(feature = "amqp")]
mod amqp;
mod broker;
mod codec;
mod error;
mod in_memory_broker;
mod publisher;
mod subscriber;
mod topology;

#[cfg(feature = "amqp")]
pub use amqp::AmqpConnection;
pub use broker::{
    Acker, Channel, Connection, Consumer, Delivery, ExchangeKind, QueueDurability, QueueSpec,
};
pub use codec::{Binary, Codec, Envelope, Json};
pub use error::{BrokerError, DecodeError, EncodeError, PublishError, SetupError, SetupStage};
pub use in_memory_broker::{InMemoryBroker, InMemoryConnection};
pub use publisher::{publish, publish_binary, publish_json, Publisher};
pub use subscriber::{
    subscribe, subscribe_binary, subscribe_json, AckDecision, SubscribeOptions, Subscription,
    SubscriptionState, SubscriptionStats,
};
pub use topology::{declare_and_bind, declare_exchange, Binding};
