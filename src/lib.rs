//! Typed publish/subscribe over a message broker, and the Peril game built on it.

pub mod bus;
pub mod config;
pub mod game;
pub mod repl;
pub mod routing;

pub use bus::{AckDecision, Binding, Publisher, QueueDurability, SubscribeOptions, Subscription};
pub use config::BrokerConfig;
