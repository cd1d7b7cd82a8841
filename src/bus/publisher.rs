//! Typed publishing.

use std::sync::{Arc, Mutex};

use serde::Serialize;

use super::broker::{Channel, Connection};
use super::codec::{Binary, Codec, Json};
use super::error::{BrokerError, PublishError};

/// Encode `value` with codec `C` and hand it to the broker.
///
/// Fire-and-forget: only local encode and send failures are reported, never
/// what consumers do with the message.
pub fn publish<C, T>(
    channel: &dyn Channel,
    exchange: &str,
    routing_key: &str,
    value: &T,
) -> Result<(), PublishError>
where
    C: Codec,
    T: Serialize,
{
    let envelope = C::encode_envelope(value)?;
    tracing::trace!(
        exchange,
        routing_key,
        content_type = C::CONTENT_TYPE,
        bytes = envelope.payload.len(),
        "publishing"
    );
    channel.publish(exchange, routing_key, envelope)?;
    Ok(())
}

/// Publish `value` as JSON.
pub fn publish_json<T: Serialize>(
    channel: &dyn Channel,
    exchange: &str,
    routing_key: &str,
    value: &T,
) -> Result<(), PublishError> {
    publish::<Json, T>(channel, exchange, routing_key, value)
}

/// Publish `value` in the compact binary encoding.
pub fn publish_binary<T: Serialize>(
    channel: &dyn Channel,
    exchange: &str,
    routing_key: &str,
    value: &T,
) -> Result<(), PublishError> {
    publish::<Binary, T>(channel, exchange, routing_key, value)
}

/// A publishing channel shared between threads.
///
/// Calls are serialized through a mutex, so the REPL and any number of
/// subscription handlers can publish through clones of one `Publisher`.
#[derive(Clone)]
pub struct Publisher {
    channel: Arc<Mutex<Box<dyn Channel>>>,
}

impl Publisher {
    /// Wrap an open channel.
    pub fn new(channel: Box<dyn Channel>) -> Self {
        Self {
            channel: Arc::new(Mutex::new(channel)),
        }
    }

    /// Open a fresh channel on `connection` for publishing.
    pub fn open(connection: &dyn Connection) -> Result<Self, BrokerError> {
        Ok(Self::new(connection.open_channel()?))
    }

    /// Encode `value` with codec `C` and publish it on the shared channel.
    pub fn publish<C, T>(&self, exchange: &str, routing_key: &str, value: &T) -> Result<(), PublishError>
    where
        C: Codec,
        T: Serialize,
    {
        // A panic elsewhere while holding the lock leaves the channel usable.
        let channel = self
            .channel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        publish::<C, T>(channel.as_ref(), exchange, routing_key, value)
    }

    /// Publish `value` as JSON.
    pub fn publish_json<T: Serialize>(
        &self,
        exchange: &str,
        routing_key: &str,
        value: &T,
    ) -> Result<(), PublishError> {
        self.publish::<Json, T>(exchange, routing_key, value)
    }

    /// Publish `value` in the compact binary encoding.
    pub fn publish_binary<T: Serialize>(
        &self,
        exchange: &str,
        routing_key: &str,
        value: &T,
    ) -> Result<(), PublishError> {
        self.publish::<Binary, T>(exchange, routing_key, value)
    }
}
