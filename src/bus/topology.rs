//! Queue and exchange declaration.

use super::broker::{Channel, Connection, ExchangeKind, QueueDurability, QueueSpec};
use super::error::{SetupError, SetupStage};

/// A queue bound to an exchange under one routing key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub exchange: String,
    pub queue: String,
    pub routing_key: String,
    pub durability: QueueDurability,
    /// Applied when a durable queue is declared; ignored for transient ones.
    pub dead_letter_exchange: Option<String>,
}

impl Binding {
    pub fn new(
        exchange: impl Into<String>,
        queue: impl Into<String>,
        routing_key: impl Into<String>,
        durability: QueueDurability,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            queue: queue.into(),
            routing_key: routing_key.into(),
            durability,
            dead_letter_exchange: None,
        }
    }

    pub fn with_dead_letter_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.dead_letter_exchange = Some(exchange.into());
        self
    }

    fn queue_spec(&self) -> QueueSpec {
        let spec = QueueSpec::new(self.queue.clone(), self.durability);
        match (&self.dead_letter_exchange, self.durability) {
            (Some(dlx), QueueDurability::Durable) => spec.with_dead_letter_exchange(dlx.clone()),
            _ => spec,
        }
    }
}

/// Open a dedicated channel, declare the binding's queue and bind it.
///
/// Safe to call repeatedly with the same binding. Returns the channel together
/// with the declared queue name (generated by the broker when `queue` is
/// empty).
pub fn declare_and_bind(
    connection: &dyn Connection,
    binding: &Binding,
) -> Result<(Box<dyn Channel>, String), SetupError> {
    let channel = connection
        .open_channel()
        .map_err(SetupError::at(SetupStage::OpenChannel))?;

    let queue = channel
        .declare_queue(&binding.queue_spec())
        .map_err(SetupError::at(SetupStage::DeclareQueue))?;

    channel
        .bind_queue(&queue, &binding.exchange, &binding.routing_key)
        .map_err(SetupError::at(SetupStage::BindQueue))?;

    tracing::debug!(
        exchange = %binding.exchange,
        queue = %queue,
        routing_key = %binding.routing_key,
        durability = ?binding.durability,
        "queue declared and bound"
    );

    Ok((channel, queue))
}

/// Declare a durable exchange on a short-lived channel.
pub fn declare_exchange(
    connection: &dyn Connection,
    name: &str,
    kind: ExchangeKind,
) -> Result<(), SetupError> {
    let channel = connection
        .open_channel()
        .map_err(SetupError::at(SetupStage::OpenChannel))?;
    let declared = channel
        .declare_exchange(name, kind, true)
        .map_err(SetupError::at(SetupStage::DeclareExchange));
    if let Err(e) = channel.close() {
        tracing::debug!(error = %e, "closing declare channel failed");
    }
    declared?;
    tracing::debug!(exchange = name, kind = %kind, "exchange declared");
    Ok(())
}
