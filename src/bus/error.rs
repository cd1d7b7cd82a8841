//! Error types for the pub/sub core.

use std::error::Error;
use std::fmt;

/// Failure reported by the broker or by the client connection to it.
#[derive(Debug)]
pub enum BrokerError {
    /// The connection was closed (locally or by the broker).
    ConnectionClosed,
    /// The channel was closed; the operation cannot proceed on it.
    ChannelClosed,
    /// An exchange or queue referenced by the operation does not exist.
    NotFound(String),
    /// A redeclaration did not match the existing entity's flags.
    PreconditionFailed(String),
    /// The queue is exclusive to another connection.
    ResourceLocked(String),
    /// The delivery tag is not outstanding on this channel.
    UnknownDeliveryTag(u64),
    /// Client library error.
    Other(Box<dyn Error + Send + Sync>),
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerError::ConnectionClosed => write!(f, "connection closed"),
            BrokerError::ChannelClosed => write!(f, "channel closed"),
            BrokerError::NotFound(what) => write!(f, "not found: {}", what),
            BrokerError::PreconditionFailed(msg) => write!(f, "precondition failed: {}", msg),
            BrokerError::ResourceLocked(queue) => {
                write!(f, "queue {} is locked by another connection", queue)
            }
            BrokerError::UnknownDeliveryTag(tag) => write!(f, "unknown delivery tag {}", tag),
            BrokerError::Other(e) => write!(f, "broker error: {}", e),
        }
    }
}

impl Error for BrokerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            BrokerError::Other(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

/// Serializing a value into an envelope failed.
#[derive(Debug)]
pub enum EncodeError {
    /// JSON serialization failed.
    Json(serde_json::Error),
    /// Binary serialization failed.
    Binary(bitcode::Error),
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodeError::Json(e) => write!(f, "json encode failed: {}", e),
            EncodeError::Binary(e) => write!(f, "binary encode failed: {}", e),
        }
    }
}

impl Error for EncodeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            EncodeError::Json(e) => Some(e),
            EncodeError::Binary(e) => Some(e),
        }
    }
}

/// An envelope could not be turned back into the expected type.
#[derive(Debug)]
pub enum DecodeError {
    /// The envelope was produced by a different codec.
    ContentTypeMismatch { expected: String, actual: String },
    /// The payload is not valid JSON for the expected type.
    Json(serde_json::Error),
    /// The payload is not a valid binary encoding of the expected type.
    Binary(bitcode::Error),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::ContentTypeMismatch { expected, actual } => write!(
                f,
                "content type mismatch: expected {}, got {}",
                expected, actual
            ),
            DecodeError::Json(e) => write!(f, "json decode failed: {}", e),
            DecodeError::Binary(e) => write!(f, "binary decode failed: {}", e),
        }
    }
}

impl Error for DecodeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DecodeError::ContentTypeMismatch { .. } => None,
            DecodeError::Json(e) => Some(e),
            DecodeError::Binary(e) => Some(e),
        }
    }
}

/// Error type for publish operations.
#[derive(Debug)]
pub enum PublishError {
    /// The value could not be encoded; nothing was sent.
    Encode(EncodeError),
    /// The broker refused the message or the channel is gone.
    Broker(BrokerError),
}

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishError::Encode(e) => write!(f, "publish failed: {}", e),
            PublishError::Broker(e) => write!(f, "publish failed: {}", e),
        }
    }
}

impl Error for PublishError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PublishError::Encode(e) => Some(e),
            PublishError::Broker(e) => Some(e),
        }
    }
}

impl From<EncodeError> for PublishError {
    fn from(err: EncodeError) -> Self {
        PublishError::Encode(err)
    }
}

impl From<BrokerError> for PublishError {
    fn from(err: BrokerError) -> Self {
        PublishError::Broker(err)
    }
}

/// Which part of subscription setup failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStage {
    /// Opening the subscription's channel.
    OpenChannel,
    /// Declaring an exchange.
    DeclareExchange,
    /// Declaring the queue.
    DeclareQueue,
    /// Binding the queue to its exchange.
    BindQueue,
    /// Setting prefetch and starting the consumer.
    Consume,
    /// Starting the consumer thread.
    SpawnConsumer,
}

impl fmt::Display for SetupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            SetupStage::OpenChannel => "open channel",
            SetupStage::DeclareExchange => "declare exchange",
            SetupStage::DeclareQueue => "declare queue",
            SetupStage::BindQueue => "bind queue",
            SetupStage::Consume => "consume",
            SetupStage::SpawnConsumer => "spawn consumer thread",
        };
        f.write_str(stage)
    }
}

/// Topology or subscription setup failed. The subscription never started.
#[derive(Debug)]
pub struct SetupError {
    pub stage: SetupStage,
    pub source: BrokerError,
}

impl SetupError {
    pub fn new(stage: SetupStage, source: BrokerError) -> Self {
        Self { stage, source }
    }

    /// Returns a closure suitable for `map_err` at the given stage.
    pub(crate) fn at(stage: SetupStage) -> impl FnOnce(BrokerError) -> SetupError {
        move |source| SetupError::new(stage, source)
    }
}

impl fmt::Display for SetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "could not {}: {}", self.stage, self.source)
    }
}

impl Error for SetupError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.source)
    }
}
