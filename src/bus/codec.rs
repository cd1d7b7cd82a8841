//! Payload codecs.
//!
//! A codec turns a typed value into an [`Envelope`] (content-type tag plus
//! opaque bytes) and back. The codec used for a routing key is a contract
//! between its publishers and subscribers; nothing on the wire says which Rust
//! type a payload holds.

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::error::{DecodeError, EncodeError};

/// The wire unit exchanged with the broker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    /// Codec tag, e.g. `application/json`.
    pub content_type: String,
    /// Encoded message body.
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Create an envelope from a content type and encoded bytes.
    pub fn new(content_type: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            content_type: content_type.into(),
            payload,
        }
    }

    /// Get the payload as a string (if valid UTF-8).
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

/// A serialization format selected at compile time.
pub trait Codec {
    /// Content-type tag stamped on every envelope this codec produces.
    const CONTENT_TYPE: &'static str;

    /// Serialize a value to bytes.
    fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, EncodeError>;

    /// Deserialize bytes into a value.
    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, DecodeError>;

    /// Encode a value and tag it with [`Self::CONTENT_TYPE`].
    fn encode_envelope<T: Serialize>(value: &T) -> Result<Envelope, EncodeError> {
        Ok(Envelope::new(Self::CONTENT_TYPE, Self::encode(value)?))
    }

    /// Decode an envelope, rejecting envelopes written by another codec.
    fn decode_envelope<T: DeserializeOwned>(envelope: &Envelope) -> Result<T, DecodeError> {
        if envelope.content_type != Self::CONTENT_TYPE {
            return Err(DecodeError::ContentTypeMismatch {
                expected: Self::CONTENT_TYPE.to_string(),
                actual: envelope.content_type.clone(),
            });
        }
        Self::decode(&envelope.payload)
    }
}

/// Self-describing text encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct Json;

impl Codec for Json {
    const CONTENT_TYPE: &'static str = "application/json";

    fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, EncodeError> {
        serde_json::to_vec(value).map_err(EncodeError::Json)
    }

    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, DecodeError> {
        serde_json::from_slice(bytes).map_err(DecodeError::Json)
    }
}

/// Compact binary encoding (bitcode through its serde bridge).
#[derive(Debug, Clone, Copy, Default)]
pub struct Binary;

impl Codec for Binary {
    const CONTENT_TYPE: &'static str = "application/x-bitcode";

    fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, EncodeError> {
        bitcode::serialize(value).map_err(EncodeError::Binary)
    }

    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, DecodeError> {
        bitcode::deserialize(bytes).map_err(DecodeError::Binary)
    }
}
