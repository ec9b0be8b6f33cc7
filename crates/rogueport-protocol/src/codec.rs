//! Codec trait and implementations for control messages.
//!
//! Control messages are the only structured thing the server sends; game
//! output is relayed untouched. The [`Codec`] trait keeps the encoding
//! swappable, and [`JsonCodec`] is what browser clients speak.

use serde::{de::DeserializeOwned, Serialize};

use crate::ProtocolError;

/// A codec that can encode Rust types to text frames and decode them back.
///
/// `Send + Sync + 'static` because one codec is shared by every
/// connection task for the lifetime of the server.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into a text frame.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Serialize>(&self, value: &T) -> Result<String, ProtocolError>;

    /// Deserializes a text frame back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the text is malformed or does
    /// not match the expected type.
    fn decode<T: DeserializeOwned>(&self, text: &str) -> Result<T, ProtocolError>;
}

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// ## Example
///
/// ```rust
/// use rogueport_protocol::{Codec, JsonCodec, ServerMessage};
///
/// let codec = JsonCodec;
/// let text = codec.encode(&ServerMessage::Ping).unwrap();
/// assert_eq!(text, r#"{"msg":"ping"}"#);
///
/// let decoded: ServerMessage = codec.decode(&text).unwrap();
/// assert_eq!(decoded, ServerMessage::Ping);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<String, ProtocolError> {
        serde_json::to_string(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, text: &str) -> Result<T, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Decode)
    }
}
