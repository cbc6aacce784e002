//! Encoding module - serialization of emitted values.
//!
//! Transports never pick a format themselves; they are handed an
//! [`Encoder`] (or derive one from the request's [`EncodingType`]).
//!
//! - [`JsonEncoder`] - newline-delimited JSON
//! - [`MsgPackEncoder`] - MessagePack using `rmp-serde` (struct-as-map)
//! - [`TextEncoder`] - [`Payload::render_line`] plus newline
//!
//! # Example
//!
//! ```
//! use cmdwire::encoding::{Encoder, EncodingType, JsonEncoder};
//!
//! let encoded = JsonEncoder.encode(&"hello".to_string()).unwrap();
//! assert_eq!(&encoded[..], b"\"hello\"\n");
//!
//! let encoding: EncodingType = "msgpack".parse().unwrap();
//! assert_eq!(encoding.mime(), "application/msgpack");
//! ```

mod json;
mod msgpack;
mod text;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;

pub use json::JsonEncoder;
pub use msgpack::MsgPackEncoder;
pub use text::TextEncoder;

use crate::error::EncodeError;
use crate::payload::Payload;

/// Serializes one value into bytes for a transport's sink.
pub trait Encoder<T>: Send + Sync {
    /// Encode a single value.
    fn encode(&self, value: &T) -> Result<Bytes, EncodeError>;

    /// MIME type of the encoded output.
    fn content_type(&self) -> &'static str;
}

/// Encoder shared between an emitter and whoever configured it.
pub type SharedEncoder<T> = Arc<dyn Encoder<T>>;

/// Output encodings a request can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EncodingType {
    /// JSON, one document per line.
    #[default]
    Json,
    /// MessagePack.
    MsgPack,
    /// Human-readable text.
    Text,
}

impl EncodingType {
    /// Build the encoder for this encoding.
    pub fn encoder<T: Payload>(self) -> SharedEncoder<T> {
        match self {
            EncodingType::Json => Arc::new(JsonEncoder),
            EncodingType::MsgPack => Arc::new(MsgPackEncoder),
            EncodingType::Text => Arc::new(TextEncoder),
        }
    }

    /// MIME type used for HTTP responses.
    pub fn mime(self) -> &'static str {
        match self {
            EncodingType::Json => json::CONTENT_TYPE,
            EncodingType::MsgPack => msgpack::CONTENT_TYPE,
            EncodingType::Text => text::CONTENT_TYPE,
        }
    }

    /// Canonical name, as accepted by `FromStr`.
    pub fn as_str(self) -> &'static str {
        match self {
            EncodingType::Json => "json",
            EncodingType::MsgPack => "msgpack",
            EncodingType::Text => "text",
        }
    }
}

impl FromStr for EncodingType {
    type Err = UnknownEncoding;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(EncodingType::Json),
            "msgpack" | "messagepack" => Ok(EncodingType::MsgPack),
            "text" | "txt" => Ok(EncodingType::Text),
            _ => Err(UnknownEncoding(s.to_string())),
        }
    }
}

impl fmt::Display for EncodingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when parsing an unsupported encoding name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown encoding: {0}")]
pub struct UnknownEncoding(pub String);

/// Encode `value` with `encoder`, or render it as a text line when no
/// encoder is configured.
pub(crate) fn encode_or_render<T: Payload>(
    encoder: Option<&dyn Encoder<T>>,
    value: &T,
) -> Result<Bytes, EncodeError> {
    match encoder {
        Some(enc) => enc.encode(value),
        None => TextEncoder.encode(value),
    }
}
