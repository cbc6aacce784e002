//! MsgPack encoder using `rmp-serde`.
//!
//! **Always `to_vec_named`, never `to_vec`.** `to_vec` writes structs as
//! positional arrays; consumers in other languages expect maps keyed by
//! field name.
//!
//! # Example
//!
//! ```
//! use cmdwire::encoding::{Encoder, MsgPackEncoder};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Message {
//!     id: u32,
//!     content: String,
//! }
//!
//! let msg = Message { id: 42, content: "hello".to_string() };
//! let encoded = MsgPackEncoder.encode(&msg).unwrap();
//! let decoded: Message = MsgPackEncoder::decode(&encoded).unwrap();
//! assert_eq!(decoded, msg);
//! ```

use bytes::Bytes;
use serde::Serialize;

use super::Encoder;
use crate::error::EncodeError;

pub(super) const CONTENT_TYPE: &str = "application/msgpack";

/// MessagePack encoder.
///
/// Values are written back to back with no framing; MsgPack documents are
/// self-delimiting.
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPackEncoder;

impl MsgPackEncoder {
    /// Decode one MsgPack document. Used by in-process consumers and tests.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}

impl<T: Serialize> Encoder<T> for MsgPackEncoder {
    #[inline]
    fn encode(&self, value: &T) -> Result<Bytes, EncodeError> {
        // to_vec_named, NOT to_vec
        Ok(Bytes::from(rmp_serde::to_vec_named(value)?))
    }

    fn content_type(&self) -> &'static str {
        CONTENT_TYPE
    }
}
