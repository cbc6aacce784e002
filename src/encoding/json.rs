//! Newline-delimited JSON encoder.

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;

use super::Encoder;
use crate::error::EncodeError;

pub(super) const CONTENT_TYPE: &str = "application/json";

/// Encodes each value as one compact JSON document followed by `\n`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEncoder;

impl<T: Serialize> Encoder<T> for JsonEncoder {
    fn encode(&self, value: &T) -> Result<Bytes, EncodeError> {
        let mut buf = BytesMut::new().writer();
        serde_json::to_writer(&mut buf, value)?;
        let mut buf = buf.into_inner();
        buf.put_u8(b'\n');
        Ok(buf.freeze())
    }

    fn content_type(&self) -> &'static str {
        CONTENT_TYPE
    }
}
