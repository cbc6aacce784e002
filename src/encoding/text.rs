//! Human-readable text encoder, also the fallback when none is configured.

use bytes::Bytes;

use super::Encoder;
use crate::error::EncodeError;
use crate::payload::Payload;

pub(super) const CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Writes [`Payload::render_line`] followed by `\n`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextEncoder;

impl<T: Payload> Encoder<T> for TextEncoder {
    fn encode(&self, value: &T) -> Result<Bytes, EncodeError> {
        let mut line = value.render_line();
        line.push('\n');
        Ok(Bytes::from(line))
    }

    fn content_type(&self) -> &'static str {
        CONTENT_TYPE
    }
}
