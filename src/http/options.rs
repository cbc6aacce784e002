//! HTTP transport options.

use crate::encoding::EncodingType;

/// Default number of body chunks buffered between the emitter and the
/// connection before `emit` waits.
pub const DEFAULT_CHUNK_CAPACITY: usize = 16;

/// Options for [`response_emitter`](super::response_emitter).
#[derive(Debug, Clone)]
pub struct HttpOptions {
    /// Output encoding. Falls back to the request's encoding, then JSON.
    pub encoding: Option<EncodingType>,
    /// Extra response headers listed in `Access-Control-Expose-Headers`.
    pub expose_headers: Vec<String>,
    /// Body chunks buffered before the producer waits.
    pub chunk_capacity: usize,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            encoding: None,
            expose_headers: Vec::new(),
            chunk_capacity: DEFAULT_CHUNK_CAPACITY,
        }
    }
}

impl HttpOptions {
    /// Force an output encoding.
    pub fn encoding(mut self, encoding: EncodingType) -> Self {
        self.encoding = Some(encoding);
        self
    }

    /// Expose one more header to browser clients.
    pub fn expose_header(mut self, name: impl Into<String>) -> Self {
        self.expose_headers.push(name.into());
        self
    }

    /// Set the body chunk buffer size. Clamped to at least 1.
    pub fn chunk_capacity(mut self, capacity: usize) -> Self {
        self.chunk_capacity = capacity.max(1);
        self
    }
}
