//! Payload trait and emission envelopes.
//!
//! Everything an emitter accepts is an [`Emission`]:
//!
//! - [`Emission::Plain`] - a value handed to the encoder as-is
//! - [`Emission::Single`] - the only value; the stream closes right after it
//! - [`Emission::Stream`] - a nested stream, flattened element by element
//! - [`Emission::Bytes`] - raw bytes, copied verbatim to the sink
//!
//! What a [`Response`](crate::stream::Response) yields is an [`Item`].

use std::fmt;
use std::pin::Pin;

use futures::stream::{self, BoxStream, Stream, StreamExt};
use serde::Serialize;
use tokio::io::AsyncRead;

use crate::error::{CommandError, ERROR_TYPE_TAG};

/// A readable byte source, copied to the sink without encoding.
pub type ByteSource = Pin<Box<dyn AsyncRead + Send>>;

/// A nested stream of further emissions.
///
/// An `Err` element is the nested stream's terminal error; nothing after it
/// is read.
pub type NestedStream<T> = BoxStream<'static, Result<Emission<T>, CommandError>>;

/// A value that can travel through an emitter.
///
/// Implement it for your own output types; both methods have defaults.
///
/// ```
/// use cmdwire::Payload;
///
/// #[derive(serde::Serialize)]
/// struct Version {
///     version: String,
/// }
///
/// impl Payload for Version {}
/// ```
pub trait Payload: Serialize + Send + 'static {
    /// Single-line human rendering used when no encoder is configured.
    fn render_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| format!("<unrenderable value: {}>", e))
    }

    /// Message of a value that follows the retired "error emitted as a
    /// value" convention. Emitting such a value aborts the command.
    fn legacy_error(&self) -> Option<String> {
        None
    }
}

impl Payload for String {
    fn render_line(&self) -> String {
        self.clone()
    }
}

impl Payload for &'static str {
    fn render_line(&self) -> String {
        (*self).to_string()
    }
}

macro_rules! display_payload {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Payload for $ty {
                fn render_line(&self) -> String {
                    self.to_string()
                }
            }
        )*
    };
}

display_payload!(i8, i16, i32, i64, u8, u16, u32, u64, usize, isize, f32, f64, bool, char);

impl<T: Payload> Payload for Vec<T> {}

impl<T: Payload> Payload for Option<T> {
    fn render_line(&self) -> String {
        match self {
            Some(v) => v.render_line(),
            None => String::new(),
        }
    }

    fn legacy_error(&self) -> Option<String> {
        self.as_ref().and_then(Payload::legacy_error)
    }
}

impl Payload for serde_json::Value {
    fn render_line(&self) -> String {
        match self {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    fn legacy_error(&self) -> Option<String> {
        let obj = self.as_object()?;
        if obj.get("Type").and_then(|t| t.as_str()) != Some(ERROR_TYPE_TAG) {
            return None;
        }
        obj.get("Message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
    }
}

impl Payload for CommandError {
    fn render_line(&self) -> String {
        format!("Error: {}", self.message())
    }

    fn legacy_error(&self) -> Option<String> {
        Some(self.message().to_string())
    }
}

/// Envelope around an emitted value.
pub enum Emission<T> {
    /// Plain value.
    Plain(T),
    /// The only value of the stream; closes it with success once delivered.
    Single(T),
    /// Nested stream, re-emitted element by element.
    Stream(NestedStream<T>),
    /// Raw bytes, bypassing the encoder.
    Bytes(ByteSource),
}

impl<T: Payload> Emission<T> {
    /// Wrap a reader as raw output.
    pub fn bytes<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + 'static,
    {
        Emission::Bytes(Box::pin(reader))
    }

    /// Wrap a stream of emissions.
    pub fn stream<S>(inner: S) -> Self
    where
        S: Stream<Item = Result<Emission<T>, CommandError>> + Send + 'static,
    {
        Emission::Stream(inner.boxed())
    }

    /// Nested stream of plain values that ends successfully.
    pub fn values<I>(values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        Emission::Stream(stream::iter(values.into_iter().map(|v| Ok(Emission::Plain(v)))).boxed())
    }

    /// Short name of the envelope kind, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Emission::Plain(_) => "plain",
            Emission::Single(_) => "single",
            Emission::Stream(_) => "stream",
            Emission::Bytes(_) => "bytes",
        }
    }
}

impl<T> From<T> for Emission<T> {
    fn from(value: T) -> Self {
        Emission::Plain(value)
    }
}

impl<T: fmt::Debug> fmt::Debug for Emission<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Emission::Plain(v) => f.debug_tuple("Plain").field(v).finish(),
            Emission::Single(v) => f.debug_tuple("Single").field(v).finish(),
            Emission::Stream(_) => f.write_str("Stream(..)"),
            Emission::Bytes(_) => f.write_str("Bytes(..)"),
        }
    }
}

/// One element read from a response.
pub enum Item<T> {
    /// An encoded-later value.
    Value(T),
    /// Raw bytes forwarded untouched.
    Bytes(ByteSource),
}

impl<T> Item<T> {
    /// The value, if this is not a byte source.
    pub fn into_value(self) -> Option<T> {
        match self {
            Item::Value(v) => Some(v),
            Item::Bytes(_) => None,
        }
    }

    /// The byte source, if this is one.
    pub fn into_bytes(self) -> Option<ByteSource> {
        match self {
            Item::Value(_) => None,
            Item::Bytes(r) => Some(r),
        }
    }

    /// Whether this item is raw bytes.
    #[inline]
    pub fn is_bytes(&self) -> bool {
        matches!(self, Item::Bytes(_))
    }
}

impl<T: fmt::Debug> fmt::Debug for Item<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Item::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Item::Bytes(_) => f.write_str("Bytes(..)"),
        }
    }
}
