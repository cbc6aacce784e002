//! Emitter handle and the emission contract.
//!
//! Every transport (in-process stream, CLI, HTTP) implements the small
//! [`Transport`] trait. Commands never see a transport directly: they get an
//! [`Emitter`], which applies the emission contract once, in one place,
//! before anything reaches the transport:
//!
//! 1. closed emitter → [`EmitError::ClosedStream`], nothing else happens
//! 2. [`Emission::Single`] → unwrapped, delivered, then the emitter closes
//! 3. a value following the retired error-as-value convention → panic
//! 4. [`Emission::Stream`] → flattened; each element goes through the
//!    contract again; the nested stream's error closes the emitter
//! 5. [`Emission::Bytes`] → handed over as raw bytes, no encoder involved
//! 6. [`Emission::Plain`] → handed over for encoding
//!
//! # Example
//!
//! ```
//! use cmdwire::{response_pair, Emission, Request};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let (emitter, response) = response_pair::<String>(&Request::new(["greet"]));
//!
//! tokio::spawn(async move {
//!     emitter.emit("hello".to_string()).await?;
//!     emitter.emit(Emission::Single("world".to_string())).await
//! });
//!
//! let mut seen = Vec::new();
//! while let Some(item) = response.next().await.unwrap() {
//!     seen.extend(item.into_value());
//! }
//! assert_eq!(seen, ["hello", "world"]);
//! # }
//! ```

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use tokio::io::AsyncRead;

use crate::error::{CloseError, CommandError, EmitError};
use crate::payload::{Emission, Item, NestedStream, Payload};

/// Boxed future returned by object-safe async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What the transport does once a delivery succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Keep the emitter open.
    Continue,
    /// Close with success right after this item, under the same lock that
    /// delivered it.
    Last,
}

/// Sink side of an emitter.
///
/// Implementations only move items to their medium; the emission contract
/// has already been applied by [`Emitter`].
pub trait Transport<T>: Send + Sync + 'static {
    /// Whether the transport has been closed. Must not block.
    fn is_closed(&self) -> bool;

    /// Record the declared length. Ignored once output started or the
    /// transport closed.
    fn set_length(&self, length: u64) -> BoxFuture<'_, ()>;

    /// Move one item to the medium.
    fn deliver(&self, item: Item<T>, delivery: Delivery) -> BoxFuture<'_, Result<(), EmitError>>;

    /// Record the terminal outcome and release the medium.
    ///
    /// Fails with [`CloseError::AlreadyClosed`] on every call after the
    /// first.
    fn close_with_error(
        &self,
        outcome: Option<CommandError>,
    ) -> BoxFuture<'_, Result<(), CloseError>>;
}

/// Write handle given to command bodies.
///
/// `Emitter` is `Clone`; clones feed the same transport.
pub struct Emitter<T> {
    transport: Arc<dyn Transport<T>>,
}

impl<T> Clone for Emitter<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
        }
    }
}

impl<T: 'static> fmt::Debug for Emitter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("closed", &self.transport.is_closed())
            .finish()
    }
}

impl<T: Payload> Emitter<T> {
    /// Wrap a transport.
    pub fn new(transport: Arc<dyn Transport<T>>) -> Self {
        Self { transport }
    }

    /// Emit a value or envelope, applying the emission contract.
    ///
    /// Plain values convert implicitly: `emitter.emit(value)`.
    ///
    /// # Panics
    ///
    /// Panics if the value reports [`Payload::legacy_error`]. Errors end a
    /// stream through [`Emitter::close_with_error`], never as values.
    pub async fn emit(&self, emission: impl Into<Emission<T>>) -> Result<(), EmitError> {
        self.apply(emission.into()).await
    }

    /// Emit a plain value.
    pub async fn emit_value(&self, value: T) -> Result<(), EmitError> {
        self.apply(Emission::Plain(value)).await
    }

    /// Emit the only value of this stream and close it.
    pub async fn emit_once(&self, value: T) -> Result<(), EmitError> {
        self.apply(Emission::Single(value)).await
    }

    /// Copy a reader to the output verbatim.
    pub async fn emit_bytes<R>(&self, reader: R) -> Result<(), EmitError>
    where
        R: AsyncRead + Send + 'static,
    {
        self.apply(Emission::Bytes(Box::pin(reader))).await
    }

    /// Declare the expected output length. Ignored after the first emit or
    /// close.
    pub async fn set_length(&self, length: u64) {
        self.transport.set_length(length).await
    }

    /// Close with success.
    pub async fn close(&self) -> Result<(), CloseError> {
        self.transport.close_with_error(None).await
    }

    /// Close with the given outcome; `None` means success.
    pub async fn close_with_error(
        &self,
        outcome: impl Into<Option<CommandError>>,
    ) -> Result<(), CloseError> {
        self.transport.close_with_error(outcome.into()).await
    }

    /// Whether the emitter has been closed.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.transport.is_closed()
    }

    fn apply(&self, emission: Emission<T>) -> BoxFuture<'_, Result<(), EmitError>> {
        Box::pin(async move {
            if self.transport.is_closed() {
                return Err(EmitError::ClosedStream);
            }
            tracing::trace!(kind = emission.kind(), "applying emission");

            match emission {
                Emission::Single(value) => {
                    assert_not_legacy_error(&value);
                    self.transport
                        .deliver(Item::Value(value), Delivery::Last)
                        .await
                }
                Emission::Plain(value) => {
                    assert_not_legacy_error(&value);
                    self.transport
                        .deliver(Item::Value(value), Delivery::Continue)
                        .await
                }
                Emission::Stream(nested) => self.flatten(nested).await,
                Emission::Bytes(source) => {
                    self.transport
                        .deliver(Item::Bytes(source), Delivery::Continue)
                        .await
                }
            }
        })
    }

    async fn flatten(&self, mut nested: NestedStream<T>) -> Result<(), EmitError> {
        while let Some(element) = nested.next().await {
            match element {
                Ok(emission) => self.apply(emission).await?,
                Err(err) => {
                    if let Err(close_err) = self.transport.close_with_error(Some(err.clone())).await {
                        tracing::debug!("closing after nested stream error failed: {}", close_err);
                    }
                    return Err(EmitError::Nested(err));
                }
            }
        }
        Ok(())
    }
}

/// Abort on values following the retired error-as-value convention.
fn assert_not_legacy_error<T: Payload>(value: &T) {
    if let Some(message) = value.legacy_error() {
        panic!(
            "error value emitted on a response stream: {:?}; \
             end the stream with close_with_error instead",
            message
        );
    }
}
