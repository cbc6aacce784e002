//! # cmdwire
//!
//! Transport-agnostic response streams for commands.
//!
//! A command body writes its output through an [`Emitter`]; the same body
//! works unchanged whether the output goes to a terminal, an HTTP client or
//! an in-process caller. Every transport receives values through one
//! emission contract:
//!
//! - [`Emission::Single`] delivers one value and closes the stream
//! - [`Emission::Stream`] is flattened, its error closes the outer stream
//! - [`Emission::Bytes`] is copied verbatim, bypassing the encoder
//! - an emitter closes exactly once; emitting after close fails
//!
//! ## Transports
//!
//! - **In-process** ([`stream`]): [`response_pair`] → ([`Emitter`], [`Response`])
//! - **CLI** ([`cli`]): stdout/stderr sinks, exit code on close
//! - **HTTP** (`http`, feature `http`): streaming `axum` response with
//!   trailers for late errors
//!
//! ## Example
//!
//! ```
//! use cmdwire::{response_pair, Emission, Request, ResponseError};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let req = Request::new(["ls"]);
//! let (emitter, response) = response_pair::<String>(&req);
//!
//! tokio::spawn(async move {
//!     emitter.emit(Emission::values(vec!["a".to_string(), "b".to_string()])).await.unwrap();
//!     emitter.close_with_error(cmdwire::CommandError::new("disk gone")).await.unwrap();
//! });
//!
//! assert!(response.next().await.unwrap().is_some());
//! assert!(response.next().await.unwrap().is_some());
//! assert!(matches!(response.next().await, Err(ResponseError::Command(_))));
//! # }
//! ```

pub mod cli;
pub mod command;
pub mod emitter;
pub mod encoding;
pub mod error;
pub mod executor;
#[cfg(feature = "http")]
pub mod http;
pub mod latch;
pub mod payload;
pub mod request;
pub mod stream;

pub use command::{Command, CommandResult, FnCommand};
pub use emitter::{BoxFuture, Delivery, Emitter, Transport};
pub use error::{CloseError, CommandError, EmitError, EncodeError, ErrorCode, ResponseError};
pub use executor::{copy, execute, Executor};
pub use payload::{ByteSource, Emission, Item, NestedStream, Payload};
pub use request::Request;
pub use stream::{response_pair, response_pair_with, Response, StreamConfig};
