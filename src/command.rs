//! Command seam: the body that produces a response stream.
//!
//! A command receives its [`Request`] and an [`Emitter`], emits values, and
//! returns its outcome. It may close the emitter itself; if it does not, the
//! [`executor`](crate::executor) closes it with the returned outcome.
//!
//! # Example
//!
//! ```
//! use cmdwire::command::{Command, FnCommand};
//! use cmdwire::{CommandError, Emitter, Request};
//!
//! let echo = FnCommand::new(|req: Request, emitter: Emitter<String>| async move {
//!     for word in req.path() {
//!         emitter.emit(word.clone()).await.map_err(|e| e.to_string())?;
//!     }
//!     Ok::<(), CommandError>(())
//! });
//! # fn assert_command<C: Command<String>>(_: &C) {}
//! # assert_command(&echo);
//! ```

use std::future::Future;
use std::marker::PhantomData;

use crate::emitter::{BoxFuture, Emitter};
use crate::error::CommandError;
use crate::payload::Payload;
use crate::request::Request;

/// Result type for command bodies.
pub type CommandResult = Result<(), CommandError>;

/// A command body producing `T` values.
pub trait Command<T>: Send + Sync + 'static {
    /// Run the command against `emitter`.
    fn run(&self, req: Request, emitter: Emitter<T>) -> BoxFuture<'static, CommandResult>;
}

/// Adapter turning an async closure into a [`Command`].
pub struct FnCommand<F, T, Fut>
where
    F: Fn(Request, Emitter<T>) -> Fut + Send + Sync + 'static,
    T: Payload,
    Fut: Future<Output = CommandResult> + Send + 'static,
{
    body: F,
    _phantom: PhantomData<fn(T) -> Fut>,
}

impl<F, T, Fut> FnCommand<F, T, Fut>
where
    F: Fn(Request, Emitter<T>) -> Fut + Send + Sync + 'static,
    T: Payload,
    Fut: Future<Output = CommandResult> + Send + 'static,
{
    /// Wrap `body`.
    pub fn new(body: F) -> Self {
        Self {
            body,
            _phantom: PhantomData,
        }
    }
}

impl<F, T, Fut> Command<T> for FnCommand<F, T, Fut>
where
    F: Fn(Request, Emitter<T>) -> Fut + Send + Sync + 'static,
    T: Payload,
    Fut: Future<Output = CommandResult> + Send + 'static,
{
    fn run(&self, req: Request, emitter: Emitter<T>) -> BoxFuture<'static, CommandResult> {
        Box::pin((self.body)(req, emitter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::response_pair;

    #[tokio::test]
    async fn test_fn_command_runs_closure() {
        let cmd = FnCommand::new(|req: Request, emitter: Emitter<String>| async move {
            emitter
                .emit(req.path_string())
                .await
                .map_err(|e| CommandError::new(e.to_string()))?;
            emitter.close().await.map_err(|e| CommandError::new(e.to_string()))
        });

        let req = Request::new(["files", "ls"]);
        let (emitter, response) = response_pair(&req);
        let runner = tokio::spawn(cmd.run(req, emitter));

        let item = response.next().await.unwrap().unwrap();
        assert_eq!(item.into_value().unwrap(), "files ls");
        assert!(response.next().await.unwrap().is_none());
        runner.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_command_as_trait_object() {
        let cmd: Box<dyn Command<u32>> = Box::new(FnCommand::new(
            |_req: Request, _emitter: Emitter<u32>| async { Err::<(), _>(CommandError::client("bad input")) },
        ));

        let req = Request::new(["check"]);
        let (emitter, _response) = response_pair(&req);
        let err = cmd.run(req, emitter).await.unwrap_err();
        assert_eq!(err.message(), "bad input");
    }
}
