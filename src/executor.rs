//! Command execution.
//!
//! - [`execute`] runs a command against any emitter and closes it with the
//!   command's outcome
//! - [`Executor::spawn`] runs a command on its own task, bounded by a
//!   concurrency limit, and hands back the in-process [`Response`]
//! - [`copy`] drains a [`Response`] into another emitter, which is how a
//!   spawned command reaches the CLI or HTTP transport
//!
//! # Example
//!
//! ```
//! use cmdwire::command::FnCommand;
//! use cmdwire::executor::Executor;
//! use cmdwire::{CommandError, Emitter, Request};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let count = FnCommand::new(|_req: Request, emitter: Emitter<u32>| async move {
//!     for i in 0..3u32 {
//!         emitter.emit(i).await.map_err(|e| e.to_string())?;
//!     }
//!     Ok::<(), CommandError>(())
//! });
//!
//! let executor = Executor::builder().max_concurrent(8).build();
//! let response = executor.spawn(&count, Request::new(["count"])).await;
//!
//! let mut total = 0;
//! while let Some(item) = response.next().await.unwrap() {
//!     total += item.into_value().unwrap_or(0);
//! }
//! assert_eq!(total, 3);
//! # }
//! ```

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::command::{Command, CommandResult};
use crate::emitter::{BoxFuture, Emitter};
use crate::error::{CloseError, CommandError, EmitError, ResponseError};
use crate::payload::{Emission, Item, Payload};
use crate::request::Request;
use crate::stream::{response_pair_with, Response, StreamConfig};

/// Default maximum number of commands running at once.
pub const DEFAULT_MAX_CONCURRENT: usize = 256;

/// Executor configuration.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Commands allowed to run at once; further `spawn` calls wait.
    pub max_concurrent: usize,
    /// Configuration of the streams created by `spawn`.
    pub stream: StreamConfig,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            stream: StreamConfig::default(),
        }
    }
}

/// Builder for [`Executor`].
#[derive(Debug, Default)]
pub struct ExecutorBuilder {
    config: ExecutorConfig,
}

impl ExecutorBuilder {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of concurrently running commands.
    ///
    /// Default: 256
    pub fn max_concurrent(mut self, limit: usize) -> Self {
        self.config.max_concurrent = limit.max(1);
        self
    }

    /// Set the buffer capacity of spawned streams.
    ///
    /// Default: 1
    pub fn stream_capacity(mut self, capacity: usize) -> Self {
        self.config.stream = self.config.stream.capacity(capacity);
        self
    }

    /// Build the executor.
    pub fn build(self) -> Executor {
        Executor::with_config(self.config)
    }
}

/// Runs commands on their own tasks, at most `max_concurrent` at a time.
#[derive(Debug, Clone)]
pub struct Executor {
    config: ExecutorConfig,
    semaphore: Arc<Semaphore>,
}

impl Executor {
    /// Create an executor with the default configuration.
    pub fn new() -> Self {
        Self::with_config(ExecutorConfig::default())
    }

    /// Create an executor with `config`.
    pub fn with_config(config: ExecutorConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self { config, semaphore }
    }

    /// Create a builder.
    pub fn builder() -> ExecutorBuilder {
        ExecutorBuilder::new()
    }

    /// The active configuration.
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Slots currently free for new commands.
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Start `cmd` on a new task and return the consumer side of its output.
    ///
    /// Waits for a free slot when `max_concurrent` commands are running. The
    /// slot is held until the command body returns.
    pub async fn spawn<T, C>(&self, cmd: &C, req: Request) -> Response<T>
    where
        T: Payload,
        C: Command<T> + ?Sized,
    {
        // the semaphore is never closed
        let permit = self.semaphore.clone().acquire_owned().await.ok();

        let (emitter, response) = response_pair_with(&req, self.config.stream.clone());
        let body = cmd.run(req.clone(), emitter.clone());

        tokio::spawn(async move {
            let _permit = permit;
            let _ = finish(body, &req, &emitter).await;
        });

        response
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

/// Run `cmd` to completion against `emitter`.
///
/// When the body returns without having closed the emitter, the emitter is
/// closed with the body's outcome. Returns the body's outcome.
pub async fn execute<T, C>(cmd: &C, req: Request, emitter: Emitter<T>) -> CommandResult
where
    T: Payload,
    C: Command<T> + ?Sized,
{
    let body = cmd.run(req.clone(), emitter.clone());
    finish(body, &req, &emitter).await
}

async fn finish<T: Payload>(
    body: BoxFuture<'static, CommandResult>,
    req: &Request,
    emitter: &Emitter<T>,
) -> CommandResult {
    let outcome = body.await;
    if let Err(err) = &outcome {
        tracing::error!(command = %req.path_string(), "command failed: {}", err);
    }

    match emitter.close_with_error(outcome.clone().err()).await {
        Ok(()) => {}
        Err(CloseError::AlreadyClosed) => {
            tracing::trace!(command = %req.path_string(), "command closed its own emitter");
        }
        Err(err) => {
            tracing::warn!(command = %req.path_string(), "closing emitter failed: {}", err);
        }
    }
    outcome
}

/// Forward every item of `response` into `emitter`, then close `emitter`
/// with the response's outcome.
///
/// If `emitter` stops accepting items the response is released, so the
/// producing command is not left waiting, and `emitter` is closed with the
/// emit error so its final status is still reported.
pub async fn copy<T: Payload>(emitter: &Emitter<T>, response: Response<T>) -> Result<(), EmitError> {
    loop {
        let emitted = match response.next().await {
            Ok(Some(Item::Value(value))) => emitter.emit_value(value).await,
            Ok(Some(Item::Bytes(source))) => emitter.emit(Emission::Bytes(source)).await,
            Ok(None) => return Ok(emitter.close().await?),
            Err(ResponseError::Command(err)) => return Ok(emitter.close_with_error(err).await?),
            Err(ResponseError::Cancelled) => {
                emitter
                    .close_with_error(CommandError::new("request cancelled"))
                    .await?;
                return Err(EmitError::Cancelled);
            }
        };

        if let Err(err) = emitted {
            tracing::debug!(
                command = %response.request().path_string(),
                "copy target stopped accepting output: {}",
                err
            );
            response.release().await;
            match emitter.close_with_error(CommandError::new(err.to_string())).await {
                Ok(()) => {}
                Err(CloseError::AlreadyClosed) => {
                    tracing::trace!("copy target was already closed");
                }
                Err(close_err) => {
                    tracing::warn!("closing copy target failed: {}", close_err);
                }
            }
            return Err(err);
        }
    }
}
