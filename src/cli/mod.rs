//! CLI transport - writes command output to stdout/stderr.
//!
//! Provides:
//! - [`response_emitter`] - builds the emitter and the exit code receiver
//! - [`CliEmitter`] - transport handle for CLI-only controls (`exit`,
//!   diagnostics on stderr)
//! - [`Output`] - stdout, stderr, file or arbitrary writer sinks
//!
//! Closing reports the process exit code exactly once: `0` on success, `1`
//! when closed with an error (after `Error: <message>` is written to
//! stderr), or whatever was passed to [`CliEmitter::exit`].
//!
//! # Example
//!
//! ```no_run
//! use cmdwire::cli::{self, Output};
//! use cmdwire::Request;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let req = Request::new(["version"]);
//! let (_cli, emitter, exit) =
//!     cli::response_emitter::<String>(Output::stdout(), Output::stderr(), None, &req);
//!
//! emitter.emit_once("0.1.0".to_string()).await.unwrap();
//! std::process::exit(exit.await.unwrap_or(1));
//! # }
//! ```

mod output;

pub use output::{is_sync_unsupported, Output};

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{oneshot, Mutex};

use crate::emitter::{BoxFuture, Delivery, Emitter, Transport};
use crate::encoding::{self, SharedEncoder};
use crate::error::{CloseError, CommandError, EmitError};
use crate::payload::{Item, Payload};
use crate::request::Request;

/// Exit code reported when a command closes with an error.
pub const ERROR_EXIT_CODE: i32 = 1;

/// Build a CLI emitter.
///
/// When `encoder` is `None` the request's encoding picks one; without
/// either, values are rendered as text lines.
///
/// Returns the transport handle, the emitter to give to the command, and a
/// receiver that yields the exit code once the emitter closes.
pub fn response_emitter<T: Payload>(
    stdout: Output,
    stderr: Output,
    encoder: Option<SharedEncoder<T>>,
    req: &Request,
) -> (Arc<CliEmitter<T>>, Emitter<T>, oneshot::Receiver<i32>) {
    let (exit_tx, exit_rx) = oneshot::channel();
    let encoder = encoder.or_else(|| req.encoding().map(|e| e.encoder()));

    let cli = Arc::new(CliEmitter {
        request: req.clone(),
        encoder,
        closed: AtomicBool::new(false),
        state: Mutex::new(CliState {
            stdout: Some(stdout),
            stderr: Some(stderr),
            exit: 0,
            length: None,
            exit_tx: Some(exit_tx),
        }),
    });

    let emitter = Emitter::new(cli.clone() as Arc<dyn Transport<T>>);
    (cli, emitter, exit_rx)
}

struct CliState {
    stdout: Option<Output>,
    stderr: Option<Output>,
    exit: i32,
    length: Option<u64>,
    exit_tx: Option<oneshot::Sender<i32>>,
}

/// CLI transport.
pub struct CliEmitter<T> {
    request: Request,
    encoder: Option<SharedEncoder<T>>,
    closed: AtomicBool,
    state: Mutex<CliState>,
}

impl<T: Payload> CliEmitter<T> {
    /// Set the exit code and close.
    pub async fn exit(&self, code: i32) -> Result<(), CloseError> {
        let mut state = self.state.lock().await;
        if self.is_closed() {
            return Err(CloseError::AlreadyClosed);
        }
        state.exit = code;
        self.close_locked(&mut state).await
    }

    /// Write a diagnostic line to stderr.
    pub async fn write_stderr(&self, line: &str) -> Result<(), EmitError> {
        let mut state = self.state.lock().await;
        let stderr = state.stderr.as_mut().ok_or(EmitError::ClosedStream)?;
        stderr.write_line(line).await?;
        Ok(())
    }

    async fn write_item(&self, out: &mut Output, item: Item<T>) -> Result<(), EmitError> {
        match item {
            Item::Value(value) => {
                let encoded = encoding::encode_or_render(self.encoder.as_deref(), &value)?;
                tokio::io::AsyncWriteExt::write_all(out.as_writer(), &encoded).await?;
            }
            Item::Bytes(mut source) => {
                tokio::io::copy(&mut source, out.as_writer()).await?;
            }
        }
        Ok(())
    }

    /// Report the exit code, then flush and sync both sinks. Runs once.
    async fn close_locked(&self, state: &mut CliState) -> Result<(), CloseError> {
        self.closed.store(true, Ordering::Release);

        if let Some(tx) = state.exit_tx.take() {
            // the receiver may be gone if nobody waits for the code
            let _ = tx.send(state.exit);
        }

        tracing::debug!(
            command = %self.request.path_string(),
            exit = state.exit,
            length = ?state.length,
            "cli emitter closed"
        );

        let mut result: io::Result<()> = Ok(());
        for mut out in [state.stderr.take(), state.stdout.take()].into_iter().flatten() {
            if let Err(err) = out.sync().await {
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }
        result.map_err(CloseError::Io)
    }
}

impl<T: Payload> Transport<T> for CliEmitter<T> {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn set_length(&self, length: u64) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if !self.is_closed() {
                state.length = Some(length);
            }
        })
    }

    fn deliver(&self, item: Item<T>, delivery: Delivery) -> BoxFuture<'_, Result<(), EmitError>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let Some(mut stdout) = state.stdout.take() else {
                return Err(EmitError::ClosedStream);
            };

            let written = tokio::select! {
                res = self.write_item(&mut stdout, item) => res,
                _ = self.request.cancelled() => Err(EmitError::Cancelled),
            };
            state.stdout = Some(stdout);
            written?;

            if delivery == Delivery::Last {
                self.close_locked(&mut state).await?;
            }
            Ok(())
        })
    }

    fn close_with_error(
        &self,
        outcome: Option<CommandError>,
    ) -> BoxFuture<'_, Result<(), CloseError>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if self.is_closed() {
                return Err(CloseError::AlreadyClosed);
            }

            let mut diagnostic = Ok(());
            if let Some(err) = outcome {
                state.exit = ERROR_EXIT_CODE;
                if let Some(stderr) = state.stderr.as_mut() {
                    diagnostic = stderr.write_line(&format!("Error: {}", err.message())).await;
                }
            }

            // the exit code is reported even if the diagnostic could not be written
            let closed = self.close_locked(&mut state).await;
            diagnostic?;
            closed
        })
    }
}

impl<T> fmt::Debug for CliEmitter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CliEmitter")
            .field("command", &self.request.path())
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish()
    }
}
