//! In-process response stream.
//!
//! [`response_pair`] creates an [`Emitter`] and a [`Response`] sharing one
//! stream. The emitter side is driven by the command body, the response side
//! by whoever consumes the output (a test, a CLI loop, an HTTP handler via
//! [`copy`](crate::executor::copy)).
//!
//! # Architecture
//!
//! ```text
//! Emitter ──► writer lock ──► mpsc (capacity 1) ──► reader lock ──► Response
//!               │                                               ▲
//!               └── outcome (set once) / ready latch ───────────┘
//! ```
//!
//! - **Writer lock**: guards the `Open → Closed` state machine. Emit, close
//!   and set_length take it; nothing on the read side does.
//! - **Reader lock**: serializes `next` callers so a value is handed out
//!   exactly once.
//! - **Ready latch**: fires on the first emit or on close and freezes the
//!   declared length.
//!
//! The two locks are never held together, so a reader blocked on an empty
//! channel never stalls a close.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use futures::StreamExt;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::emitter::{BoxFuture, Delivery, Emitter, Transport};
use crate::error::{CloseError, CommandError, EmitError, ErrorCode, ResponseError};
use crate::latch::Latch;
use crate::payload::{Emission, Item, NestedStream, Payload};
use crate::request::Request;

/// Default number of values that may wait for the reader.
pub const DEFAULT_STREAM_CAPACITY: usize = 1;

/// Configuration for an in-process response stream.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Values buffered between emitter and response before `emit` waits.
    pub capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_STREAM_CAPACITY,
        }
    }
}

impl StreamConfig {
    /// Set the buffer capacity (minimum 1).
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }
}

/// Create an emitter/response pair with the default configuration.
pub fn response_pair<T: Payload>(req: &Request) -> (Emitter<T>, Response<T>) {
    response_pair_with(req, StreamConfig::default())
}

/// Create an emitter/response pair.
pub fn response_pair_with<T: Payload>(
    req: &Request,
    config: StreamConfig,
) -> (Emitter<T>, Response<T>) {
    let (tx, rx) = mpsc::channel(config.capacity.max(1));

    let shared = Arc::new(Shared {
        request: req.clone(),
        reader: Mutex::new(Some(rx)),
        writer: Mutex::new(WriterState::Open { tx, length: None }),
        closed: AtomicBool::new(false),
        closing: CancellationToken::new(),
        outcome: OnceLock::new(),
        ready: Latch::new(),
    });

    let transport = ChanTransport {
        shared: shared.clone(),
    };

    (Emitter::new(Arc::new(transport)), Response { shared })
}

/// Writer-side state machine.
enum WriterState<T> {
    Open {
        tx: mpsc::Sender<Item<T>>,
        length: Option<u64>,
    },
    Closed,
}

/// State shared by both halves.
struct Shared<T> {
    request: Request,
    /// Reader-role lock. `None` once the response was released.
    reader: Mutex<Option<mpsc::Receiver<Item<T>>>>,
    /// Writer-role lock.
    writer: Mutex<WriterState<T>>,
    /// Mirror of `writer` being `Closed`, readable without the lock.
    closed: AtomicBool,
    /// Fired when a close starts; a hand-off in flight gives up.
    closing: CancellationToken,
    /// Terminal outcome. Set before the sender is dropped.
    outcome: OnceLock<Option<CommandError>>,
    /// Fires on first emit or close, carrying the declared length.
    ready: Latch<Option<u64>>,
}

impl<T> Shared<T> {
    /// Transition to `Closed`. Caller holds the writer lock.
    fn close_locked(&self, state: &mut WriterState<T>, outcome: Option<CommandError>) {
        let error = outcome.as_ref().map(|e| e.message().to_string());

        // outcome first: a reader that sees the channel end must find it
        let _ = self.outcome.set(outcome);

        let length = match std::mem::replace(state, WriterState::Closed) {
            WriterState::Open { length, .. } => length,
            WriterState::Closed => None,
        };

        self.closed.store(true, Ordering::Release);
        self.closing.cancel();
        self.ready.fire(length);

        tracing::debug!(
            command = %self.request.path_string(),
            error = ?error,
            "response stream closed"
        );
    }
}

/// Emitter half of an in-process stream.
struct ChanTransport<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Payload> Transport<T> for ChanTransport<T> {
    fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    fn set_length(&self, length: u64) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if self.shared.ready.is_fired() {
                return;
            }
            let mut state = self.shared.writer.lock().await;
            if self.shared.ready.is_fired() {
                return;
            }
            if let WriterState::Open { length: slot, .. } = &mut *state {
                *slot = Some(length);
            }
        })
    }

    fn deliver(&self, item: Item<T>, delivery: Delivery) -> BoxFuture<'_, Result<(), EmitError>> {
        Box::pin(async move {
            let shared = &self.shared;
            let mut state = shared.writer.lock().await;

            let WriterState::Open { tx, length } = &*state else {
                return Err(EmitError::ClosedStream);
            };

            // unblock length() and error()
            let length = *length;
            shared.ready.fire(length);

            let permit = tokio::select! {
                biased;
                _ = shared.closing.cancelled() => return Err(EmitError::ClosedStream),
                _ = shared.request.cancelled() => return Err(EmitError::Cancelled),
                permit = tx.reserve() => match permit {
                    Ok(permit) => permit,
                    Err(_) => {
                        tracing::warn!(
                            command = %shared.request.path_string(),
                            "response released while the command was still emitting"
                        );
                        return Err(EmitError::ClosedStream);
                    }
                },
            };
            permit.send(item);
            tracing::trace!(command = %shared.request.path_string(), "value delivered");

            if delivery == Delivery::Last {
                shared.close_locked(&mut state, None);
            }
            Ok(())
        })
    }

    fn close_with_error(
        &self,
        outcome: Option<CommandError>,
    ) -> BoxFuture<'_, Result<(), CloseError>> {
        Box::pin(async move {
            // preempt an emit waiting on the consumer
            self.shared.closing.cancel();

            let mut state = self.shared.writer.lock().await;
            if matches!(*state, WriterState::Closed) {
                return Err(CloseError::AlreadyClosed);
            }
            self.shared.close_locked(&mut state, outcome);
            Ok(())
        })
    }
}

impl<T> Drop for ChanTransport<T> {
    fn drop(&mut self) {
        // every emitter clone is gone; nobody else can take the writer lock
        let Ok(mut state) = self.shared.writer.try_lock() else {
            return;
        };
        if matches!(*state, WriterState::Open { .. }) {
            tracing::warn!(
                command = %self.shared.request.path_string(),
                "response emitter dropped without being closed"
            );
            self.shared.close_locked(
                &mut state,
                Some(CommandError::with_code(
                    "response emitter dropped without being closed",
                    ErrorCode::Implementation,
                )),
            );
        }
    }
}

/// Reading half of an in-process stream.
pub struct Response<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Payload> Response<T> {
    /// The request this response belongs to.
    #[inline]
    pub fn request(&self) -> &Request {
        &self.shared.request
    }

    /// Wait for the next item.
    ///
    /// - `Ok(Some(item))` - the next item, in emission order
    /// - `Ok(None)` - the stream ended successfully (or was released)
    /// - `Err(ResponseError::Command(e))` - the stream ended with `e`
    /// - `Err(ResponseError::Cancelled)` - the request was cancelled; the
    ///   stream itself is untouched
    pub async fn next(&self) -> Result<Option<Item<T>>, ResponseError> {
        let request = &self.shared.request;

        let mut reader = tokio::select! {
            guard = self.shared.reader.lock() => guard,
            _ = request.cancelled() => return Err(ResponseError::Cancelled),
        };

        let Some(rx) = reader.as_mut() else {
            return Ok(None);
        };

        tokio::select! {
            item = rx.recv() => match item {
                Some(item) => Ok(Some(item)),
                None => self.terminal(),
            },
            _ = request.cancelled() => Err(ResponseError::Cancelled),
        }
    }

    /// Wait until the stream produced output or closed, then return its
    /// error outcome. `None` on success or while the stream is still open.
    pub async fn error(&self) -> Option<CommandError> {
        self.shared.ready.wait().await;
        self.shared.outcome.get().cloned().flatten()
    }

    /// Wait until the stream produced output or closed, then return the
    /// declared length.
    pub async fn length(&self) -> Option<u64> {
        self.shared.ready.wait().await
    }

    /// Stop consuming. Later `next` calls return `Ok(None)`; an emit waiting
    /// on this response fails with `ClosedStream`.
    pub async fn release(&self) {
        self.shared.reader.lock().await.take();
    }

    /// Turn the response into a nested stream that can be emitted into
    /// another emitter. Its terminal error becomes the last element.
    pub fn into_nested(self) -> NestedStream<T> {
        async_stream::stream! {
            loop {
                match self.next().await {
                    Ok(Some(Item::Value(v))) => yield Ok(Emission::Plain(v)),
                    Ok(Some(Item::Bytes(b))) => yield Ok(Emission::Bytes(b)),
                    Ok(None) => break,
                    Err(ResponseError::Command(e)) => {
                        yield Err(e);
                        break;
                    }
                    Err(ResponseError::Cancelled) => {
                        yield Err(CommandError::new("request cancelled"));
                        break;
                    }
                }
            }
        }
        .boxed()
    }

    fn terminal(&self) -> Result<Option<Item<T>>, ResponseError> {
        match self.shared.outcome.get() {
            Some(Some(err)) => Err(ResponseError::Command(err.clone())),
            _ => Ok(None),
        }
    }
}

impl<T> Drop for Response<T> {
    fn drop(&mut self) {
        // Dropping the receiver fails any emit waiting for capacity.
        if let Ok(mut reader) = self.shared.reader.try_lock() {
            reader.take();
        }
    }
}

impl<T> fmt::Debug for Response<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("command", &self.shared.request.path())
            .field("closed", &self.shared.closed.load(Ordering::Acquire))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::io::AsyncReadExt;
    use tokio::time::timeout;

    fn pair() -> (Emitter<String>, Response<String>) {
        response_pair(&Request::new(["test"]))
    }

    async fn next_value(res: &Response<String>) -> Option<String> {
        res.next().await.unwrap().and_then(Item::into_value)
    }

    #[tokio::test]
    async fn test_values_then_end() {
        let (re, res) = pair();

        let producer = tokio::spawn(async move {
            re.emit("hello".to_string()).await.unwrap();
            re.emit("world".to_string()).await.unwrap();
            re.close_with_error(None).await.unwrap();
        });

        assert_eq!(next_value(&res).await.as_deref(), Some("hello"));
        assert_eq!(next_value(&res).await.as_deref(), Some("world"));
        assert!(res.next().await.unwrap().is_none());
        assert_eq!(res.error().await, None);
        assert_eq!(res.length().await, None);

        producer.await.unwrap();
    }

    #[tokio::test]
    async fn test_close_with_error_immediately() {
        let (re, res) = pair();
        re.close_with_error(CommandError::new("boom")).await.unwrap();

        let err = res.next().await.unwrap_err();
        assert_eq!(err, ResponseError::Command(CommandError::new("boom")));
        assert_eq!(res.error().await, Some(CommandError::new("boom")));

        // the outcome stays observable
        assert!(res.next().await.is_err());
    }

    #[tokio::test]
    async fn test_double_close_is_reported() {
        let (re, res) = pair();
        re.close().await.unwrap();
        assert!(matches!(re.close().await, Err(CloseError::AlreadyClosed)));
        assert!(matches!(
            re.close_with_error(CommandError::new("late")).await,
            Err(CloseError::AlreadyClosed)
        ));

        // first outcome wins
        assert!(res.next().await.unwrap().is_none());
        assert_eq!(res.error().await, None);
    }

    #[tokio::test]
    async fn test_emit_after_close_fails_without_blocking() {
        let (re, _res) = pair();
        re.close().await.unwrap();

        let result = timeout(Duration::from_secs(1), re.emit("late".to_string()))
            .await
            .expect("emit after close must not block");
        assert!(matches!(result, Err(EmitError::ClosedStream)));
    }

    #[tokio::test]
    async fn test_single_closes_stream() {
        let (re, res) = pair();

        tokio::spawn(async move {
            re.emit(Emission::Single("only".to_string())).await.unwrap();
        });

        assert_eq!(next_value(&res).await.as_deref(), Some("only"));
        assert!(res.next().await.unwrap().is_none());
        assert_eq!(res.error().await, None);
    }

    #[tokio::test]
    async fn test_set_length_before_first_emit() {
        let (re, res) = pair();
        re.set_length(42).await;
        re.set_length(43).await;

        tokio::spawn(async move {
            re.emit("x".to_string()).await.unwrap();
            re.set_length(99).await;
            re.close().await.unwrap();
        });

        assert_eq!(res.length().await, Some(43));
        while res.next().await.unwrap().is_some() {}
        assert_eq!(res.length().await, Some(43));
    }

    #[tokio::test]
    async fn test_set_length_after_close_ignored() {
        let (re, res) = pair();
        re.close().await.unwrap();
        re.set_length(7).await;
        assert_eq!(res.length().await, None);
    }

    #[tokio::test]
    async fn test_cancel_unblocks_next() {
        let req = Request::new(["slow"]);
        let (re, res) = response_pair::<String>(&req);

        let canceller = req.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let result = timeout(Duration::from_secs(1), res.next())
            .await
            .expect("cancellation must unblock next");
        assert_eq!(result.unwrap_err(), ResponseError::Cancelled);

        // the stream is not closed by cancellation
        assert!(!re.is_closed());
        re.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_unblocks_emit() {
        let req = Request::new(["slow"]);
        let (re, _res) = response_pair::<String>(&req);

        // fills the single buffer slot
        re.emit("first".to_string()).await.unwrap();

        let canceller = req.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let result = timeout(Duration::from_secs(1), re.emit("second".to_string()))
            .await
            .expect("cancellation must unblock emit");
        assert!(matches!(result, Err(EmitError::Cancelled)));
    }

    #[tokio::test]
    async fn test_close_preempts_blocked_emit() {
        let (re, res) = pair();
        re.emit("buffered".to_string()).await.unwrap();

        let blocked = {
            let re = re.clone();
            tokio::spawn(async move { re.emit("blocked".to_string()).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        re.close_with_error(CommandError::new("abort")).await.unwrap();
        assert!(matches!(blocked.await.unwrap(), Err(EmitError::ClosedStream)));

        assert_eq!(next_value(&res).await.as_deref(), Some("buffered"));
        assert_eq!(
            res.next().await.unwrap_err(),
            ResponseError::Command(CommandError::new("abort"))
        );
    }

    #[tokio::test]
    async fn test_close_while_reader_waits() {
        let (re, res) = pair();
        let res = Arc::new(res);

        let reader = {
            let res = res.clone();
            tokio::spawn(async move { res.next().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        re.close().await.unwrap();
        assert!(reader.await.unwrap().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_readers_share_values() {
        let (re, res) = response_pair_with::<u32>(
            &Request::new(["count"]),
            StreamConfig::default().capacity(4),
        );
        let res = Arc::new(res);

        tokio::spawn(async move {
            for i in 0..100u32 {
                re.emit(i).await.unwrap();
            }
            re.close().await.unwrap();
        });

        let mut readers = Vec::new();
        for _ in 0..4 {
            let res = res.clone();
            readers.push(tokio::spawn(async move {
                let mut got = Vec::new();
                while let Some(item) = res.next().await.unwrap() {
                    got.extend(item.into_value());
                }
                got
            }));
        }

        let mut all = Vec::new();
        for r in readers {
            all.extend(r.await.unwrap());
        }
        all.sort_unstable();
        assert_eq!(all, (0..100).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_bytes_are_forwarded_to_reader() {
        let (re, res) = pair();
        tokio::spawn(async move {
            re.emit_bytes(&b"abc"[..]).await.unwrap();
            re.close().await.unwrap();
        });

        let mut source = res.next().await.unwrap().unwrap().into_bytes().unwrap();
        let mut buf = String::new();
        source.read_to_string(&mut buf).await.unwrap();
        assert_eq!(buf, "abc");
    }

    #[tokio::test]
    async fn test_released_response_reads_end() {
        let (re, res) = pair();
        res.release().await;
        assert!(res.next().await.unwrap().is_none());

        // the emitter notices the missing consumer
        assert!(matches!(
            re.emit("nobody listens".to_string()).await,
            Err(EmitError::ClosedStream)
        ));
    }

    #[tokio::test]
    async fn test_dropped_response_unblocks_emit() {
        let (re, res) = pair();
        re.emit("buffered".to_string()).await.unwrap();

        let blocked = {
            let re = re.clone();
            tokio::spawn(async move { re.emit("blocked".to_string()).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(res);

        let result = timeout(Duration::from_millis(300), blocked)
            .await
            .expect("dropping the response must unblock emit")
            .unwrap();
        assert!(matches!(result, Err(EmitError::ClosedStream)));

        let later = timeout(Duration::from_millis(300), re.emit("later".to_string()))
            .await
            .expect("emit without a reader must not block");
        assert!(matches!(later, Err(EmitError::ClosedStream)));
        assert!(!re.is_closed());
    }

    #[tokio::test]
    async fn test_dropped_emitter_closes_with_error() {
        let (re, res) = pair();
        drop(re);

        let err = res.next().await.unwrap_err();
        match err {
            ResponseError::Command(e) => assert_eq!(e.code(), ErrorCode::Implementation),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_nested_error_becomes_terminal_error() {
        let (inner_re, inner_res) = response_pair_with::<i64>(
            &Request::new(["inner"]),
            StreamConfig::default().capacity(8),
        );
        for i in 1..=3i64 {
            inner_re.emit(i).await.unwrap();
        }
        inner_re
            .close_with_error(CommandError::new("inner failed"))
            .await
            .unwrap();

        let (re, res) = response_pair::<i64>(&Request::new(["outer"]));
        let producer = tokio::spawn(async move { re.emit(Emission::Stream(inner_res.into_nested())).await });

        let mut seen = Vec::new();
        let err = loop {
            match res.next().await {
                Ok(Some(item)) => seen.extend(item.into_value()),
                Ok(None) => panic!("expected the nested error"),
                Err(e) => break e,
            }
        };

        assert_eq!(seen, vec![1, 2, 3]);
        assert_eq!(err, ResponseError::Command(CommandError::new("inner failed")));
        assert!(matches!(producer.await.unwrap(), Err(EmitError::Nested(_))));
    }
}
