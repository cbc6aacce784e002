//! HTTP transport - streams command output as an `axum` response.
//!
//! [`response_emitter`] returns the [`Emitter`] for the command and a
//! [`PendingResponse`] for the handler. The pending response resolves as soon
//! as the head is decided, which is the first emit or the close:
//!
//! - first value: `200 OK`, `X-Chunked-Output: 1`, encoder content type
//! - first raw bytes: `200 OK`, `X-Stream-Output: 1`
//! - error before any output: status from the error code (`400`, `404` or
//!   `500`) with the JSON error as body
//! - error after output: the body ends with an `X-Stream-Error` trailer
//!
//! # Example
//!
//! ```no_run
//! use axum::response::Response;
//! use cmdwire::http::{self, HttpOptions};
//! use cmdwire::Request;
//!
//! async fn handler() -> Response {
//!     let req = Request::new(["count"]);
//!     let (emitter, pending) = http::response_emitter::<u64>(&req, HttpOptions::default());
//!
//!     tokio::spawn(async move {
//!         for i in 0..3u64 {
//!             if emitter.emit(i).await.is_err() {
//!                 return;
//!             }
//!         }
//!         let _ = emitter.close().await;
//!     });
//!
//!     pending.await
//! }
//! ```

mod headers;
mod options;

pub use headers::{status_for, CHUNKED_OUTPUT, CONTENT_LENGTH, STREAM_ERROR, STREAM_OUTPUT};
pub use options::{HttpOptions, DEFAULT_CHUNK_CAPACITY};

use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::response::Response;
use bytes::{Bytes, BytesMut};
use http_body::Frame;
use http_body_util::StreamBody;
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use crate::emitter::{BoxFuture, Delivery, Emitter, Transport};
use crate::encoding::{EncodingType, SharedEncoder};
use crate::error::{CloseError, CommandError, EmitError, ErrorCode};
use crate::payload::{ByteSource, Item, Payload};
use crate::request::Request;

use headers::{HeadTemplate, OutputKind};

/// Read size when copying raw byte output into body chunks.
const BYTES_CHUNK_SIZE: usize = 8 * 1024;

type BodyFrame = Result<Frame<Bytes>, io::Error>;
type BodySender = mpsc::Sender<BodyFrame>;

/// Build an HTTP emitter for `req`.
pub fn response_emitter<T: Payload>(req: &Request, opts: HttpOptions) -> (Emitter<T>, PendingResponse) {
    let encoding = opts
        .encoding
        .or_else(|| req.encoding())
        .unwrap_or(EncodingType::Json);
    let encoder: SharedEncoder<T> = encoding.encoder();

    let (head_tx, head_rx) = oneshot::channel();
    let transport = Arc::new(HttpEmitter {
        request: req.clone(),
        head: HeadTemplate {
            content_type: encoder.content_type(),
            expose: headers::expose_value(&opts.expose_headers),
            close_connection: req.has_body(),
        },
        encoder,
        chunk_capacity: opts.chunk_capacity.max(1),
        closed: AtomicBool::new(false),
        closing: CancellationToken::new(),
        state: Mutex::new(HttpState {
            phase: Phase::Pending(head_tx),
            length: None,
        }),
    });

    (
        Emitter::new(transport as Arc<dyn Transport<T>>),
        PendingResponse { rx: head_rx },
    )
}

/// Resolves to the response once its head is decided.
///
/// If the emitter goes away without deciding, resolves to a `500` error
/// response.
#[must_use = "the response must be returned to the client"]
pub struct PendingResponse {
    rx: oneshot::Receiver<Response>,
}

impl Future for PendingResponse {
    type Output = Response;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Response> {
        Pin::new(&mut self.rx).poll(cx).map(|res| {
            res.unwrap_or_else(|_| {
                headers::error_response(&CommandError::with_code(
                    "command ended without a response",
                    ErrorCode::Implementation,
                ))
            })
        })
    }
}

impl fmt::Debug for PendingResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingResponse").finish_non_exhaustive()
    }
}

enum Phase {
    /// Nothing sent yet.
    Pending(oneshot::Sender<Response>),
    /// Head sent, body open.
    Streaming(BodySender),
    Closed,
}

struct HttpState {
    phase: Phase,
    length: Option<u64>,
}

/// HTTP transport behind an [`Emitter`].
struct HttpEmitter<T> {
    request: Request,
    head: HeadTemplate,
    encoder: SharedEncoder<T>,
    chunk_capacity: usize,
    closed: AtomicBool,
    /// Fired when a close starts; a chunk hand-off in flight gives up.
    closing: CancellationToken,
    state: Mutex<HttpState>,
}

impl<T: Payload> HttpEmitter<T> {
    /// Body sender for the next chunk, sending the head first if needed.
    fn body_sender(&self, state: &mut HttpState, kind: OutputKind) -> Option<BodySender> {
        let body = match std::mem::replace(&mut state.phase, Phase::Closed) {
            Phase::Pending(head_tx) => {
                let (body_tx, mut body_rx) = mpsc::channel::<BodyFrame>(self.chunk_capacity);
                let frames = futures::stream::poll_fn(move |cx| body_rx.poll_recv(cx));
                let resp = self
                    .head
                    .output(kind, state.length, Body::new(StreamBody::new(frames)));

                if head_tx.send(resp).is_err() {
                    tracing::debug!(
                        command = %self.request.path_string(),
                        "http response dropped before the head was sent"
                    );
                }
                tracing::debug!(command = %self.request.path_string(), ?kind, "http head sent");
                body_tx
            }
            Phase::Streaming(body_tx) => body_tx,
            Phase::Closed => return None,
        };
        state.phase = Phase::Streaming(body.clone());
        Some(body)
    }

    async fn write_item(&self, body: &BodySender, item: Item<T>) -> Result<(), EmitError> {
        match item {
            Item::Value(value) => {
                let encoded = self.encoder.encode(&value)?;
                send_chunk(body, encoded).await
            }
            Item::Bytes(source) => copy_bytes(body, source).await,
        }
    }

    /// Terminal transition. Caller holds the state lock.
    async fn close_locked(&self, state: &mut HttpState, outcome: Option<CommandError>) {
        self.closed.store(true, Ordering::Release);

        match std::mem::replace(&mut state.phase, Phase::Closed) {
            Phase::Pending(head_tx) => {
                let resp = match &outcome {
                    Some(err) => headers::error_response(err),
                    None => self.head.output(OutputKind::Values, state.length, Body::empty()),
                };
                // nobody waiting for the response means nobody to tell
                let _ = head_tx.send(resp);
            }
            Phase::Streaming(body_tx) => {
                if let Some(err) = &outcome {
                    let trailers = headers::error_trailers(err);
                    if body_tx.send(Ok(Frame::trailers(trailers))).await.is_err() {
                        tracing::debug!(
                            command = %self.request.path_string(),
                            "http client gone before the error trailer"
                        );
                    }
                }
            }
            Phase::Closed => {}
        }

        tracing::debug!(
            command = %self.request.path_string(),
            error = ?outcome.as_ref().map(|e| e.message()),
            "http emitter closed"
        );
    }
}

impl<T: Payload> Transport<T> for HttpEmitter<T> {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn set_length(&self, length: u64) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if matches!(state.phase, Phase::Pending(_)) {
                state.length = Some(length);
            }
        })
    }

    fn deliver(&self, item: Item<T>, delivery: Delivery) -> BoxFuture<'_, Result<(), EmitError>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;

            let kind = if item.is_bytes() {
                OutputKind::Bytes
            } else {
                OutputKind::Values
            };
            let body = self
                .body_sender(&mut state, kind)
                .ok_or(EmitError::ClosedStream)?;

            tokio::select! {
                biased;
                _ = self.closing.cancelled() => return Err(EmitError::ClosedStream),
                _ = self.request.cancelled() => return Err(EmitError::Cancelled),
                res = self.write_item(&body, item) => res?,
            }
            tracing::trace!(command = %self.request.path_string(), "http chunk delivered");

            if delivery == Delivery::Last {
                self.close_locked(&mut state, None).await;
            }
            Ok(())
        })
    }

    fn close_with_error(
        &self,
        outcome: Option<CommandError>,
    ) -> BoxFuture<'_, Result<(), CloseError>> {
        Box::pin(async move {
            // preempt an emit waiting on a slow client
            self.closing.cancel();

            let mut state = self.state.lock().await;
            if matches!(state.phase, Phase::Closed) {
                return Err(CloseError::AlreadyClosed);
            }
            self.close_locked(&mut state, outcome).await;
            Ok(())
        })
    }
}

impl<T> Drop for HttpEmitter<T> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        let err = CommandError::with_code(
            "http emitter dropped without being closed",
            ErrorCode::Implementation,
        );

        match std::mem::replace(&mut state.phase, Phase::Closed) {
            Phase::Pending(head_tx) => {
                tracing::warn!(command = %self.request.path_string(), "{}", err);
                let _ = head_tx.send(headers::error_response(&err));
            }
            Phase::Streaming(body_tx) => {
                tracing::warn!(command = %self.request.path_string(), "{}", err);
                let _ = body_tx.try_send(Ok(Frame::trailers(headers::error_trailers(&err))));
            }
            Phase::Closed => {}
        }
    }
}

async fn send_chunk(body: &BodySender, chunk: Bytes) -> Result<(), EmitError> {
    body.send(Ok(Frame::data(chunk)))
        .await
        .map_err(|_| EmitError::Io(io::Error::new(io::ErrorKind::BrokenPipe, "http client went away")))
}

async fn copy_bytes(body: &BodySender, mut source: ByteSource) -> Result<(), EmitError> {
    let mut buf = BytesMut::with_capacity(BYTES_CHUNK_SIZE);
    loop {
        buf.reserve(BYTES_CHUNK_SIZE);
        if source.read_buf(&mut buf).await? == 0 {
            return Ok(());
        }
        send_chunk(body, buf.split().freeze()).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header, StatusCode};
    use futures::stream;
    use http_body_util::BodyExt;

    use crate::payload::Emission;

    struct Collected {
        status: StatusCode,
        headers: axum::http::HeaderMap,
        body: Bytes,
        trailers: Option<axum::http::HeaderMap>,
    }

    async fn collect(resp: Response) -> Collected {
        let status = resp.status();
        let headers = resp.headers().clone();
        let collected = resp.into_body().collect().await.unwrap();
        let trailers = collected.trailers().cloned();
        Collected {
            status,
            headers,
            body: collected.to_bytes(),
            trailers,
        }
    }

    #[tokio::test]
    async fn test_values_stream_with_chunked_header() {
        let req = Request::new(["count"]);
        let (emitter, pending) = response_emitter::<u64>(&req, HttpOptions::default());

        tokio::spawn(async move {
            for i in 1..=3u64 {
                emitter.emit(i).await.unwrap();
            }
            emitter.close().await.unwrap();
        });

        let out = collect(pending.await).await;
        assert_eq!(out.status, StatusCode::OK);
        assert_eq!(out.headers[CHUNKED_OUTPUT], "1");
        assert_eq!(out.headers[header::CONTENT_TYPE], "application/json");
        assert_eq!(out.headers[header::TRAILER], STREAM_ERROR);
        assert!(out.headers.get(header::CONNECTION).is_none());
        assert_eq!(&out.body[..], b"1\n2\n3\n");
        assert!(out.trailers.is_none());
    }

    #[tokio::test]
    async fn test_error_before_output_sets_status() {
        let req = Request::new(["cat"]);
        let (emitter, pending) = response_emitter::<String>(&req, HttpOptions::default());

        emitter
            .close_with_error(CommandError::with_code("no such file", ErrorCode::NotFound))
            .await
            .unwrap();

        let out = collect(pending.await).await;
        assert_eq!(out.status, StatusCode::NOT_FOUND);
        let err: CommandError = serde_json::from_slice(&out.body).unwrap();
        assert_eq!(err.message(), "no such file");
        assert_eq!(err.code(), ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn test_client_error_maps_to_bad_request() {
        let req = Request::new(["add"]);
        let (emitter, pending) = response_emitter::<String>(&req, HttpOptions::default());

        emitter
            .close_with_error(CommandError::client("missing argument"))
            .await
            .unwrap();

        assert_eq!(pending.await.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_error_after_output_becomes_trailer() {
        let req = Request::new(["ls"]);
        let (emitter, pending) = response_emitter::<String>(&req, HttpOptions::default());

        tokio::spawn(async move {
            let nested = Emission::stream(stream::iter(vec![
                Ok(Emission::Plain("a".to_string())),
                Ok(Emission::Plain("b".to_string())),
                Err(CommandError::new("listing interrupted")),
            ]));
            assert!(matches!(
                emitter.emit(nested).await,
                Err(EmitError::Nested(_))
            ));
        });

        let out = collect(pending.await).await;
        assert_eq!(out.status, StatusCode::OK);
        assert_eq!(&out.body[..], b"\"a\"\n\"b\"\n");
        let trailers = out.trailers.unwrap();
        assert_eq!(trailers[STREAM_ERROR], "listing interrupted");
    }

    #[tokio::test]
    async fn test_raw_bytes_and_length_headers() {
        let req = Request::new(["cat"]);
        let (emitter, pending) = response_emitter::<String>(&req, HttpOptions::default());

        tokio::spawn(async move {
            emitter.set_length(3).await;
            emitter.emit_bytes(&b"abc"[..]).await.unwrap();
            emitter.close().await.unwrap();
        });

        let out = collect(pending.await).await;
        assert_eq!(out.headers[STREAM_OUTPUT], "1");
        assert_eq!(out.headers[CONTENT_LENGTH], "3");
        assert_eq!(&out.body[..], b"abc");
    }

    #[tokio::test]
    async fn test_request_body_closes_connection() {
        let req = Request::new(["add"]).with_body(true);
        let (emitter, pending) = response_emitter::<String>(&req, HttpOptions::default());

        tokio::spawn(async move { emitter.emit_once("added".to_string()).await.unwrap() });

        let out = collect(pending.await).await;
        assert_eq!(out.headers[header::CONNECTION], "close");
        assert_eq!(&out.body[..], b"\"added\"\n");
    }

    #[tokio::test]
    async fn test_success_without_output() {
        let req = Request::new(["noop"]);
        let (emitter, pending) = response_emitter::<String>(&req, HttpOptions::default());

        emitter.close().await.unwrap();
        assert!(matches!(
            emitter.close().await,
            Err(CloseError::AlreadyClosed)
        ));

        let out = collect(pending.await).await;
        assert_eq!(out.status, StatusCode::OK);
        assert!(out.body.is_empty());
    }

    #[tokio::test]
    async fn test_encoding_option_and_request_fallback() {
        let req = Request::new(["echo"]).with_encoding(EncodingType::Text);
        let (emitter, pending) = response_emitter::<String>(&req, HttpOptions::default());
        tokio::spawn(async move { emitter.emit_once("plain".to_string()).await.unwrap() });
        let out = collect(pending.await).await;
        assert_eq!(out.headers[header::CONTENT_TYPE], "text/plain; charset=utf-8");
        assert_eq!(&out.body[..], b"plain\n");

        let opts = HttpOptions::default().encoding(EncodingType::Json);
        let (emitter, pending) = response_emitter::<String>(&req, opts);
        tokio::spawn(async move { emitter.emit_once("quoted".to_string()).await.unwrap() });
        let out = collect(pending.await).await;
        assert_eq!(&out.body[..], b"\"quoted\"\n");
    }

    #[tokio::test]
    async fn test_dropped_emitter_reports_error() {
        let req = Request::new(["lost"]);
        let (emitter, pending) = response_emitter::<String>(&req, HttpOptions::default());
        drop(emitter);

        assert_eq!(pending.await.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_emit_after_close_is_rejected() {
        let req = Request::new(["echo"]);
        let (emitter, _pending) = response_emitter::<String>(&req, HttpOptions::default());

        emitter.close().await.unwrap();
        assert!(matches!(
            emitter.emit("late".to_string()).await,
            Err(EmitError::ClosedStream)
        ));
    }
}
