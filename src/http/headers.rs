//! Response head and trailer construction.

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::Response;

use crate::error::{CommandError, ErrorCode};

/// Set to `1` when the body is raw bytes copied from a reader.
pub const STREAM_OUTPUT: &str = "X-Stream-Output";
/// Set to `1` when the body is a sequence of encoded values.
pub const CHUNKED_OUTPUT: &str = "X-Chunked-Output";
/// Declared output length, when the command set one.
pub const CONTENT_LENGTH: &str = "X-Content-Length";
/// Trailer carrying the message of an error raised after output started.
pub const STREAM_ERROR: &str = "X-Stream-Error";

const DEFAULT_EXPOSED: [&str; 3] = [STREAM_OUTPUT, CHUNKED_OUTPUT, CONTENT_LENGTH];

fn name(canonical: &'static str) -> HeaderName {
    match canonical {
        STREAM_OUTPUT => HeaderName::from_static("x-stream-output"),
        CHUNKED_OUTPUT => HeaderName::from_static("x-chunked-output"),
        CONTENT_LENGTH => HeaderName::from_static("x-content-length"),
        _ => HeaderName::from_static("x-stream-error"),
    }
}

/// What the body of a successful response carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OutputKind {
    Values,
    Bytes,
}

/// Fixed parts of every response head for one request.
#[derive(Debug, Clone)]
pub(crate) struct HeadTemplate {
    pub content_type: &'static str,
    pub expose: HeaderValue,
    pub close_connection: bool,
}

impl HeadTemplate {
    /// Build the `200 OK` response that starts streaming output.
    pub fn output(&self, kind: OutputKind, length: Option<u64>, body: Body) -> Response {
        let mut resp = Response::new(body);
        let headers = resp.headers_mut();

        let content_type = match kind {
            OutputKind::Values => self.content_type,
            OutputKind::Bytes => "text/plain",
        };
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));

        let marker = match kind {
            OutputKind::Values => CHUNKED_OUTPUT,
            OutputKind::Bytes => STREAM_OUTPUT,
        };
        headers.insert(name(marker), HeaderValue::from_static("1"));
        headers.insert(header::TRAILER, HeaderValue::from_static(STREAM_ERROR));
        headers.insert(header::ACCESS_CONTROL_EXPOSE_HEADERS, self.expose.clone());

        if let Some(length) = length {
            headers.insert(name(CONTENT_LENGTH), HeaderValue::from(length));
        }
        if self.close_connection {
            // the client cannot tell when its upload is fully consumed
            headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
        }
        resp
    }
}

/// `Access-Control-Expose-Headers` value: the transport's own headers plus
/// `extra`. Names that are not valid header names are skipped.
pub(crate) fn expose_value(extra: &[String]) -> HeaderValue {
    let mut names: Vec<&str> = DEFAULT_EXPOSED.to_vec();
    for candidate in extra {
        if HeaderName::from_bytes(candidate.as_bytes()).is_ok() {
            names.push(candidate);
        } else {
            tracing::warn!(header = %candidate, "ignoring invalid expose header name");
        }
    }

    HeaderValue::from_str(&names.join(", "))
        .unwrap_or_else(|_| HeaderValue::from_static("X-Stream-Output, X-Chunked-Output, X-Content-Length"))
}

/// HTTP status for an error that ends a command before any output.
pub fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::Client => StatusCode::BAD_REQUEST,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Full response for a command that failed before producing output.
pub(crate) fn error_response(err: &CommandError) -> Response {
    let body = serde_json::to_vec(err).unwrap_or_else(|_| err.message().as_bytes().to_vec());

    let mut resp = Response::new(Body::from(body));
    *resp.status_mut() = status_for(err.code());
    resp.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    resp
}

/// Trailers reporting an error raised after output started.
pub(crate) fn error_trailers(err: &CommandError) -> HeaderMap {
    // header values cannot carry control characters
    let message: String = err
        .message()
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();

    let value = HeaderValue::from_bytes(message.as_bytes())
        .unwrap_or_else(|_| HeaderValue::from_static("command failed"));

    let mut trailers = HeaderMap::new();
    trailers.insert(name(STREAM_ERROR), value);
    trailers
}
