//! Request context shared by a command body and its transports.
//!
//! A [`Request`] carries what the output side needs to know about the
//! invocation:
//! - the command path (for logs)
//! - the requested output encoding
//! - whether the request streams a body (HTTP only)
//! - the cancellation token every blocking stream operation observes
//!
//! # Example
//!
//! ```
//! use cmdwire::Request;
//! use cmdwire::encoding::EncodingType;
//!
//! let req = Request::new(["files", "ls"]).with_encoding(EncodingType::Json);
//! assert_eq!(req.path_string(), "files ls");
//!
//! req.cancel();
//! assert!(req.is_cancelled());
//! ```

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::encoding::EncodingType;

/// Context of one command invocation.
///
/// `Request` is `Clone`; clones share the same cancellation token.
#[derive(Debug, Clone)]
pub struct Request {
    /// Command path, e.g. `["files", "ls"]`.
    path: Vec<String>,
    /// Requested output encoding, if any.
    encoding: Option<EncodingType>,
    /// Whether the request carries a body stream.
    has_body: bool,
    /// Cancellation for every blocking stream operation of this request.
    cancel: CancellationToken,
}

impl Request {
    /// Create a request for the given command path.
    pub fn new<I, S>(path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            path: path.into_iter().map(Into::into).collect(),
            encoding: None,
            has_body: false,
            cancel: CancellationToken::new(),
        }
    }

    /// Set the requested output encoding.
    pub fn with_encoding(mut self, encoding: EncodingType) -> Self {
        self.encoding = Some(encoding);
        self
    }

    /// Mark the request as carrying a body stream.
    pub fn with_body(mut self, has_body: bool) -> Self {
        self.has_body = has_body;
        self
    }

    /// Govern this request by an existing token (e.g. a server's shutdown
    /// token or a child of it).
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Command path segments.
    #[inline]
    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// Command path joined with spaces.
    pub fn path_string(&self) -> String {
        self.path.join(" ")
    }

    /// Requested output encoding.
    #[inline]
    pub fn encoding(&self) -> Option<EncodingType> {
        self.encoding
    }

    /// Whether the request carries a body stream.
    #[inline]
    pub fn has_body(&self) -> bool {
        self.has_body
    }

    /// The cancellation token of this request.
    #[inline]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Cancel the request. Blocked stream operations return `Cancelled`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the request was cancelled.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the request is cancelled.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }
}
