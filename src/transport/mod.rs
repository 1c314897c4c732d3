//! Transport boundary: performs the network I/O for a single HTTP hop.
//!
//! The fetch engine never talks to sockets itself. It hands each hop to a
//! [`Transport`] as a [`TransportRequest`] and gets back either a
//! [`TransportResponse`] (status, raw header list, body stream) or a
//! [`TransportError`]. Transports must not follow redirects on their own.
//!
//! Cancellation is cooperative: dropping the future returned by
//! [`Transport::send`] must abort the in-flight operation, and dropping the
//! response body stream must release the connection.
//!
//! # Implementations
//!
//! - [`ReqwestTransport`]: default implementation using `reqwest`
//! - Scripted implementations for testing

mod reqwest_impl;

pub use reqwest_impl::{ReqwestTransport, ReqwestTransportConfig};

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use url::Url;

use crate::fetch::{ByteStream, Credentials};

/// Optional behavior a transport provides on its own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportCapabilities {
    /// The transport already decodes `Content-Encoding`; the engine must not.
    pub decodes_content: bool,
    /// `407` answers are login challenges the engine may answer with credentials.
    pub login_events: bool,
}

/// Request body as handed to the transport.
pub enum TransportBody {
    /// No body.
    Empty,
    /// Write one buffer, then end.
    Full(Bytes),
    /// Pipe a stream (chunked framing, length unknown to the engine).
    Stream(ByteStream),
}

impl std::fmt::Debug for TransportBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Full(bytes) => f.debug_tuple("Full").field(&bytes.len()).finish(),
            Self::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// One hop, fully prepared by the engine.
#[derive(Debug)]
pub struct TransportRequest {
    /// Upper-cased method.
    pub method: String,
    /// Absolute URL of this hop.
    pub url: Url,
    /// Raw header list in display case, duplicates preserved.
    pub headers: Vec<(String, String)>,
    /// Body writer.
    pub body: TransportBody,
    /// Proxy credentials answering a previous login challenge.
    pub proxy_credentials: Option<Credentials>,
}

impl TransportRequest {
    /// Scheme of the hop URL (`http` or `https`).
    #[must_use]
    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    /// Host of the hop URL.
    #[must_use]
    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    /// Port of the hop URL, defaulted from the scheme.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.url.port_or_known_default()
    }

    /// Path and query of the hop URL.
    #[must_use]
    pub fn path(&self) -> String {
        match self.url.query() {
            Some(query) => format!("{}?{query}", self.url.path()),
            None => self.url.path().to_string(),
        }
    }

    /// Returns the first header value for `name` (case-insensitive).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Response head plus body stream for one hop.
pub struct TransportResponse {
    /// Status code.
    pub status: u16,
    /// Reason phrase.
    pub status_text: String,
    /// Raw header list, duplicates preserved in arrival order.
    pub headers: Vec<(String, String)>,
    /// Undecoded body stream.
    pub body: ByteStream,
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("status_text", &self.status_text)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Transport-native failure identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    /// The peer refused the connection.
    ConnectionRefused,
    /// The connection was reset or closed mid-exchange.
    ConnectionReset,
    /// The connection was aborted locally.
    ConnectionAborted,
    /// The host name could not be resolved.
    NameNotResolved,
    /// A lower-layer timeout (connect or read).
    TimedOut,
    /// No route to the host.
    HostUnreachable,
    /// The network is down or unreachable.
    NetworkUnreachable,
    /// TLS handshake or certificate failure.
    Tls,
    /// Malformed HTTP on the wire.
    Protocol,
    /// Content decoding failed.
    DecodingFailed,
    /// Writing the request body failed.
    BrokenPipe,
    /// The operation was cancelled.
    Canceled,
    /// The request could not be built (bad method, header or URL).
    InvalidRequest,
    /// Anything else.
    Other,
}

/// Failure reported by a transport.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TransportError {
    kind: TransportErrorKind,
    message: String,
    #[source]
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl TransportError {
    /// Creates a transport error without an underlying source.
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Creates a transport error wrapping a source error.
    pub fn with_source(
        kind: TransportErrorKind,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            source: Some(Arc::new(source)),
        }
    }

    /// Creates a transport error from a host network stack identifier
    /// such as `ERR_CONNECTION_REFUSED`.
    pub fn from_native(native: &str, message: impl Into<String>) -> Self {
        Self::new(crate::fetch::errno::kind_from_native(native), message)
    }

    /// Returns the failure identifier.
    #[must_use]
    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    /// Returns the failure description.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// A collaborator that performs one HTTP hop.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Short name used in the default User-Agent (e.g. `reqwest`).
    fn kind(&self) -> &'static str;

    /// Behavior the transport provides on its own.
    fn capabilities(&self) -> TransportCapabilities {
        TransportCapabilities::default()
    }

    /// Forward proxy every hop goes through, if one is configured. Login
    /// challenges are attributed to it instead of the hop URL.
    fn proxy(&self) -> Option<&Url> {
        None
    }

    /// Sends one hop and resolves once response headers are available.
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;
}
