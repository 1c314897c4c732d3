//! Error types for fetch operations.
//!
//! Every failure carries a human-readable message and a stable machine-readable
//! type tag (see [`FetchErrorKind::as_str`]). System errors additionally carry
//! a POSIX-like `code` and `errno` translated from the transport's native error.

use std::sync::Arc;

use thiserror::Error;

use super::errno;
use crate::transport::TransportError;

/// Code attached to proxy authentication failures.
pub const PROXY_AUTH_FAILED: &str = "PROXY_AUTH_FAILED";

/// Message prefix shared by every response body failure.
const BODY_ERROR_PREFIX: &str = "invalid response body while trying to fetch";

/// Shared, cloneable error source.
pub type SharedSource = Arc<dyn std::error::Error + Send + Sync>;

/// Machine-readable classification of a [`FetchError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchErrorKind {
    /// Transport or stream failure wrapping a lower-layer error.
    System,
    /// No response headers before the request timeout elapsed.
    RequestTimeout,
    /// Draining an already-resolved response body timed out.
    BodyTimeout,
    /// The redirect chain exceeded the follow limit.
    MaxRedirect,
    /// A redirect was received while the policy is `error`.
    NoRedirect,
    /// A redirect response had a missing or unusable `Location`.
    InvalidRedirect,
    /// A redirect would have to replay a streamed request body.
    UnsupportedRedirect,
    /// The exchange was cancelled through its abort signal.
    Abort,
    /// Proxy authentication could not be completed.
    Proxy,
    /// The response body exceeded the configured size limit.
    MaxSize,
    /// The response body was not valid JSON.
    InvalidJson,
    /// Invalid input or misuse of the API (reported before any network I/O).
    Type,
}

impl FetchErrorKind {
    /// Returns the stable type tag.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::RequestTimeout => "request-timeout",
            Self::BodyTimeout => "body-timeout",
            Self::MaxRedirect => "max-redirect",
            Self::NoRedirect => "no-redirect",
            Self::InvalidRedirect => "invalid-redirect",
            Self::UnsupportedRedirect => "unsupported-redirect",
            Self::Abort => "abort",
            Self::Proxy => "proxy",
            Self::MaxSize => "max-size",
            Self::InvalidJson => "invalid-json",
            Self::Type => "type",
        }
    }
}

impl std::fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced by request construction, the fetch engine and body consumption.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// Lower-layer failure (connection, DNS, TLS, decoding, broken stream).
    #[error("{message}")]
    System {
        /// URL of the exchange that failed.
        url: String,
        /// Full human-readable message.
        message: String,
        /// POSIX-like error code (e.g. `ECONNREFUSED`).
        code: &'static str,
        /// Numeric error number matching `code`.
        errno: i32,
        /// Underlying error, when one exists.
        #[source]
        source: Option<SharedSource>,
    },

    /// The transport did not produce response headers in time.
    #[error("network timeout at: {url}")]
    RequestTimeout {
        /// URL of the hop that timed out.
        url: String,
    },

    /// The response body was not fully drained in time.
    #[error("response timeout while trying to fetch {url} (over {timeout_ms}ms)")]
    BodyTimeout {
        /// URL of the response.
        url: String,
        /// Configured timeout in milliseconds.
        timeout_ms: u128,
    },

    /// Too many redirects.
    #[error("maximum redirect reached at: {url}")]
    MaxRedirect {
        /// URL of the hop that answered with the redirect over the limit.
        url: String,
    },

    /// Redirect received while policy is `error`.
    #[error("redirect mode is set to error: {url}")]
    NoRedirect {
        /// URL of the hop that answered with a redirect.
        url: String,
    },

    /// Redirect without a usable `Location`.
    #[error("{message}")]
    InvalidRedirect {
        /// URL of the hop that answered with the redirect.
        url: String,
        /// Full human-readable message.
        message: String,
    },

    /// Redirect that would need to resend a one-shot request body.
    #[error("cannot follow redirect with body being a readable stream: {url}")]
    UnsupportedRedirect {
        /// URL of the hop that answered with the redirect.
        url: String,
    },

    /// Cancelled through the abort signal.
    #[error("the user aborted a request")]
    Abort,

    /// Proxy authentication failed or no credentials were available.
    #[error("login event received from {host} but no credentials provided")]
    Proxy {
        /// Host that requested authentication.
        host: String,
        /// Always [`PROXY_AUTH_FAILED`].
        code: &'static str,
    },

    /// The response body exceeded the configured limit.
    #[error("content size at {url} over limit: {limit}")]
    MaxSize {
        /// URL of the response.
        url: String,
        /// Configured limit in bytes.
        limit: u64,
    },

    /// The response body failed to parse as JSON.
    #[error("invalid json response body at {url} reason: {reason}")]
    InvalidJson {
        /// URL of the response.
        url: String,
        /// Parser message.
        reason: String,
    },

    /// A consumption call was made on an already-consumed body.
    #[error("body used already for: {url}")]
    BodyUsed {
        /// URL of the owning request or response.
        url: String,
    },

    /// Invalid input or API misuse.
    #[error("{message}")]
    InvalidInput {
        /// Human-readable description.
        message: String,
    },
}

impl FetchError {
    /// Creates a system error from a transport failure.
    pub fn system(url: impl Into<String>, error: &TransportError) -> Self {
        let url = url.into();
        let (code, errno) = errno::lookup(error.kind());
        Self::System {
            message: format!("request to {url} failed, reason: {}", error.message()),
            url,
            code,
            errno,
            source: Some(Arc::new(error.clone())),
        }
    }

    /// Creates a system error for a response body stream that broke mid-drain.
    pub fn body_stream(url: impl Into<String>, error: &FetchError) -> Self {
        let url = url.into();
        let (code, errno) = match error {
            Self::System { code, errno, .. } => (*code, *errno),
            _ => errno::lookup(crate::transport::TransportErrorKind::Other),
        };
        Self::System {
            message: format!("{BODY_ERROR_PREFIX} {url}: {error}"),
            url,
            code,
            errno,
            source: Some(Arc::new(error.clone())),
        }
    }

    /// Converts an error raised by a body stream into the error reported to
    /// the consumer. Aborts, size and timeout errors, and errors that already
    /// describe a body failure pass through unchanged.
    #[must_use]
    pub(crate) fn into_body_error(self, url: &str) -> Self {
        let passthrough = match &self {
            Self::Abort | Self::MaxSize { .. } | Self::BodyTimeout { .. } => true,
            Self::System { message, .. } => message.starts_with(BODY_ERROR_PREFIX),
            _ => false,
        };
        if passthrough {
            self
        } else {
            Self::body_stream(url, &self)
        }
    }

    /// Creates a system error for a content decoding failure.
    pub fn decode(url: impl Into<String>, source: std::io::Error) -> Self {
        let url = url.into();
        let (code, errno) = errno::lookup(crate::transport::TransportErrorKind::DecodingFailed);
        Self::System {
            message: format!("{BODY_ERROR_PREFIX} {url}: {source}"),
            url,
            code,
            errno,
            source: Some(Arc::new(source)),
        }
    }

    /// Creates a request timeout error.
    pub fn request_timeout(url: impl Into<String>) -> Self {
        Self::RequestTimeout { url: url.into() }
    }

    /// Creates a body timeout error.
    pub fn body_timeout(url: impl Into<String>, timeout: std::time::Duration) -> Self {
        Self::BodyTimeout {
            url: url.into(),
            timeout_ms: timeout.as_millis(),
        }
    }

    /// Creates a max-redirect error.
    pub fn max_redirect(url: impl Into<String>) -> Self {
        Self::MaxRedirect { url: url.into() }
    }

    /// Creates a no-redirect error.
    pub fn no_redirect(url: impl Into<String>) -> Self {
        Self::NoRedirect { url: url.into() }
    }

    /// Creates an invalid-redirect error for a missing `Location` header.
    pub fn missing_location(url: impl Into<String>) -> Self {
        let url = url.into();
        Self::InvalidRedirect {
            message: format!("redirect location header missing at: {url}"),
            url,
        }
    }

    /// Creates an invalid-redirect error for a `Location` that does not resolve.
    pub fn bad_location(url: impl Into<String>, location: &str) -> Self {
        Self::InvalidRedirect {
            url: url.into(),
            message: format!("uri requested responds with an invalid redirect URL: {location}"),
        }
    }

    /// Creates an unsupported-redirect error.
    pub fn unsupported_redirect(url: impl Into<String>) -> Self {
        Self::UnsupportedRedirect { url: url.into() }
    }

    /// Creates a proxy authentication error.
    pub fn proxy(host: impl Into<String>) -> Self {
        Self::Proxy {
            host: host.into(),
            code: PROXY_AUTH_FAILED,
        }
    }

    /// Creates a max-size error.
    pub fn max_size(url: impl Into<String>, limit: u64) -> Self {
        Self::MaxSize {
            url: url.into(),
            limit,
        }
    }

    /// Creates an invalid-json error.
    pub fn invalid_json(url: impl Into<String>, source: &serde_json::Error) -> Self {
        Self::InvalidJson {
            url: url.into(),
            reason: source.to_string(),
        }
    }

    /// Creates a body-used error.
    pub fn body_used(url: impl Into<String>) -> Self {
        Self::BodyUsed { url: url.into() }
    }

    /// Creates an invalid-input (type) error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Returns the error classification.
    #[must_use]
    pub fn kind(&self) -> FetchErrorKind {
        match self {
            Self::System { .. } => FetchErrorKind::System,
            Self::RequestTimeout { .. } => FetchErrorKind::RequestTimeout,
            Self::BodyTimeout { .. } => FetchErrorKind::BodyTimeout,
            Self::MaxRedirect { .. } => FetchErrorKind::MaxRedirect,
            Self::NoRedirect { .. } => FetchErrorKind::NoRedirect,
            Self::InvalidRedirect { .. } => FetchErrorKind::InvalidRedirect,
            Self::UnsupportedRedirect { .. } => FetchErrorKind::UnsupportedRedirect,
            Self::Abort => FetchErrorKind::Abort,
            Self::Proxy { .. } => FetchErrorKind::Proxy,
            Self::MaxSize { .. } => FetchErrorKind::MaxSize,
            Self::InvalidJson { .. } => FetchErrorKind::InvalidJson,
            Self::BodyUsed { .. } | Self::InvalidInput { .. } => FetchErrorKind::Type,
        }
    }

    /// Returns the stable type tag (`"system"`, `"max-redirect"`, ...).
    #[must_use]
    pub fn type_tag(&self) -> &'static str {
        self.kind().as_str()
    }

    /// Returns the error code for system and proxy errors.
    #[must_use]
    pub fn code(&self) -> Option<&'static str> {
        match self {
            Self::System { code, .. } | Self::Proxy { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Returns the errno for system errors.
    #[must_use]
    pub fn errno(&self) -> Option<i32> {
        match self {
            Self::System { errno, .. } => Some(*errno),
            _ => None,
        }
    }

    /// Returns true for cancellation errors.
    #[must_use]
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Abort)
    }
}
