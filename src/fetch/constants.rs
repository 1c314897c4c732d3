//! Constants for the fetch engine (defaults, header values, timeouts).

/// Default maximum number of redirects followed.
pub const DEFAULT_FOLLOW: u32 = 20;

/// Default HTTP connect timeout for the reqwest transport (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default `Accept` header value.
pub const DEFAULT_ACCEPT: &str = "*/*";

/// Default `Accept-Encoding` header value when decompression is enabled.
pub const DEFAULT_ACCEPT_ENCODING: &str = "gzip,deflate";

/// Default `Connection` header value.
pub const DEFAULT_CONNECTION: &str = "close";

/// Default content type for text bodies.
pub const TEXT_CONTENT_TYPE: &str = "text/plain;charset=UTF-8";

/// Default content type for URL-encoded form bodies.
pub const URL_ENCODED_CONTENT_TYPE: &str = "application/x-www-form-urlencoded;charset=UTF-8";

/// Redirect status codes interpreted by the engine.
pub const REDIRECT_STATUSES: [u16; 5] = [301, 302, 303, 307, 308];
