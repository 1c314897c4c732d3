//! Fetch-style HTTP request/response engine.
//!
//! A [`Request`] describes one exchange; [`Fetcher::fetch`] runs it through the
//! orchestrator (redirects, timeout, abort, proxy login, content decoding) over
//! a [`Transport`] and resolves to a [`Response`] as soon as headers arrive.
//! The response body is consumed afterwards, exactly once.
//!
//! # Example
//!
//! ```no_run
//! use fetcher_core::fetch::{RequestInit, fetch};
//!
//! # async fn example() -> Result<(), fetcher_core::fetch::FetchError> {
//! let response = fetch("https://example.com/data.json", RequestInit::new()).await?;
//! if response.ok() {
//!     let value: serde_json::Value = response.json().await?;
//!     println!("{value}");
//! }
//! # Ok(())
//! # }
//! ```

mod blob;
mod body;
pub mod constants;
mod engine;
pub(crate) mod errno;
mod error;
mod form;
mod headers;
mod login;
mod request;
mod response;
mod signal;
mod tee;

use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use futures_util::stream::BoxStream;
use tracing::instrument;

use crate::transport::{ReqwestTransport, ReqwestTransportConfig, Transport};

pub use blob::Blob;
pub use body::{Body, BodyInit};
pub use error::{FetchError, FetchErrorKind, PROXY_AUTH_FAILED, SharedSource};
pub use form::FormData;
pub use headers::{HeaderMap, HeadersInit, is_valid_header_name, is_valid_header_value};
pub use login::{AuthInfo, Credentials, LoginCallback, LoginEvent, LoginHandler};
pub use request::{RedirectPolicy, Request, RequestInit, RequestInput};
pub use response::{Response, ResponseInit};
pub use signal::{AbortController, AbortSignal};

/// Byte stream used for request and response bodies.
pub type ByteStream = BoxStream<'static, Result<Bytes, FetchError>>;

/// Settings for building a [`Fetcher`] with the default transport.
#[derive(Debug, Clone, Default)]
pub struct FetcherConfig {
    /// Default transport settings.
    pub transport: ReqwestTransportConfig,
}

/// Holds the default transport used by requests that do not select one.
#[derive(Debug, Clone)]
pub struct Fetcher {
    transport: Arc<dyn Transport>,
}

static GLOBAL: OnceLock<Fetcher> = OnceLock::new();

impl Fetcher {
    /// Creates a fetcher over the default reqwest transport.
    ///
    /// # Errors
    ///
    /// Returns a system error when the HTTP client cannot be built.
    pub fn new() -> Result<Self, FetchError> {
        Self::from_config(&FetcherConfig::default())
    }

    /// Creates a fetcher over a reqwest transport built from `config`.
    ///
    /// # Errors
    ///
    /// Returns a system error when the HTTP client cannot be built
    /// (for example an unusable proxy URL).
    pub fn from_config(config: &FetcherConfig) -> Result<Self, FetchError> {
        let transport = ReqwestTransport::with_config(&config.transport)
            .map_err(|error| FetchError::system("", &error))?;
        Ok(Self::with_transport(Arc::new(transport)))
    }

    /// Creates a fetcher over any transport.
    #[must_use]
    pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Process-wide fetcher over the default transport, built on first use.
    ///
    /// # Errors
    ///
    /// Returns a system error when the HTTP client cannot be built.
    pub fn global() -> Result<&'static Self, FetchError> {
        if let Some(fetcher) = GLOBAL.get() {
            return Ok(fetcher);
        }
        let fetcher = Self::new()?;
        Ok(GLOBAL.get_or_init(|| fetcher))
    }

    /// Default transport of this fetcher.
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Builds a request from `input` and `init` and runs it.
    ///
    /// # Errors
    ///
    /// Type errors for invalid input (before any network I/O), otherwise any
    /// [`FetchError`] raised while awaiting the final response headers.
    pub async fn fetch(
        &self,
        input: impl Into<RequestInput>,
        init: RequestInit,
    ) -> Result<Response, FetchError> {
        let request = Request::new(input, init)?;
        self.send(request).await
    }

    /// Runs an already built request.
    ///
    /// # Errors
    ///
    /// Any [`FetchError`] raised while awaiting the final response headers.
    #[instrument(skip(self, request), fields(url = %request.url()))]
    pub async fn send(&self, request: Request) -> Result<Response, FetchError> {
        engine::execute(request, Arc::clone(&self.transport)).await
    }
}

/// Runs one exchange on the process-wide [`Fetcher`].
///
/// # Errors
///
/// See [`Fetcher::fetch`].
pub async fn fetch(
    input: impl Into<RequestInput>,
    init: RequestInit,
) -> Result<Response, FetchError> {
    let request = Request::new(input, init)?;
    let fetcher = match request.transport() {
        Some(transport) => Fetcher::with_transport(Arc::clone(transport)),
        None => Fetcher::global()?.clone(),
    };
    fetcher.send(request).await
}
