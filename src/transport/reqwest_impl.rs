//! Default transport over `reqwest`.
//!
//! The client never follows redirects and, unless built with transparent
//! decoding, never decodes `Content-Encoding`: both are driven by the fetch
//! engine. Header values travel as Latin-1.

use std::error::Error as StdError;
use std::panic::{AssertUnwindSafe, catch_unwind, set_hook, take_hook};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use futures_util::StreamExt;
use reqwest::header::{HeaderValue, PROXY_AUTHORIZATION};
use reqwest::{Client, ClientBuilder, Proxy};
use tracing::{debug, instrument, warn};
use url::Url;

use super::{
    Transport, TransportBody, TransportCapabilities, TransportError, TransportErrorKind,
    TransportRequest, TransportResponse,
};
use crate::fetch::constants::CONNECT_TIMEOUT_SECS;
use crate::fetch::{Credentials, FetchError};

/// Settings for [`ReqwestTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReqwestTransportConfig {
    /// TCP connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Explicit proxy URL for all schemes. Enables login events.
    pub proxy: Option<String>,
    /// Let reqwest decode gzip/deflate itself.
    pub transparent_decoding: bool,
}

impl Default for ReqwestTransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            proxy: None,
            transparent_decoding: false,
        }
    }
}

/// Transport backed by a pooled `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
    capabilities: TransportCapabilities,
    proxy: Option<Url>,
}

impl ReqwestTransport {
    /// Creates a transport with default settings.
    ///
    /// # Errors
    ///
    /// Returns an error when the underlying client cannot be built.
    pub fn new() -> Result<Self, TransportError> {
        Self::with_config(&ReqwestTransportConfig::default())
    }

    /// Creates a transport from explicit settings.
    ///
    /// # Errors
    ///
    /// Returns an error when the proxy URL is invalid or the client cannot be built.
    #[instrument(level = "debug", skip(config), fields(proxy = ?config.proxy))]
    pub fn with_config(config: &ReqwestTransportConfig) -> Result<Self, TransportError> {
        let client = build_client(config)?;
        Ok(Self {
            client,
            capabilities: TransportCapabilities {
                decodes_content: config.transparent_decoding,
                login_events: config.proxy.is_some(),
            },
            proxy: config.proxy.as_deref().and_then(parse_proxy_url),
        })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    fn kind(&self) -> &'static str {
        "reqwest"
    }

    fn capabilities(&self) -> TransportCapabilities {
        self.capabilities
    }

    fn proxy(&self) -> Option<&Url> {
        self.proxy.as_ref()
    }

    #[instrument(level = "debug", skip(self, request), fields(method = %request.method, url = %request.url))]
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes()).map_err(|error| {
            TransportError::with_source(
                TransportErrorKind::InvalidRequest,
                format!("invalid method {}", request.method),
                error,
            )
        })?;
        let url = request.url.to_string();
        let mut builder = self.client.request(method, request.url);

        for (name, value) in &request.headers {
            // hyper frames streamed bodies itself
            if name.eq_ignore_ascii_case("transfer-encoding") {
                continue;
            }
            let value = HeaderValue::from_bytes(&latin1_bytes(value)).map_err(|error| {
                TransportError::with_source(
                    TransportErrorKind::InvalidRequest,
                    format!("invalid value for header {name}"),
                    error,
                )
            })?;
            builder = builder.header(name.as_str(), value);
        }
        if let Some(credentials) = &request.proxy_credentials {
            builder = builder.header(PROXY_AUTHORIZATION, basic_authorization(credentials)?);
        }
        builder = match request.body {
            TransportBody::Empty => builder,
            TransportBody::Full(bytes) => builder.body(bytes),
            TransportBody::Stream(stream) => builder.body(reqwest::Body::wrap_stream(stream)),
        };

        let response = builder.send().await.map_err(|error| classify_error(&error))?;
        let status = response.status();
        debug!(status = status.as_u16(), "response headers received");

        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| (name.as_str().to_string(), latin1_string(value.as_bytes())))
            .collect();
        let body = response
            .bytes_stream()
            .map(move |chunk| chunk.map_err(|error| FetchError::system(&url, &classify_error(&error))))
            .boxed();

        Ok(TransportResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body,
        })
    }
}

fn latin1_bytes(value: &str) -> Vec<u8> {
    value
        .chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect()
}

fn latin1_string(bytes: &[u8]) -> String {
    bytes.iter().copied().map(char::from).collect()
}

fn basic_authorization(credentials: &Credentials) -> Result<HeaderValue, TransportError> {
    let token = base64::engine::general_purpose::STANDARD
        .encode(format!("{}:{}", credentials.username, credentials.password));
    let mut value = HeaderValue::from_str(&format!("Basic {token}")).map_err(|error| {
        TransportError::with_source(
            TransportErrorKind::InvalidRequest,
            "invalid proxy credentials",
            error,
        )
    })?;
    value.set_sensitive(true);
    Ok(value)
}

/// Maps a reqwest failure onto a transport error kind.
fn classify_error(error: &reqwest::Error) -> TransportError {
    let mut chain = vec![error.to_string()];
    let mut io_kind = None;
    let mut source: Option<&(dyn StdError + 'static)> = error.source();
    while let Some(current) = source {
        chain.push(current.to_string());
        if io_kind.is_none()
            && let Some(io) = current.downcast_ref::<std::io::Error>()
        {
            io_kind = Some(io.kind());
        }
        source = current.source();
    }
    let message = chain.join(": ");
    let lowered = message.to_ascii_lowercase();

    let kind = if error.is_timeout() {
        TransportErrorKind::TimedOut
    } else if let Some(kind) = io_kind.and_then(kind_from_io) {
        kind
    } else if lowered.contains("dns error") || lowered.contains("failed to lookup address") {
        TransportErrorKind::NameNotResolved
    } else if lowered.contains("certificate") || lowered.contains("tls") || lowered.contains("ssl") {
        TransportErrorKind::Tls
    } else if error.is_builder() {
        TransportErrorKind::InvalidRequest
    } else if error.is_decode() {
        TransportErrorKind::DecodingFailed
    } else if error.is_body() {
        TransportErrorKind::ConnectionReset
    } else if error.is_connect() {
        TransportErrorKind::ConnectionRefused
    } else {
        TransportErrorKind::Other
    };
    TransportError::new(kind, message)
}

fn kind_from_io(kind: std::io::ErrorKind) -> Option<TransportErrorKind> {
    use std::io::ErrorKind;

    match kind {
        ErrorKind::ConnectionRefused => Some(TransportErrorKind::ConnectionRefused),
        ErrorKind::ConnectionReset | ErrorKind::UnexpectedEof => {
            Some(TransportErrorKind::ConnectionReset)
        }
        ErrorKind::ConnectionAborted => Some(TransportErrorKind::ConnectionAborted),
        ErrorKind::TimedOut => Some(TransportErrorKind::TimedOut),
        ErrorKind::HostUnreachable => Some(TransportErrorKind::HostUnreachable),
        ErrorKind::NetworkUnreachable | ErrorKind::NetworkDown => {
            Some(TransportErrorKind::NetworkUnreachable)
        }
        ErrorKind::BrokenPipe => Some(TransportErrorKind::BrokenPipe),
        _ => None,
    }
}

/// Proxy URL as reqwest reads it: a bare `host:port` means `http://`.
fn parse_proxy_url(raw: &str) -> Option<Url> {
    if raw.contains("://") {
        Url::parse(raw).ok()
    } else {
        Url::parse(&format!("http://{raw}")).ok()
    }
}

fn build_client(config: &ReqwestTransportConfig) -> Result<Client, TransportError> {
    match try_build_client(config, false) {
        Ok(client) => Ok(client),
        Err(BuildClientFailure::Panic) => {
            warn!(
                "HTTP client builder panicked while loading system proxy settings; retrying with env-proxy fallback"
            );
            match try_build_client(config, true) {
                Ok(client) => Ok(client),
                Err(BuildClientFailure::Build(error)) => Err(error),
                Err(BuildClientFailure::Panic) => Err(TransportError::new(
                    TransportErrorKind::Other,
                    "HTTP client builder panicked while applying env-proxy fallback",
                )),
            }
        }
        Err(BuildClientFailure::Build(error)) => Err(error),
    }
}

enum BuildClientFailure {
    Panic,
    Build(TransportError),
}

// `catch_unwind` does not suppress panic-hook output, so the hook is silenced
// while a guarded build runs.
static CLIENT_BUILD_PANIC_HOOK_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

fn try_build_client(
    config: &ReqwestTransportConfig,
    disable_system_proxy_lookup: bool,
) -> Result<Client, BuildClientFailure> {
    catch_unwind_silent(AssertUnwindSafe(move || {
        #[cfg(test)]
        maybe_inject_client_build_panic(disable_system_proxy_lookup);

        let mut builder = base_client_builder(config)?;
        if disable_system_proxy_lookup && config.proxy.is_none() {
            builder = apply_env_proxy_fallback(builder.no_proxy());
        }
        builder.build().map_err(|error| {
            BuildClientFailure::Build(TransportError::with_source(
                TransportErrorKind::Other,
                "failed to build HTTP client",
                error,
            ))
        })
    }))
    .map_err(|_| BuildClientFailure::Panic)?
}

fn catch_unwind_silent<F, T>(operation: F) -> Result<T, Box<dyn std::any::Any + Send + 'static>>
where
    F: FnOnce() -> T + std::panic::UnwindSafe,
{
    let _panic_hook_guard = CLIENT_BUILD_PANIC_HOOK_LOCK
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    let previous_hook = take_hook();
    set_hook(Box::new(|_| {}));
    let outcome = catch_unwind(operation);
    set_hook(previous_hook);
    outcome
}

fn base_client_builder(config: &ReqwestTransportConfig) -> Result<ClientBuilder, BuildClientFailure> {
    let mut builder = Client::builder()
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .redirect(reqwest::redirect::Policy::none())
        .gzip(config.transparent_decoding)
        .deflate(config.transparent_decoding);
    if let Some(proxy) = &config.proxy {
        let proxy = Proxy::all(proxy).map_err(|error| {
            BuildClientFailure::Build(TransportError::with_source(
                TransportErrorKind::InvalidRequest,
                format!("invalid proxy URL {proxy}"),
                error,
            ))
        })?;
        builder = builder.proxy(proxy);
    }
    Ok(builder)
}

fn apply_env_proxy_fallback(mut builder: ClientBuilder) -> ClientBuilder {
    if let Some(proxy) = env_proxy_for_scheme("https")
        && let Ok(resolved) = Proxy::https(&proxy)
    {
        builder = builder.proxy(resolved);
    }
    if let Some(proxy) = env_proxy_for_scheme("http")
        && let Ok(resolved) = Proxy::http(&proxy)
    {
        builder = builder.proxy(resolved);
    }
    builder
}

fn env_proxy_for_scheme(scheme: &str) -> Option<String> {
    match scheme {
        "https" => find_first_proxy_var(&["HTTPS_PROXY", "https_proxy", "ALL_PROXY", "all_proxy"]),
        "http" => find_first_proxy_var(&["HTTP_PROXY", "http_proxy", "ALL_PROXY", "all_proxy"]),
        _ => None,
    }
}

fn find_first_proxy_var(names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| {
        std::env::var(name)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

#[cfg(test)]
static CLIENT_BUILD_PANIC_INJECTION_COUNT: std::sync::atomic::AtomicUsize =
    std::sync::atomic::AtomicUsize::new(0);

#[cfg(test)]
fn inject_client_build_panics(count: usize) {
    CLIENT_BUILD_PANIC_INJECTION_COUNT.store(count, std::sync::atomic::Ordering::SeqCst);
}

#[cfg(test)]
fn maybe_inject_client_build_panic(disable_system_proxy_lookup: bool) {
    use std::sync::atomic::Ordering;

    if disable_system_proxy_lookup {
        return;
    }

    if CLIENT_BUILD_PANIC_INJECTION_COUNT
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
            if count > 0 { Some(count - 1) } else { None }
        })
        .is_ok()
    {
        panic!("injected HTTP client builder panic");
    }
}
